//! EEG-Core: Foundation types for streaming EEG epoching
//!
//! Sample, epoch and settings types shared by the processing pipeline and
//! the sensor collaborators that feed it.

pub mod error;
pub mod sample;
pub mod epoch;
pub mod settings;

pub use error::{EegError, EegResult};
pub use sample::*;
pub use epoch::*;
pub use settings::{PipelineSettings, SettingsChange};
