//! EEG-Processing: streaming epoching pipeline for multi-channel EEG
//!
//! Sample synchronization, causal band-pass filtering, sliding-window
//! epoching, per-channel quality annotation and broadcast distribution.

pub mod stage;
pub mod synchronizer;
pub mod filters;
pub mod windower;
pub mod quality;
pub mod pipeline;
pub mod config;
pub mod hub;

pub use stage::Stage;
pub use synchronizer::SampleSynchronizer;
pub use filters::{BandpassFilter, FilterConfig};
pub use windower::{EpochWindower, Window};
pub use quality::{standard_deviation, QualityAnnotator};
pub use pipeline::{InstanceStats, PipelineInstance};
pub use config::HubConfig;
pub use hub::{
    EpochHub, HubStats, HubStatus, RebuildOutcome, RecvError, SampleSource, Subscription,
};
