//! EEG-Simulation: synthetic EEG sensor
//!
//! Stands in for a headset on the sensor side of the pipeline, for tests and
//! for running the host without hardware.

pub mod patterns;
pub mod real_time_stream;
pub mod simulator;

pub use patterns::*;
pub use real_time_stream::*;
pub use simulator::*;
