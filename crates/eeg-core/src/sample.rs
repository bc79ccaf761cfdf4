//! Raw sensor samples and channel-aligned tuples

use serde::{Deserialize, Serialize};

/// One channel's instantaneous reading as emitted by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Channel (electrode) index, `0..nbChannels`
    pub channel: usize,
    /// Per-channel sequence index, monotonically increasing
    pub index: u64,
    /// Reading in microvolts
    pub value: f32,
}

impl RawSample {
    pub fn new(channel: usize, index: u64, value: f32) -> Self {
        Self { channel, index, value }
    }
}

/// Event on the sensor stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SensorEvent {
    /// A reading
    Sample(RawSample),
    /// The device reported a failure
    Fault { reason: String },
}

impl From<RawSample> for SensorEvent {
    fn from(sample: RawSample) -> Self {
        SensorEvent::Sample(sample)
    }
}

/// One reading per channel, all taken at the same per-channel position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedTuple {
    /// Position of this tuple in the synchronized stream
    pub index: u64,
    /// One value per channel, ordered by channel index
    pub values: Vec<f32>,
}

impl SyncedTuple {
    pub fn new(index: u64, values: Vec<f32>) -> Self {
        Self { index, values }
    }

    /// Number of channels in the tuple
    pub fn channel_count(&self) -> usize {
        self.values.len()
    }
}

/// Interleave `tuples` into per-channel sample events, channel by channel
/// within each tuple. Handy for feeding recorded data back through a pipeline.
pub fn interleave(tuples: &[SyncedTuple]) -> Vec<SensorEvent> {
    tuples
        .iter()
        .flat_map(|tuple| {
            tuple
                .values
                .iter()
                .enumerate()
                .map(move |(channel, &value)| {
                    SensorEvent::Sample(RawSample::new(channel, tuple.index, value))
                })
        })
        .collect()
}
