//! Epoch: a quality-annotated, fixed-length analysis window

use crate::error::{EegError, EegResult};
use serde::{Deserialize, Serialize};

/// One channel's slice of an epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEpoch {
    /// `duration` consecutive filtered samples, oldest first
    pub samples: Vec<f32>,
    /// Dispersion statistic over `samples`
    pub quality: f32,
}

/// Fixed-length window of consecutive filtered samples, decomposed per channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Epoch {
    /// Per-channel samples and quality, ordered by channel index
    pub per_channel: Vec<ChannelEpoch>,
    /// Synchronized-stream index of the first sample in the window
    pub window_start_index: u64,
    /// Sampling rate the window was recorded at (Hz)
    pub sampling_rate: u32,
}

impl Epoch {
    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.per_channel.len()
    }

    /// Samples per channel
    pub fn duration(&self) -> usize {
        self.per_channel.first().map_or(0, |ch| ch.samples.len())
    }

    /// Index of the last sample in the window
    pub fn window_end_index(&self) -> u64 {
        (self.window_start_index + self.duration() as u64).saturating_sub(1)
    }

    /// Window start in seconds since the pipeline instance started
    pub fn start_time_secs(&self) -> f64 {
        if self.sampling_rate == 0 {
            return 0.0;
        }
        self.window_start_index as f64 / self.sampling_rate as f64
    }

    /// Channel slice by index
    pub fn channel(&self, channel: usize) -> EegResult<&ChannelEpoch> {
        self.per_channel.get(channel).ok_or(EegError::ChannelOutOfRange {
            channel,
            channel_count: self.per_channel.len(),
        })
    }

    /// Quality value of every channel, ordered by channel index
    pub fn qualities(&self) -> Vec<f32> {
        self.per_channel.iter().map(|ch| ch.quality).collect()
    }

    /// Time axis in milliseconds relative to the window start, one tick per sample
    pub fn time_axis_ms(&self) -> Vec<f32> {
        let srate = self.sampling_rate.max(1) as f32;
        (0..self.duration())
            .map(|i| i as f32 * 1000.0 / srate)
            .collect()
    }

    /// Serialize to the JSON shape consumers render from
    pub fn to_json(&self) -> EegResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
