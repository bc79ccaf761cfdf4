//! Epoch windower: fixed-size, fixed-stride sliding windows over filtered tuples

use crate::stage::Stage;
use eeg_core::{EegError, EegResult, SyncedTuple};
use std::collections::VecDeque;

/// A window of consecutive tuples, decomposed per channel, not yet annotated
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    /// Index of the first tuple in the window
    pub start_index: u64,
    /// `duration` samples per channel, oldest first
    pub per_channel: Vec<Vec<f32>>,
}

impl Window {
    pub fn len(&self) -> usize {
        self.per_channel.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Buffers filtered tuples and cuts a window every `interval` samples once
/// `duration` samples are available.
///
/// `interval < duration` gives overlapping windows sharing
/// `duration - interval` samples; `interval > duration` skips
/// `interval - duration` samples between windows.
pub struct EpochWindower {
    duration: usize,
    interval: usize,
    // Retained samples, per channel
    buffers: Vec<VecDeque<f32>>,
    // Tuple index of the oldest retained sample
    front_index: u64,
    // Samples still to discard before the next window may start
    skip_remaining: usize,
}

impl EpochWindower {
    pub fn new(duration: usize, interval: usize, channel_count: usize) -> EegResult<Self> {
        if duration == 0 {
            return Err(EegError::invalid_config("epoch duration must be positive"));
        }
        if interval == 0 {
            return Err(EegError::invalid_config("epoch interval must be positive"));
        }
        if channel_count == 0 {
            return Err(EegError::invalid_config("windower needs at least one channel"));
        }

        Ok(EpochWindower {
            duration,
            interval,
            buffers: vec![VecDeque::with_capacity(duration); channel_count],
            front_index: 0,
            skip_remaining: 0,
        })
    }

    pub fn duration(&self) -> usize {
        self.duration
    }

    pub fn interval(&self) -> usize {
        self.interval
    }

    /// Samples currently buffered per channel
    pub fn buffered(&self) -> usize {
        self.buffers.first().map_or(0, VecDeque::len)
    }

    /// Append a tuple; returns a window when `duration` samples are buffered
    pub fn push(&mut self, tuple: SyncedTuple) -> EegResult<Option<Window>> {
        if tuple.values.len() != self.buffers.len() {
            return Err(EegError::upstream_fault(format!(
                "tuple {} has {} channels, windower expects {}",
                tuple.index,
                tuple.values.len(),
                self.buffers.len()
            )));
        }

        if self.skip_remaining > 0 {
            self.skip_remaining -= 1;
            return Ok(None);
        }

        if self.buffered() == 0 {
            self.front_index = tuple.index;
        }
        for (buffer, &value) in self.buffers.iter_mut().zip(&tuple.values) {
            buffer.push_back(value);
        }

        if self.buffered() < self.duration {
            return Ok(None);
        }

        let window = Window {
            start_index: self.front_index,
            per_channel: self
                .buffers
                .iter()
                .map(|buffer| buffer.iter().copied().collect())
                .collect(),
        };
        self.advance();

        Ok(Some(window))
    }

    // Move the window start forward by `interval` samples
    fn advance(&mut self) {
        let drop = self.interval.min(self.duration);
        for buffer in &mut self.buffers {
            buffer.drain(..drop);
        }
        self.front_index += drop as u64;
        self.skip_remaining = self.interval.saturating_sub(self.duration);
    }
}

impl Stage for EpochWindower {
    type Input = SyncedTuple;
    type Output = Window;

    fn process(&mut self, input: SyncedTuple) -> EegResult<Option<Window>> {
        self.push(input)
    }

    fn name(&self) -> &str {
        "Epoch Windower"
    }

    fn reset(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
        self.front_index = 0;
        self.skip_remaining = 0;
    }

    fn pending(&self) -> usize {
        self.buffered()
    }
}
