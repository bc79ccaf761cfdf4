//! Sample synchronizer: pairs per-channel readings into channel-aligned tuples

use crate::stage::Stage;
use eeg_core::{EegError, EegResult, RawSample, SyncedTuple};
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

/// Readings a channel may run ahead of a stalled channel before its oldest are dropped
pub const DEFAULT_MAX_LEAD: usize = 4096;

/// Aligns independently arriving per-channel samples.
///
/// Tuple `i` holds the `i`-th reading seen on every channel. Pairing is by
/// arrival order, not timestamp. A tuple is withheld until its slowest
/// channel has delivered.
///
/// A fresh synchronizer may join a packetized stream partway through a round,
/// so the first tuple starts at the highest first index seen across channels;
/// earlier readings of the other channels are dropped. After that, arrival
/// order decides.
pub struct SampleSynchronizer {
    // Readings received but not yet paired, per channel, with their sensor index
    queues: Vec<VecDeque<(u64, f32)>>,
    // Last sequence index seen, per channel
    last_index: Vec<Option<u64>>,
    next_tuple: u64,
    // Queues start at a common sensor index
    aligned: bool,
    // Paired indices agreed on the last tuple
    in_step: bool,
    max_lead: usize,
    lead_warned: bool,
    misaligned: u64,
    dropped: u64,
}

impl SampleSynchronizer {
    /// Create a synchronizer for `channel_count` channels
    pub fn new(channel_count: usize) -> EegResult<Self> {
        if channel_count == 0 {
            return Err(EegError::invalid_config("synchronizer needs at least one channel"));
        }

        Ok(SampleSynchronizer {
            queues: vec![VecDeque::new(); channel_count],
            last_index: vec![None; channel_count],
            next_tuple: 0,
            aligned: false,
            in_step: true,
            max_lead: DEFAULT_MAX_LEAD,
            lead_warned: false,
            misaligned: 0,
            dropped: 0,
        })
    }

    /// Cap on unpaired readings held per channel
    pub fn with_max_lead(mut self, max_lead: usize) -> Self {
        self.max_lead = max_lead.max(1);
        self
    }

    pub fn channel_count(&self) -> usize {
        self.queues.len()
    }

    /// Number of tuples emitted so far
    pub fn tuples_emitted(&self) -> u64 {
        self.next_tuple
    }

    /// Tuples whose channels carried different sensor indices
    pub fn misaligned_tuples(&self) -> u64 {
        self.misaligned
    }

    /// Readings discarded because their channel ran too far ahead
    pub fn dropped_samples(&self) -> u64 {
        self.dropped
    }

    /// Channels the next tuple is waiting on
    pub fn lagging_channels(&self) -> Vec<usize> {
        self.queues
            .iter()
            .enumerate()
            .filter(|(_, queue)| queue.is_empty())
            .map(|(channel, _)| channel)
            .collect()
    }

    /// Accept one reading; returns a tuple once every channel has one queued
    pub fn push(&mut self, sample: RawSample) -> EegResult<Option<SyncedTuple>> {
        self.check_sample(&sample)?;

        self.last_index[sample.channel] = Some(sample.index);
        let queue = &mut self.queues[sample.channel];
        queue.push_back((sample.index, sample.value));
        let overflow = queue.len() > self.max_lead && queue.pop_front().is_some();
        if overflow {
            self.note_overflow(sample.channel);
        }

        if !self.aligned {
            self.align();
        }

        if self.queues.iter().any(VecDeque::is_empty) {
            trace!(channel = sample.channel, lagging = ?self.lagging_channels(), "waiting for channels");
            return Ok(None);
        }

        let mut indices = Vec::with_capacity(self.queues.len());
        let mut values = Vec::with_capacity(self.queues.len());
        for (index, value) in self.queues.iter_mut().filter_map(VecDeque::pop_front) {
            indices.push(index);
            values.push(value);
        }
        self.check_pairing(&indices);
        self.lead_warned = false;

        let tuple = SyncedTuple::new(self.next_tuple, values);
        self.next_tuple += 1;
        Ok(Some(tuple))
    }

    // Drop readings older than the highest front index once every channel has
    // delivered something at or above it
    fn align(&mut self) {
        if self.queues.iter().any(VecDeque::is_empty) {
            return;
        }

        let start = self
            .queues
            .iter()
            .filter_map(|queue| queue.front().map(|(index, _)| *index))
            .max()
            .unwrap_or(0);

        let mut skipped = 0;
        for queue in &mut self.queues {
            while queue.front().is_some_and(|(index, _)| *index < start) {
                queue.pop_front();
                skipped += 1;
            }
        }

        self.aligned = self.queues.iter().all(|queue| !queue.is_empty());
        if skipped > 0 {
            debug!(start, skipped, "dropped readings from before the first common index");
        }
    }

    fn check_pairing(&mut self, indices: &[u64]) {
        let lowest = indices.iter().min().copied().unwrap_or(0);
        let highest = indices.iter().max().copied().unwrap_or(0);

        if lowest != highest {
            self.misaligned += 1;
            if self.in_step {
                warn!(
                    tuple = self.next_tuple,
                    indices = ?indices,
                    "channels paired readings with different sensor indices"
                );
            }
            self.in_step = false;
        } else if !self.in_step {
            debug!(tuple = self.next_tuple, index = lowest, "channels back in step");
            self.in_step = true;
        }
    }

    fn note_overflow(&mut self, channel: usize) {
        self.dropped += 1;
        if !self.lead_warned {
            self.lead_warned = true;
            warn!(
                channel,
                lagging = ?self.lagging_channels(),
                max_lead = self.max_lead,
                "channel ran too far ahead of stalled channels, dropping its oldest readings"
            );
        }
    }

    fn check_sample(&self, sample: &RawSample) -> EegResult<()> {
        if sample.channel >= self.queues.len() {
            return Err(EegError::upstream_fault(format!(
                "sample for channel {} but only {} channels configured",
                sample.channel,
                self.queues.len()
            )));
        }

        if !sample.value.is_finite() {
            return Err(EegError::upstream_fault(format!(
                "non-finite reading on channel {} at index {}",
                sample.channel, sample.index
            )));
        }

        if let Some(last) = self.last_index[sample.channel] {
            if sample.index <= last {
                return Err(EegError::upstream_fault(format!(
                    "channel {} index went from {} to {}",
                    sample.channel, last, sample.index
                )));
            }

            if sample.index > last + 1 {
                warn!(
                    channel = sample.channel,
                    missing = sample.index - last - 1,
                    "channel skipped samples; pairing by arrival order may misalign channels"
                );
            }
        }

        Ok(())
    }
}

impl Stage for SampleSynchronizer {
    type Input = RawSample;
    type Output = SyncedTuple;

    fn process(&mut self, input: RawSample) -> EegResult<Option<SyncedTuple>> {
        self.push(input)
    }

    fn name(&self) -> &str {
        "Sample Synchronizer"
    }

    fn reset(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
        self.last_index.fill(None);
        self.next_tuple = 0;
        self.aligned = false;
        self.in_step = true;
        self.lead_warned = false;
        self.misaligned = 0;
        self.dropped = 0;
    }

    fn pending(&self) -> usize {
        self.queues.iter().map(VecDeque::len).max().unwrap_or(0)
    }
}
