//! Pipeline instance: one live Synchronizer -> Filter -> Windower -> Annotator chain

use crate::filters::{BandpassFilter, FilterConfig};
use crate::quality::QualityAnnotator;
use crate::stage::Stage;
use crate::synchronizer::SampleSynchronizer;
use crate::windower::EpochWindower;
use eeg_core::{EegError, EegResult, Epoch, PipelineSettings, RawSample, SensorEvent, SyncedTuple};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

// How far one channel may run ahead of a stalled one
const MAX_LEAD_SECONDS: usize = 10;

/// Counters for one pipeline instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceStats {
    pub samples_received: u64,
    pub tuples_filtered: u64,
    pub epochs_emitted: u64,
}

/// The chain built from one `PipelineSettings` value.
///
/// Owns every stage and all per-channel history. Nothing is shared with any
/// other instance, including one built from equal settings.
pub struct PipelineInstance {
    id: Uuid,
    settings: PipelineSettings,
    synchronizer: SampleSynchronizer,
    filter: BandpassFilter,
    windower: EpochWindower,
    annotator: QualityAnnotator,
    stats: InstanceStats,
}

impl PipelineInstance {
    /// Validate `settings` and construct every stage fresh.
    ///
    /// On `InvalidConfig` no stage has been constructed.
    pub fn build(settings: &PipelineSettings) -> EegResult<Self> {
        settings.validate()?;

        let synchronizer = SampleSynchronizer::new(settings.nb_channels)?
            .with_max_lead(settings.srate as usize * MAX_LEAD_SECONDS);
        let filter = BandpassFilter::new(FilterConfig::from_settings(settings), settings.nb_channels)?;
        let windower = EpochWindower::new(settings.duration, settings.interval, settings.nb_channels)?;
        let annotator = QualityAnnotator::new(settings.srate);

        let instance = PipelineInstance {
            id: Uuid::new_v4(),
            settings: settings.clone(),
            synchronizer,
            filter,
            windower,
            annotator,
            stats: InstanceStats::default(),
        };

        info!(
            instance = %instance.id,
            channels = settings.nb_channels,
            srate = settings.srate,
            band = ?(settings.cut_off_low, settings.cut_off_high),
            duration = settings.duration,
            interval = settings.interval,
            "pipeline instance built"
        );

        Ok(instance)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn stats(&self) -> &InstanceStats {
        &self.stats
    }

    /// Consume one sensor event; a device fault is an `UpstreamFault`
    pub fn feed(&mut self, event: SensorEvent) -> EegResult<Option<Epoch>> {
        match event {
            SensorEvent::Sample(sample) => self.feed_sample(sample),
            SensorEvent::Fault { reason } => Err(EegError::UpstreamFault { reason }),
        }
    }

    /// Push one raw reading through the whole chain
    pub fn feed_sample(&mut self, sample: RawSample) -> EegResult<Option<Epoch>> {
        self.stats.samples_received += 1;

        match self.synchronizer.process(sample)? {
            Some(tuple) => self.feed_tuple(tuple),
            None => Ok(None),
        }
    }

    /// Push an already aligned tuple, bypassing the synchronizer
    pub fn feed_tuple(&mut self, tuple: SyncedTuple) -> EegResult<Option<Epoch>> {
        let filtered = match self.filter.process(tuple)? {
            Some(filtered) => filtered,
            None => return Ok(None),
        };
        self.stats.tuples_filtered += 1;

        let window = match self.windower.process(filtered)? {
            Some(window) => window,
            None => return Ok(None),
        };

        let epoch = self.annotator.process(window)?;
        if let Some(epoch) = &epoch {
            self.stats.epochs_emitted += 1;
            debug!(
                instance = %self.id,
                start = epoch.window_start_index,
                qualities = ?epoch.qualities(),
                "epoch emitted"
            );
        }
        Ok(epoch)
    }

    /// Drop all per-stage history, as if freshly built
    pub fn reset(&mut self) {
        self.synchronizer.reset();
        self.filter.reset();
        self.windower.reset();
        self.annotator.reset();
        self.stats = InstanceStats::default();
    }
}
