//! Per-channel quality annotation of epochs

use crate::stage::Stage;
use crate::windower::Window;
use eeg_core::{ChannelEpoch, Epoch, EegResult};

/// Population standard deviation: `sqrt(mean((x - mean(x))^2))`.
///
/// Accumulates in f64; an empty slice yields 0.
pub fn standard_deviation(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }

    let n = values.len() as f64;
    let mean = values.iter().map(|&x| x as f64).sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|&x| (x as f64 - mean).powi(2))
        .sum::<f64>()
        / n;

    variance.sqrt() as f32
}

/// Turns windows into epochs by attaching a standard deviation to every channel.
/// Keeps no state between epochs.
pub struct QualityAnnotator {
    sampling_rate: u32,
}

impl QualityAnnotator {
    pub fn new(sampling_rate: u32) -> Self {
        Self { sampling_rate }
    }

    pub fn annotate(&self, window: Window) -> Epoch {
        let per_channel = window
            .per_channel
            .into_iter()
            .map(|samples| {
                let quality = standard_deviation(&samples);
                ChannelEpoch { samples, quality }
            })
            .collect();

        Epoch {
            per_channel,
            window_start_index: window.start_index,
            sampling_rate: self.sampling_rate,
        }
    }
}

impl Stage for QualityAnnotator {
    type Input = Window;
    type Output = Epoch;

    fn process(&mut self, input: Window) -> EegResult<Option<Epoch>> {
        Ok(Some(self.annotate(input)))
    }

    fn name(&self) -> &str {
        "Quality Annotator"
    }

    fn reset(&mut self) {}
}
