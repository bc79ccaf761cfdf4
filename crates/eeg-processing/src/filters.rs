//! Causal band-pass filtering for multi-channel EEG

use crate::stage::Stage;
use eeg_core::{EegError, EegResult, PipelineSettings, SyncedTuple};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Butterworth order applied to each band edge unless configured otherwise
pub const DEFAULT_ORDER: usize = 2;

/// Band-pass filter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Lower band edge (Hz)
    pub low_cutoff: f32,
    /// Upper band edge (Hz)
    pub high_cutoff: f32,
    /// Sampling rate (Hz)
    pub sampling_rate: f32,
    /// Butterworth order of each edge; must be even
    pub order: usize,
}

impl FilterConfig {
    /// Create bandpass filter configuration
    pub fn bandpass(low_cutoff: f32, high_cutoff: f32, sampling_rate: f32) -> Self {
        Self {
            low_cutoff,
            high_cutoff,
            sampling_rate,
            order: DEFAULT_ORDER,
        }
    }

    /// Band-pass configuration for a pipeline's settings
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::bandpass(settings.cut_off_low, settings.cut_off_high, settings.srate as f32)
    }

    /// Replace the per-edge order
    pub fn with_order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    pub fn validate(&self) -> EegResult<()> {
        if !(self.sampling_rate > 0.0) {
            return Err(EegError::invalid_config("sampling rate must be positive"));
        }

        if !(self.low_cutoff > 0.0) {
            return Err(EegError::invalid_config("low cutoff must be positive"));
        }

        if self.low_cutoff >= self.high_cutoff {
            return Err(EegError::invalid_config(
                "Low cutoff must be less than high cutoff",
            ));
        }

        if self.high_cutoff >= self.sampling_rate / 2.0 {
            return Err(EegError::invalid_config(
                "High cutoff must be less than Nyquist frequency",
            ));
        }

        if self.order < 2 || self.order % 2 != 0 {
            return Err(EegError::invalid_config(format!(
                "filter order must be even and at least 2, got {}",
                self.order
            )));
        }

        Ok(())
    }
}

/// Single biquad section (2nd order)
#[derive(Debug, Clone)]
struct BiquadSection {
    // Coefficients: y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2] - a1*y[n-1] - a2*y[n-2]
    b0: f64, b1: f64, b2: f64,
    a1: f64, a2: f64,
    // State per channel
    x1: Vec<f64>, x2: Vec<f64>, // Input history
    y1: Vec<f64>, y2: Vec<f64>, // Output history
}

impl BiquadSection {
    fn new(channel_count: usize) -> Self {
        Self {
            b0: 1.0, b1: 0.0, b2: 0.0,
            a1: 0.0, a2: 0.0,
            x1: vec![0.0; channel_count],
            x2: vec![0.0; channel_count],
            y1: vec![0.0; channel_count],
            y2: vec![0.0; channel_count],
        }
    }

    /// Butterworth lowpass section with quality factor `q`
    fn lowpass(cutoff: f64, fs: f64, q: f64, channel_count: usize) -> Self {
        // Pre-warp frequency for bilinear transform
        let k = (PI * cutoff / fs).tan();
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);

        let mut biquad = BiquadSection::new(channel_count);
        biquad.b0 = k2 * norm;
        biquad.b1 = 2.0 * biquad.b0;
        biquad.b2 = biquad.b0;
        biquad.a1 = 2.0 * (k2 - 1.0) * norm;
        biquad.a2 = (1.0 - k / q + k2) * norm;
        biquad
    }

    /// Butterworth highpass section with quality factor `q`
    fn highpass(cutoff: f64, fs: f64, q: f64, channel_count: usize) -> Self {
        let k = (PI * cutoff / fs).tan();
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);

        let mut biquad = BiquadSection::new(channel_count);
        biquad.b0 = norm;
        biquad.b1 = -2.0 * biquad.b0;
        biquad.b2 = biquad.b0;
        biquad.a1 = 2.0 * (k2 - 1.0) * norm;
        biquad.a2 = (1.0 - k / q + k2) * norm;
        biquad
    }

    fn process_sample(&mut self, input: f64, channel: usize) -> f64 {
        let output = self.b0 * input + self.b1 * self.x1[channel] + self.b2 * self.x2[channel]
            - self.a1 * self.y1[channel] - self.a2 * self.y2[channel];

        self.x2[channel] = self.x1[channel];
        self.x1[channel] = input;
        self.y2[channel] = self.y1[channel];
        self.y1[channel] = output;

        output
    }

    fn reset(&mut self) {
        self.x1.fill(0.0);
        self.x2.fill(0.0);
        self.y1.fill(0.0);
        self.y2.fill(0.0);
    }
}

/// Quality factors of the biquad sections of an even-order Butterworth filter
fn butterworth_q_factors(order: usize) -> Vec<f64> {
    (0..order / 2)
        .map(|k| {
            let theta = PI * (2 * k + 1) as f64 / (2 * order) as f64;
            1.0 / (2.0 * theta.cos())
        })
        .collect()
}

/// Streaming Butterworth band-pass: a highpass cascade at the low edge
/// followed by a lowpass cascade at the high edge.
///
/// Output depends only on current and past inputs. History is owned per
/// channel by this instance.
pub struct BandpassFilter {
    config: FilterConfig,
    biquads: Vec<BiquadSection>,
    channel_count: usize,
}

impl BandpassFilter {
    /// Design the filter; fails with `InvalidConfig` on an impossible band
    pub fn new(config: FilterConfig, channel_count: usize) -> EegResult<Self> {
        config.validate()?;

        if channel_count == 0 {
            return Err(EegError::invalid_config("filter needs at least one channel"));
        }

        let fs = config.sampling_rate as f64;
        let q_factors = butterworth_q_factors(config.order);

        let mut biquads = Vec::with_capacity(q_factors.len() * 2);
        for &q in &q_factors {
            biquads.push(BiquadSection::highpass(config.low_cutoff as f64, fs, q, channel_count));
        }
        for &q in &q_factors {
            biquads.push(BiquadSection::lowpass(config.high_cutoff as f64, fs, q, channel_count));
        }

        Ok(BandpassFilter {
            config,
            biquads,
            channel_count,
        })
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Filter one reading of one channel
    pub fn filter_sample(&mut self, sample: f32, channel: usize) -> f32 {
        let mut value = sample as f64;
        for biquad in &mut self.biquads {
            value = biquad.process_sample(value, channel);
        }
        value as f32
    }

    /// Filter a tuple, one value per channel
    pub fn filter_tuple(&mut self, tuple: SyncedTuple) -> EegResult<SyncedTuple> {
        if tuple.values.len() != self.channel_count {
            return Err(EegError::upstream_fault(format!(
                "tuple {} has {} channels, filter expects {}",
                tuple.index,
                tuple.values.len(),
                self.channel_count
            )));
        }

        let values = tuple
            .values
            .iter()
            .enumerate()
            .map(|(channel, &value)| self.filter_sample(value, channel))
            .collect();

        Ok(SyncedTuple::new(tuple.index, values))
    }
}

impl Stage for BandpassFilter {
    type Input = SyncedTuple;
    type Output = SyncedTuple;

    fn process(&mut self, input: SyncedTuple) -> EegResult<Option<SyncedTuple>> {
        self.filter_tuple(input).map(Some)
    }

    fn name(&self) -> &str {
        "Bandpass Filter"
    }

    fn reset(&mut self) {
        for biquad in &mut self.biquads {
            biquad.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f32 = 256.0;

    fn sine(freq: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / FS).sin())
            .collect()
    }

    fn rms(data: &[f32]) -> f32 {
        (data.iter().map(|x| x * x).sum::<f32>() / data.len() as f32).sqrt()
    }

    /// RMS gain after letting the filter settle for two seconds
    fn steady_state_gain(filter: &mut BandpassFilter, input: &[f32]) -> f32 {
        let output: Vec<f32> = input.iter().map(|&x| filter.filter_sample(x, 0)).collect();
        let settle = 2 * FS as usize;
        rms(&output[settle..]) / rms(&input[settle..])
    }

    fn eeg_filter() -> BandpassFilter {
        BandpassFilter::new(FilterConfig::bandpass(2.0, 20.0, FS), 1).unwrap()
    }

    #[test]
    fn test_passband_preserved() {
        let mut filter = eeg_filter();
        let gain = steady_state_gain(&mut filter, &sine(10.0, 6 * FS as usize));
        assert!(gain > 0.9, "10 Hz gain was {}", gain);
    }

    #[test]
    fn test_stopband_attenuated() {
        let mut filter = eeg_filter();
        let gain = steady_state_gain(&mut filter, &sine(60.0, 6 * FS as usize));
        assert!(gain < 0.2, "60 Hz gain was {}", gain);
    }

    #[test]
    fn test_dc_removed() {
        let mut filter = eeg_filter();
        let input = vec![50.0; 10 * FS as usize];
        let output: Vec<f32> = input.iter().map(|&x| filter.filter_sample(x, 0)).collect();
        assert!(output.last().unwrap().abs() < 0.5);
    }

    #[test]
    fn test_causal_impulse_response() {
        let mut filter = eeg_filter();
        let mut input = vec![0.0; 64];
        input[32] = 1.0;

        let output: Vec<f32> = input.iter().map(|&x| filter.filter_sample(x, 0)).collect();

        assert!(output[..32].iter().all(|&y| y == 0.0));
        assert!(output[32] != 0.0);
    }

    #[test]
    fn test_channels_are_independent() {
        let mut filter = BandpassFilter::new(FilterConfig::bandpass(2.0, 20.0, FS), 2).unwrap();

        for i in 0..100 {
            let tuple = SyncedTuple::new(i, vec![(i as f32).sin() * 10.0, 0.0]);
            let out = filter.filter_tuple(tuple).unwrap();
            assert_eq!(out.values[1], 0.0);
            assert_eq!(out.index, i);
        }
    }

    #[test]
    fn test_higher_order_is_steeper() {
        let input = sine(40.0, 6 * FS as usize);

        let mut order2 = eeg_filter();
        let mut order4 =
            BandpassFilter::new(FilterConfig::bandpass(2.0, 20.0, FS).with_order(4), 1).unwrap();

        assert!(steady_state_gain(&mut order4, &input) < steady_state_gain(&mut order2, &input));
    }

    #[test]
    fn test_invalid_band_rejected() {
        let inverted = BandpassFilter::new(FilterConfig::bandpass(20.0, 2.0, FS), 1);
        assert!(matches!(inverted, Err(EegError::InvalidConfig { .. })));

        let above_nyquist = BandpassFilter::new(FilterConfig::bandpass(2.0, 128.0, FS), 1);
        assert!(matches!(above_nyquist, Err(EegError::InvalidConfig { .. })));

        let odd_order = BandpassFilter::new(FilterConfig::bandpass(2.0, 20.0, FS).with_order(3), 1);
        assert!(matches!(odd_order, Err(EegError::InvalidConfig { .. })));
    }

    #[test]
    fn test_wrong_width_tuple_rejected() {
        let mut filter = eeg_filter();
        let result = filter.filter_tuple(SyncedTuple::new(0, vec![1.0, 2.0]));
        assert!(matches!(result, Err(EegError::UpstreamFault { .. })));
    }

    #[test]
    fn test_reset_restores_initial_response() {
        let mut filter = eeg_filter();
        let first = filter.filter_sample(1.0, 0);
        for _ in 0..50 {
            filter.filter_sample(3.0, 0);
        }
        filter.reset();
        assert_eq!(filter.filter_sample(1.0, 0), first);
    }
}
