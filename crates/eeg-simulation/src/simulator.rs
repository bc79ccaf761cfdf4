//! Synthetic multi-channel EEG sensor
//!
//! Emits readings the way a consumer headset does: each channel delivers its
//! samples in packets of twelve, one channel after the other, so at any moment
//! the channels are out of step with each other.

use crate::patterns::EegPattern;
use eeg_core::{EegError, EegResult, RawSample, SensorEvent};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use tracing::debug;

/// Samples per channel packet sent by a Muse headset
pub const MUSE_PACKET_SIZE: usize = 12;

/// Configuration for the synthetic sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorConfig {
    /// Number of electrodes
    pub nb_channels: usize,
    /// Sampling rate in Hz
    pub srate: u32,
    /// Samples per channel packet
    pub packet_size: usize,
    /// Deterministic signal shape
    pub pattern: EegPattern,
    /// Gaussian background noise, microvolts
    pub noise_std: f32,
    /// Power line interference frequency (50/60Hz)
    pub line_frequency: Option<f32>,
    /// Power line interference amplitude, microvolts
    pub line_amplitude: f32,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            nb_channels: 4,
            srate: 256,
            packet_size: MUSE_PACKET_SIZE,
            pattern: EegPattern::default(),
            noise_std: 5.0,
            line_frequency: Some(50.0),
            line_amplitude: 2.0,
            seed: None,
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> EegResult<()> {
        if self.nb_channels == 0 {
            return Err(EegError::invalid_config("simulator needs at least one channel"));
        }
        if self.srate == 0 {
            return Err(EegError::invalid_config("simulator sampling rate must be positive"));
        }
        if self.packet_size == 0 {
            return Err(EegError::invalid_config("packet size must be positive"));
        }
        if !self.noise_std.is_finite() || self.noise_std < 0.0 {
            return Err(EegError::invalid_config(format!(
                "noise standard deviation {} must be finite and non-negative",
                self.noise_std
            )));
        }
        Ok(())
    }

    /// Seconds covered by one packet
    pub fn packet_seconds(&self) -> f32 {
        self.packet_size as f32 / self.srate as f32
    }
}

/// Synthetic EEG sensor
pub struct SensorSimulator {
    config: SimulatorConfig,
    rng: StdRng,
    noise: Normal<f32>,
    next_index: Vec<u64>,
    next_channel: usize,
}

impl SensorSimulator {
    pub fn new(config: SimulatorConfig) -> EegResult<Self> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let noise = noise_distribution(config.noise_std)?;
        let next_index = vec![0; config.nb_channels];

        Ok(SensorSimulator {
            config,
            rng,
            noise,
            next_index,
            next_channel: 0,
        })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Next packet: `packet_size` consecutive readings of one channel.
    /// Channels take turns.
    pub fn next_packet(&mut self) -> Vec<RawSample> {
        let channel = self.next_channel;
        self.next_channel = (self.next_channel + 1) % self.config.nb_channels;
        self.packet_for(channel, self.config.packet_size)
    }

    /// One packet from every channel
    pub fn next_round(&mut self) -> Vec<SensorEvent> {
        (0..self.config.nb_channels)
            .flat_map(|_| self.next_packet())
            .map(SensorEvent::Sample)
            .collect()
    }

    /// `samples` more readings per channel, in packets.
    ///
    /// The final packet of a channel is cut short when `samples` is not a
    /// multiple of the packet size.
    pub fn generate(&mut self, samples: usize) -> Vec<SensorEvent> {
        let targets: Vec<u64> = self
            .next_index
            .iter()
            .map(|index| index + samples as u64)
            .collect();
        let mut events = Vec::with_capacity(samples * self.config.nb_channels);

        while self.next_index.iter().zip(&targets).any(|(i, t)| i < t) {
            for channel in 0..self.config.nb_channels {
                let remaining = (targets[channel] - self.next_index[channel]) as usize;
                let count = remaining.min(self.config.packet_size);
                events.extend(self.packet_for(channel, count).into_iter().map(SensorEvent::Sample));
            }
        }

        events
    }

    /// Restart every channel at index zero
    pub fn reset_time(&mut self) {
        self.next_index.iter_mut().for_each(|index| *index = 0);
        self.next_channel = 0;
    }

    /// Swap configuration. The stream restarts at index zero when the channel
    /// count changes.
    pub fn update_config(&mut self, config: SimulatorConfig) -> EegResult<()> {
        config.validate()?;
        self.noise = noise_distribution(config.noise_std)?;

        if config.nb_channels != self.config.nb_channels {
            self.next_index = vec![0; config.nb_channels];
            self.next_channel = 0;
        }
        debug!(channels = config.nb_channels, srate = config.srate, "simulator reconfigured");
        self.config = config;
        Ok(())
    }

    fn packet_for(&mut self, channel: usize, count: usize) -> Vec<RawSample> {
        let start = self.next_index[channel];
        self.next_index[channel] += count as u64;

        (start..start + count as u64)
            .map(|index| RawSample::new(channel, index, self.reading(channel, index)))
            .collect()
    }

    fn reading(&mut self, channel: usize, index: u64) -> f32 {
        let time = index as f32 / self.config.srate as f32;
        let mut value = self.config.pattern.value_at_time(time, channel);

        value += self.noise.sample(&mut self.rng);

        if let Some(frequency) = self.config.line_frequency {
            value += self.config.line_amplitude * (2.0 * PI * frequency * time).sin();
        }

        value
    }
}

fn noise_distribution(std_dev: f32) -> EegResult<Normal<f32>> {
    Normal::new(0.0, std_dev).map_err(|e| {
        EegError::invalid_config(format!("failed to create noise distribution: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet(nb_channels: usize) -> SimulatorConfig {
        SimulatorConfig {
            nb_channels,
            noise_std: 0.0,
            line_frequency: None,
            seed: Some(7),
            ..SimulatorConfig::default()
        }
    }

    fn samples(events: &[SensorEvent]) -> Vec<RawSample> {
        events
            .iter()
            .filter_map(|event| match event {
                SensorEvent::Sample(sample) => Some(*sample),
                SensorEvent::Fault { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_packets_rotate_channels() {
        let mut simulator = SensorSimulator::new(quiet(3)).unwrap();

        let first = simulator.next_packet();
        let second = simulator.next_packet();
        let third = simulator.next_packet();
        let fourth = simulator.next_packet();

        assert_eq!(first.len(), MUSE_PACKET_SIZE);
        assert!(first.iter().all(|s| s.channel == 0));
        assert!(second.iter().all(|s| s.channel == 1));
        assert!(third.iter().all(|s| s.channel == 2));
        assert!(fourth.iter().all(|s| s.channel == 0));

        let indices: Vec<u64> = fourth.iter().map(|s| s.index).collect();
        assert_eq!(indices, (12..24).collect::<Vec<u64>>());
    }

    #[test]
    fn test_generate_exact_sample_count() {
        let mut simulator = SensorSimulator::new(quiet(4)).unwrap();
        let events = simulator.generate(30);
        let readings = samples(&events);

        assert_eq!(readings.len(), 120);
        for channel in 0..4 {
            let indices: Vec<u64> = readings
                .iter()
                .filter(|s| s.channel == channel)
                .map(|s| s.index)
                .collect();
            assert_eq!(indices, (0..30).collect::<Vec<u64>>());
        }

        // Continues where the previous call stopped
        let more = samples(&simulator.generate(6));
        assert_eq!(more[0].index, 30);
    }

    #[test]
    fn test_quiet_simulator_follows_pattern() {
        let mut config = quiet(1);
        config.pattern = EegPattern::Flat { level: 12.0 };
        let mut simulator = SensorSimulator::new(config).unwrap();

        assert!(simulator.next_packet().iter().all(|s| s.value == 12.0));
    }

    #[test]
    fn test_seed_is_reproducible() {
        let config = SimulatorConfig {
            seed: Some(42),
            ..SimulatorConfig::default()
        };
        let mut a = SensorSimulator::new(config.clone()).unwrap();
        let mut b = SensorSimulator::new(config).unwrap();

        assert_eq!(a.next_round(), b.next_round());
    }

    #[test]
    fn test_reset_time() {
        let mut simulator = SensorSimulator::new(quiet(2)).unwrap();
        simulator.generate(40);
        simulator.reset_time();

        let packet = simulator.next_packet();
        assert_eq!(packet[0].channel, 0);
        assert_eq!(packet[0].index, 0);
    }

    #[test]
    fn test_invalid_config() {
        let config = SimulatorConfig {
            nb_channels: 0,
            ..SimulatorConfig::default()
        };
        assert!(matches!(
            SensorSimulator::new(config),
            Err(EegError::InvalidConfig { .. })
        ));

        let config = SimulatorConfig {
            noise_std: -1.0,
            ..SimulatorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_update_config_resizes_channels() {
        let mut simulator = SensorSimulator::new(quiet(2)).unwrap();
        simulator.generate(24);

        simulator.update_config(quiet(5)).unwrap();
        let round = samples(&simulator.next_round());

        assert_eq!(round.len(), 5 * MUSE_PACKET_SIZE);
        assert!(round.iter().all(|s| s.index < MUSE_PACKET_SIZE as u64));
    }
}
