//! Pre-defined EEG signal shapes for the synthetic sensor

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Deterministic part of a simulated channel, in microvolts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EegPattern {
    /// Constant offset
    Flat { level: f32 },
    /// Continuous rhythm, e.g. eyes-closed alpha
    Rhythm { frequency: f32, amplitude: f32 },
    /// Rhythm switching on and off
    Burst {
        frequency: f32,
        amplitude: f32,
        on_duration: f32,
        off_duration: f32,
    },
    /// Slow electrode drift, a sine with a long period
    Drift { period: f32, amplitude: f32 },
}

impl EegPattern {
    /// Value for `channel` at `time` seconds.
    ///
    /// Channels share the shape but get a small phase offset so they are not
    /// identical copies of each other.
    pub fn value_at_time(&self, time: f32, channel: usize) -> f32 {
        let phase = channel as f32 * PI / 8.0;
        match *self {
            EegPattern::Flat { level } => level,

            EegPattern::Rhythm { frequency, amplitude } => {
                amplitude * (2.0 * PI * frequency * time + phase).sin()
            }

            EegPattern::Burst {
                frequency,
                amplitude,
                on_duration,
                off_duration,
            } => {
                let cycle = on_duration + off_duration;
                if cycle > 0.0 && time % cycle < on_duration {
                    amplitude * (2.0 * PI * frequency * time + phase).sin()
                } else {
                    0.0
                }
            }

            EegPattern::Drift { period, amplitude } => {
                if period > 0.0 {
                    amplitude * (2.0 * PI * time / period + phase).sin()
                } else {
                    0.0
                }
            }
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            EegPattern::Flat { .. } => "Flat line",
            EegPattern::Rhythm { .. } => "Continuous rhythm",
            EegPattern::Burst { .. } => "Rhythm bursts",
            EegPattern::Drift { .. } => "Electrode drift",
        }
    }

    /// Common preset patterns
    pub fn presets() -> Vec<(&'static str, EegPattern)> {
        vec![
            ("Flat", EegPattern::Flat { level: 0.0 }),
            (
                "Eyes Closed",
                EegPattern::Rhythm {
                    frequency: 10.0,
                    amplitude: 30.0,
                },
            ),
            (
                "Eyes Open",
                EegPattern::Rhythm {
                    frequency: 18.0,
                    amplitude: 8.0,
                },
            ),
            (
                "Alpha Bursts",
                EegPattern::Burst {
                    frequency: 10.0,
                    amplitude: 40.0,
                    on_duration: 2.0,
                    off_duration: 1.0,
                },
            ),
            (
                "Loose Electrode",
                EegPattern::Drift {
                    period: 8.0,
                    amplitude: 150.0,
                },
            ),
        ]
    }
}

impl Default for EegPattern {
    fn default() -> Self {
        EegPattern::Rhythm {
            frequency: 10.0,
            amplitude: 20.0,
        }
    }
}
