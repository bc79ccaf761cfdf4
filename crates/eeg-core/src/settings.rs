//! Pipeline settings: the complete description of one pipeline topology

use crate::error::{EegError, EegResult};
use serde::{Deserialize, Serialize};

/// Settings that fully determine a pipeline instance.
///
/// Two equal values build pipelines with equivalent behavior, never shared state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSettings {
    /// Lower band edge (Hz)
    pub cut_off_low: f32,
    /// Upper band edge (Hz)
    pub cut_off_high: f32,
    /// Number of sensor channels
    pub nb_channels: usize,
    /// Samples between consecutive epoch starts
    pub interval: usize,
    /// Sampling rate (Hz)
    pub srate: u32,
    /// Samples per epoch
    pub duration: usize,
}

/// Single-field update, as produced by one UI control
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SettingsChange {
    CutOffLow(f32),
    CutOffHigh(f32),
    NbChannels(usize),
    Interval(usize),
    Srate(u32),
    Duration(usize),
}

impl PipelineSettings {
    /// Settings used by the raw signal view
    pub fn raw_defaults() -> Self {
        PipelineSettings {
            cut_off_low: 2.0,
            cut_off_high: 20.0,
            nb_channels: 4,
            interval: 50,
            srate: 256,
            duration: 1024,
        }
    }

    /// Nyquist frequency (Hz)
    pub fn nyquist(&self) -> f32 {
        self.srate as f32 / 2.0
    }

    /// Samples shared by consecutive epochs
    pub fn overlap(&self) -> usize {
        self.duration.saturating_sub(self.interval)
    }

    /// Epoch length in seconds
    pub fn epoch_seconds(&self) -> f32 {
        self.duration as f32 / self.srate.max(1) as f32
    }

    /// Check every invariant; the first violation is reported
    pub fn validate(&self) -> EegResult<()> {
        if self.srate == 0 {
            return Err(EegError::invalid_config("srate must be positive"));
        }

        if self.nb_channels == 0 {
            return Err(EegError::invalid_config("nbChannels must be positive"));
        }

        if self.duration == 0 {
            return Err(EegError::invalid_config("duration must be positive"));
        }

        if self.interval == 0 {
            return Err(EegError::invalid_config("interval must be positive"));
        }

        if !self.cut_off_low.is_finite() || !self.cut_off_high.is_finite() {
            return Err(EegError::invalid_config("cutoff frequencies must be finite"));
        }

        if self.cut_off_low <= 0.0 {
            return Err(EegError::invalid_config(format!(
                "cutOffLow {} Hz must be positive",
                self.cut_off_low
            )));
        }

        if self.cut_off_low >= self.cut_off_high {
            return Err(EegError::invalid_config(format!(
                "cutOffLow {} Hz must be below cutOffHigh {} Hz",
                self.cut_off_low, self.cut_off_high
            )));
        }

        if self.cut_off_high >= self.nyquist() {
            return Err(EegError::invalid_config(format!(
                "cutOffHigh {} Hz must be below Nyquist {} Hz",
                self.cut_off_high,
                self.nyquist()
            )));
        }

        Ok(())
    }

    /// Copy of these settings with one field replaced
    pub fn apply(&self, change: SettingsChange) -> Self {
        let mut next = self.clone();
        match change {
            SettingsChange::CutOffLow(value) => next.cut_off_low = value,
            SettingsChange::CutOffHigh(value) => next.cut_off_high = value,
            SettingsChange::NbChannels(value) => next.nb_channels = value,
            SettingsChange::Interval(value) => next.interval = value,
            SettingsChange::Srate(value) => next.srate = value,
            SettingsChange::Duration(value) => next.duration = value,
        }
        next
    }

    /// Export settings to JSON
    pub fn to_json(&self) -> EegResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Import and validate settings from JSON
    pub fn from_json(json: &str) -> EegResult<Self> {
        let settings: PipelineSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::raw_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_defaults_are_valid() {
        let settings = PipelineSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.overlap(), 974);
        assert_eq!(settings.epoch_seconds(), 4.0);
    }

    #[test]
    fn test_inverted_band_rejected() {
        let settings = PipelineSettings {
            cut_off_low: 20.0,
            cut_off_high: 2.0,
            ..PipelineSettings::default()
        };
        assert!(matches!(settings.validate(), Err(EegError::InvalidConfig { .. })));
    }

    #[test]
    fn test_band_edges_rejected() {
        let base = PipelineSettings::default();

        assert!(base.apply(SettingsChange::CutOffHigh(128.0)).validate().is_err());
        assert!(base.apply(SettingsChange::CutOffLow(0.0)).validate().is_err());
        assert!(base.apply(SettingsChange::CutOffLow(20.0)).validate().is_err());
        assert!(base.apply(SettingsChange::CutOffHigh(127.5)).validate().is_ok());
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let base = PipelineSettings::default();

        assert!(base.apply(SettingsChange::Duration(0)).validate().is_err());
        assert!(base.apply(SettingsChange::Interval(0)).validate().is_err());
        assert!(base.apply(SettingsChange::NbChannels(0)).validate().is_err());
        assert!(base.apply(SettingsChange::Srate(0)).validate().is_err());
    }

    #[test]
    fn test_apply_touches_one_field() {
        let base = PipelineSettings::default();
        let next = base.apply(SettingsChange::Interval(100));

        assert_eq!(next.interval, 100);
        assert_eq!(next.duration, base.duration);
        assert_eq!(next.cut_off_low, base.cut_off_low);
        assert_eq!(base.interval, 50);
    }

    #[test]
    fn test_json_field_names() {
        let json = PipelineSettings::default().to_json().unwrap();
        assert!(json.contains("\"cutOffLow\""));
        assert!(json.contains("\"nbChannels\""));

        let parsed = PipelineSettings::from_json(&json).unwrap();
        assert_eq!(parsed, PipelineSettings::default());
    }

    #[test]
    fn test_from_json_validates() {
        let json = r#"{"cutOffLow":20,"cutOffHigh":2,"nbChannels":4,"interval":50,"srate":256,"duration":1024}"#;
        assert!(matches!(
            PipelineSettings::from_json(json),
            Err(EegError::InvalidConfig { .. })
        ));
    }
}
