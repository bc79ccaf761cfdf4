//! Configuration for the multicast hub

use eeg_core::{EegError, EegResult};
use serde::{Deserialize, Serialize};

/// Hub configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Logical pipeline name; one active instance per name
    pub name: String,
    /// Epochs a subscriber may fall behind before it lags
    pub broadcast_capacity: usize,
}

impl HubConfig {
    /// Configuration for the raw signal view
    pub fn raw() -> Self {
        HubConfig {
            name: "raw".to_string(),
            broadcast_capacity: 64,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> EegResult<()> {
        if self.name.is_empty() {
            return Err(EegError::invalid_config("Pipeline name cannot be empty"));
        }

        if self.broadcast_capacity == 0 {
            return Err(EegError::invalid_config(
                "Broadcast capacity must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Export configuration to JSON
    pub fn to_json(&self) -> EegResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Import configuration from JSON
    pub fn from_json(json: &str) -> EegResult<Self> {
        let config: HubConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.name, "raw");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(HubConfig::raw().with_name("").validate().is_err());
        assert!(HubConfig::raw().with_broadcast_capacity(0).validate().is_err());
        assert!(HubConfig::raw().with_broadcast_capacity(1).validate().is_ok());
    }

    #[test]
    fn test_json_serialization() {
        let config = HubConfig::raw().with_name("frontal");
        let json = config.to_json().unwrap();
        assert_eq!(HubConfig::from_json(&json).unwrap(), config);

        let invalid = r#"{"name":"raw","broadcast_capacity":0}"#;
        assert!(HubConfig::from_json(invalid).is_err());
    }
}
