//! Error handling for the EEG epoching pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type EegResult<T> = Result<T, EegError>;

/// Error type shared by every pipeline crate
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum EegError {
    /// Settings violate the pipeline invariants; nothing was constructed
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Which invariant was violated
        reason: String,
    },

    /// The sensor stream produced something the pipeline cannot consume
    #[error("Upstream fault: {reason}")]
    UpstreamFault {
        /// Description of the malformed input or source failure
        reason: String,
    },

    /// Channel index outside the configured channel count
    #[error("Channel {channel} out of range (channel count {channel_count})")]
    ChannelOutOfRange {
        /// Requested channel
        channel: usize,
        /// Number of configured channels
        channel_count: usize,
    },

    /// Settings or epoch (de)serialization failed
    #[error("Serialization error: {reason}")]
    Serialization {
        /// serde_json error text
        reason: String,
    },

    /// The hub has been shut down
    #[error("Hub is shut down")]
    HubClosed,
}

impl EegError {
    /// Build an `InvalidConfig` error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        EegError::InvalidConfig { reason: reason.into() }
    }

    /// Build an `UpstreamFault` error
    pub fn upstream_fault(reason: impl Into<String>) -> Self {
        EegError::UpstreamFault { reason: reason.into() }
    }

    /// True for errors that end production of the current pipeline instance
    pub fn is_terminal(&self) -> bool {
        matches!(self, EegError::UpstreamFault { .. } | EegError::HubClosed)
    }
}

impl From<serde_json::Error> for EegError {
    fn from(err: serde_json::Error) -> Self {
        EegError::Serialization { reason: err.to_string() }
    }
}
