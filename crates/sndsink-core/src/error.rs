//! Error types for sndsink.

use thiserror::Error;

/// Result type alias using sndsink's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sndsink.
#[derive(Error, Debug)]
pub enum Error {
    // Device errors
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Format negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("Device write failed: {0}")]
    WriteFailed(String),

    // Upstream errors
    #[error("Upstream source error: {0}")]
    Source(String),

    // Lifecycle errors
    #[error("Output is already running")]
    AlreadyRunning,

    #[error("Invalid stream parameters: {0}")]
    InvalidParams(String),

    #[error("Timed out waiting for playback to stop")]
    Timeout,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if the device could not be opened or configured.
    ///
    /// These are fatal for a session; a host typically reacts by picking a
    /// different output.
    pub const fn is_device_error(&self) -> bool {
        matches!(self, Self::DeviceUnavailable(_) | Self::NegotiationFailed(_))
    }

    /// Returns true if this error terminated a running session.
    pub const fn is_session_failure(&self) -> bool {
        matches!(self, Self::Source(_) | Self::WriteFailed(_))
    }
}
