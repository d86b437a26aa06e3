//! Error types for the stereocast core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the capture layer
#[derive(Debug, Error)]
pub enum Error {
    /// Capture device could not be opened or configured
    #[error("Device error: {0}")]
    Device(String),

    /// Invalid pipeline or stream configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Frame capture failed mid-stream
    #[error("Capture error: {0}")]
    Capture(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
