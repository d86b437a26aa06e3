//! Error types for the WebRTC transport

use thiserror::Error;

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the WebRTC transport
#[derive(Debug, Error)]
pub enum Error {
    /// Peer connection or SDP handling failed
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// Signaling request was malformed or rejected
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Outbound media track failure
    #[error("Media track error: {0}")]
    MediaTrack(String),

    /// No live session with the given identifier
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Requested codec is not compiled in
    #[error("Codec unavailable: {0}")]
    CodecUnavailable(String),

    /// Capture layer error
    #[error("Device error: {0}")]
    Core(#[from] stereocast_core::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}
