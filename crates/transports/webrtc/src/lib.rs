//! Stereocast WebRTC transport
//!
//! Fans the shared capture device out to independently negotiated viewer
//! sessions. Each session carries one outbound track per logical stream
//! (color, depth) over a single peer connection; inbound transport packets
//! are bound to per-stream receivers by the [`RtpRouter`] even when more
//! streams are active than the negotiation explicitly tracked.

pub mod config;
pub mod error;
pub mod media;
pub mod session;
pub mod signaling;

pub use config::TransportConfig;
pub use error::{Error, Result};
pub use media::{OutboundTrack, TrackRegistry};
pub use session::{
    PacketReceiver, RtpHeader, RtpRouter, Session, SessionAnswer, SessionId, SessionManager,
    SessionState,
};
