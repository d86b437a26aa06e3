//! Session management and routing
//!
//! Tracks the set of live viewer sessions, routes their inbound packets,
//! and performs ordered teardown.

pub mod router;
#[allow(clippy::module_inception)]
pub mod session;

pub use router::{PacketReceiver, RtpHeader, RtpRouter};
pub use session::{Session, SessionAnswer, SessionId, SessionManager, SessionState};
