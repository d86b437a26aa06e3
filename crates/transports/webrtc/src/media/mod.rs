//! Outbound media: encoding, sample tracks, and the track registry.

pub mod track_registry;
pub mod tracks;
pub mod video;

pub use track_registry::TrackRegistry;
pub use tracks::OutboundTrack;
pub use video::VideoEncoder;
