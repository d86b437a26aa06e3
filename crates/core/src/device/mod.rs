//! Shared capture device
//!
//! One stereo camera serves every viewer session in the process. The
//! [`DeviceManager`] guards lazy initialization so concurrent session
//! creation can never open the hardware twice; the resulting
//! [`SharedDevice`] pumps frames into bounded per-stream queues that
//! sessions subscribe to read-only.

pub mod colorize;
pub mod manager;
pub mod pipeline;
pub mod shared;
pub mod synthetic;

pub use manager::DeviceManager;
pub use pipeline::{CaptureBackend, RawFrame, StereoPipeline};
pub use shared::{SharedDevice, FRAME_QUEUE_CAPACITY};
pub use synthetic::SyntheticBackend;
