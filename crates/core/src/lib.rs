//! Stereocast Core
//!
//! Owns the single capture pipeline of a stereo depth camera (color preview
//! plus derived disparity) and publishes its output to any number of
//! concurrent consumers. Transport crates subscribe to the per-stream frame
//! queues; they never own or reconfigure the device.

pub mod config;
pub mod data;
pub mod device;
pub mod error;

pub use config::{DeviceConfig, MedianFilter, MonoResolution};
pub use data::{StreamKind, VideoFrame};
pub use device::{CaptureBackend, DeviceManager, RawFrame, SharedDevice, StereoPipeline};
pub use error::{Error, Result};
