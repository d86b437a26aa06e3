//! Stereo pipeline construction
//!
//! Describes the on-device node graph derived from a [`DeviceConfig`]: a
//! color camera preview, left/right mono cameras feeding a stereo-depth
//! node, and one output queue per published stream. The graph itself runs
//! on the camera; this module only validates the description and resolves
//! the backend that delivers the output queues to the host.

use async_trait::async_trait;

use crate::config::DeviceConfig;
use crate::error::Result;
use crate::device::synthetic::SyntheticBackend;

/// Raw output of a capture backend, before host-side post-processing.
#[derive(Debug, Clone)]
pub enum RawFrame {
    /// Interleaved RGB24 preview frame.
    Color {
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
    /// Stereo disparity map, one value per pixel, row-major.
    Disparity {
        width: u32,
        height: u32,
        values: Vec<u16>,
    },
}

impl RawFrame {
    /// Frame dimensions in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            RawFrame::Color { width, height, .. } => (*width, *height),
            RawFrame::Disparity { width, height, .. } => (*width, *height),
        }
    }
}

/// Source of raw frames for the shared device.
///
/// Implementations wrap a concrete camera stack and surface its output
/// queues as a single merged stream of frames. The crate ships
/// [`SyntheticBackend`] for development and tests; hardware backends plug
/// in at the same seam via [`SharedDevice::start`].
///
/// [`SharedDevice::start`]: crate::device::SharedDevice::start
#[async_trait]
pub trait CaptureBackend: Send {
    /// Deliver the next frame from any of the pipeline's output queues.
    ///
    /// Errors are terminal for the backend; the device pump stops on the
    /// first failed read.
    async fn next_frame(&mut self) -> Result<RawFrame>;
}

/// Validated node-graph description for one capture device.
#[derive(Debug, Clone)]
pub struct StereoPipeline {
    config: DeviceConfig,
}

impl StereoPipeline {
    /// Build a pipeline description from a configuration.
    pub fn from_config(config: &DeviceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
        })
    }

    /// The configuration this pipeline was built from.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Largest disparity value the stereo node can emit.
    pub fn max_disparity(&self) -> f32 {
        self.config.max_disparity()
    }

    /// Resolve the backend that produces this pipeline's output.
    pub fn open_backend(&self) -> Result<Box<dyn CaptureBackend>> {
        Ok(Box::new(SyntheticBackend::new(&self.config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_validates() {
        let bad = DeviceConfig {
            width: 0,
            ..Default::default()
        };
        assert!(StereoPipeline::from_config(&bad).is_err());
        assert!(StereoPipeline::from_config(&DeviceConfig::default()).is_ok());
    }
}
