//! Device configuration
//!
//! Every recognized pipeline option is an explicit field with a default that
//! matches what viewer clients have historically sent as loose JSON. Unknown
//! fields in the incoming options object are ignored so older clients keep
//! working.

use serde::{Deserialize, Serialize};

use crate::data::StreamKind;
use crate::error::{Error, Result};

/// Sensor resolution of the left/right mono cameras feeding stereo depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonoResolution {
    #[serde(rename = "THE_400_P")]
    The400P,
    #[serde(rename = "THE_720_P")]
    The720P,
    #[serde(rename = "THE_800_P")]
    The800P,
}

impl MonoResolution {
    /// Vertical resolution in pixels.
    pub fn vertical_pixels(&self) -> u32 {
        match self {
            MonoResolution::The400P => 400,
            MonoResolution::The720P => 720,
            MonoResolution::The800P => 800,
        }
    }
}

/// Median filter applied by the stereo-depth node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MedianFilter {
    #[serde(rename = "MEDIAN_OFF")]
    Off,
    #[serde(rename = "KERNEL_3x3")]
    Kernel3x3,
    #[serde(rename = "KERNEL_5x5")]
    Kernel5x5,
    #[serde(rename = "KERNEL_7x7")]
    Kernel7x7,
}

/// Capture pipeline configuration.
///
/// Deserialized from the `options` object of a signaling offer. The first
/// session to initialize the shared device decides the configuration for the
/// process lifetime; later sessions reuse the device as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Color preview width in pixels.
    #[serde(rename = "cam_width")]
    pub width: u32,

    /// Color preview height in pixels.
    #[serde(rename = "cam_height")]
    pub height: u32,

    /// Mono camera sensor resolution.
    #[serde(rename = "mono_camera_resolution")]
    pub mono_resolution: MonoResolution,

    /// Median filter mode for the stereo-depth node.
    pub median_filter: MedianFilter,

    /// Compute disparity with subpixel interpolation.
    pub subpixel: bool,

    /// Extend the disparity search range for close-range depth.
    pub extended_disparity: bool,

    /// Which logical streams to serve. Tracks are always created in the
    /// fixed color-then-depth order regardless of the order given here.
    pub streams: Vec<StreamKind>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            width: 300,
            height: 300,
            mono_resolution: MonoResolution::The400P,
            median_filter: MedianFilter::Kernel7x7,
            subpixel: false,
            extended_disparity: false,
            streams: vec![StreamKind::Color, StreamKind::Depth],
        }
    }
}

impl DeviceConfig {
    /// Validate the configuration, returning a descriptive error for the
    /// offending field.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Config(format!(
                "preview size {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if self.width > 3840 || self.height > 2160 {
            return Err(Error::Config(format!(
                "preview size {}x{} exceeds sensor limits",
                self.width, self.height
            )));
        }
        if self.streams.is_empty() {
            return Err(Error::Config("no streams selected".to_string()));
        }
        Ok(())
    }

    /// Whether the given stream kind is selected.
    pub fn serves(&self, kind: StreamKind) -> bool {
        self.streams.contains(&kind)
    }

    /// Largest disparity value the stereo node can emit under this
    /// configuration: 95 at base, doubled by extended disparity, times
    /// eight with subpixel interpolation.
    pub fn max_disparity(&self) -> f32 {
        let mut max = 95.0_f32;
        if self.extended_disparity {
            max *= 2.0;
        }
        if self.subpixel {
            max *= 8.0;
        }
        max
    }
}
