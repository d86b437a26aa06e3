//! Frame and stream types shared between the capture and transport layers.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Logical stream produced by the capture pipeline.
///
/// The color preview keeps its historical wire label `rgb`, which is what
/// viewer clients match track identifiers against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    /// Color camera preview.
    #[serde(rename = "rgb", alias = "color")]
    Color,
    /// Colorized stereo-disparity stream.
    #[serde(rename = "depth")]
    Depth,
}

impl StreamKind {
    /// All stream kinds, in the fixed color-then-depth order used for
    /// track creation and the signaling answer.
    pub const ALL: [StreamKind; 2] = [StreamKind::Color, StreamKind::Depth];

    /// Wire label, used as the suffix of synthetic track identifiers.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Color => "rgb",
            StreamKind::Depth => "depth",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded frame as published on a shared device queue.
///
/// Disparity frames are colorized by the device pump before publication, so
/// every consumer sees packed RGB regardless of stream kind.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Which logical stream this frame belongs to.
    pub kind: StreamKind,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Packed RGB24 pixel data, `width * height * 3` bytes.
    pub data: Bytes,
    /// Monotonic per-stream sequence number assigned by the device pump.
    pub sequence: u64,
}

impl VideoFrame {
    /// Expected byte length of the pixel buffer.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}
