//! Video encoding for outbound tracks
//!
//! Tracks carry H.264 samples; the encoder seam keeps the codec behind a
//! feature so signaling-only builds compile without a codec library.

use bytes::Bytes;

use stereocast_core::VideoFrame;

use crate::error::Result;
#[cfg(not(feature = "h264"))]
use crate::error::Error;

/// Per-track video encoder.
///
/// One instance per outbound track; the send loop drives it frame by frame.
pub trait VideoEncoder: Send {
    /// Encode one RGB frame. `None` means the encoder buffered the frame
    /// and has no output yet.
    fn encode(&mut self, frame: &VideoFrame) -> Result<Option<Bytes>>;

    /// Request that the next encoded frame be a keyframe.
    fn force_keyframe(&mut self);
}

/// Build the default encoder for an outbound track.
#[cfg(feature = "h264")]
pub fn encoder() -> Result<Box<dyn VideoEncoder>> {
    Ok(Box::new(h264::H264Encoder::new()?))
}

/// Build the default encoder for an outbound track.
#[cfg(not(feature = "h264"))]
pub fn encoder() -> Result<Box<dyn VideoEncoder>> {
    Err(Error::CodecUnavailable(
        "built without the h264 feature".to_string(),
    ))
}

#[cfg(feature = "h264")]
mod h264 {
    use bytes::Bytes;
    use openh264::encoder::Encoder;
    use openh264::formats::YUVBuffer;
    use tracing::warn;

    use stereocast_core::VideoFrame;

    use crate::error::{Error, Result};

    use super::VideoEncoder;

    /// Keyframe cadence in frames, for viewers recovering from loss. Each
    /// track has its own encoder, so the first frame is always an IDR.
    const KEYFRAME_INTERVAL: u64 = 120;

    pub struct H264Encoder {
        encoder: Encoder,
        frame_count: u64,
        force_keyframe: bool,
    }

    impl H264Encoder {
        pub fn new() -> Result<Self> {
            let encoder = Encoder::new()
                .map_err(|e| Error::MediaTrack(format!("Failed to create H.264 encoder: {e}")))?;
            Ok(Self {
                encoder,
                frame_count: 0,
                force_keyframe: false,
            })
        }
    }

    impl VideoEncoder for H264Encoder {
        fn encode(&mut self, frame: &VideoFrame) -> Result<Option<Bytes>> {
            if frame.data.len() != frame.expected_len() {
                warn!(
                    expected = frame.expected_len(),
                    got = frame.data.len(),
                    "Skipping frame with unexpected buffer size"
                );
                return Ok(None);
            }
            // 4:2:0 chroma subsampling needs even dimensions.
            if frame.width % 2 != 0 || frame.height % 2 != 0 {
                warn!(
                    width = frame.width,
                    height = frame.height,
                    "Skipping frame with odd dimensions"
                );
                return Ok(None);
            }

            if self.force_keyframe || self.frame_count % KEYFRAME_INTERVAL == 0 {
                self.encoder.force_intra_frame();
                self.force_keyframe = false;
            }

            let yuv = rgb_to_yuv420(&frame.data, frame.width, frame.height);
            let buffer = YUVBuffer::from_vec(yuv, frame.width as usize, frame.height as usize);
            let bitstream = self
                .encoder
                .encode(&buffer)
                .map_err(|e| Error::MediaTrack(format!("H.264 encoding failed: {e}")))?;

            self.frame_count += 1;
            Ok(Some(Bytes::from(bitstream.to_vec())))
        }

        fn force_keyframe(&mut self) {
            self.force_keyframe = true;
        }
    }

    /// Convert packed RGB24 to planar YUV420 (BT.601).
    fn rgb_to_yuv420(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
        let w = width as usize;
        let h = height as usize;

        let y_size = w * h;
        let uv_size = (w / 2) * (h / 2);
        let mut yuv = vec![0u8; y_size + uv_size * 2];

        let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
        let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

        for y in 0..h {
            for x in 0..w {
                let i = (y * w + x) * 3;
                let r = rgb[i] as i32;
                let g = rgb[i + 1] as i32;
                let b = rgb[i + 2] as i32;

                let y_val = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
                y_plane[y * w + x] = y_val.clamp(0, 255) as u8;

                // Subsample chroma over 2x2 blocks.
                if y % 2 == 0 && x % 2 == 0 {
                    let uv_idx = (y / 2) * (w / 2) + (x / 2);
                    let u_val = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                    let v_val = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                    u_plane[uv_idx] = u_val.clamp(0, 255) as u8;
                    v_plane[uv_idx] = v_val.clamp(0, 255) as u8;
                }
            }
        }

        yuv
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use stereocast_core::StreamKind;

        fn test_frame(width: u32, height: u32) -> VideoFrame {
            VideoFrame {
                kind: StreamKind::Color,
                width,
                height,
                data: Bytes::from(vec![128u8; (width * height * 3) as usize]),
                sequence: 0,
            }
        }

        #[test]
        fn encodes_a_frame() {
            let mut encoder = H264Encoder::new().unwrap();
            let out = encoder.encode(&test_frame(64, 64)).unwrap();
            let data = out.expect("first frame should produce output");
            assert!(!data.is_empty());
        }

        #[test]
        fn skips_malformed_frames() {
            let mut encoder = H264Encoder::new().unwrap();
            let mut frame = test_frame(64, 64);
            frame.data = Bytes::from_static(&[0u8; 8]);
            assert!(encoder.encode(&frame).unwrap().is_none());
        }

        #[test]
        fn yuv_conversion_sizes() {
            let yuv = rgb_to_yuv420(&vec![0u8; 64 * 48 * 3], 64, 48);
            assert_eq!(yuv.len(), 64 * 48 + 2 * (32 * 24));
        }
    }
}
