//! Shared device handle and frame pump
//!
//! One [`SharedDevice`] instance serves every session in the process. It
//! owns the capture backend behind a single pump task and publishes frames
//! into one bounded broadcast queue per stream kind. Queues drop their
//! oldest entries when a subscriber lags, so a slow session can never stall
//! the pump or any other session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::DeviceConfig;
use crate::data::{StreamKind, VideoFrame};
use crate::device::colorize::colorize_disparity;
use crate::device::pipeline::{CaptureBackend, RawFrame, StereoPipeline};
use crate::error::Result;

/// Queue depth of each per-stream frame queue. Matches the output queue
/// size the capture pipeline itself is opened with.
pub const FRAME_QUEUE_CAPACITY: usize = 4;

/// Handle to the process-wide capture pipeline.
///
/// Sessions hold this behind an `Arc` and only ever subscribe to frame
/// queues; the pipeline is never reconfigured after initialization, which
/// is what makes concurrent access safe without per-frame locking.
pub struct SharedDevice {
    config: DeviceConfig,
    max_disparity: f32,
    color_tx: broadcast::Sender<Arc<VideoFrame>>,
    depth_tx: broadcast::Sender<Arc<VideoFrame>>,
    shutdown_tx: mpsc::Sender<()>,
    color_frames: AtomicU64,
    depth_frames: AtomicU64,
}

impl SharedDevice {
    /// Open the device described by `config` with the default backend.
    pub(crate) async fn open(config: &DeviceConfig) -> Result<Arc<Self>> {
        let pipeline = StereoPipeline::from_config(config)?;
        let backend = pipeline.open_backend()?;
        Ok(Self::start(pipeline, backend))
    }

    /// Start the frame pump over an already-open backend.
    ///
    /// Public seam for hardware capture stacks; must be called from within
    /// a tokio runtime.
    pub fn start(pipeline: StereoPipeline, backend: Box<dyn CaptureBackend>) -> Arc<Self> {
        let (color_tx, _) = broadcast::channel(FRAME_QUEUE_CAPACITY);
        let (depth_tx, _) = broadcast::channel(FRAME_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let device = Arc::new(Self {
            config: pipeline.config().clone(),
            max_disparity: pipeline.max_disparity(),
            color_tx,
            depth_tx,
            shutdown_tx,
            color_frames: AtomicU64::new(0),
            depth_frames: AtomicU64::new(0),
        });

        info!(
            width = device.config.width,
            height = device.config.height,
            max_disparity = device.max_disparity,
            "Capture pipeline started"
        );

        let pump = Arc::clone(&device);
        tokio::spawn(async move {
            pump.run_pump(backend, shutdown_rx).await;
        });

        device
    }

    /// Subscribe to the frame queue of one stream kind.
    ///
    /// The receiver observes only frames published after subscription and
    /// reports `Lagged` when it falls more than [`FRAME_QUEUE_CAPACITY`]
    /// frames behind.
    pub fn subscribe(&self, kind: StreamKind) -> broadcast::Receiver<Arc<VideoFrame>> {
        match kind {
            StreamKind::Color => self.color_tx.subscribe(),
            StreamKind::Depth => self.depth_tx.subscribe(),
        }
    }

    /// The configuration the device was opened with.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Largest disparity value the stereo node emits.
    pub fn max_disparity(&self) -> f32 {
        self.max_disparity
    }

    /// Total frames published on one stream since initialization.
    pub fn frames_published(&self, kind: StreamKind) -> u64 {
        match kind {
            StreamKind::Color => self.color_frames.load(Ordering::Relaxed),
            StreamKind::Depth => self.depth_frames.load(Ordering::Relaxed),
        }
    }

    /// Stop the frame pump. Called by the device manager at process
    /// shutdown, never per-session.
    pub(crate) async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    async fn run_pump(
        &self,
        mut backend: Box<dyn CaptureBackend>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut depth_rgb = Vec::new();
        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Capture pump stopping");
                    break;
                }

                frame = backend.next_frame() => {
                    match frame {
                        Ok(raw) => self.publish(raw, &mut depth_rgb),
                        Err(e) => {
                            error!("Capture read failed, stopping pump: {}", e);
                            break;
                        }
                    }
                }
            }
        }
        debug!("Capture pump ended");
    }

    fn publish(&self, raw: RawFrame, depth_rgb: &mut Vec<u8>) {
        match raw {
            RawFrame::Color {
                width,
                height,
                data,
            } => {
                let sequence = self.color_frames.fetch_add(1, Ordering::Relaxed);
                let frame = Arc::new(VideoFrame {
                    kind: StreamKind::Color,
                    width,
                    height,
                    data: Bytes::from(data),
                    sequence,
                });
                // No subscribers is fine; the queue just drops the frame.
                let _ = self.color_tx.send(frame);
            }
            RawFrame::Disparity {
                width,
                height,
                values,
            } => {
                if values.len() != width as usize * height as usize {
                    warn!(
                        expected = width * height,
                        got = values.len(),
                        "Dropping malformed disparity frame"
                    );
                    return;
                }
                colorize_disparity(&values, self.max_disparity, depth_rgb);
                let sequence = self.depth_frames.fetch_add(1, Ordering::Relaxed);
                let frame = Arc::new(VideoFrame {
                    kind: StreamKind::Depth,
                    width,
                    height,
                    data: Bytes::copy_from_slice(depth_rgb),
                    sequence,
                });
                let _ = self.depth_tx.send(frame);
            }
        }
    }
}
