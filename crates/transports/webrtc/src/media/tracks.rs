//! Outbound media tracks
//!
//! An [`OutboundTrack`] adapts one shared device queue to one negotiated
//! media line: the send loop reads frames, encodes them, and writes samples;
//! the feedback loop consumes the inbound packets the session router binds
//! to this stream. Both loops end on the session's shutdown signal and
//! cancel nothing outside their own session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, trace, warn};
use webrtc::api::media_engine::MIME_TYPE_H264;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use stereocast_core::{StreamKind, VideoFrame};

use crate::media::video::VideoEncoder;
use crate::session::router::PacketReceiver;

/// Fallback sample duration when frame spacing cannot be measured yet.
const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(33);

/// One logical outbound stream within a session.
pub struct OutboundTrack {
    id: String,
    session_id: String,
    kind: StreamKind,
    sample_track: Arc<TrackLocalStaticSample>,
    receiver: Arc<PacketReceiver>,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    feedback_packets: AtomicU64,
}

impl OutboundTrack {
    /// Create a track for `kind` owned by the given session.
    ///
    /// The synthetic identifier is `{session_id}_{kind}`; session IDs are
    /// never reused, so identifiers are unique for the process lifetime and
    /// stable for the life of the session. Also returns the consumer end of
    /// the track's feedback channel for [`spawn_feedback`].
    ///
    /// [`spawn_feedback`]: OutboundTrack::spawn_feedback
    pub fn new(session_id: &str, kind: StreamKind) -> (Arc<Self>, mpsc::UnboundedReceiver<Bytes>) {
        let id = format!("{session_id}_{kind}");
        let sample_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            id.clone(),
            session_id.to_owned(),
        ));
        let (receiver, feedback_rx) = PacketReceiver::channel(kind);

        (
            Arc::new(Self {
                id,
                session_id: session_id.to_owned(),
                kind,
                sample_track,
                receiver,
                frames_sent: AtomicU64::new(0),
                frames_dropped: AtomicU64::new(0),
                feedback_packets: AtomicU64::new(0),
            }),
            feedback_rx,
        )
    }

    /// Synthetic track identifier communicated to the viewer.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identifier of the owning session.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Stream kind this track carries.
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// The negotiable sample track to add to the peer connection.
    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.sample_track)
    }

    /// The receiver registered for this track in the session router.
    pub fn receiver(&self) -> &Arc<PacketReceiver> {
        &self.receiver
    }

    /// Frames written to the transport so far.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Frames skipped because this subscriber lagged the shared queue.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Inbound packets routed to this track.
    pub fn feedback_packets(&self) -> u64 {
        self.feedback_packets.load(Ordering::Relaxed)
    }

    /// Start the send loop: device queue → encoder → transport.
    ///
    /// Lagging the shared queue drops the oldest frames for this track
    /// only; neither the device pump nor other sessions are slowed.
    pub fn spawn_sender(
        self: &Arc<Self>,
        mut frames: broadcast::Receiver<Arc<VideoFrame>>,
        mut encoder: Box<dyn VideoEncoder>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let track = Arc::clone(self);
        tokio::spawn(async move {
            let mut last_frame: Option<Instant> = None;
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.changed() => break,

                    frame = frames.recv() => match frame {
                        Ok(frame) => {
                            let data = match encoder.encode(&frame) {
                                Ok(Some(data)) => data,
                                Ok(None) => continue,
                                Err(e) => {
                                    warn!(track_id = %track.id, "Encode failed: {}", e);
                                    continue;
                                }
                            };

                            let now = Instant::now();
                            let duration = last_frame
                                .map(|t| now.duration_since(t))
                                .filter(|d| !d.is_zero())
                                .unwrap_or(DEFAULT_FRAME_DURATION);
                            last_frame = Some(now);

                            let sample = Sample {
                                data,
                                duration,
                                ..Default::default()
                            };
                            match track.sample_track.write_sample(&sample).await {
                                Ok(()) => {
                                    track.frames_sent.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(e) => {
                                    // Expected while the track is not yet
                                    // bound or the viewer is going away.
                                    trace!(track_id = %track.id, "write_sample: {}", e);
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            track.frames_dropped.fetch_add(skipped, Ordering::Relaxed);
                            debug!(track_id = %track.id, skipped, "Track lagged shared queue");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!(track_id = %track.id, "Shared frame queue closed");
                            break;
                        }
                    }
                }
            }
            debug!(track_id = %track.id, sent = track.frames_sent(), "Track sender ended");
        });
    }

    /// Start the feedback loop consuming packets the router binds to this
    /// stream. Delivery preserves arrival order.
    pub fn spawn_feedback(
        self: &Arc<Self>,
        mut packets: mpsc::UnboundedReceiver<Bytes>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let track = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.changed() => break,

                    packet = packets.recv() => match packet {
                        Some(packet) => {
                            track.feedback_packets.fetch_add(1, Ordering::Relaxed);
                            trace!(track_id = %track.id, len = packet.len(), "Feedback packet");
                        }
                        None => break,
                    }
                }
            }
            trace!(track_id = %track.id, "Track feedback loop ended");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_format_is_session_scoped_and_kind_qualified() {
        let (color, _rx) = OutboundTrack::new("abc123", StreamKind::Color);
        let (depth, _rx) = OutboundTrack::new("abc123", StreamKind::Depth);
        assert_eq!(color.id(), "abc123_rgb");
        assert_eq!(depth.id(), "abc123_depth");
        assert_eq!(color.session_id(), "abc123");
        assert_eq!(color.receiver().kind(), StreamKind::Color);
    }
}
