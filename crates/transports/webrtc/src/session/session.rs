//! Viewer sessions and their lifecycle
//!
//! A [`Session`] is one negotiated peer connection to one remote viewer,
//! owning its outbound tracks and its routing tables. The
//! [`SessionManager`] owns the live-session set, reacts to transport
//! connectivity changes idempotently, and tears sessions down (one at a
//! time on failure, all at once at process shutdown) without ever touching
//! the shared device except to release it last.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use serde::{Deserialize, Serialize};

use stereocast_core::{DeviceConfig, DeviceManager, SharedDevice};

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::media::{video, OutboundTrack, TrackRegistry};
use crate::session::router::RtpRouter;

/// Unique session identifier (UUID v4, never reused).
pub type SessionId = String;

/// Connectivity state of a viewer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Connecting,
    Connected,
    /// Transport failure; terminal.
    Failed,
    /// Closed by the server; terminal.
    Closed,
}

impl SessionState {
    /// Terminal states absorb any further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::New => "new",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Signaling answer for an established session: the negotiated description
/// plus the synthetic track identifiers in fixed color-then-depth order, so
/// the viewer can label media lines without trusting description ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAnswer {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub video_ids: Vec<String>,
}

/// One negotiated viewer connection.
pub struct Session {
    id: SessionId,
    state: parking_lot::RwLock<SessionState>,
    peer_connection: Arc<RTCPeerConnection>,
    tracks: Vec<Arc<OutboundTrack>>,
    router: Arc<Mutex<RtpRouter>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Session {
    /// Session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current connectivity state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Synthetic identifiers of the session's tracks, in creation order.
    pub fn track_ids(&self) -> Vec<String> {
        self.tracks.iter().map(|t| t.id().to_owned()).collect()
    }

    /// This session's routing tables.
    pub fn router(&self) -> &Arc<Mutex<RtpRouter>> {
        &self.router
    }

    /// The underlying peer connection.
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    /// Apply a state transition. Terminal states absorb everything after
    /// them, which makes duplicate connectivity notifications harmless.
    pub(crate) fn transition(&self, next: SessionState) {
        let mut state = self.state.write();
        let current = *state;
        if current.is_terminal() {
            debug!(
                session_id = %self.id,
                current = %current,
                ignored = %next,
                "Transition after terminal state ignored"
            );
            return;
        }
        if current != next {
            debug!(session_id = %self.id, from = %current, to = %next, "Session state changed");
            *state = next;
        }
    }

    /// Cancel this session's in-flight work and close the transport.
    async fn close(&self, final_state: SessionState) -> Result<()> {
        self.transition(final_state);
        self.shutdown_tx.send_replace(true);
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to close peer connection: {e}")))
    }
}

/// Owner of the live-session set.
pub struct SessionManager {
    config: TransportConfig,
    api: API,
    devices: Arc<DeviceManager>,
    registry: Arc<TrackRegistry>,
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionManager {
    /// Build a manager with its own WebRTC API instance.
    pub fn new(config: TransportConfig, devices: Arc<DeviceManager>) -> Result<Arc<Self>> {
        config.validate()?;

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtc(format!("Failed to register codecs: {e}")))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| Error::WebRtc(format!("Failed to register interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Arc::new(Self {
            config,
            api,
            devices,
            registry: Arc::new(TrackRegistry::new()),
            sessions: RwLock::new(HashMap::new()),
        }))
    }

    /// Handle a signaling offer: create a session, wire its tracks to the
    /// shared device, and return the negotiated answer.
    pub async fn create_session(
        self: &Arc<Self>,
        offer_sdp: String,
        device_config: DeviceConfig,
    ) -> Result<SessionAnswer> {
        {
            let sessions = self.sessions.read().await;
            if sessions.len() >= self.config.max_sessions {
                return Err(Error::Signaling(format!(
                    "session limit of {} reached",
                    self.config.max_sessions
                )));
            }
        }

        // One-time rendezvous: only the first concurrent creator performs
        // device I/O, everyone else reuses the published handle.
        let device = self.devices.acquire(&device_config).await?;

        let session_id: SessionId = Uuid::new_v4().to_string();
        info!(session_id = %session_id, "Creating viewer session");

        let session = match self.assemble(&session_id, &device).await {
            Ok(session) => session,
            Err(e) => {
                // Track registrations may have landed before the failure.
                self.registry.remove_session(&session_id).await;
                return Err(e);
            }
        };

        self.sessions
            .write()
            .await
            .insert(session_id.clone(), Arc::clone(&session));

        match self.negotiate(&session, offer_sdp).await {
            Ok(answer_sdp) => {
                info!(
                    session_id = %session_id,
                    tracks = session.tracks.len(),
                    "Viewer session established"
                );
                Ok(SessionAnswer {
                    sdp: answer_sdp,
                    sdp_type: "answer".to_string(),
                    video_ids: session.track_ids(),
                })
            }
            Err(e) => {
                warn!(session_id = %session_id, "Negotiation failed: {}", e);
                let _ = self
                    .remove_session_with(&session_id, SessionState::Failed)
                    .await;
                Err(e)
            }
        }
    }

    /// Build the session: peer connection, tracks, routing, state callback.
    async fn assemble(
        self: &Arc<Self>,
        session_id: &str,
        device: &Arc<SharedDevice>,
    ) -> Result<Arc<Session>> {
        let ice_servers = if self.config.stun_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: self.config.stun_servers.clone(),
                ..Default::default()
            }]
        };

        let peer_connection = Arc::new(
            self.api
                .new_peer_connection(RTCConfiguration {
                    ice_servers,
                    ..Default::default()
                })
                .await
                .map_err(|e| Error::WebRtc(format!("Failed to create peer connection: {e}")))?,
        );

        let (shutdown_tx, _) = watch::channel(false);
        let router = Arc::new(Mutex::new(RtpRouter::new()));

        let pairs = self
            .registry
            .create_for_session(session_id, device.as_ref())
            .await?;
        if pairs.is_empty() {
            return Err(Error::MediaTrack(
                "device serves no streams for this session".to_string(),
            ));
        }

        let mut tracks = Vec::with_capacity(pairs.len());
        for (track, feedback_rx) in pairs {
            let rtp_sender = peer_connection
                .add_track(track.sample_track() as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| Error::WebRtc(format!("Failed to add track {}: {e}", track.id())))?;

            self.seed_router(&router, &track, &rtp_sender).await;
            Self::spawn_inbound_loop(
                Arc::clone(&router),
                rtp_sender,
                shutdown_tx.subscribe(),
                track.id().to_owned(),
            );

            let encoder = video::encoder()?;
            track.spawn_sender(
                device.subscribe(track.kind()),
                encoder,
                shutdown_tx.subscribe(),
            );
            track.spawn_feedback(feedback_rx, shutdown_tx.subscribe());

            tracks.push(track);
        }

        // Streams the viewer itself originates route through the same
        // tables as sender feedback.
        let router_for_remote = Arc::clone(&router);
        peer_connection.on_track(Box::new(
            move |remote: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let router = Arc::clone(&router_for_remote);
                Box::pin(async move {
                    debug!(ssrc = remote.ssrc(), "Remote track added");
                    loop {
                        match remote.read_rtp().await {
                            Ok((packet, _)) => {
                                router.lock().deliver(
                                    packet.header.ssrc,
                                    packet.header.payload_type,
                                    packet.payload,
                                );
                            }
                            Err(_) => break,
                        }
                    }
                })
            },
        ));

        let session = Arc::new(Session {
            id: session_id.to_owned(),
            state: parking_lot::RwLock::new(SessionState::New),
            peer_connection: Arc::clone(&peer_connection),
            tracks,
            router,
            shutdown_tx,
        });

        // Connectivity-state callback from the transport; notifications may
        // arrive duplicated or out of order and are absorbed idempotently.
        let manager = Arc::clone(self);
        let callback_id: SessionId = session_id.to_owned();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let manager = Arc::clone(&manager);
                let session_id = callback_id.clone();
                Box::pin(async move {
                    manager.handle_connection_state(&session_id, state).await;
                })
            },
        ));

        let ice_id: SessionId = session_id.to_owned();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |state: RTCIceConnectionState| {
                debug!(session_id = %ice_id, state = %state, "ICE connection state changed");
                Box::pin(async {})
            },
        ));

        Ok(session)
    }

    /// Pre-bind the identities and payload types the negotiation makes
    /// explicit for one sender; everything beyond these is learned later by
    /// payload-type fallback.
    async fn seed_router(
        &self,
        router: &Arc<Mutex<RtpRouter>>,
        track: &Arc<OutboundTrack>,
        rtp_sender: &Arc<RTCRtpSender>,
    ) {
        let params = rtp_sender.get_parameters().await;
        let mut router = router.lock();
        for codec in &params.rtp_parameters.codecs {
            if codec.capability.mime_type.starts_with("video/") {
                router.bind_payload_type(codec.payload_type, track.receiver());
            }
        }
        for encoding in &params.encodings {
            if encoding.ssrc != 0 {
                router.bind_ssrc(encoding.ssrc, track.receiver());
            }
        }
    }

    /// Read inbound packets surfaced on an RTP sender (RTCP feedback and
    /// anything else the transport did not demultiplex) into the session
    /// router.
    fn spawn_inbound_loop(
        router: Arc<Mutex<RtpRouter>>,
        rtp_sender: Arc<RTCRtpSender>,
        mut shutdown: watch::Receiver<bool>,
        track_id: String,
    ) {
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.changed() => break,

                    read = rtp_sender.read(&mut buf) => match read {
                        Ok((pkts, _)) => {
                            let n: usize = pkts.iter().map(|p| p.marshal_size()).sum();
                            router.lock().dispatch(&buf[..n]);
                        }
                        Err(_) => break,
                    }
                }
            }
            trace!(track_id = %track_id, "Inbound packet loop ended");
        });
    }

    async fn negotiate(&self, session: &Arc<Session>, offer_sdp: String) -> Result<String> {
        let peer_connection = session.peer_connection();

        let offer = RTCSessionDescription::offer(offer_sdp)
            .map_err(|e| Error::Signaling(format!("Invalid offer SDP: {e}")))?;
        peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to set remote description: {e}")))?;

        let answer = peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to create answer: {e}")))?;

        // Non-trickle: wait for candidate gathering so the answer is
        // complete in the single signaling round-trip.
        let mut gather_complete = peer_connection.gathering_complete_promise().await;
        peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to set local description: {e}")))?;
        let _ = gather_complete.recv().await;

        let local = peer_connection
            .local_description()
            .await
            .ok_or_else(|| Error::WebRtc("Missing local description after answer".to_string()))?;
        Ok(local.sdp)
    }

    /// React to a transport connectivity notification.
    pub async fn handle_connection_state(&self, session_id: &str, state: RTCPeerConnectionState) {
        match state {
            RTCPeerConnectionState::Connecting => {
                self.transition(session_id, SessionState::Connecting).await;
            }
            RTCPeerConnectionState::Connected => {
                info!(session_id, "Viewer connected");
                self.transition(session_id, SessionState::Connected).await;
            }
            RTCPeerConnectionState::Failed => {
                info!(session_id, "Session transport failed, tearing down");
                if let Err(e) = self
                    .remove_session_with(session_id, SessionState::Failed)
                    .await
                {
                    warn!(session_id, "Teardown after failure: {}", e);
                }
            }
            RTCPeerConnectionState::Disconnected => {
                warn!(session_id, "Session transport disconnected");
            }
            RTCPeerConnectionState::Closed => {
                debug!(session_id, "Session transport closed");
            }
            _ => {}
        }
    }

    async fn transition(&self, session_id: &str, next: SessionState) {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            Some(session) => session.transition(next),
            None => {
                debug!(session_id, state = %next, "State change for unknown session ignored")
            }
        }
    }

    /// Tear down one session after a transport failure. Removing a session
    /// that is already gone is a no-op, so duplicate failure notifications
    /// are harmless. The shared device is not touched.
    pub async fn remove_session(&self, session_id: &str) -> Result<()> {
        self.remove_session_with(session_id, SessionState::Failed)
            .await
    }

    async fn remove_session_with(&self, session_id: &str, final_state: SessionState) -> Result<()> {
        let removed = self.sessions.write().await.remove(session_id);
        let Some(session) = removed else {
            debug!(session_id, "Session already removed");
            return Ok(());
        };

        self.registry.remove_session(session_id).await;
        // The session owns its routing tables; they drop with it.
        session.close(final_state).await
    }

    /// Close every live session in parallel (best effort), then release the
    /// shared device. Process-shutdown only.
    pub async fn shutdown(&self) {
        let drained: Vec<(SessionId, Arc<Session>)> =
            self.sessions.write().await.drain().collect();
        info!(sessions = drained.len(), "Closing all viewer sessions");

        let registry = Arc::clone(&self.registry);
        let closes = drained.into_iter().map(|(session_id, session)| {
            let registry = Arc::clone(&registry);
            async move {
                registry.remove_session(&session_id).await;
                if let Err(e) = session.close(SessionState::Closed).await {
                    warn!(session_id = %session_id, "Failed to close session cleanly: {}", e);
                }
            }
        });
        futures::future::join_all(closes).await;

        // Only after every session is down does the device go away.
        self.devices.release().await;
        info!("Session manager shut down");
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Identifiers of all live sessions.
    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Connectivity state of one session, if it is live.
    pub async fn session_state(&self, session_id: &str) -> Option<SessionState> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.state())
    }

    /// A live session handle, for diagnostics.
    pub async fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).map(Arc::clone)
    }

    /// The process-wide track registry.
    pub fn registry(&self) -> &Arc<TrackRegistry> {
        &self.registry
    }

    /// The shared device manager.
    pub fn devices(&self) -> &Arc<DeviceManager> {
        &self.devices
    }

    /// The transport configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_terminal() {
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Closed.is_terminal());
        assert!(!SessionState::New.is_terminal());
        assert!(!SessionState::Connecting.is_terminal());
        assert!(!SessionState::Connected.is_terminal());
    }

    #[test]
    fn state_display_is_lowercase() {
        assert_eq!(SessionState::Connecting.to_string(), "connecting");
        assert_eq!(SessionState::Failed.to_string(), "failed");
    }

    #[test]
    fn answer_wire_format() {
        let answer = SessionAnswer {
            sdp: "v=0".to_string(),
            sdp_type: "answer".to_string(),
            video_ids: vec!["abc_rgb".to_string(), "abc_depth".to_string()],
        };
        let json = serde_json::to_value(&answer).unwrap();
        assert_eq!(json["type"], "answer");
        assert_eq!(json["video_ids"][0], "abc_rgb");
        assert_eq!(json["video_ids"][1], "abc_depth");
    }
}
