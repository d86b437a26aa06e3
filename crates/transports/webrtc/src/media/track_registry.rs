//! Process-wide track registry
//!
//! Creates the outbound tracks of a session and keeps every live track
//! resolvable by its synthetic identifier, so diagnostics and the signaling
//! layer can map identifiers back to tracks. A session's tracks are
//! deregistered when the session ends; no track outlives its session.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use stereocast_core::{SharedDevice, StreamKind};

use crate::error::{Error, Result};
use crate::media::tracks::OutboundTrack;

pub struct TrackRegistry {
    tracks: Arc<RwLock<HashMap<String, Arc<OutboundTrack>>>>,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self {
            tracks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create and register one track per stream the device serves, in the
    /// fixed color-then-depth order. Returns each track with the consumer
    /// end of its feedback channel.
    pub async fn create_for_session(
        &self,
        session_id: &str,
        device: &SharedDevice,
    ) -> Result<Vec<(Arc<OutboundTrack>, mpsc::UnboundedReceiver<Bytes>)>> {
        let mut created = Vec::new();
        for kind in StreamKind::ALL {
            if !device.config().serves(kind) {
                continue;
            }
            let (track, feedback_rx) = OutboundTrack::new(session_id, kind);
            self.register(Arc::clone(&track)).await?;
            created.push((track, feedback_rx));
        }
        Ok(created)
    }

    /// Register a track under its identifier.
    ///
    /// Session identifiers are never reused, so a collision is an internal
    /// invariant violation rather than a recoverable condition.
    pub async fn register(&self, track: Arc<OutboundTrack>) -> Result<()> {
        let mut tracks = self.tracks.write().await;
        if tracks.contains_key(track.id()) {
            return Err(Error::Internal(format!(
                "track identifier collision: {}",
                track.id()
            )));
        }
        info!(
            track_id = %track.id(),
            total = tracks.len() + 1,
            "Registered outbound track"
        );
        tracks.insert(track.id().to_owned(), track);
        Ok(())
    }

    /// Resolve a track by its synthetic identifier.
    pub async fn resolve(&self, track_id: &str) -> Option<Arc<OutboundTrack>> {
        self.tracks.read().await.get(track_id).map(Arc::clone)
    }

    /// Deregister all tracks owned by a session. Returns the removed
    /// tracks; removing an unknown session is a no-op.
    pub async fn remove_session(&self, session_id: &str) -> Vec<Arc<OutboundTrack>> {
        let mut tracks = self.tracks.write().await;
        let ids: Vec<String> = tracks
            .iter()
            .filter(|(_, track)| track.session_id() == session_id)
            .map(|(id, _)| id.clone())
            .collect();

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(track) = tracks.remove(&id) {
                removed.push(track);
            }
        }
        if removed.is_empty() {
            debug!(session_id, "No tracks registered for session");
        } else {
            info!(
                session_id,
                removed = removed.len(),
                remaining = tracks.len(),
                "Deregistered session tracks"
            );
        }
        removed
    }

    /// Number of live tracks across all sessions.
    pub async fn track_count(&self) -> usize {
        self.tracks.read().await.len()
    }

    /// Identifiers of all live tracks.
    pub async fn track_ids(&self) -> Vec<String> {
        self.tracks.read().await.keys().cloned().collect()
    }
}

impl Default for TrackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn register_resolve_remove() {
        let registry = TrackRegistry::new();
        let (track, _rx) = OutboundTrack::new("s1", StreamKind::Color);
        registry.register(Arc::clone(&track)).await.unwrap();

        let resolved = registry.resolve("s1_rgb").await.unwrap();
        assert!(Arc::ptr_eq(&resolved, &track));

        let removed = registry.remove_session("s1").await;
        assert_eq!(removed.len(), 1);
        assert!(registry.resolve("s1_rgb").await.is_none());
        assert_eq!(registry.track_count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_identifier_is_rejected() {
        let registry = TrackRegistry::new();
        let (first, _rx1) = OutboundTrack::new("s1", StreamKind::Color);
        let (second, _rx2) = OutboundTrack::new("s1", StreamKind::Color);
        registry.register(first).await.unwrap();
        assert!(registry.register(second).await.is_err());
        assert_eq!(registry.track_count().await, 1);
    }

    #[tokio::test]
    async fn removal_is_scoped_to_one_session() {
        let registry = TrackRegistry::new();
        for session in ["s1", "s2", "s3"] {
            for kind in StreamKind::ALL {
                let (track, _rx) = OutboundTrack::new(session, kind);
                registry.register(track).await.unwrap();
            }
        }
        assert_eq!(registry.track_count().await, 6);

        let removed = registry.remove_session("s2").await;
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.track_count().await, 4);
        assert!(registry.resolve("s1_rgb").await.is_some());
        assert!(registry.resolve("s3_depth").await.is_some());
        assert!(registry.resolve("s2_rgb").await.is_none());

        // Removing the same session again is a no-op.
        assert!(registry.remove_session("s2").await.is_empty());
    }

    #[tokio::test]
    async fn identifiers_unique_across_process_lifetime() {
        let registry = TrackRegistry::new();
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            let session_id = uuid::Uuid::new_v4().to_string();
            for kind in StreamKind::ALL {
                let (track, _rx) = OutboundTrack::new(&session_id, kind);
                ids.insert(track.id().to_owned());
                registry.register(track).await.unwrap();
            }
        }
        assert_eq!(ids.len(), 2000);
        assert_eq!(registry.track_count().await, 2000);
    }
}
