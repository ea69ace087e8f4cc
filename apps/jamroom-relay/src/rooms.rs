use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::registry::ConnectionRegistry;
use crate::storage::{RoomSnapshot, RoomStore};

/// Authoritative per-room snapshot: what a newly joining client should see.
#[derive(Debug, Clone, Default)]
pub struct RoomSession {
    pub media_ref: Option<String>,
    /// Fraction of track duration, always within [0, 1].
    pub position: f64,
    pub playing: bool,
    /// The participant whose seeks commit to shared state. Seeded by the
    /// first joiner; the room creator opens the room first.
    pub authority_id: Option<String>,
}

impl RoomSession {
    fn from_snapshot(snapshot: RoomSnapshot) -> Self {
        Self {
            media_ref: snapshot.media_ref,
            position: snapshot.position.clamp(0.0, 1.0),
            playing: false,
            authority_id: None,
        }
    }

    /// Track switch: any participant may do this. Position resets and
    /// playback stops until someone presses play.
    pub fn apply_media_change(&mut self, url: &str) {
        self.media_ref = Some(url.to_string());
        self.position = 0.0;
        self.playing = false;
    }

    /// Commit a position if the requester holds authority. Returns whether
    /// the session changed; a rejected seek is a silent no-op.
    pub fn apply_seek(&mut self, position: f64, requester_id: &str) -> bool {
        match &self.authority_id {
            Some(authority) if authority == requester_id => {
                self.position = position.clamp(0.0, 1.0);
                true
            }
            _ => false,
        }
    }

    pub fn apply_playback(&mut self, playing: bool) {
        self.playing = playing;
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            media_ref: self.media_ref.clone(),
            position: self.position,
        }
    }
}

/// All live room sessions, keyed by room id. Each session sits behind its
/// own async mutex: envelopes for one room are linearized, envelopes for
/// different rooms never contend.
#[derive(Default)]
pub struct RoomSessions {
    sessions: DashMap<String, Arc<Mutex<RoomSession>>>,
    idle_since: DashMap<String, Instant>,
}

impl RoomSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, room_id: &str) -> Option<Arc<Mutex<RoomSession>>> {
        self.sessions.get(room_id).map(|entry| entry.value().clone())
    }

    /// Fetch the room's session, lazily creating it from the persisted
    /// snapshot (or fresh when the store has nothing: a new room, not an
    /// error). A store failure degrades to a fresh session.
    pub async fn get_or_load(
        &self,
        room_id: &str,
        store: &dyn RoomStore,
    ) -> Arc<Mutex<RoomSession>> {
        if let Some(session) = self.get(room_id) {
            return session;
        }
        let snapshot = match store.load_snapshot(room_id).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(room = %room_id, %error, "snapshot load failed; starting fresh session");
                None
            }
        };
        self.sessions
            .entry(room_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(match snapshot {
                    Some(snapshot) => RoomSession::from_snapshot(snapshot),
                    None => RoomSession::default(),
                }))
            })
            .clone()
    }

    /// One eviction pass: sessions whose room has had no connections since
    /// before `grace` are dropped. The persisted snapshot survives, so a
    /// later joiner still resyncs. Returns the number evicted.
    pub fn sweep(&self, registry: &ConnectionRegistry, grace: Duration) -> usize {
        let now = Instant::now();
        let mut evict = Vec::new();
        for entry in self.sessions.iter() {
            let room_id = entry.key();
            if registry.has_connections(room_id) {
                self.idle_since.remove(room_id);
                continue;
            }
            match self.idle_since.get(room_id).map(|since| *since) {
                Some(since) if now.duration_since(since) >= grace => evict.push(room_id.clone()),
                Some(_) => {}
                None => {
                    self.idle_since.insert(room_id.clone(), now);
                }
            }
        }
        for room_id in &evict {
            self.sessions.remove(room_id);
            self.idle_since.remove(room_id);
            info!(room = %room_id, "evicted idle room session");
        }
        evict.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryRoomStore;

    fn session_with_authority(authority: &str) -> RoomSession {
        RoomSession {
            authority_id: Some(authority.to_string()),
            ..RoomSession::default()
        }
    }

    #[test]
    fn media_change_resets_position_and_playback() {
        let mut session = session_with_authority("alice");
        session.position = 0.8;
        session.playing = true;

        session.apply_media_change("https://x");
        assert_eq!(session.media_ref.as_deref(), Some("https://x"));
        assert_eq!(session.position, 0.0);
        assert!(!session.playing);
    }

    #[test]
    fn seek_requires_authority() {
        let mut session = session_with_authority("alice");

        assert!(!session.apply_seek(0.7, "bob"));
        assert_eq!(session.position, 0.0);

        assert!(session.apply_seek(0.4, "alice"));
        assert_eq!(session.position, 0.4);
    }

    #[test]
    fn seek_clamps_to_unit_range() {
        let mut session = session_with_authority("alice");
        assert!(session.apply_seek(1.7, "alice"));
        assert_eq!(session.position, 1.0);
        assert!(session.apply_seek(-0.2, "alice"));
        assert_eq!(session.position, 0.0);
    }

    #[test]
    fn seek_without_any_authority_is_rejected() {
        let mut session = RoomSession::default();
        assert!(!session.apply_seek(0.5, "anyone"));
        assert_eq!(session.position, 0.0);
    }

    #[tokio::test]
    async fn lazy_load_uses_persisted_snapshot() {
        let store = InMemoryRoomStore::new();
        store
            .save_snapshot(
                "r1",
                &RoomSnapshot {
                    media_ref: Some("https://x".to_string()),
                    position: 0.3,
                },
            )
            .await
            .unwrap();

        let sessions = RoomSessions::new();
        let session = sessions.get_or_load("r1", store.as_ref()).await;
        let guard = session.lock().await;
        assert_eq!(guard.media_ref.as_deref(), Some("https://x"));
        assert_eq!(guard.position, 0.3);
        assert!(guard.authority_id.is_none());
    }

    #[tokio::test]
    async fn lazy_load_absent_room_is_fresh() {
        let store = InMemoryRoomStore::new();
        let sessions = RoomSessions::new();
        let session = sessions.get_or_load("r1", store.as_ref()).await;
        let guard = session.lock().await;
        assert!(guard.media_ref.is_none());
        assert_eq!(guard.position, 0.0);
    }

    #[tokio::test]
    async fn sweep_evicts_only_after_grace_elapses() {
        let store = InMemoryRoomStore::new();
        let sessions = RoomSessions::new();
        let registry = ConnectionRegistry::new();
        sessions.get_or_load("r1", store.as_ref()).await;

        // First pass marks the room idle, second pass (grace 0) evicts.
        assert_eq!(sessions.sweep(&registry, Duration::from_secs(60)), 0);
        assert!(sessions.get("r1").is_some());
        assert_eq!(sessions.sweep(&registry, Duration::ZERO), 1);
        assert!(sessions.get("r1").is_none());
    }

    #[tokio::test]
    async fn sweep_spares_rooms_with_connections() {
        let store = InMemoryRoomStore::new();
        let sessions = RoomSessions::new();
        let registry = ConnectionRegistry::new();
        sessions.get_or_load("r1", store.as_ref()).await;

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        registry.register(
            "r1",
            crate::registry::RoomConnection {
                conn_id: "c-a".to_string(),
                participant_id: "alice".to_string(),
                tx,
            },
        );

        assert_eq!(sessions.sweep(&registry, Duration::ZERO), 0);
        assert_eq!(sessions.sweep(&registry, Duration::ZERO), 0);
        assert!(sessions.get("r1").is_some());
    }
}
