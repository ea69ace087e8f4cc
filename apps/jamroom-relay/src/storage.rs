use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// The slice of room state worth surviving a relay restart: enough for a
/// late joiner to resync. Everything else is live-connection state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub media_ref: Option<String>,
    pub position: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum RoomStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("corrupt snapshot: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Narrow gateway to the document store. The relay treats the store as a
/// best-effort backing cache: loads happen on lazy session creation, saves
/// are fire-and-forget after the broadcast.
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn load_snapshot(&self, room_id: &str) -> Result<Option<RoomSnapshot>, RoomStoreError>;

    async fn save_snapshot(
        &self,
        room_id: &str,
        snapshot: &RoomSnapshot,
    ) -> Result<(), RoomStoreError>;
}

/// Redis-backed store. Snapshots live as JSON documents under
/// `room:{id}:playback` and every save refreshes the key TTL, so rooms
/// that keep playing stay resyncable and abandoned ones age out.
#[derive(Clone)]
pub struct RedisRoomStore {
    redis: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisRoomStore {
    pub async fn new(redis_url: &str, ttl_seconds: u64) -> Result<Self, RoomStoreError> {
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self { redis, ttl_seconds })
    }
}

fn playback_key(room_id: &str) -> String {
    format!("room:{}:playback", room_id)
}

#[async_trait]
impl RoomStore for RedisRoomStore {
    async fn load_snapshot(&self, room_id: &str) -> Result<Option<RoomSnapshot>, RoomStoreError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(playback_key(room_id)).await?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save_snapshot(
        &self,
        room_id: &str,
        snapshot: &RoomSnapshot,
    ) -> Result<(), RoomStoreError> {
        let mut conn = self.redis.clone();
        let value = serde_json::to_string(snapshot)?;
        conn.set_ex::<_, _, ()>(playback_key(room_id), value, self.ttl_seconds)
            .await?;
        Ok(())
    }
}

/// In-memory adapter for tests and early wiring.
#[derive(Default)]
pub struct InMemoryRoomStore {
    snapshots: Mutex<HashMap<String, RoomSnapshot>>,
}

impl InMemoryRoomStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl RoomStore for InMemoryRoomStore {
    async fn load_snapshot(&self, room_id: &str) -> Result<Option<RoomSnapshot>, RoomStoreError> {
        Ok(self.snapshots.lock().await.get(room_id).cloned())
    }

    async fn save_snapshot(
        &self,
        room_id: &str,
        snapshot: &RoomSnapshot,
    ) -> Result<(), RoomStoreError> {
        self.snapshots
            .lock()
            .await
            .insert(room_id.to_string(), snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_round_trip() {
        let store = InMemoryRoomStore::new();
        assert_eq!(store.load_snapshot("r1").await.unwrap(), None);

        let snapshot = RoomSnapshot {
            media_ref: Some("https://x".to_string()),
            position: 0.25,
        };
        store.save_snapshot("r1", &snapshot).await.unwrap();
        assert_eq!(store.load_snapshot("r1").await.unwrap(), Some(snapshot));
        assert_eq!(store.load_snapshot("r2").await.unwrap(), None);
    }

    #[test]
    fn snapshot_wire_shape() {
        let snapshot = RoomSnapshot {
            media_ref: Some("https://x".to_string()),
            position: 0.5,
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&snapshot).unwrap()).unwrap();
        assert_eq!(value["mediaRef"], "https://x");
        assert_eq!(value["position"], 0.5);
    }
}
