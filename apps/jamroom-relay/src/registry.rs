use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

/// One live connection's identity and outbound queue sender.
#[derive(Clone)]
pub struct RoomConnection {
    pub conn_id: String,
    pub participant_id: String,
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Process-wide registry of live connections, sharded per room:
/// `room_id -> (conn_id -> RoomConnection)`.
///
/// The registry owns connection membership only; room session state lives in
/// [`crate::rooms::RoomSessions`] with its own lifecycle.
#[derive(Default)]
pub struct ConnectionRegistry {
    rooms: DashMap<String, DashMap<String, RoomConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, room_id: &str, conn: RoomConnection) {
        let peers = self.rooms.entry(room_id.to_string()).or_default();
        peers.insert(conn.conn_id.clone(), conn);
    }

    /// Remove a connection from its room; the room entry itself is dropped
    /// once its last connection leaves.
    pub fn unregister(&self, room_id: &str, conn_id: &str) {
        let mut remove_room = false;
        if let Some(peers) = self.rooms.get(room_id) {
            peers.remove(conn_id);
            // Decide outside the guard to avoid holding it across the removal.
            remove_room = peers.is_empty();
        }
        if remove_room {
            self.rooms.remove_if(room_id, |_, peers| peers.is_empty());
        }
    }

    pub fn has_connections(&self, room_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .map(|peers| !peers.is_empty())
            .unwrap_or(false)
    }

    pub fn room_size(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|peers| peers.len()).unwrap_or(0)
    }

    /// Send the serialized envelope to every connection in the room except
    /// the sender. A connection whose queue is gone is torn out of the
    /// registry; its failure never affects delivery to the others.
    ///
    /// Returns the number of connections the envelope was queued for.
    pub fn broadcast_except(&self, room_id: &str, sender_conn_id: &str, text: &str) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();
        if let Some(peers) = self.rooms.get(room_id) {
            for peer in peers.iter() {
                if peer.conn_id == sender_conn_id {
                    continue;
                }
                if peer.tx.send(Message::Text(text.to_owned())).is_ok() {
                    delivered += 1;
                } else {
                    failed.push(peer.conn_id.clone());
                }
            }
        }
        for conn_id in failed {
            warn!(room = %room_id, conn = %conn_id, "dropping unreachable connection");
            self.unregister(room_id, &conn_id);
        }
        delivered
    }

    /// Point-to-point delivery to every connection bound to the given
    /// participant identity. Returns false when no such participant is in
    /// the room.
    pub fn send_to_participant(&self, room_id: &str, participant_id: &str, text: &str) -> bool {
        let mut delivered = false;
        if let Some(peers) = self.rooms.get(room_id) {
            for peer in peers.iter() {
                if peer.participant_id == participant_id
                    && peer.tx.send(Message::Text(text.to_owned())).is_ok()
                {
                    delivered = true;
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn conn(
        registry: &ConnectionRegistry,
        room: &str,
        conn_id: &str,
        participant: &str,
    ) -> UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(
            room,
            RoomConnection {
                conn_id: conn_id.to_string(),
                participant_id: participant.to_string(),
                tx,
            },
        );
        rx
    }

    fn text(msg: Message) -> String {
        match msg {
            Message::Text(text) => text,
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn broadcast_skips_the_sender() {
        let registry = ConnectionRegistry::new();
        let mut a = conn(&registry, "r1", "c-a", "alice");
        let mut b = conn(&registry, "r1", "c-b", "bob");

        let delivered = registry.broadcast_except("r1", "c-a", "hello");
        assert_eq!(delivered, 1);
        assert_eq!(text(b.recv().await.unwrap()), "hello");
        assert!(a.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_is_scoped_to_the_room() {
        let registry = ConnectionRegistry::new();
        let _a = conn(&registry, "r1", "c-a", "alice");
        let mut other = conn(&registry, "r2", "c-x", "xavier");

        registry.broadcast_except("r1", "c-none", "hello");
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_connection_is_removed_without_blocking_others() {
        let registry = ConnectionRegistry::new();
        let _a = conn(&registry, "r1", "c-a", "alice");
        let b = conn(&registry, "r1", "c-b", "bob");
        let mut c = conn(&registry, "r1", "c-c", "carol");
        drop(b); // bob's receiver is gone

        let delivered = registry.broadcast_except("r1", "c-a", "hello");
        assert_eq!(delivered, 1);
        assert_eq!(text(c.recv().await.unwrap()), "hello");
        assert_eq!(registry.room_size("r1"), 2);
    }

    #[tokio::test]
    async fn unregister_evicts_empty_room_entry() {
        let registry = ConnectionRegistry::new();
        let _a = conn(&registry, "r1", "c-a", "alice");
        assert!(registry.has_connections("r1"));

        registry.unregister("r1", "c-a");
        assert!(!registry.has_connections("r1"));
        assert_eq!(registry.room_size("r1"), 0);
    }

    #[tokio::test]
    async fn send_to_participant_targets_only_the_recipient() {
        let registry = ConnectionRegistry::new();
        let mut a = conn(&registry, "r1", "c-a", "alice");
        let mut b = conn(&registry, "r1", "c-b", "bob");

        assert!(registry.send_to_participant("r1", "bob", "offer"));
        assert_eq!(text(b.recv().await.unwrap()), "offer");
        assert!(a.try_recv().is_err());

        assert!(!registry.send_to_participant("r1", "nobody", "offer"));
    }
}
