use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::protocol::{ClientEnvelope, ServerEnvelope};
use crate::registry::{ConnectionRegistry, RoomConnection};
use crate::rooms::RoomSessions;
use crate::storage::{RoomSnapshot, RoomStore};

/// Shared relay state handed to every connection handler.
#[derive(Clone)]
pub struct RelayState {
    pub registry: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomSessions>,
    pub store: Arc<dyn RoomStore>,
    write_timeout: Duration,
}

impl RelayState {
    /// Build the relay state and start the idle-session sweeper.
    pub fn new(store: Arc<dyn RoomStore>, config: &Config) -> Self {
        let state = Self {
            registry: Arc::new(ConnectionRegistry::new()),
            rooms: Arc::new(RoomSessions::new()),
            store,
            write_timeout: Duration::from_millis(config.write_timeout_ms),
        };

        let rooms = state.rooms.clone();
        let registry = state.registry.clone();
        let grace = Duration::from_secs(config.room_idle_secs);
        let every = Duration::from_secs(config.sweep_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let evicted = rooms.sweep(&registry, grace);
                if evicted > 0 {
                    debug!(evicted, "idle room sweep");
                }
            }
        });

        state
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "roomId")]
    pub room_id: String,
}

/// WebSocket upgrade handler. The roomId query parameter binds the
/// connection to one room for its whole lifetime.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<RelayState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, query.room_id, state))
}

async fn handle_socket(socket: WebSocket, room_id: String, state: RelayState) {
    let conn_id = Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Outbound queue: broadcasts never block on a slow socket. The forward
    // task enforces the write timeout; when a client can't keep up the
    // connection is torn down rather than stalling the room.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let write_timeout = state.write_timeout;
    let writer_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match timeout(write_timeout, ws_tx.send(msg)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => break,
                Err(_) => {
                    warn!(conn = %writer_conn_id, "write timed out; closing slow connection");
                    break;
                }
            }
        }
    });

    debug!(conn = %conn_id, room = %room_id, "websocket connected");

    // Connecting -> Joined: set once the first join envelope is processed.
    let mut participant_id: Option<String> = None;

    while let Some(incoming) = ws_rx.next().await {
        let msg = match incoming {
            Ok(msg) => msg,
            Err(error) => {
                debug!(conn = %conn_id, %error, "websocket read error");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                let envelope = match serde_json::from_str::<ClientEnvelope>(&text) {
                    Ok(envelope) => envelope,
                    Err(error) => {
                        warn!(conn = %conn_id, room = %room_id, %error, "dropping malformed envelope");
                        continue;
                    }
                };
                if envelope.room_id() != room_id {
                    warn!(
                        conn = %conn_id,
                        bound = %room_id,
                        claimed = %envelope.room_id(),
                        "dropping envelope for a different room"
                    );
                    continue;
                }

                match envelope {
                    ClientEnvelope::Join { sender_id, .. } => {
                        if participant_id.is_some() {
                            debug!(conn = %conn_id, "duplicate join ignored");
                            continue;
                        }
                        participant_id =
                            Some(handle_join(&state, &room_id, &conn_id, sender_id, &tx).await);
                    }
                    envelope => match &participant_id {
                        Some(participant) => {
                            process_envelope(&state, &room_id, &conn_id, participant, envelope, &text)
                                .await;
                        }
                        None => {
                            debug!(
                                conn = %conn_id,
                                kind = envelope.kind(),
                                "dropping envelope received before join"
                            );
                        }
                    },
                }
            }
            Message::Ping(payload) => {
                let _ = tx.send(Message::Pong(payload));
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    send_task.abort();
    if participant_id.is_some() {
        state.registry.unregister(&room_id, &conn_id);
    }
    debug!(conn = %conn_id, room = %room_id, "websocket disconnected");
}

/// Register the connection and push the resync snapshot back to it, and to
/// it alone. A room with no known track sends nothing (fresh room).
async fn handle_join(
    state: &RelayState,
    room_id: &str,
    conn_id: &str,
    sender_id: Option<String>,
    tx: &mpsc::UnboundedSender<Message>,
) -> String {
    let participant_id = sender_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let session = state.rooms.get_or_load(room_id, state.store.as_ref()).await;
    let mut session = session.lock().await;
    if session.authority_id.is_none() {
        session.authority_id = Some(participant_id.clone());
        info!(room = %room_id, participant = %participant_id, "room authority assigned");
    }

    state.registry.register(
        room_id,
        RoomConnection {
            conn_id: conn_id.to_string(),
            participant_id: participant_id.clone(),
            tx: tx.clone(),
        },
    );

    if let Some(url) = session.media_ref.clone() {
        let sync = ServerEnvelope::SyncState {
            room_id: room_id.to_string(),
            url,
            time: session.position,
        };
        match serde_json::to_string(&sync) {
            Ok(json) => {
                let _ = tx.send(Message::Text(json));
            }
            Err(error) => warn!(room = %room_id, %error, "failed to encode sync-state"),
        }
    }

    info!(room = %room_id, conn = %conn_id, participant = %participant_id, "joined room");
    participant_id
}

/// Apply one post-join envelope: per-kind authority check, session
/// mutation, broadcast, then best-effort persistence. The session lock is
/// held across mutation and broadcast so every connection observes the
/// room's envelopes in one order.
async fn process_envelope(
    state: &RelayState,
    room_id: &str,
    conn_id: &str,
    participant_id: &str,
    envelope: ClientEnvelope,
    raw: &str,
) {
    let session = state.rooms.get_or_load(room_id, state.store.as_ref()).await;
    let mut session = session.lock().await;

    match envelope {
        ClientEnvelope::MediaChange { url, .. } => {
            session.apply_media_change(&url);
            let snapshot = session.snapshot();
            state.registry.broadcast_except(room_id, conn_id, raw);
            drop(session);
            persist(state, room_id, snapshot);
        }
        ClientEnvelope::Seek { time, .. } => {
            if !time.is_finite() {
                warn!(room = %room_id, conn = %conn_id, "dropping seek with non-finite time");
                return;
            }
            let applied = session.apply_seek(time, participant_id);
            let snapshot = applied.then(|| session.snapshot());
            // Broadcast regardless: every player seeks optimistically, the
            // authoritative position just doesn't move for non-authorities.
            state.registry.broadcast_except(room_id, conn_id, raw);
            drop(session);
            match snapshot {
                Some(snapshot) => persist(state, room_id, snapshot),
                None => debug!(
                    room = %room_id,
                    participant = %participant_id,
                    "seek from non-authority; session unchanged"
                ),
            }
        }
        ClientEnvelope::Playback { playing, .. } => {
            session.apply_playback(playing);
            state.registry.broadcast_except(room_id, conn_id, raw);
        }
        ClientEnvelope::Volume { volume, .. } => {
            if !volume.is_finite() {
                warn!(room = %room_id, conn = %conn_id, "dropping volume with non-finite value");
                return;
            }
            state.registry.broadcast_except(room_id, conn_id, raw);
        }
        ClientEnvelope::Signal { to, .. } => {
            if !state.registry.send_to_participant(room_id, &to, raw) {
                debug!(room = %room_id, recipient = %to, "signal recipient not in room");
            }
        }
        ClientEnvelope::Chat { .. } => {
            state.registry.broadcast_except(room_id, conn_id, raw);
        }
        // Handled by the connection loop before we get here.
        ClientEnvelope::Join { .. } => {}
    }
}

/// Fire-and-forget snapshot write. Failures are logged and never surfaced;
/// the broadcast has already happened by the time this runs.
fn persist(state: &RelayState, room_id: &str, snapshot: RoomSnapshot) {
    let store = state.store.clone();
    let room_id = room_id.to_string();
    tokio::spawn(async move {
        if let Err(error) = store.save_snapshot(&room_id, &snapshot).await {
            warn!(room = %room_id, %error, "failed to persist room snapshot");
        }
    });
}
