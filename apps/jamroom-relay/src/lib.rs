//! jamroom-relay: a real-time room-synchronization relay.
//!
//! Clients in a "jam room" watch the same track together. Each client holds
//! one WebSocket to the relay, bound to a room; the relay rebroadcasts
//! playback-control, chat, and peer-signaling envelopes to the rest of the
//! room, keeps an authoritative per-room session snapshot, and persists just
//! enough of it for late joiners to resync.

pub mod cli;
pub mod config;
pub mod handlers;
pub mod protocol;
pub mod registry;
pub mod rooms;
pub mod storage;
pub mod websocket;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{get_room_state, health_check};
use crate::websocket::{websocket_handler, RelayState};

/// Assemble the full HTTP/WebSocket surface.
pub fn app(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/rooms/:room_id/state", get(get_room_state))
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
