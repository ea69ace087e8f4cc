use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;

use crate::websocket::RelayState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

pub async fn health_check() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ok" })
}

/// Read-only view of a live room session. `exists: false` means the relay
/// currently holds no session for the room (never created, or evicted).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStateResponse {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    pub position: f64,
    pub playing: bool,
}

pub async fn get_room_state(
    State(state): State<RelayState>,
    Path(room_id): Path<String>,
) -> Json<RoomStateResponse> {
    match state.rooms.get(&room_id) {
        Some(session) => {
            let session = session.lock().await;
            Json(RoomStateResponse {
                exists: true,
                media_ref: session.media_ref.clone(),
                position: session.position,
                playing: session.playing,
            })
        }
        None => Json(RoomStateResponse {
            exists: false,
            media_ref: None,
            position: 0.0,
            playing: false,
        }),
    }
}
