use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Unmodeled fields carried through verbatim (sdp, candidate, timestamps...).
/// The relay never inspects these.
pub type OpaqueFields = Map<String, Value>;

/// Envelopes accepted from clients.
///
/// Every envelope names its room; the relay drops frames whose `roomId`
/// does not match the room the connection bound at upgrade time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEnvelope {
    /// Binds the connection to the room and a participant identity.
    #[serde(rename_all = "camelCase")]
    Join {
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<String>,
    },
    /// Switch the room's current track. Any participant may do this.
    #[serde(rename_all = "camelCase")]
    MediaChange { room_id: String, url: String },
    /// Play/pause advisory. Broadcast, not authoritative.
    #[serde(rename_all = "camelCase")]
    Playback { room_id: String, playing: bool },
    /// Commit a playback position (fraction of track duration, 0.0-1.0).
    /// Only the room authority's seek mutates the shared session.
    #[serde(rename_all = "camelCase")]
    Seek { room_id: String, time: f64 },
    /// Local volume hint, relayed to the room but never part of the session.
    #[serde(rename_all = "camelCase")]
    Volume { room_id: String, volume: f64 },
    /// Opaque peer-connection negotiation payload, routed to `to` only.
    #[serde(rename_all = "camelCase")]
    Signal {
        room_id: String,
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(flatten)]
        payload: OpaqueFields,
    },
    #[serde(rename_all = "camelCase")]
    Chat {
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nickname: Option<String>,
        message: String,
        #[serde(flatten)]
        extra: OpaqueFields,
    },
}

impl ClientEnvelope {
    pub fn room_id(&self) -> &str {
        match self {
            ClientEnvelope::Join { room_id, .. }
            | ClientEnvelope::MediaChange { room_id, .. }
            | ClientEnvelope::Playback { room_id, .. }
            | ClientEnvelope::Seek { room_id, .. }
            | ClientEnvelope::Volume { room_id, .. }
            | ClientEnvelope::Signal { room_id, .. }
            | ClientEnvelope::Chat { room_id, .. } => room_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientEnvelope::Join { .. } => "join",
            ClientEnvelope::MediaChange { .. } => "media-change",
            ClientEnvelope::Playback { .. } => "playback",
            ClientEnvelope::Seek { .. } => "seek",
            ClientEnvelope::Volume { .. } => "volume",
            ClientEnvelope::Signal { .. } => "signal",
            ClientEnvelope::Chat { .. } => "chat",
        }
    }
}

/// Server-originated envelopes. `sync-state` is pushed exactly once to a
/// connection that just joined a room with a known track.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEnvelope {
    #[serde(rename_all = "camelCase")]
    SyncState {
        room_id: String,
        url: String,
        time: f64,
    },
}
