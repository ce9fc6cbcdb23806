//! Hub-level framing. Only the first frame of a connection is a hello;
//! afterwards a signaling channel carries envelopes and a registry channel
//! carries request/response pairs.

use serde::{Deserialize, Serialize};

use crate::id::RoomId;

/// First frame a client sends to identify itself and pick a channel type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubHello {
    /// Open the room's signaling channel. Requires an admitted email.
    RoomHello { room_id: RoomId, email: String },

    /// Open a membership control channel acting as `email`.
    RegistryHello { email: String },
}

/// Frames the hub itself originates (never relayed envelopes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubResponse {
    SessionReady { room_id: RoomId },

    RegistryReady,

    /// The host removed this participant; the hub closes right after.
    Evicted { reason: String },

    Error { message: String },
}

impl HubResponse {
    /// Parse a frame only if it is hub-originated. Envelopes yield `None`.
    pub fn decode_control(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}
