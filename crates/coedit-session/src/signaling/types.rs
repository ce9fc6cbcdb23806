//! Configuration and event/command enums for the signaling client.

use std::time::Duration;

use coedit_common::{Envelope, RoomId};
use coedit_config::SessionConfig;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    pub hub_url: String,
    pub room_id: RoomId,
    pub email: String,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Give up after this many consecutive failures. 0 retries forever.
    pub max_reconnect_attempts: u32,
    pub connect_timeout: Duration,
}

impl SignalingConfig {
    pub fn new(session: &SessionConfig, room_id: RoomId, email: impl Into<String>) -> Self {
        Self {
            hub_url: session.hub_url.clone(),
            room_id,
            email: email.into(),
            reconnect_delay: session.reconnect_delay(),
            max_reconnect_attempts: session.max_reconnect_attempts,
            connect_timeout: session.connect_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Events & Commands
// ---------------------------------------------------------------------------

/// Events emitted by the signaling client.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// The hub accepted the room hello. Anything derived from channel
    /// continuity must be rebuilt from here.
    Ready { room_id: RoomId },
    /// An envelope relayed by the hub.
    Envelope(Envelope),
    /// Transport lost. A reconnect is scheduled unless the client stopped.
    Disconnected,
    /// The host removed us. The client stops and does not reconnect.
    Evicted { reason: String },
    /// The hub refused the channel, e.g. because we are not admitted.
    Refused { message: String },
    /// A connect attempt failed.
    Error(String),
    /// The background task exited.
    Stopped,
}

#[derive(Debug)]
pub(crate) enum SignalingCommand {
    Send(String),
    Disconnect,
}
