//! Membership records and the registry control-channel frames.

use serde::{Deserialize, Serialize};

use crate::errors::{RegistryError, RegistryErrorKind};
use crate::id::RoomId;

/// Server-authoritative status of one email within one room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Pending,
    Accepted,
    Admin,
    Rejected,
    Removed,
}

impl MemberStatus {
    /// Whether this status grants access to the room's signaling channel.
    pub fn is_admitted(self) -> bool {
        matches!(self, Self::Accepted | Self::Admin)
    }
}

impl std::fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Admin => "admin",
            Self::Rejected => "rejected",
            Self::Removed => "removed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: String,
    pub email: String,
    pub status: MemberStatus,
    /// RFC 3339 timestamp of the first join request.
    pub joined_at: String,
}

/// Requests on a registry control channel. The acting email is the one
/// given in the channel's hello.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryRequest {
    CreateRoom,
    RequestJoin { room_id: RoomId },
    ListMembers { room_id: RoomId },
    RespondToJoin { room_id: RoomId, email: String, accept: bool },
    Kick { room_id: RoomId, email: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryResponse {
    RoomCreated { room_id: RoomId },
    Status { email: String, status: MemberStatus },
    Members { members: Vec<MemberRecord> },
    Error { kind: RegistryErrorKind, message: String },
}

impl From<RegistryError> for RegistryResponse {
    fn from(err: RegistryError) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.detail().to_string(),
        }
    }
}
