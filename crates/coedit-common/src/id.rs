use serde::{Deserialize, Serialize};
use std::fmt;

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Session-scoped voice token, e.g. `user_3f9a1c2`. Never derived from the email.
pub fn new_voice_user_id() -> String {
    let simple = uuid::Uuid::new_v4().simple().to_string();
    format!("user_{}", &simple[..7])
}

/// A fresh room identifier, short enough to read out loud.
pub fn new_room_id() -> RoomId {
    let simple = uuid::Uuid::new_v4().simple().to_string();
    RoomId(simple[..10].to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
