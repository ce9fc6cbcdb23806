//! Client session configuration: transport, admission polling, chat, and
//! the external execution service.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base WebSocket URL of the hub.
    pub hub_url: String,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay_secs: u32,
    /// 0 means retry forever.
    pub max_reconnect_attempts: u32,
    pub connect_timeout_secs: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hub_url: "ws://localhost:8000".into(),
            reconnect_delay_secs: 3,
            max_reconnect_attempts: 0,
            connect_timeout_secs: 15,
        }
    }
}

impl SessionConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.reconnect_delay_secs))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.connect_timeout_secs))
    }
}

/// Membership polling cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Poll interval while waiting in the lobby.
    pub pending_poll_ms: u32,
    /// Poll interval after admission (eviction detection).
    pub admitted_poll_ms: u32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            pending_poll_ms: 1000,
            admitted_poll_ms: 2000,
        }
    }
}

impl AdmissionConfig {
    pub fn pending_poll(&self) -> Duration {
        Duration::from_millis(u64::from(self.pending_poll_ms))
    }

    pub fn admitted_poll(&self) -> Duration {
        Duration::from_millis(u64::from(self.admitted_poll_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Visible transcript length. Older messages scroll out.
    pub max_messages: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self { max_messages: 500 }
    }
}

/// Remote code execution service (Piston-compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub endpoint: String,
    pub timeout_secs: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://emkc.org/api/v2/piston".into(),
            timeout_secs: 30,
        }
    }
}
