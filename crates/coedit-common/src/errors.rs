use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Failures at the Membership Registry boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("invalid email: {0}")]
    InvalidEmail(String),

    #[error("unknown member: {0}")]
    UnknownMember(String),
}

/// Wire tag for a [`RegistryError`], carried in registry error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryErrorKind {
    RoomNotFound,
    NotAuthorized,
    InvalidTransition,
    InvalidEmail,
    UnknownMember,
}

impl RegistryError {
    pub fn kind(&self) -> RegistryErrorKind {
        match self {
            Self::RoomNotFound(_) => RegistryErrorKind::RoomNotFound,
            Self::NotAuthorized(_) => RegistryErrorKind::NotAuthorized,
            Self::InvalidTransition(_) => RegistryErrorKind::InvalidTransition,
            Self::InvalidEmail(_) => RegistryErrorKind::InvalidEmail,
            Self::UnknownMember(_) => RegistryErrorKind::UnknownMember,
        }
    }

    /// The detail string without the display prefix.
    pub fn detail(&self) -> &str {
        match self {
            Self::RoomNotFound(s)
            | Self::NotAuthorized(s)
            | Self::InvalidTransition(s)
            | Self::InvalidEmail(s)
            | Self::UnknownMember(s) => s,
        }
    }

    /// Rebuild an error received over the registry control channel.
    pub fn from_wire(kind: RegistryErrorKind, detail: String) -> Self {
        match kind {
            RegistryErrorKind::RoomNotFound => Self::RoomNotFound(detail),
            RegistryErrorKind::NotAuthorized => Self::NotAuthorized(detail),
            RegistryErrorKind::InvalidTransition => Self::InvalidTransition(detail),
            RegistryErrorKind::InvalidEmail => Self::InvalidEmail(detail),
            RegistryErrorKind::UnknownMember => Self::UnknownMember(detail),
        }
    }
}

/// Local voice-control failures. None of these leave the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoiceError {
    #[error("no active call")]
    CallNotActive,

    #[error("call already active")]
    CallAlreadyActive,

    #[error("muted by host")]
    MutedByHost,

    #[error("only the host can do that")]
    NotHost,

    #[error("microphone unavailable: {0}")]
    MicrophoneUnavailable(String),

    #[error("voice call is full ({0} participants)")]
    RoomFull(usize),

    #[error("voice is disabled")]
    Disabled,
}

#[derive(Debug, thiserror::Error)]
pub enum CoeditError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for CoeditError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}
