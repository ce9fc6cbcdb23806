//! Shared types for the coedit collaborative session backbone.
//!
//! Holds the error taxonomy, identifier helpers, and every wire type that
//! both the hub and the client session need to agree on.

pub mod errors;
pub mod id;
pub mod protocol;

pub use errors::{CoeditError, ConfigError, RegistryError, RegistryErrorKind, VoiceError};
pub use id::{new_id, new_room_id, new_voice_user_id, RoomId};
pub use protocol::{Envelope, MemberRecord, MemberStatus, VoiceParticipant};

pub type Result<T> = std::result::Result<T, CoeditError>;
