//! Wire types shared by the hub and the client session.
//!
//! - [`envelope`]: the tagged message kinds relayed inside a room.
//! - [`hub`]: the hello frame each connection opens with, and hub replies.
//! - [`registry`]: membership records and the registry control frames.

pub mod envelope;
pub mod hub;
pub mod registry;

pub use envelope::{
    kinds, ChatMessagePayload, ContentUpdate, Envelope, IceCandidate, InputUpdate, OutputUpdate,
    SessionDescription, UserDisconnected, VoiceJoin, VoiceParticipant, VoiceRoster, VoiceUserRef,
};
pub use hub::{HubHello, HubResponse};
pub use registry::{MemberRecord, MemberStatus, RegistryRequest, RegistryResponse};
