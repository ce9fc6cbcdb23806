//! coedit-session: the client side of a collaborative room.
//!
//! A client asks the hub to join a room through [`RegistryClient`], waits in
//! the lobby under an [`AdmissionMonitor`], and once admitted runs a
//! [`RoomSession`]. The session shares one signaling channel between the
//! document, chat, and the voice mesh.

pub mod admission;
pub mod chat;
pub mod document;
pub mod exec;
pub mod participants;
pub mod registry_client;
pub mod session;
pub mod signaling;
pub mod voice;

pub use admission::{AdmissionController, AdmissionMonitor, AdmissionState};
pub use chat::{ChatEntry, ChatTranscript};
pub use document::{DocumentField, DocumentState};
pub use exec::{
    execute_and_render, ExecutionRequest, ExecutionResult, ExecutionService, Language,
    PistonExecutor,
};
pub use participants::ParticipantsView;
pub use registry_client::{MembershipApi, RegistryClient};
pub use session::{
    MediaBackend, NoMedia, RoomSession, SessionEvent, SessionOptions, SessionSnapshot,
};
pub use signaling::{SignalingClient, SignalingConfig, SignalingEvent};
pub use voice::{MediaCommand, MediaEvent, PeerState, VoiceAction, VoiceMesh};
