//! Voice mesh coordinator.
//!
//! A pure, event-driven state machine: feed it local commands, relayed
//! envelopes, and media events; it returns the envelopes to send and the
//! media commands to run, in the order they must happen.

mod mesh;
mod types;

#[cfg(test)]
mod tests;

pub use mesh::VoiceMesh;
pub use types::{MediaCommand, MediaEvent, NegotiationStep, PeerSession, PeerState, VoiceAction};
