//! coedit-hub: the signaling hub.
//!
//! Holds the membership registry, gates each room's signaling channel to
//! admitted participants, and fans envelopes out to every other channel in
//! the room. The hub keeps the voice roster in join order and the last
//! document snapshot so that reconnecting clients can resync.

pub mod connection;
pub mod registry;
pub mod rooms;
pub mod server;

pub use registry::MembershipRegistry;
pub use rooms::RoomHub;
pub use server::{serve, HubState};
