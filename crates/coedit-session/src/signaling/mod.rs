//! Reconnecting client for a room's signaling channel.
//!
//! One WebSocket per room carries every envelope kind. The background task
//! sends the room hello on each (re)connect, reports hub control frames as
//! events, and retries with a fixed delay after transport loss. A fresh
//! `Ready` event is a full resynchronization point for the session.

mod client;
mod connection;
mod types;

pub use client::SignalingClient;
pub use types::{SignalingConfig, SignalingEvent};
