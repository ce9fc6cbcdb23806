//! Live room state: connected signaling channels, the voice roster, and the
//! last document snapshot used to resync late joiners.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use coedit_common::protocol::{Envelope, HubResponse, UserDisconnected, VoiceParticipant};
use coedit_common::{MemberStatus, RoomId};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::registry::MembershipRegistry;

pub type ConnectionId = u64;

/// What a connection task should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(String),
    Close,
}

/// Handed back to a connection task on registration.
pub struct Registration {
    pub id: ConnectionId,
    pub rx: mpsc::UnboundedReceiver<Outbound>,
    /// Frames to send before anything relayed.
    pub snapshot: Vec<String>,
}

struct Connection {
    email: String,
    tx: mpsc::UnboundedSender<Outbound>,
}

struct RosterEntry {
    participant: VoiceParticipant,
    owner: ConnectionId,
}

#[derive(Default)]
struct RoomState {
    connections: HashMap<ConnectionId, Connection>,
    /// Voice roster in join order. This order decides who offers to whom.
    voice: Vec<RosterEntry>,
    content: Option<String>,
    output: Option<String>,
    input: Option<String>,
    /// Emails the host has muted. Survives reconnects and rejoins.
    host_muted: HashSet<String>,
}

type Deliveries = Vec<(mpsc::UnboundedSender<Outbound>, Outbound)>;

fn encode(envelope: &Envelope) -> Option<String> {
    match envelope.encode() {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(kind = envelope.kind(), error = %e, "Failed to encode envelope");
            None
        }
    }
}

impl RoomState {
    fn fan_out(&self, except: ConnectionId, frame: &str) -> Deliveries {
        self.connections
            .iter()
            .filter(|(id, _)| **id != except)
            .map(|(_, c)| (c.tx.clone(), Outbound::Frame(frame.to_string())))
            .collect()
    }

    fn broadcast(&self, frame: &str) -> Deliveries {
        self.connections
            .values()
            .map(|c| (c.tx.clone(), Outbound::Frame(frame.to_string())))
            .collect()
    }

    fn roster(&self) -> Vec<VoiceParticipant> {
        self.voice.iter().map(|e| e.participant.clone()).collect()
    }

    fn roster_broadcast(&self) -> Deliveries {
        encode(&Envelope::roster(self.roster()))
            .map(|frame| self.broadcast(&frame))
            .unwrap_or_default()
    }

    fn entry_mut(&mut self, user_id: &str) -> Option<&mut RosterEntry> {
        self.voice
            .iter_mut()
            .find(|e| e.participant.user_id == user_id)
    }

    fn owner_of(&self, user_id: &str) -> Option<&Connection> {
        let owner = self
            .voice
            .iter()
            .find(|e| e.participant.user_id == user_id)?
            .owner;
        self.connections.get(&owner)
    }

    fn snapshot(&self) -> Vec<String> {
        let mut frames = Vec::new();
        if let Some(content) = &self.content {
            frames.extend(encode(&Envelope::content_update(content.clone())));
        }
        if let Some(output) = &self.output {
            frames.extend(encode(&Envelope::output(output.clone())));
        }
        if let Some(input) = &self.input {
            frames.extend(encode(&Envelope::input_update(input.clone())));
        }
        if !self.voice.is_empty() {
            frames.extend(encode(&Envelope::roster(self.roster())));
        }
        frames
    }
}

/// Enqueue while the room lock is held, so every channel sees the room's
/// frames in the order they were applied.
fn deliver(deliveries: Deliveries) {
    for (tx, out) in deliveries {
        if tx.send(out).is_err() {
            debug!("Peer channel closed");
        }
    }
}

/// Thread-safe map of live rooms. Cheap to clone.
#[derive(Clone)]
pub struct RoomHub {
    rooms: Arc<RwLock<HashMap<RoomId, Arc<Mutex<RoomState>>>>>,
    registry: MembershipRegistry,
    next_id: Arc<AtomicU64>,
}

impl RoomHub {
    pub fn new(registry: MembershipRegistry) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            registry,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    async fn room(&self, room_id: &RoomId) -> Option<Arc<Mutex<RoomState>>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Attach a signaling channel to a room, creating live state on first use.
    pub async fn register(&self, room_id: &RoomId, email: &str) -> Registration {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // Map lock is held until the connection is inserted so a concurrent
        // last-unregister cannot drop the room underneath us.
        let mut map = self.rooms.write().await;
        let room = Arc::clone(map.entry(room_id.clone()).or_default());
        let mut state = room.lock().await;
        drop(map);
        state.connections.insert(
            id,
            Connection {
                email: email.to_string(),
                tx,
            },
        );
        debug!(room = %room_id, conn = id, connections = state.connections.len(), "Connection registered");

        Registration {
            id,
            rx,
            snapshot: state.snapshot(),
        }
    }

    /// Detach a channel. Peers learn about it through `user_disconnected`
    /// and, if it held voice tokens, a fresh roster.
    pub async fn unregister(&self, room_id: &RoomId, conn: ConnectionId) {
        let Some(room) = self.room(room_id).await else {
            return;
        };
        {
            let mut state = room.lock().await;
            let Some(connection) = state.connections.remove(&conn) else {
                return;
            };

            let user_ids: Vec<String> = state
                .voice
                .iter()
                .filter(|e| e.owner == conn)
                .map(|e| e.participant.user_id.clone())
                .collect();
            state.voice.retain(|e| e.owner != conn);

            let mut deliveries = Deliveries::new();
            let notice = Envelope::UserDisconnected(UserDisconnected {
                email: connection.email.clone(),
                user_ids: user_ids.clone(),
            });
            if let Some(frame) = encode(&notice) {
                deliveries.extend(state.broadcast(&frame));
            }
            if !user_ids.is_empty() {
                deliveries.extend(state.roster_broadcast());
            }
            debug!(room = %room_id, conn, email = %connection.email, "Connection unregistered");
            deliver(deliveries);
        }

        let mut map = self.rooms.write().await;
        let Some(room) = map.get(room_id).cloned() else {
            return;
        };
        let mut state = room.lock().await;
        if !state.connections.is_empty() {
            return;
        }
        if state.host_muted.is_empty() {
            drop(state);
            map.remove(room_id);
            info!(room = %room_id, "Last connection left, dropping live room state");
        } else {
            let host_muted = std::mem::take(&mut state.host_muted);
            *state = RoomState {
                host_muted,
                ..RoomState::default()
            };
            info!(room = %room_id, "Last connection left, keeping host mutes only");
        }
    }

    /// Handle one text frame from `conn`.
    pub async fn relay(&self, room_id: &RoomId, conn: ConnectionId, email: &str, text: &str) {
        let envelope = match Envelope::decode(text) {
            Ok(env) => env,
            Err(e) => {
                warn!(room = %room_id, conn, error = %e, "Dropping malformed envelope");
                return;
            }
        };

        let sender_is_host = match &envelope {
            Envelope::VoiceMuteUser(_) | Envelope::VoiceUnmuteUser(_) => {
                self.registry.status_of(room_id, email).await == Some(MemberStatus::Admin)
            }
            _ => false,
        };

        let Some(room) = self.room(room_id).await else {
            return;
        };
        let mut state = room.lock().await;
        deliver(Self::apply(&mut state, room_id, conn, email, text, envelope, sender_is_host));
    }

    fn apply(
        state: &mut RoomState,
        room_id: &RoomId,
        conn: ConnectionId,
        email: &str,
        text: &str,
        envelope: Envelope,
        sender_is_host: bool,
    ) -> Deliveries {
        match envelope {
            Envelope::ContentUpdate(update) => {
                state.content = Some(update.content);
                state.fan_out(conn, text)
            }
            Envelope::Output(update) => {
                state.output = Some(update.output);
                state.fan_out(conn, text)
            }
            Envelope::InputUpdate(update) => {
                state.input = Some(update.input);
                state.fan_out(conn, text)
            }
            Envelope::ChatMessage(_) => state.fan_out(conn, text),

            Envelope::VoiceJoin(join) => {
                if state.entry_mut(&join.user_id).is_some() {
                    debug!(room = %room_id, user = %join.user_id, "Duplicate voice_join ignored");
                    return Deliveries::new();
                }
                let muted_by_host = state.host_muted.contains(email);
                let mut participant = VoiceParticipant::new(join.user_id.clone(), email);
                participant.muted_by_host = muted_by_host;
                state.voice.push(RosterEntry {
                    participant,
                    owner: conn,
                });
                info!(room = %room_id, user = %join.user_id, email, muted_by_host, "Joined voice");
                let mut out = state.fan_out(conn, text);
                out.extend(state.roster_broadcast());
                out
            }
            Envelope::VoiceLeave(user) => {
                let before = state.voice.len();
                state
                    .voice
                    .retain(|e| !(e.participant.user_id == user.user_id && e.owner == conn));
                if state.voice.len() == before {
                    return Deliveries::new();
                }
                info!(room = %room_id, user = %user.user_id, "Left voice");
                let mut out = state.fan_out(conn, text);
                out.extend(state.roster_broadcast());
                out
            }
            Envelope::VoiceSelfMute(user) => Self::set_self_mute(state, conn, text, &user.user_id, true),
            Envelope::VoiceSelfUnmute(user) => {
                Self::set_self_mute(state, conn, text, &user.user_id, false)
            }
            Envelope::VoiceMuteUser(user) | Envelope::VoiceUnmuteUser(user) if !sender_is_host => {
                warn!(room = %room_id, email, target = %user.user_id, "Dropping host mute from non-host");
                Deliveries::new()
            }
            Envelope::VoiceMuteUser(user) => Self::set_host_mute(state, text, &user.user_id, true),
            Envelope::VoiceUnmuteUser(user) => Self::set_host_mute(state, text, &user.user_id, false),

            Envelope::VoiceOffer(desc) | Envelope::VoiceAnswer(desc) => {
                Self::route(state, conn, text, &desc.target)
            }
            Envelope::VoiceIceCandidate(candidate) => {
                Self::route(state, conn, text, &candidate.target)
            }

            Envelope::VoiceParticipantsUpdate(_) | Envelope::UserDisconnected(_) => {
                warn!(room = %room_id, conn, "Dropping hub-only envelope sent by a client");
                Deliveries::new()
            }
            Envelope::Unknown(kind) => {
                debug!(room = %room_id, kind = %kind, "Relaying unknown envelope kind");
                state.fan_out(conn, text)
            }
        }
    }

    fn set_self_mute(
        state: &mut RoomState,
        conn: ConnectionId,
        text: &str,
        user_id: &str,
        muted: bool,
    ) -> Deliveries {
        match state.entry_mut(user_id) {
            Some(entry) if entry.owner == conn => entry.participant.muted_by_self = muted,
            _ => return Deliveries::new(),
        }
        let mut out = state.fan_out(conn, text);
        out.extend(state.roster_broadcast());
        out
    }

    /// Updates the roster entry and the remembered mute for its email. The
    /// notice reaches every channel, the host's included.
    fn set_host_mute(state: &mut RoomState, text: &str, user_id: &str, muted: bool) -> Deliveries {
        let email = match state.entry_mut(user_id) {
            Some(entry) => {
                entry.participant.muted_by_host = muted;
                entry.participant.email.clone()
            }
            None => return Deliveries::new(),
        };
        if muted {
            state.host_muted.insert(email);
        } else {
            state.host_muted.remove(&email);
        }
        let mut out = state.broadcast(text);
        out.extend(state.roster_broadcast());
        out
    }

    /// Send an addressed voice frame to the target's channel only, falling
    /// back to every other channel when the target is not on the roster.
    fn route(state: &RoomState, conn: ConnectionId, text: &str, target: &str) -> Deliveries {
        match state.owner_of(target) {
            Some(owner) => vec![(owner.tx.clone(), Outbound::Frame(text.to_string()))],
            None => state.fan_out(conn, text),
        }
    }

    /// Tell every channel held by `email` that it was removed, then close it.
    pub async fn evict(&self, room_id: &RoomId, email: &str, reason: &str) -> usize {
        let Some(room) = self.room(room_id).await else {
            return 0;
        };
        let frame = match serde_json::to_string(&HubResponse::Evicted {
            reason: reason.to_string(),
        }) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to encode eviction");
                return 0;
            }
        };
        let state = room.lock().await;
        let mut deliveries = Deliveries::new();
        for connection in state.connections.values().filter(|c| c.email == email) {
            deliveries.push((connection.tx.clone(), Outbound::Frame(frame.clone())));
            deliveries.push((connection.tx.clone(), Outbound::Close));
        }
        let count = deliveries.len() / 2;
        deliver(deliveries);
        drop(state);
        if count > 0 {
            info!(room = %room_id, email, count, "Evicted connections");
        }
        count
    }

    pub async fn roster(&self, room_id: &RoomId) -> Vec<VoiceParticipant> {
        match self.room(room_id).await {
            Some(room) => room.lock().await.roster(),
            None => Vec::new(),
        }
    }

    pub async fn connection_count(&self, room_id: &RoomId) -> usize {
        match self.room(room_id).await {
            Some(room) => room.lock().await.connections.len(),
            None => 0,
        }
    }
}
