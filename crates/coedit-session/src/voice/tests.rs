use std::collections::{HashMap, VecDeque};

use coedit_common::protocol::{SessionDescription, VoiceParticipant, VoiceRoster, VoiceUserRef};
use coedit_common::{Envelope, VoiceError};
use coedit_config::VoiceConfig;

use super::*;

// ---------------------------------------------------------------------------
// In-memory room: an ordered hub plus a media layer that always succeeds
// ---------------------------------------------------------------------------

enum Work {
    Deliver(usize, Envelope),
    Media(usize, MediaEvent),
}

struct Room {
    meshes: Vec<VoiceMesh>,
    roster: Vec<(usize, VoiceParticipant)>,
    queue: VecDeque<Work>,
    /// Offers sent, keyed by (sender, target).
    offers: HashMap<(String, String), usize>,
    capture: Vec<bool>,
}

impl Room {
    fn new(clients: usize) -> Self {
        let config = VoiceConfig::default();
        let meshes = (0..clients)
            .map(|i| VoiceMesh::new(format!("user{i}@x.com"), &config))
            .collect();
        Self {
            meshes,
            roster: Vec::new(),
            queue: VecDeque::new(),
            offers: HashMap::new(),
            capture: vec![true; clients],
        }
    }

    fn uid(i: usize) -> String {
        format!("user_{i}")
    }

    fn join(&mut self, client: usize) {
        let actions = self.meshes[client]
            .start_call(Self::uid(client))
            .expect("start_call");
        self.run(client, actions);
    }

    fn run(&mut self, client: usize, actions: Vec<VoiceAction>) {
        for action in actions {
            match action {
                VoiceAction::Send(envelope) => self.hub_receive(client, envelope),
                VoiceAction::Media(command) => self.media(client, command),
            }
        }
    }

    fn media(&mut self, client: usize, command: MediaCommand) {
        match command {
            MediaCommand::CreateOffer { peer } => {
                let sdp = format!("offer {client}->{peer}");
                self.queue
                    .push_back(Work::Media(client, MediaEvent::LocalOffer { peer, sdp }));
            }
            MediaCommand::AcceptOffer { peer, .. } => {
                self.queue.push_back(Work::Media(
                    client,
                    MediaEvent::LocalAnswer {
                        peer: peer.clone(),
                        sdp: format!("answer {client}->{peer}"),
                    },
                ));
                self.queue
                    .push_back(Work::Media(client, MediaEvent::TrackReceived { peer }));
            }
            MediaCommand::ApplyAnswer { peer, .. } => {
                self.queue
                    .push_back(Work::Media(client, MediaEvent::TrackReceived { peer }));
            }
            MediaCommand::SetCaptureEnabled(on) => self.capture[client] = on,
            MediaCommand::ReleaseCapture => self.capture[client] = false,
            MediaCommand::AddIceCandidate { .. } | MediaCommand::ClosePeer { .. } => {}
        }
    }

    fn owner(&self, user_id: &str) -> Option<usize> {
        self.roster
            .iter()
            .find(|(_, p)| p.user_id == user_id)
            .map(|(c, _)| *c)
    }

    fn to_others(&mut self, from: usize, envelope: &Envelope) {
        for i in 0..self.meshes.len() {
            if i != from {
                self.queue.push_back(Work::Deliver(i, envelope.clone()));
            }
        }
    }

    fn broadcast_roster(&mut self) {
        let roster = Envelope::roster(self.roster.iter().map(|(_, p)| p.clone()).collect());
        for i in 0..self.meshes.len() {
            self.queue.push_back(Work::Deliver(i, roster.clone()));
        }
    }

    fn flag(&mut self, user_id: &str, update: impl FnOnce(&mut VoiceParticipant)) {
        if let Some((_, p)) = self.roster.iter_mut().find(|(_, p)| p.user_id == user_id) {
            update(p);
        }
    }

    fn hub_receive(&mut self, from: usize, envelope: Envelope) {
        match &envelope {
            Envelope::VoiceJoin(join) => {
                if self.owner(&join.user_id).is_none() {
                    self.roster
                        .push((from, VoiceParticipant::new(&join.user_id, &join.email)));
                }
                self.to_others(from, &envelope);
                self.broadcast_roster();
            }
            Envelope::VoiceLeave(user) => {
                self.roster.retain(|(_, p)| p.user_id != user.user_id);
                self.to_others(from, &envelope);
                self.broadcast_roster();
            }
            Envelope::VoiceOffer(desc) | Envelope::VoiceAnswer(desc) => {
                if matches!(envelope, Envelope::VoiceOffer(_)) {
                    *self
                        .offers
                        .entry((desc.sender.clone(), desc.target.clone()))
                        .or_default() += 1;
                }
                if let Some(target) = self.owner(&desc.target) {
                    self.queue.push_back(Work::Deliver(target, envelope.clone()));
                }
            }
            Envelope::VoiceIceCandidate(c) => {
                if let Some(target) = self.owner(&c.target) {
                    self.queue.push_back(Work::Deliver(target, envelope.clone()));
                }
            }
            Envelope::VoiceSelfMute(u) => {
                self.flag(&u.user_id, |p| p.muted_by_self = true);
                self.to_others(from, &envelope);
                self.broadcast_roster();
            }
            Envelope::VoiceSelfUnmute(u) => {
                self.flag(&u.user_id, |p| p.muted_by_self = false);
                self.to_others(from, &envelope);
                self.broadcast_roster();
            }
            Envelope::VoiceMuteUser(u) => {
                self.flag(&u.user_id, |p| p.muted_by_host = true);
                self.to_others(from, &envelope);
                self.broadcast_roster();
            }
            Envelope::VoiceUnmuteUser(u) => {
                self.flag(&u.user_id, |p| p.muted_by_host = false);
                self.to_others(from, &envelope);
                self.broadcast_roster();
            }
            _ => self.to_others(from, &envelope),
        }
    }

    fn pump(&mut self) {
        let mut steps = 0;
        while let Some(work) = self.queue.pop_front() {
            steps += 1;
            assert!(steps < 10_000, "room did not settle");
            let (client, actions) = match work {
                Work::Deliver(client, envelope) => (client, self.meshes[client].on_envelope(&envelope)),
                Work::Media(client, event) => (client, self.meshes[client].on_media_event(event)),
            };
            self.run(client, actions);
        }
    }

    fn offers_between(&self, a: usize, b: usize) -> usize {
        let (a, b) = (Self::uid(a), Self::uid(b));
        self.offers.get(&(a.clone(), b.clone())).copied().unwrap_or(0)
            + self.offers.get(&(b, a)).copied().unwrap_or(0)
    }

    fn assert_full_mesh(&self, members: &[usize]) {
        for &a in members {
            let peers: Vec<&str> = self.meshes[a].peers().map(|p| p.remote.as_str()).collect();
            assert_eq!(peers.len(), members.len() - 1, "client {a} peers: {peers:?}");
            for &b in members {
                if a == b {
                    continue;
                }
                let session = self.meshes[a]
                    .peer(&Self::uid(b))
                    .unwrap_or_else(|| panic!("client {a} has no session with {b}"));
                assert_eq!(session.state, PeerState::Connected, "{a} -> {b}");
                if a < b {
                    assert_eq!(self.offers_between(a, b), 1, "offers between {a} and {b}");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Convergence
// ---------------------------------------------------------------------------

#[test]
fn simultaneous_joins_form_a_full_mesh() {
    let mut room = Room::new(4);
    for i in 0..4 {
        room.join(i);
    }
    room.pump();
    room.assert_full_mesh(&[0, 1, 2, 3]);
}

#[test]
fn staggered_joins_form_a_full_mesh() {
    let mut room = Room::new(3);
    room.join(0);
    room.pump();
    room.join(1);
    room.join(2);
    room.pump();
    room.assert_full_mesh(&[0, 1, 2]);
}

#[test]
fn earlier_participant_initiates() {
    let mut room = Room::new(2);
    room.join(0);
    room.pump();
    room.join(1);
    room.pump();
    assert_eq!(room.offers.get(&(Room::uid(0), Room::uid(1))), Some(&1));
    assert_eq!(room.offers.get(&(Room::uid(1), Room::uid(0))), None);
    assert!(room.meshes[0].peer(&Room::uid(1)).unwrap().initiator);
    assert!(!room.meshes[1].peer(&Room::uid(0)).unwrap().initiator);
}

#[test]
fn leaving_tears_down_only_that_participant() {
    let mut room = Room::new(3);
    for i in 0..3 {
        room.join(i);
    }
    room.pump();

    let actions = room.meshes[1].end_call().unwrap();
    assert!(matches!(
        actions.last(),
        Some(VoiceAction::Send(Envelope::VoiceLeave(_)))
    ));
    room.run(1, actions);
    room.pump();

    assert!(!room.meshes[1].in_call());
    assert_eq!(room.meshes[1].peers().count(), 0);
    assert!(!room.capture[1]);
    room.assert_full_mesh(&[0, 2]);
    assert!(room.meshes[0].peer(&Room::uid(1)).is_none());
}

#[test]
fn rejoin_after_leave_converges_again() {
    let mut room = Room::new(3);
    for i in 0..3 {
        room.join(i);
    }
    room.pump();
    let actions = room.meshes[0].end_call().unwrap();
    room.run(0, actions);
    room.pump();

    room.join(0);
    room.pump();
    for a in [1, 2] {
        assert_eq!(
            room.meshes[a].peer(&Room::uid(0)).map(|p| p.state),
            Some(PeerState::Connected)
        );
    }
    // Client 0 is now last in the order, so the others offered to it.
    assert!(!room.meshes[0].peer(&Room::uid(1)).unwrap().initiator);
}

#[test]
fn disconnect_drops_peers_and_is_announced() {
    let mut room = Room::new(3);
    for i in 0..3 {
        room.join(i);
    }
    room.pump();

    room.roster.retain(|(c, _)| *c != 2);
    let gone = Envelope::UserDisconnected(coedit_common::protocol::UserDisconnected {
        email: "user2@x.com".into(),
        user_ids: vec![Room::uid(2)],
    });
    room.to_others(2, &gone);
    room.broadcast_roster();
    room.pump();
    room.assert_full_mesh(&[0, 1]);
}

// ---------------------------------------------------------------------------
// Mute precedence
// ---------------------------------------------------------------------------

#[test]
fn host_mute_beats_self_unmute() {
    let mut room = Room::new(2);
    room.meshes[0].set_host(true);
    room.join(0);
    room.join(1);
    room.pump();

    let actions = room.meshes[0].mute_user(&Room::uid(1)).unwrap();
    room.run(0, actions);
    room.pump();

    assert!(room.meshes[1].muted_by_host());
    assert!(room.meshes[1].is_muted());
    assert!(!room.capture[1]);
    assert_eq!(room.meshes[1].self_unmute().unwrap_err(), VoiceError::MutedByHost);

    let actions = room.meshes[0].unmute_user(&Room::uid(1)).unwrap();
    room.run(0, actions);
    room.pump();

    // Lifting the host mute does not turn the microphone back on.
    assert!(!room.meshes[1].muted_by_host());
    assert!(room.meshes[1].is_muted());
    assert!(!room.capture[1]);

    let actions = room.meshes[1].self_unmute().unwrap();
    room.run(1, actions);
    room.pump();
    assert!(room.capture[1]);
    assert!(!room.meshes[1].is_muted());
}

#[test]
fn only_host_may_mute_others() {
    let mut mesh = VoiceMesh::new("a@x.com", &VoiceConfig::default());
    assert_eq!(mesh.mute_user("user_x").unwrap_err(), VoiceError::NotHost);
    assert_eq!(mesh.unmute_user("user_x").unwrap_err(), VoiceError::NotHost);
    mesh.set_host(true);
    assert!(mesh.mute_user("user_x").is_ok());
}

#[test]
fn self_mute_updates_everyones_roster() {
    let mut room = Room::new(2);
    room.join(0);
    room.join(1);
    room.pump();

    let actions = room.meshes[1].self_mute().unwrap();
    room.run(1, actions);
    room.pump();

    let entry = room.meshes[0]
        .roster()
        .iter()
        .find(|p| p.user_id == Room::uid(1))
        .cloned()
        .unwrap();
    assert!(entry.muted_by_self);
    assert!(!entry.muted_by_host);
}

// ---------------------------------------------------------------------------
// Single-mesh edge cases
// ---------------------------------------------------------------------------

fn roster_of(ids: &[&str]) -> Vec<VoiceParticipant> {
    ids.iter()
        .map(|id| VoiceParticipant::new(*id, format!("{id}@x.com")))
        .collect()
}

#[test]
fn call_lifecycle_errors() {
    let mut mesh = VoiceMesh::new("a@x.com", &VoiceConfig::default());
    assert_eq!(mesh.end_call().unwrap_err(), VoiceError::CallNotActive);
    assert_eq!(mesh.self_mute().unwrap_err(), VoiceError::CallNotActive);
    mesh.start_call("user_a".into()).unwrap();
    assert_eq!(
        mesh.start_call("user_b".into()).unwrap_err(),
        VoiceError::CallAlreadyActive
    );

    let disabled = VoiceConfig {
        enabled: false,
        ..VoiceConfig::default()
    };
    let mut mesh = VoiceMesh::new("a@x.com", &disabled);
    assert_eq!(mesh.start_call("user_a".into()).unwrap_err(), VoiceError::Disabled);
}

#[test]
fn full_call_refuses_new_participant() {
    let config = VoiceConfig {
        max_participants: 2,
        ..VoiceConfig::default()
    };
    let mut mesh = VoiceMesh::new("c@x.com", &config);
    mesh.on_roster(roster_of(&["user_a", "user_b"]));
    assert_eq!(
        mesh.start_call("user_c".into()).unwrap_err(),
        VoiceError::RoomFull(2)
    );
}

#[test]
fn offer_from_later_participant_is_ignored() {
    let mut mesh = VoiceMesh::new("a@x.com", &VoiceConfig::default());
    mesh.start_call("user_a".into()).unwrap();
    let actions = mesh.on_roster(roster_of(&["user_a", "user_b"]));
    assert_eq!(
        actions,
        vec![VoiceAction::Media(MediaCommand::CreateOffer {
            peer: "user_b".into()
        })]
    );

    let offer = Envelope::VoiceOffer(SessionDescription {
        sender: "user_b".into(),
        target: "user_a".into(),
        sdp: "glare".into(),
    });
    assert!(mesh.on_envelope(&offer).is_empty());
    assert_eq!(
        mesh.peer("user_b").map(|p| p.state),
        Some(PeerState::Negotiating(NegotiationStep::OfferSent))
    );
}

#[test]
fn offer_addressed_elsewhere_is_ignored() {
    let mut mesh = VoiceMesh::new("b@x.com", &VoiceConfig::default());
    mesh.start_call("user_b".into()).unwrap();
    mesh.on_roster(roster_of(&["user_a", "user_b", "user_c"]));
    let offer = Envelope::VoiceOffer(SessionDescription {
        sender: "user_a".into(),
        target: "user_c".into(),
        sdp: "x".into(),
    });
    assert!(mesh.on_envelope(&offer).is_empty());
}

#[test]
fn failed_peer_is_isolated() {
    let mut mesh = VoiceMesh::new("a@x.com", &VoiceConfig::default());
    mesh.start_call("user_a".into()).unwrap();
    mesh.on_roster(roster_of(&["user_a", "user_b", "user_c"]));

    let actions = mesh.on_media_event(MediaEvent::Failed {
        peer: "user_b".into(),
        reason: "ice failed".into(),
    });
    assert_eq!(
        actions,
        vec![VoiceAction::Media(MediaCommand::ClosePeer {
            peer: "user_b".into()
        })]
    );
    assert_eq!(mesh.peer("user_b").map(|p| p.state), Some(PeerState::Unreachable));
    assert_eq!(
        mesh.peer("user_c").map(|p| p.state),
        Some(PeerState::Negotiating(NegotiationStep::OfferSent))
    );
    assert!(mesh.in_call());
}

#[test]
fn reconnect_reannounces_with_same_id() {
    let mut mesh = VoiceMesh::new("a@x.com", &VoiceConfig::default());
    mesh.start_call("user_a".into()).unwrap();
    mesh.on_roster(roster_of(&["user_a", "user_b"]));
    mesh.self_mute().unwrap();

    let dropped = mesh.on_disconnected();
    assert_eq!(dropped.len(), 1);
    assert_eq!(mesh.peers().count(), 0);

    let actions = mesh.on_ready();
    assert_eq!(
        actions,
        vec![
            VoiceAction::Send(Envelope::VoiceJoin(coedit_common::protocol::VoiceJoin {
                user_id: "user_a".into(),
                email: "a@x.com".into(),
            })),
            VoiceAction::Send(Envelope::VoiceSelfMute(VoiceUserRef {
                user_id: "user_a".into()
            })),
        ]
    );
}

#[test]
fn roster_host_flag_mutes_locally() {
    let mut mesh = VoiceMesh::new("b@x.com", &VoiceConfig::default());
    mesh.start_call("user_b".into()).unwrap();
    let mut roster = roster_of(&["user_a", "user_b"]);
    roster[1].muted_by_host = true;

    let actions = mesh.on_envelope(&Envelope::VoiceParticipantsUpdate(VoiceRoster {
        participants: roster,
    }));
    assert!(actions.contains(&VoiceAction::Media(MediaCommand::SetCaptureEnabled(false))));
    assert!(mesh.muted_by_host());
}

#[test]
fn observers_track_roster_without_peers() {
    let mut mesh = VoiceMesh::new("z@x.com", &VoiceConfig::default());
    let actions = mesh.on_roster(roster_of(&["user_a", "user_b"]));
    assert!(actions.is_empty());
    assert_eq!(mesh.roster().len(), 2);
    assert_eq!(mesh.peers().count(), 0);
}

#[test]
fn host_mute_survives_reconnect() {
    let mut mesh = VoiceMesh::new("b@x.com", &VoiceConfig::default());
    mesh.start_call("user_b".into()).unwrap();
    mesh.on_roster(roster_of(&["user_a", "user_b"]));
    mesh.on_envelope(&Envelope::VoiceMuteUser(VoiceUserRef {
        user_id: "user_b".into(),
    }));
    assert!(mesh.muted_by_host());

    mesh.on_disconnected();
    let actions = mesh.on_ready();
    assert!(!actions.contains(&VoiceAction::Media(MediaCommand::SetCaptureEnabled(true))));
    assert!(mesh.muted_by_host());

    // A roster without the flag does not lift the mute.
    mesh.on_roster(roster_of(&["user_a", "user_b"]));
    assert_eq!(mesh.self_unmute().unwrap_err(), VoiceError::MutedByHost);
    assert!(mesh.is_muted());

    mesh.on_envelope(&Envelope::VoiceUnmuteUser(VoiceUserRef {
        user_id: "user_b".into(),
    }));
    assert!(!mesh.muted_by_host());
    let actions = mesh.self_unmute().unwrap();
    assert!(actions.contains(&VoiceAction::Media(MediaCommand::SetCaptureEnabled(true))));
}

#[test]
fn reconnect_while_host_muted_reannounces_muted() {
    let mut room = Room::new(2);
    room.meshes[0].set_host(true);
    room.join(0);
    room.join(1);
    room.pump();
    let actions = room.meshes[0].mute_user(&Room::uid(1)).unwrap();
    room.run(0, actions);
    room.pump();

    // Client 1 drops off the hub and comes back with the same id.
    room.roster.retain(|(c, _)| *c != 1);
    room.meshes[1].on_disconnected();
    let actions = room.meshes[1].on_ready();
    room.run(1, actions);
    room.pump();

    assert!(!room.capture[1]);
    assert_eq!(room.meshes[1].self_unmute().unwrap_err(), VoiceError::MutedByHost);
    let entry = room.meshes[0]
        .roster()
        .iter()
        .find(|p| p.user_id == Room::uid(1))
        .cloned()
        .unwrap();
    assert!(entry.muted_by_self);
}
