//! The per-client voice mesh state machine.

use std::collections::{BTreeMap, HashSet};

use coedit_common::protocol::{
    IceCandidate, SessionDescription, VoiceJoin, VoiceParticipant, VoiceUserRef,
};
use coedit_common::{Envelope, VoiceError};
use coedit_config::VoiceConfig;
use tracing::{debug, info, warn};

use super::types::{
    MediaCommand, MediaEvent, NegotiationStep, PeerSession, PeerState, VoiceAction,
};

#[derive(Debug, Clone)]
struct LocalVoice {
    user_id: String,
    muted_by_self: bool,
    muted_by_host: bool,
}

/// One client's view of the room's voice call.
///
/// The hub's roster order is the single ordering every client agrees on.
/// For each pair, the participant earlier in that order sends the offer and
/// the later one waits for it.
pub struct VoiceMesh {
    email: String,
    enabled: bool,
    max_participants: usize,
    is_host: bool,
    local: Option<LocalVoice>,
    roster: Vec<VoiceParticipant>,
    peers: BTreeMap<String, PeerSession>,
}

impl VoiceMesh {
    pub fn new(email: impl Into<String>, config: &VoiceConfig) -> Self {
        Self {
            email: email.into(),
            enabled: config.enabled,
            max_participants: config.max_participants as usize,
            is_host: false,
            local: None,
            roster: Vec::new(),
            peers: BTreeMap::new(),
        }
    }

    // -- Queries --------------------------------------------------------------

    pub fn set_host(&mut self, host: bool) {
        self.is_host = host;
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn in_call(&self) -> bool {
        self.local.is_some()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.local.as_ref().map(|l| l.user_id.as_str())
    }

    /// Outgoing audio is off, for either reason.
    pub fn is_muted(&self) -> bool {
        self.local
            .as_ref()
            .is_some_and(|l| l.muted_by_self || l.muted_by_host)
    }

    pub fn muted_by_host(&self) -> bool {
        self.local.as_ref().is_some_and(|l| l.muted_by_host)
    }

    pub fn roster(&self) -> &[VoiceParticipant] {
        &self.roster
    }

    pub fn peer(&self, user_id: &str) -> Option<&PeerSession> {
        self.peers.get(user_id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerSession> {
        self.peers.values()
    }

    fn position(&self, user_id: &str) -> Option<usize> {
        self.roster.iter().position(|p| p.user_id == user_id)
    }

    /// Whether we send the offer to `remote`.
    fn initiates_to(&self, remote: &str) -> bool {
        let Some(me) = self.user_id() else {
            return false;
        };
        match (self.position(me), self.position(remote)) {
            (Some(mine), Some(theirs)) => mine < theirs,
            _ => false,
        }
    }

    fn addressed_to_me(&self, target: &str) -> bool {
        self.user_id() == Some(target)
    }

    // -- Local commands -------------------------------------------------------

    /// Announce ourselves. The microphone must already be acquired.
    pub fn start_call(&mut self, user_id: String) -> Result<Vec<VoiceAction>, VoiceError> {
        if !self.enabled {
            return Err(VoiceError::Disabled);
        }
        if self.local.is_some() {
            return Err(VoiceError::CallAlreadyActive);
        }
        if self.roster.len() >= self.max_participants {
            return Err(VoiceError::RoomFull(self.max_participants));
        }

        info!(user = %user_id, email = %self.email, "Starting voice call");
        let join = Envelope::VoiceJoin(VoiceJoin {
            user_id: user_id.clone(),
            email: self.email.clone(),
        });
        self.local = Some(LocalVoice {
            user_id,
            muted_by_self: false,
            muted_by_host: false,
        });
        Ok(vec![VoiceAction::Send(join)])
    }

    /// Leave the call. Peers and capture are released before the leave
    /// envelope goes out.
    pub fn end_call(&mut self) -> Result<Vec<VoiceAction>, VoiceError> {
        let local = self.local.take().ok_or(VoiceError::CallNotActive)?;
        info!(user = %local.user_id, "Ending voice call");

        let mut actions = self.close_all_peers();
        actions.push(VoiceAction::Media(MediaCommand::ReleaseCapture));
        actions.push(VoiceAction::Send(Envelope::VoiceLeave(VoiceUserRef {
            user_id: local.user_id,
        })));
        Ok(actions)
    }

    pub fn self_mute(&mut self) -> Result<Vec<VoiceAction>, VoiceError> {
        let local = self.local.as_mut().ok_or(VoiceError::CallNotActive)?;
        local.muted_by_self = true;
        Ok(vec![
            VoiceAction::Media(MediaCommand::SetCaptureEnabled(false)),
            VoiceAction::Send(Envelope::VoiceSelfMute(VoiceUserRef {
                user_id: local.user_id.clone(),
            })),
        ])
    }

    /// Refused while the host has us muted.
    pub fn self_unmute(&mut self) -> Result<Vec<VoiceAction>, VoiceError> {
        let local = self.local.as_mut().ok_or(VoiceError::CallNotActive)?;
        if local.muted_by_host {
            return Err(VoiceError::MutedByHost);
        }
        local.muted_by_self = false;
        Ok(vec![
            VoiceAction::Media(MediaCommand::SetCaptureEnabled(true)),
            VoiceAction::Send(Envelope::VoiceSelfUnmute(VoiceUserRef {
                user_id: local.user_id.clone(),
            })),
        ])
    }

    /// Host-only. The hub enforces this too.
    pub fn mute_user(&mut self, user_id: &str) -> Result<Vec<VoiceAction>, VoiceError> {
        if !self.is_host {
            return Err(VoiceError::NotHost);
        }
        Ok(vec![VoiceAction::Send(Envelope::VoiceMuteUser(VoiceUserRef {
            user_id: user_id.to_string(),
        }))])
    }

    pub fn unmute_user(&mut self, user_id: &str) -> Result<Vec<VoiceAction>, VoiceError> {
        if !self.is_host {
            return Err(VoiceError::NotHost);
        }
        Ok(vec![VoiceAction::Send(Envelope::VoiceUnmuteUser(VoiceUserRef {
            user_id: user_id.to_string(),
        }))])
    }

    // -- Transport ------------------------------------------------------------

    /// Transport lost. Every peer session depended on it.
    pub fn on_disconnected(&mut self) -> Vec<VoiceAction> {
        self.roster.clear();
        self.close_all_peers()
    }

    /// Fresh signaling channel. Re-announce with the same id and rebuild
    /// everything from the next roster.
    pub fn on_ready(&mut self) -> Vec<VoiceAction> {
        self.roster.clear();
        let mut actions = self.close_all_peers();
        let Some(local) = self.local.as_mut() else {
            return actions;
        };
        // A host mute outlives the channel. Only voice_unmute_user lifts it.
        info!(user = %local.user_id, "Re-announcing voice participation");
        actions.push(VoiceAction::Send(Envelope::VoiceJoin(VoiceJoin {
            user_id: local.user_id.clone(),
            email: self.email.clone(),
        })));
        if local.muted_by_self {
            actions.push(VoiceAction::Send(Envelope::VoiceSelfMute(VoiceUserRef {
                user_id: local.user_id.clone(),
            })));
        }
        actions
    }

    // -- Relayed envelopes ----------------------------------------------------

    pub fn on_envelope(&mut self, envelope: &Envelope) -> Vec<VoiceAction> {
        match envelope {
            Envelope::VoiceParticipantsUpdate(roster) => self.on_roster(roster.participants.clone()),
            Envelope::VoiceOffer(desc) => self.on_offer(desc),
            Envelope::VoiceAnswer(desc) => self.on_answer(desc),
            Envelope::VoiceIceCandidate(candidate) => self.on_remote_candidate(candidate),
            Envelope::VoiceLeave(user) => self.drop_peers(std::slice::from_ref(&user.user_id)),
            Envelope::UserDisconnected(gone) => self.drop_peers(&gone.user_ids),
            Envelope::VoiceMuteUser(user) => {
                self.set_roster_flag(&user.user_id, |p| p.muted_by_host = true);
                if self.addressed_to_me(&user.user_id) {
                    self.apply_host_mute(true)
                } else {
                    Vec::new()
                }
            }
            Envelope::VoiceUnmuteUser(user) => {
                self.set_roster_flag(&user.user_id, |p| p.muted_by_host = false);
                if self.addressed_to_me(&user.user_id) {
                    self.apply_host_mute(false)
                } else {
                    Vec::new()
                }
            }
            Envelope::VoiceSelfMute(user) => {
                self.set_roster_flag(&user.user_id, |p| p.muted_by_self = true);
                Vec::new()
            }
            Envelope::VoiceSelfUnmute(user) => {
                self.set_roster_flag(&user.user_id, |p| p.muted_by_self = false);
                Vec::new()
            }
            Envelope::VoiceJoin(join) => {
                debug!(user = %join.user_id, "Voice join announced, waiting for roster");
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// Reconcile peers against the hub's roster.
    pub fn on_roster(&mut self, participants: Vec<VoiceParticipant>) -> Vec<VoiceAction> {
        self.roster = participants;
        let mut actions = Vec::new();

        let Some(me) = self.user_id().map(str::to_string) else {
            return actions;
        };
        let Some(my_index) = self.position(&me) else {
            // Our join has not reached the hub yet.
            return actions;
        };

        // The roster can raise a host mute but never lifts one.
        if self.roster[my_index].muted_by_host {
            actions.extend(self.apply_host_mute(true));
        }

        let present: HashSet<&str> = self.roster.iter().map(|p| p.user_id.as_str()).collect();
        let gone: Vec<String> = self
            .peers
            .keys()
            .filter(|id| !present.contains(id.as_str()))
            .cloned()
            .collect();
        actions.extend(self.drop_peers(&gone));

        let newcomers: Vec<(usize, String)> = self
            .roster
            .iter()
            .enumerate()
            .filter(|(i, p)| *i != my_index && !self.peers.contains_key(&p.user_id))
            .map(|(i, p)| (i, p.user_id.clone()))
            .collect();
        for (index, remote) in newcomers {
            let initiator = my_index < index;
            debug!(peer = %remote, initiator, "New voice peer");
            self.peers
                .insert(remote.clone(), PeerSession::new(&remote, initiator));
            if initiator {
                actions.push(VoiceAction::Media(MediaCommand::CreateOffer { peer: remote }));
            }
        }
        actions
    }

    fn on_offer(&mut self, desc: &SessionDescription) -> Vec<VoiceAction> {
        if !self.addressed_to_me(&desc.target) {
            return Vec::new();
        }
        let mut actions = Vec::new();

        match self.peers.get(&desc.sender) {
            Some(session) if session.initiator => {
                if self.initiates_to(&desc.sender) {
                    debug!(peer = %desc.sender, "Ignoring offer from a later participant");
                    return actions;
                }
                // Our roster was stale and we offered out of turn. Theirs wins.
                actions.push(VoiceAction::Media(MediaCommand::ClosePeer {
                    peer: desc.sender.clone(),
                }));
            }
            Some(session)
                if session.state != PeerState::Negotiating(NegotiationStep::AwaitingOffer)
                    && session.state != PeerState::Unreachable =>
            {
                debug!(peer = %desc.sender, state = ?session.state, "Ignoring repeated offer");
                return actions;
            }
            Some(PeerSession {
                state: PeerState::Unreachable,
                ..
            }) => {
                actions.push(VoiceAction::Media(MediaCommand::ClosePeer {
                    peer: desc.sender.clone(),
                }));
            }
            _ => {}
        }

        let mut session = PeerSession::new(&desc.sender, false);
        session.state = PeerState::Negotiating(NegotiationStep::Answering);
        self.peers.insert(desc.sender.clone(), session);
        actions.push(VoiceAction::Media(MediaCommand::AcceptOffer {
            peer: desc.sender.clone(),
            sdp: desc.sdp.clone(),
        }));
        actions
    }

    fn on_answer(&mut self, desc: &SessionDescription) -> Vec<VoiceAction> {
        if !self.addressed_to_me(&desc.target) {
            return Vec::new();
        }
        match self.peers.get_mut(&desc.sender) {
            Some(session)
                if session.initiator
                    && session.state == PeerState::Negotiating(NegotiationStep::OfferSent) =>
            {
                session.state = PeerState::Negotiating(NegotiationStep::AwaitingMedia);
                vec![VoiceAction::Media(MediaCommand::ApplyAnswer {
                    peer: desc.sender.clone(),
                    sdp: desc.sdp.clone(),
                })]
            }
            _ => {
                debug!(peer = %desc.sender, "Ignoring unexpected answer");
                Vec::new()
            }
        }
    }

    fn on_remote_candidate(&mut self, candidate: &IceCandidate) -> Vec<VoiceAction> {
        if !self.addressed_to_me(&candidate.target) {
            return Vec::new();
        }
        match self.peers.get(&candidate.sender) {
            Some(session) if session.state != PeerState::Unreachable => {
                vec![VoiceAction::Media(MediaCommand::AddIceCandidate {
                    peer: candidate.sender.clone(),
                    candidate: candidate.clone(),
                })]
            }
            _ => Vec::new(),
        }
    }

    // -- Media events ---------------------------------------------------------

    pub fn on_media_event(&mut self, event: MediaEvent) -> Vec<VoiceAction> {
        let Some(me) = self.user_id().map(str::to_string) else {
            return Vec::new();
        };

        match event {
            MediaEvent::LocalOffer { peer, sdp } => match self.peers.get(&peer) {
                Some(session)
                    if session.initiator
                        && session.state == PeerState::Negotiating(NegotiationStep::OfferSent) =>
                {
                    vec![VoiceAction::Send(Envelope::VoiceOffer(SessionDescription {
                        sender: me,
                        target: peer,
                        sdp,
                    }))]
                }
                _ => Vec::new(),
            },
            MediaEvent::LocalAnswer { peer, sdp } => match self.peers.get_mut(&peer) {
                Some(session)
                    if session.state == PeerState::Negotiating(NegotiationStep::Answering) =>
                {
                    session.state = PeerState::Negotiating(NegotiationStep::AwaitingMedia);
                    vec![VoiceAction::Send(Envelope::VoiceAnswer(SessionDescription {
                        sender: me,
                        target: peer,
                        sdp,
                    }))]
                }
                _ => Vec::new(),
            },
            MediaEvent::LocalIceCandidate {
                peer,
                candidate,
                sdp_mid,
                sdp_m_line_index,
            } => {
                if !self.peers.contains_key(&peer) {
                    return Vec::new();
                }
                vec![VoiceAction::Send(Envelope::VoiceIceCandidate(IceCandidate {
                    sender: me,
                    target: peer,
                    candidate,
                    sdp_mid,
                    sdp_m_line_index,
                }))]
            }
            MediaEvent::TrackReceived { peer } => {
                if let Some(session) = self.peers.get_mut(&peer) {
                    if session.state != PeerState::Connected {
                        info!(peer = %peer, "Voice peer connected");
                    }
                    session.state = PeerState::Connected;
                }
                Vec::new()
            }
            MediaEvent::Failed { peer, reason } => match self.peers.get_mut(&peer) {
                Some(session) => {
                    warn!(peer = %peer, reason = %reason, "Voice peer unreachable");
                    session.state = PeerState::Unreachable;
                    vec![VoiceAction::Media(MediaCommand::ClosePeer { peer })]
                }
                None => Vec::new(),
            },
            MediaEvent::Closed { peer } => {
                if let Some(session) = self.peers.get_mut(&peer) {
                    debug!(peer = %peer, "Voice peer closed remotely");
                    session.state = PeerState::Unreachable;
                }
                Vec::new()
            }
        }
    }

    // -- Helpers --------------------------------------------------------------

    fn apply_host_mute(&mut self, muted: bool) -> Vec<VoiceAction> {
        let Some(local) = self.local.as_mut() else {
            return Vec::new();
        };
        if local.muted_by_host == muted {
            return Vec::new();
        }
        local.muted_by_host = muted;
        if !muted {
            info!(user = %local.user_id, "Host lifted mute");
            return Vec::new();
        }

        warn!(user = %local.user_id, "Muted by host");
        let mut actions = vec![VoiceAction::Media(MediaCommand::SetCaptureEnabled(false))];
        if !local.muted_by_self {
            // Lifting the host mute later leaves us self-muted.
            local.muted_by_self = true;
            actions.push(VoiceAction::Send(Envelope::VoiceSelfMute(VoiceUserRef {
                user_id: local.user_id.clone(),
            })));
        }
        actions
    }

    fn set_roster_flag(&mut self, user_id: &str, update: impl FnOnce(&mut VoiceParticipant)) {
        if let Some(entry) = self.roster.iter_mut().find(|p| p.user_id == user_id) {
            update(entry);
        }
    }

    fn drop_peers(&mut self, user_ids: &[String]) -> Vec<VoiceAction> {
        let mut actions = Vec::new();
        for user_id in user_ids {
            if self.peers.remove(user_id).is_some() {
                debug!(peer = %user_id, "Releasing voice peer");
                actions.push(VoiceAction::Media(MediaCommand::ClosePeer {
                    peer: user_id.clone(),
                }));
            }
        }
        self.roster.retain(|p| !user_ids.contains(&p.user_id));
        actions
    }

    fn close_all_peers(&mut self) -> Vec<VoiceAction> {
        std::mem::take(&mut self.peers)
            .into_keys()
            .map(|peer| VoiceAction::Media(MediaCommand::ClosePeer { peer }))
            .collect()
    }
}
