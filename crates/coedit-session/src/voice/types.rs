//! Peer session state, media commands and events, and mesh actions.

use coedit_common::protocol::IceCandidate;
use coedit_common::Envelope;

// ---------------------------------------------------------------------------
// Peer sessions
// ---------------------------------------------------------------------------

/// Progress of an offer/answer exchange with one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStep {
    /// We are later in the roster and wait for the peer's offer.
    AwaitingOffer,
    /// We asked the media layer for an offer or already sent it.
    OfferSent,
    /// We accepted the peer's offer and are answering.
    Answering,
    /// The exchange is complete; waiting for media to flow.
    AwaitingMedia,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Negotiating(NegotiationStep),
    Connected,
    /// Negotiation or transport failed. Left alone until the peer leaves.
    Unreachable,
}

/// Our half of the audio session with one remote voice participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSession {
    pub remote: String,
    pub initiator: bool,
    pub state: PeerState,
}

impl PeerSession {
    pub(crate) fn new(remote: &str, initiator: bool) -> Self {
        let step = if initiator {
            NegotiationStep::OfferSent
        } else {
            NegotiationStep::AwaitingOffer
        };
        Self {
            remote: remote.to_string(),
            initiator,
            state: PeerState::Negotiating(step),
        }
    }
}

// ---------------------------------------------------------------------------
// Media boundary
// ---------------------------------------------------------------------------

/// Work for the media layer. `peer` is always a remote voice user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaCommand {
    CreateOffer { peer: String },
    AcceptOffer { peer: String, sdp: String },
    ApplyAnswer { peer: String, sdp: String },
    AddIceCandidate { peer: String, candidate: IceCandidate },
    ClosePeer { peer: String },
    /// Enable or disable outgoing audio without releasing the microphone.
    SetCaptureEnabled(bool),
    ReleaseCapture,
}

/// What the media layer reports back, delivered as messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    LocalOffer {
        peer: String,
        sdp: String,
    },
    LocalAnswer {
        peer: String,
        sdp: String,
    },
    LocalIceCandidate {
        peer: String,
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u32>,
    },
    TrackReceived {
        peer: String,
    },
    Failed {
        peer: String,
        reason: String,
    },
    Closed {
        peer: String,
    },
}

/// Output of the mesh, to be carried out in order.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceAction {
    Send(Envelope),
    Media(MediaCommand),
}
