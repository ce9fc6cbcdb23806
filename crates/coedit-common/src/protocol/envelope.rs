//! The signaling envelope multiplexed over a room's single duplex channel.
//!
//! Every frame is `{"type": "<kind>", "content": {...}}`. Consumers dispatch
//! on the kind only; kinds this build does not know decode to
//! [`Envelope::Unknown`] so newer peers never break older ones.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Kind names
// ---------------------------------------------------------------------------

/// Wire names for each envelope kind.
pub mod kinds {
    pub const CONTENT_UPDATE: &str = "content_update";
    pub const OUTPUT: &str = "output";
    pub const INPUT_UPDATE: &str = "input_update";
    pub const CHAT_MESSAGE: &str = "chat_message";
    pub const VOICE_JOIN: &str = "voice_join";
    pub const VOICE_LEAVE: &str = "voice_leave";
    pub const VOICE_OFFER: &str = "voice_offer";
    pub const VOICE_ANSWER: &str = "voice_answer";
    pub const VOICE_ICE_CANDIDATE: &str = "voice_ice_candidate";
    pub const VOICE_SELF_MUTE: &str = "voice_self_mute";
    pub const VOICE_SELF_UNMUTE: &str = "voice_self_unmute";
    pub const VOICE_MUTE_USER: &str = "voice_mute_user";
    pub const VOICE_UNMUTE_USER: &str = "voice_unmute_user";
    pub const VOICE_PARTICIPANTS_UPDATE: &str = "voice_participants_update";
    pub const USER_DISCONNECTED: &str = "user_disconnected";

    pub const ALL: &[&str] = &[
        CONTENT_UPDATE,
        OUTPUT,
        INPUT_UPDATE,
        CHAT_MESSAGE,
        VOICE_JOIN,
        VOICE_LEAVE,
        VOICE_OFFER,
        VOICE_ANSWER,
        VOICE_ICE_CANDIDATE,
        VOICE_SELF_MUTE,
        VOICE_SELF_UNMUTE,
        VOICE_MUTE_USER,
        VOICE_UNMUTE_USER,
        VOICE_PARTICIPANTS_UPDATE,
        USER_DISCONNECTED,
    ];
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Full document buffer. Last writer wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUpdate {
    pub content: String,
}

/// Rendered result of the last execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputUpdate {
    pub output: String,
}

/// Shared stdin buffer for the next execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputUpdate {
    pub input: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    /// Sender-assigned, stable across redelivery. May be absent from
    /// older producers, in which case the receiver synthesizes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub sender_email: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceJoin {
    pub user_id: String,
    pub email: String,
}

/// Payload naming a single voice participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceUserRef {
    pub user_id: String,
}

/// SDP offer or answer, addressed to one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sender: String,
    pub target: String,
    pub sdp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub sender: String,
    pub target: String,
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u32>,
}

/// One entry of the hub-ordered voice roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceParticipant {
    pub user_id: String,
    pub email: String,
    #[serde(default)]
    pub muted_by_self: bool,
    #[serde(default)]
    pub muted_by_host: bool,
}

impl VoiceParticipant {
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            muted_by_self: false,
            muted_by_host: false,
        }
    }
}

/// Voice roster in join order, as seen by the hub.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceRoster {
    pub participants: Vec<VoiceParticipant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDisconnected {
    pub email: String,
    /// Voice tokens that belonged to the dropped connection.
    #[serde(default)]
    pub user_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum Envelope {
    ContentUpdate(ContentUpdate),
    Output(OutputUpdate),
    InputUpdate(InputUpdate),
    ChatMessage(ChatMessagePayload),
    VoiceJoin(VoiceJoin),
    VoiceLeave(VoiceUserRef),
    VoiceOffer(SessionDescription),
    VoiceAnswer(SessionDescription),
    VoiceIceCandidate(IceCandidate),
    VoiceSelfMute(VoiceUserRef),
    VoiceSelfUnmute(VoiceUserRef),
    VoiceMuteUser(VoiceUserRef),
    VoiceUnmuteUser(VoiceUserRef),
    VoiceParticipantsUpdate(VoiceRoster),
    UserDisconnected(UserDisconnected),
    /// A kind this build does not understand. Never sent.
    #[serde(skip)]
    Unknown(String),
}

/// Just enough of a frame to read its kind.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
}

impl Envelope {
    /// Decode a text frame. Unrecognized kinds are not an error.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        if !kinds::ALL.contains(&raw.kind.as_str()) {
            return Ok(Self::Unknown(raw.kind));
        }
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::ContentUpdate(_) => kinds::CONTENT_UPDATE,
            Self::Output(_) => kinds::OUTPUT,
            Self::InputUpdate(_) => kinds::INPUT_UPDATE,
            Self::ChatMessage(_) => kinds::CHAT_MESSAGE,
            Self::VoiceJoin(_) => kinds::VOICE_JOIN,
            Self::VoiceLeave(_) => kinds::VOICE_LEAVE,
            Self::VoiceOffer(_) => kinds::VOICE_OFFER,
            Self::VoiceAnswer(_) => kinds::VOICE_ANSWER,
            Self::VoiceIceCandidate(_) => kinds::VOICE_ICE_CANDIDATE,
            Self::VoiceSelfMute(_) => kinds::VOICE_SELF_MUTE,
            Self::VoiceSelfUnmute(_) => kinds::VOICE_SELF_UNMUTE,
            Self::VoiceMuteUser(_) => kinds::VOICE_MUTE_USER,
            Self::VoiceUnmuteUser(_) => kinds::VOICE_UNMUTE_USER,
            Self::VoiceParticipantsUpdate(_) => kinds::VOICE_PARTICIPANTS_UPDATE,
            Self::UserDisconnected(_) => kinds::USER_DISCONNECTED,
            Self::Unknown(kind) => kind,
        }
    }

    pub fn content_update(content: impl Into<String>) -> Self {
        Self::ContentUpdate(ContentUpdate {
            content: content.into(),
        })
    }

    pub fn output(output: impl Into<String>) -> Self {
        Self::Output(OutputUpdate {
            output: output.into(),
        })
    }

    pub fn input_update(input: impl Into<String>) -> Self {
        Self::InputUpdate(InputUpdate {
            input: input.into(),
        })
    }

    pub fn roster(participants: Vec<VoiceParticipant>) -> Self {
        Self::VoiceParticipantsUpdate(VoiceRoster { participants })
    }
}
