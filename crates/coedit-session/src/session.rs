//! The room session actor.
//!
//! One task owns the document, chat transcript, and voice mesh for a room and
//! processes signaling events, local commands, and media events one at a
//! time. Each event runs to completion, including the envelopes and media
//! commands it produces, before the next is taken.

use std::collections::BTreeMap;

use async_trait::async_trait;
use coedit_common::protocol::VoiceParticipant;
use coedit_common::{new_voice_user_id, CoeditError, Envelope, RoomId, VoiceError};
use coedit_config::{CoeditConfig, VoiceConfig};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::{ChatEntry, ChatTranscript};
use crate::document::{DocumentField, DocumentState};
use crate::signaling::{SignalingClient, SignalingConfig, SignalingEvent};
use crate::voice::{MediaCommand, MediaEvent, PeerSession, PeerState, VoiceAction, VoiceMesh};

// ---------------------------------------------------------------------------
// Media boundary
// ---------------------------------------------------------------------------

/// The audio engine. Results come back as [`MediaEvent`]s on the channel
/// given to [`RoomSession::start`].
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Open the microphone before announcing ourselves to the call.
    async fn acquire_capture(&mut self) -> Result<(), VoiceError>;

    async fn execute(&mut self, command: MediaCommand);
}

/// Backend for sessions without audio. Joining a call always fails.
pub struct NoMedia;

#[async_trait]
impl MediaBackend for NoMedia {
    async fn acquire_capture(&mut self) -> Result<(), VoiceError> {
        Err(VoiceError::MicrophoneUnavailable(
            "no audio device configured".into(),
        ))
    }

    async fn execute(&mut self, _command: MediaCommand) {}
}

// ---------------------------------------------------------------------------
// Options, events, snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub signaling: SignalingConfig,
    pub voice: VoiceConfig,
    pub max_messages: usize,
    /// Whether we are the room admin. Updated later with [`RoomSession::set_host`].
    pub host: bool,
    pub initial_content: String,
}

impl SessionOptions {
    pub fn new(config: &CoeditConfig, room_id: RoomId, email: impl Into<String>, host: bool) -> Self {
        Self {
            signaling: SignalingConfig::new(&config.session, room_id, email),
            voice: config.voice.clone(),
            max_messages: config.chat.max_messages as usize,
            host,
            initial_content: String::new(),
        }
    }
}

/// What the UI hears from the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    DocumentChanged(String),
    OutputChanged(String),
    InputChanged(String),
    ChatAppended(ChatEntry),
    VoiceRosterChanged(Vec<VoiceParticipant>),
    /// `None` once the peer session is gone.
    PeerStateChanged {
        peer: String,
        state: Option<PeerState>,
    },
    MutedByHost(bool),
    Evicted {
        reason: String,
    },
    Refused {
        message: String,
    },
    /// The actor has stopped.
    Closed,
}

/// Point-in-time copy of the session's state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub connected: bool,
    pub content: String,
    pub output: String,
    pub input: String,
    pub chat: Vec<ChatEntry>,
    pub roster: Vec<VoiceParticipant>,
    pub peers: Vec<PeerSession>,
    pub voice_user_id: Option<String>,
    pub muted: bool,
    pub muted_by_host: bool,
}

type Reply<T> = oneshot::Sender<Result<T, CoeditError>>;

enum SessionCommand {
    Edit(String, Reply<()>),
    SetInput(String, Reply<()>),
    PublishOutput(String, Reply<()>),
    SendChat(String, Reply<ChatEntry>),
    StartCall(Reply<String>),
    EndCall(Reply<()>),
    SelfMute(Reply<()>),
    SelfUnmute(Reply<()>),
    MuteUser(String, Reply<()>),
    UnmuteUser(String, Reply<()>),
    SetHost(bool, Reply<()>),
    Snapshot(Reply<SessionSnapshot>),
    Leave(Reply<()>),
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a running room session.
pub struct RoomSession {
    command_tx: mpsc::Sender<SessionCommand>,
    task: JoinHandle<()>,
}

impl RoomSession {
    /// Connect to the room's signaling channel and start the actor.
    /// Call this once admission has been granted.
    pub fn start(
        options: SessionOptions,
        media: Box<dyn MediaBackend>,
        media_events: mpsc::Receiver<MediaEvent>,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(64);

        let email = options.signaling.email.clone();
        let (signaling, signal_rx) = SignalingClient::connect(options.signaling);
        let mut mesh = VoiceMesh::new(email.clone(), &options.voice);
        mesh.set_host(options.host);

        let actor = Actor {
            email,
            connected: false,
            signaling,
            document: DocumentState::new(options.initial_content),
            chat: ChatTranscript::new(options.max_messages),
            mesh,
            media,
            event_tx,
        };
        let task = tokio::spawn(actor.run(signal_rx, command_rx, media_events));
        (Self { command_tx, task }, event_rx)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, CoeditError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| CoeditError::Other("room session has stopped".into()))?;
        reply_rx
            .await
            .map_err(|_| CoeditError::Other("room session has stopped".into()))?
    }

    /// Replace the shared document. No-op if unchanged.
    pub async fn edit(&self, content: impl Into<String>) -> Result<(), CoeditError> {
        let content = content.into();
        self.request(|r| SessionCommand::Edit(content, r)).await
    }

    pub async fn set_input(&self, input: impl Into<String>) -> Result<(), CoeditError> {
        let input = input.into();
        self.request(|r| SessionCommand::SetInput(input, r)).await
    }

    /// Share a rendered execution result with the room.
    pub async fn publish_output(&self, output: impl Into<String>) -> Result<(), CoeditError> {
        let output = output.into();
        self.request(|r| SessionCommand::PublishOutput(output, r)).await
    }

    pub async fn send_chat(&self, message: impl Into<String>) -> Result<ChatEntry, CoeditError> {
        let message = message.into();
        self.request(|r| SessionCommand::SendChat(message, r)).await
    }

    /// Acquire the microphone and join the call. Returns our voice user id.
    pub async fn start_call(&self) -> Result<String, CoeditError> {
        self.request(SessionCommand::StartCall).await
    }

    pub async fn end_call(&self) -> Result<(), CoeditError> {
        self.request(SessionCommand::EndCall).await
    }

    pub async fn self_mute(&self) -> Result<(), CoeditError> {
        self.request(SessionCommand::SelfMute).await
    }

    pub async fn self_unmute(&self) -> Result<(), CoeditError> {
        self.request(SessionCommand::SelfUnmute).await
    }

    pub async fn mute_user(&self, user_id: impl Into<String>) -> Result<(), CoeditError> {
        let user_id = user_id.into();
        self.request(|r| SessionCommand::MuteUser(user_id, r)).await
    }

    pub async fn unmute_user(&self, user_id: impl Into<String>) -> Result<(), CoeditError> {
        let user_id = user_id.into();
        self.request(|r| SessionCommand::UnmuteUser(user_id, r)).await
    }

    pub async fn set_host(&self, host: bool) -> Result<(), CoeditError> {
        self.request(|r| SessionCommand::SetHost(host, r)).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, CoeditError> {
        self.request(SessionCommand::Snapshot).await
    }

    /// Leave the call if in one, close the channel, and wait for the actor.
    pub async fn leave(self) -> Result<(), CoeditError> {
        let result = self.request(SessionCommand::Leave).await;
        let _ = self.task.await;
        result
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Voice state the UI is told about when it changes.
#[derive(PartialEq)]
struct VoiceView {
    roster: Vec<VoiceParticipant>,
    peers: BTreeMap<String, PeerState>,
    muted_by_host: bool,
}

struct Actor {
    email: String,
    connected: bool,
    signaling: SignalingClient,
    document: DocumentState,
    chat: ChatTranscript,
    mesh: VoiceMesh,
    media: Box<dyn MediaBackend>,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl Actor {
    async fn run(
        mut self,
        mut signal_rx: mpsc::Receiver<SignalingEvent>,
        mut command_rx: mpsc::Receiver<SessionCommand>,
        mut media_rx: mpsc::Receiver<MediaEvent>,
    ) {
        let mut leave_reply = None;

        loop {
            let flow = tokio::select! {
                event = signal_rx.recv() => match event {
                    Some(event) => self.on_signaling(event).await,
                    None => Flow::Stop,
                },
                command = command_rx.recv() => match command {
                    Some(SessionCommand::Leave(reply)) => {
                        leave_reply = Some(reply);
                        Flow::Stop
                    }
                    Some(command) => {
                        self.on_command(command).await;
                        Flow::Continue
                    }
                    // Every handle is gone.
                    None => Flow::Stop,
                },
                Some(event) = media_rx.recv() => {
                    self.voice_step(|mesh| mesh.on_media_event(event)).await;
                    Flow::Continue
                }
            };
            if flow == Flow::Stop {
                break;
            }
        }

        self.shutdown().await;
        if let Some(reply) = leave_reply {
            let _ = reply.send(Ok(()));
        }
    }

    async fn shutdown(&mut self) {
        if self.mesh.in_call() {
            self.voice_step(|mesh| mesh.end_call().unwrap_or_default()).await;
        }
        self.signaling.disconnect().await;
        info!(email = %self.email, "Room session closed");
        self.emit(SessionEvent::Closed).await;
    }

    async fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event).await;
    }

    async fn send(&self, envelope: &Envelope) {
        if let Err(e) = self.signaling.send(envelope).await {
            warn!(kind = envelope.kind(), error = %e, "Failed to queue envelope");
        }
    }

    async fn perform(&mut self, actions: Vec<VoiceAction>) {
        for action in actions {
            match action {
                VoiceAction::Send(envelope) => self.send(&envelope).await,
                VoiceAction::Media(command) => self.media.execute(command).await,
            }
        }
    }

    fn voice_view(&self) -> VoiceView {
        VoiceView {
            roster: self.mesh.roster().to_vec(),
            peers: self
                .mesh
                .peers()
                .map(|p| (p.remote.clone(), p.state))
                .collect(),
            muted_by_host: self.mesh.muted_by_host(),
        }
    }

    /// Run one mesh transition, execute its actions, and report what changed.
    async fn voice_step(&mut self, step: impl FnOnce(&mut VoiceMesh) -> Vec<VoiceAction>) {
        let before = self.voice_view();
        let actions = step(&mut self.mesh);
        self.perform(actions).await;
        let after = self.voice_view();
        if before == after {
            return;
        }

        if before.roster != after.roster {
            self.emit(SessionEvent::VoiceRosterChanged(after.roster.clone()))
                .await;
        }
        for (peer, state) in &after.peers {
            if before.peers.get(peer) != Some(state) {
                self.emit(SessionEvent::PeerStateChanged {
                    peer: peer.clone(),
                    state: Some(*state),
                })
                .await;
            }
        }
        for peer in before.peers.keys() {
            if !after.peers.contains_key(peer) {
                self.emit(SessionEvent::PeerStateChanged {
                    peer: peer.clone(),
                    state: None,
                })
                .await;
            }
        }
        if before.muted_by_host != after.muted_by_host {
            self.emit(SessionEvent::MutedByHost(after.muted_by_host)).await;
        }
    }

    // -- Signaling ------------------------------------------------------------

    async fn on_signaling(&mut self, event: SignalingEvent) -> Flow {
        match event {
            SignalingEvent::Ready { room_id } => {
                info!(room = %room_id, "Signaling channel ready");
                self.connected = true;
                self.emit(SessionEvent::Connected).await;
                self.voice_step(|mesh| mesh.on_ready()).await;
                Flow::Continue
            }
            SignalingEvent::Envelope(envelope) => {
                self.on_envelope(envelope).await;
                Flow::Continue
            }
            SignalingEvent::Disconnected => {
                self.connected = false;
                self.emit(SessionEvent::Disconnected).await;
                self.voice_step(|mesh| mesh.on_disconnected()).await;
                Flow::Continue
            }
            SignalingEvent::Evicted { reason } => {
                warn!(reason = %reason, "Removed from room");
                self.connected = false;
                self.emit(SessionEvent::Evicted { reason }).await;
                Flow::Stop
            }
            SignalingEvent::Refused { message } => {
                warn!(message = %message, "Hub refused signaling channel");
                self.emit(SessionEvent::Refused { message }).await;
                Flow::Stop
            }
            SignalingEvent::Error(e) => {
                debug!(error = %e, "Signaling error");
                Flow::Continue
            }
            SignalingEvent::Stopped => Flow::Stop,
        }
    }

    async fn on_envelope(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::ContentUpdate(_) | Envelope::Output(_) | Envelope::InputUpdate(_) => {
                let event = match self.document.apply_remote(&envelope) {
                    Some(DocumentField::Content) => {
                        SessionEvent::DocumentChanged(self.document.content().to_string())
                    }
                    Some(DocumentField::Output) => {
                        SessionEvent::OutputChanged(self.document.output().to_string())
                    }
                    Some(DocumentField::Input) => {
                        SessionEvent::InputChanged(self.document.input().to_string())
                    }
                    None => return,
                };
                self.emit(event).await;
            }
            Envelope::ChatMessage(payload) => {
                if let Some(entry) = self.chat.receive(payload).cloned() {
                    self.emit(SessionEvent::ChatAppended(entry)).await;
                }
            }
            Envelope::Unknown(kind) => debug!(kind = %kind, "Ignoring unknown envelope"),
            voice => self.voice_step(|mesh| mesh.on_envelope(&voice)).await,
        }
    }

    // -- Commands -------------------------------------------------------------

    async fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Edit(content, reply) => {
                if let Some(envelope) = self.document.edit(content) {
                    self.send(&envelope).await;
                }
                let _ = reply.send(Ok(()));
            }
            SessionCommand::SetInput(input, reply) => {
                if let Some(envelope) = self.document.set_input(input) {
                    self.send(&envelope).await;
                }
                let _ = reply.send(Ok(()));
            }
            SessionCommand::PublishOutput(output, reply) => {
                let envelope = self.document.publish_output(output);
                self.send(&envelope).await;
                let _ = reply.send(Ok(()));
            }
            SessionCommand::SendChat(message, reply) => {
                let envelope = self.chat.compose(&self.email, &message);
                self.send(&envelope).await;
                let entry = self
                    .chat
                    .entries()
                    .last()
                    .cloned()
                    .ok_or_else(|| CoeditError::Other("chat transcript is empty".into()));
                let _ = reply.send(entry);
            }
            SessionCommand::StartCall(reply) => {
                let _ = reply.send(self.start_call().await);
            }
            SessionCommand::EndCall(reply) => {
                let _ = reply.send(self.voice_command(VoiceMesh::end_call).await);
            }
            SessionCommand::SelfMute(reply) => {
                let _ = reply.send(self.voice_command(VoiceMesh::self_mute).await);
            }
            SessionCommand::SelfUnmute(reply) => {
                let _ = reply.send(self.voice_command(VoiceMesh::self_unmute).await);
            }
            SessionCommand::MuteUser(user_id, reply) => {
                let result = self.voice_command(|mesh| mesh.mute_user(&user_id)).await;
                let _ = reply.send(result);
            }
            SessionCommand::UnmuteUser(user_id, reply) => {
                let result = self.voice_command(|mesh| mesh.unmute_user(&user_id)).await;
                let _ = reply.send(result);
            }
            SessionCommand::SetHost(host, reply) => {
                self.mesh.set_host(host);
                let _ = reply.send(Ok(()));
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(Ok(self.snapshot()));
            }
            SessionCommand::Leave(reply) => {
                // Handled by the run loop.
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn voice_command(
        &mut self,
        command: impl FnOnce(&mut VoiceMesh) -> Result<Vec<VoiceAction>, VoiceError>,
    ) -> Result<(), CoeditError> {
        let mut outcome = Ok(());
        self.voice_step(|mesh| match command(mesh) {
            Ok(actions) => actions,
            Err(e) => {
                outcome = Err(e);
                Vec::new()
            }
        })
        .await;
        outcome.map_err(CoeditError::from)
    }

    async fn start_call(&mut self) -> Result<String, CoeditError> {
        if self.mesh.in_call() {
            return Err(VoiceError::CallAlreadyActive.into());
        }
        self.media.acquire_capture().await?;

        let user_id = new_voice_user_id();
        let id = user_id.clone();
        let result = self.voice_command(move |mesh| mesh.start_call(id)).await;
        if let Err(e) = result {
            self.media.execute(MediaCommand::ReleaseCapture).await;
            return Err(e);
        }
        Ok(user_id)
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connected: self.connected,
            content: self.document.content().to_string(),
            output: self.document.output().to_string(),
            input: self.document.input().to_string(),
            chat: self.chat.entries().cloned().collect(),
            roster: self.mesh.roster().to_vec(),
            peers: self.mesh.peers().cloned().collect(),
            voice_user_id: self.mesh.user_id().map(str::to_string),
            muted: self.mesh.is_muted(),
            muted_by_host: self.mesh.muted_by_host(),
        }
    }
}
