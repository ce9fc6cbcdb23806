//! Client for the hub's membership control channel.

use std::time::Duration;

use async_trait::async_trait;
use coedit_common::protocol::{HubHello, HubResponse, RegistryRequest, RegistryResponse};
use coedit_common::{CoeditError, MemberRecord, MemberStatus, RegistryError, RoomId};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Membership operations, acting as one fixed email.
#[async_trait]
pub trait MembershipApi: Send + Sync {
    /// Create a fresh room with the caller as host.
    async fn create_room(&self) -> Result<RoomId, CoeditError>;

    async fn request_join(&self, room_id: &RoomId) -> Result<MemberStatus, CoeditError>;

    async fn list_members(&self, room_id: &RoomId) -> Result<Vec<MemberRecord>, CoeditError>;

    /// Host-only.
    async fn respond_to_join(
        &self,
        room_id: &RoomId,
        email: &str,
        accept: bool,
    ) -> Result<MemberStatus, CoeditError>;

    /// Host-only.
    async fn kick(&self, room_id: &RoomId, email: &str) -> Result<MemberStatus, CoeditError>;

    /// The email this client acts as.
    fn email(&self) -> &str;
}

/// [`MembershipApi`] over a lazily opened WebSocket control channel.
///
/// Calls are serialized; a transport failure drops the socket and the next
/// call reconnects.
pub struct RegistryClient {
    hub_url: String,
    email: String,
    timeout: Duration,
    conn: Mutex<Option<WsStream>>,
}

impl RegistryClient {
    pub fn new(hub_url: impl Into<String>, email: impl Into<String>, timeout: Duration) -> Self {
        Self {
            hub_url: hub_url.into(),
            email: email.into(),
            timeout,
            conn: Mutex::new(None),
        }
    }

    fn url(&self) -> String {
        self.hub_url.trim_end_matches('/').to_string()
    }

    async fn open(&self) -> Result<WsStream, CoeditError> {
        let url = self.url();
        let (mut ws, _) = tokio::time::timeout(self.timeout, tokio_tungstenite::connect_async(url.as_str()))
            .await
            .map_err(|_| CoeditError::Transport(format!("timed out connecting to {url}")))?
            .map_err(|e| CoeditError::Transport(e.to_string()))?;

        let hello = serde_json::to_string(&HubHello::RegistryHello {
            email: self.email.clone(),
        })?;
        ws.send(Message::Text(hello.into()))
            .await
            .map_err(|e| CoeditError::Transport(e.to_string()))?;

        match self.next_text(&mut ws).await? {
            text if HubResponse::decode_control(&text) == Some(HubResponse::RegistryReady) => {
                debug!(email = %self.email, "Registry channel ready");
                Ok(ws)
            }
            text => Err(CoeditError::Protocol(format!(
                "expected registry_ready, got {text}"
            ))),
        }
    }

    async fn next_text(&self, ws: &mut WsStream) -> Result<String, CoeditError> {
        loop {
            let frame = tokio::time::timeout(self.timeout, ws.next())
                .await
                .map_err(|_| CoeditError::Transport("registry response timed out".into()))?;
            match frame {
                Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
                Some(Ok(Message::Close(_))) | None => {
                    return Err(CoeditError::Transport("registry channel closed".into()))
                }
                Some(Err(e)) => return Err(CoeditError::Transport(e.to_string())),
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn exchange(
        &self,
        ws: &mut WsStream,
        request: &RegistryRequest,
    ) -> Result<RegistryResponse, CoeditError> {
        let json = serde_json::to_string(request)?;
        ws.send(Message::Text(json.into()))
            .await
            .map_err(|e| CoeditError::Transport(e.to_string()))?;
        let text = self.next_text(ws).await?;
        match serde_json::from_str::<RegistryResponse>(&text) {
            Ok(response) => Ok(response),
            Err(_) => match HubResponse::decode_control(&text) {
                Some(HubResponse::Error { message }) => Err(CoeditError::Protocol(message)),
                _ => Err(CoeditError::Protocol(format!("unexpected frame: {text}"))),
            },
        }
    }

    /// One request/response round trip. Registry errors come back as
    /// [`CoeditError::Registry`].
    async fn call(&self, request: RegistryRequest) -> Result<RegistryResponse, CoeditError> {
        let mut guard = self.conn.lock().await;
        let mut ws = match guard.take() {
            Some(ws) => ws,
            None => self.open().await?,
        };

        match self.exchange(&mut ws, &request).await {
            Ok(RegistryResponse::Error { kind, message }) => {
                *guard = Some(ws);
                Err(RegistryError::from_wire(kind, message).into())
            }
            Ok(response) => {
                *guard = Some(ws);
                Ok(response)
            }
            Err(e) => {
                warn!(error = %e, "Registry call failed, dropping channel");
                Err(e)
            }
        }
    }
}

fn unexpected(response: RegistryResponse) -> CoeditError {
    CoeditError::Protocol(format!("unexpected registry response: {response:?}"))
}

#[async_trait]
impl MembershipApi for RegistryClient {
    async fn create_room(&self) -> Result<RoomId, CoeditError> {
        match self.call(RegistryRequest::CreateRoom).await? {
            RegistryResponse::RoomCreated { room_id } => Ok(room_id),
            other => Err(unexpected(other)),
        }
    }

    async fn request_join(&self, room_id: &RoomId) -> Result<MemberStatus, CoeditError> {
        let request = RegistryRequest::RequestJoin {
            room_id: room_id.clone(),
        };
        match self.call(request).await? {
            RegistryResponse::Status { status, .. } => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    async fn list_members(&self, room_id: &RoomId) -> Result<Vec<MemberRecord>, CoeditError> {
        let request = RegistryRequest::ListMembers {
            room_id: room_id.clone(),
        };
        match self.call(request).await? {
            RegistryResponse::Members { members } => Ok(members),
            other => Err(unexpected(other)),
        }
    }

    async fn respond_to_join(
        &self,
        room_id: &RoomId,
        email: &str,
        accept: bool,
    ) -> Result<MemberStatus, CoeditError> {
        let request = RegistryRequest::RespondToJoin {
            room_id: room_id.clone(),
            email: email.to_string(),
            accept,
        };
        match self.call(request).await? {
            RegistryResponse::Status { status, .. } => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    async fn kick(&self, room_id: &RoomId, email: &str) -> Result<MemberStatus, CoeditError> {
        let request = RegistryRequest::Kick {
            room_id: room_id.clone(),
            email: email.to_string(),
        };
        match self.call(request).await? {
            RegistryResponse::Status { status, .. } => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    fn email(&self) -> &str {
        &self.email
    }
}
