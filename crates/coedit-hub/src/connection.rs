//! Per-connection handler: read the hello, then run either a signaling
//! channel for one room or a registry control channel.

use std::net::SocketAddr;
use std::time::Duration;

use coedit_common::protocol::{HubHello, HubResponse, RegistryRequest, RegistryResponse};
use coedit_common::{MemberStatus, RoomId};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::registry::normalize_email;
use crate::rooms::Outbound;
use crate::server::HubState;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Handle a single WebSocket connection.
pub async fn handle_connection(ws: WebSocketStream<TcpStream>, addr: SocketAddr, state: HubState) {
    let (sink, mut stream) = ws.split();

    let timeout = Duration::from_secs(u64::from(state.config.hello_timeout_secs));
    let hello = match read_hello(&mut stream, addr, timeout).await {
        Some(hello) => hello,
        None => return,
    };

    match hello {
        HubHello::RoomHello { room_id, email } => {
            signaling_channel(sink, stream, addr, room_id, normalize_email(&email), state).await
        }
        HubHello::RegistryHello { email } => {
            registry_channel(sink, stream, addr, normalize_email(&email), state).await
        }
    }
}

/// Relay envelopes between one admitted participant and the rest of the room.
async fn signaling_channel(
    mut sink: WsSink,
    mut stream: WsStream,
    addr: SocketAddr,
    room_id: RoomId,
    email: String,
    state: HubState,
) {
    // 1. Only admitted emails may join the signaling channel.
    let status = state.registry.status_of(&room_id, &email).await;
    if !status.is_some_and(MemberStatus::is_admitted) {
        tracing::warn!(peer = %addr, room = %room_id, email = %email, status = ?status, "Refusing signaling channel");
        let _ = send_response(
            &mut sink,
            &HubResponse::Error {
                message: format!("{email} is not admitted to room {room_id}"),
            },
        )
        .await;
        let _ = sink.send(Message::Close(None)).await;
        return;
    }

    // 2. Register and resync.
    let mut registration = state.rooms.register(&room_id, &email).await;
    let conn = registration.id;
    tracing::info!(peer = %addr, room = %room_id, email = %email, conn, "Participant connected");

    let ready = HubResponse::SessionReady {
        room_id: room_id.clone(),
    };
    let mut ok = send_response(&mut sink, &ready).await.is_ok();
    for frame in registration.snapshot.drain(..) {
        if !ok {
            break;
        }
        ok = sink.send(Message::Text(frame.into())).await.is_ok();
    }

    // 3. Forwarding loop.
    while ok {
        tokio::select! {
            Some(out) = registration.rx.recv() => match out {
                Outbound::Frame(frame) => {
                    if sink.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        state.rooms.relay(&room_id, conn, &email, text.as_str()).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(peer = %addr, error = %e, "WS error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // 4. Cleanup.
    tracing::info!(peer = %addr, room = %room_id, email = %email, conn, "Participant disconnected");
    state.rooms.unregister(&room_id, conn).await;
}

/// Strict request/response loop against the membership registry.
async fn registry_channel(
    mut sink: WsSink,
    mut stream: WsStream,
    addr: SocketAddr,
    email: String,
    state: HubState,
) {
    if send_response(&mut sink, &HubResponse::RegistryReady)
        .await
        .is_err()
    {
        return;
    }
    tracing::debug!(peer = %addr, email = %email, "Registry channel open");

    loop {
        let text = match stream.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Ping(data))) => {
                let _ = sink.send(Message::Pong(data)).await;
                continue;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                tracing::debug!(peer = %addr, error = %e, "WS error");
                break;
            }
            Some(Ok(_)) => continue,
        };

        let request = match serde_json::from_str::<RegistryRequest>(text.as_str()) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(peer = %addr, error = %e, "Invalid registry request");
                let error = HubResponse::Error {
                    message: format!("invalid request: {e}"),
                };
                if send_response(&mut sink, &error).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let kick_target = match &request {
            RegistryRequest::Kick { room_id, email } => Some((room_id.clone(), email.clone())),
            _ => None,
        };

        let response = state.registry.handle(&email, request).await;

        if let (Some((room_id, target)), RegistryResponse::Status { .. }) = (kick_target, &response)
        {
            state
                .rooms
                .evict(&room_id, &normalize_email(&target), "removed by host")
                .await;
        }

        if send_json(&mut sink, &response).await.is_err() {
            break;
        }
    }

    tracing::debug!(peer = %addr, email = %email, "Registry channel closed");
}

/// Read and parse the first message as a HubHello.
async fn read_hello(stream: &mut WsStream, addr: SocketAddr, timeout: Duration) -> Option<HubHello> {
    let frame = tokio::time::timeout(timeout, stream.next()).await;

    match frame {
        Ok(Some(Ok(Message::Text(text)))) => {
            match serde_json::from_str::<HubHello>(text.as_str()) {
                Ok(hello) => Some(hello),
                Err(e) => {
                    tracing::warn!(peer = %addr, error = %e, "Invalid hello message");
                    None
                }
            }
        }
        Ok(Some(Ok(_))) => {
            tracing::warn!(peer = %addr, "Expected text hello, got binary");
            None
        }
        Ok(Some(Err(e))) => {
            tracing::warn!(peer = %addr, error = %e, "WS error during hello");
            None
        }
        Ok(None) => {
            tracing::debug!(peer = %addr, "Connection closed before hello");
            None
        }
        Err(_) => {
            tracing::warn!(peer = %addr, timeout = ?timeout, "Hello timeout");
            None
        }
    }
}

async fn send_response(
    sink: &mut WsSink,
    response: &HubResponse,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    send_json(sink, response).await
}

/// Send any serializable value as a JSON text frame.
async fn send_json<T: serde::Serialize>(
    sink: &mut WsSink,
    value: &T,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let json = serde_json::to_string(value).map_err(|e| {
        tokio_tungstenite::tungstenite::Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e,
        ))
    })?;
    sink.send(Message::Text(json.into())).await
}
