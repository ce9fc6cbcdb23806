//! Background WebSocket connection loop with fixed-delay reconnect.

use std::pin::pin;
use std::sync::Arc;

use coedit_common::protocol::{HubHello, HubResponse};
use coedit_common::Envelope;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::types::{SignalingCommand, SignalingConfig, SignalingEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How a single connected session ended.
enum SessionEnd {
    Reconnect,
    Stop,
}

/// The hub serves every channel at its root. The room travels in the hello.
fn channel_url(config: &SignalingConfig) -> String {
    config.hub_url.trim_end_matches('/').to_string()
}

// ---------------------------------------------------------------------------
// Connection Loop
// ---------------------------------------------------------------------------

/// Background task managing the WebSocket connection with auto-reconnect.
pub(crate) async fn connection_loop(
    config: SignalingConfig,
    connected: Arc<RwLock<bool>>,
    event_tx: mpsc::Sender<SignalingEvent>,
    mut command_rx: mpsc::Receiver<SignalingCommand>,
) {
    let url = channel_url(&config);
    let mut failures: u32 = 0;

    loop {
        info!(url = %url, room = %config.room_id, "Connecting to signaling hub");

        let end = match tokio::time::timeout(
            config.connect_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await
        {
            Ok(Ok((ws, _))) => {
                failures = 0;
                run_session(ws, &config, &connected, &event_tx, &mut command_rx).await
            }
            Ok(Err(e)) => {
                failures += 1;
                error!(error = %e, "Failed to connect to signaling hub");
                let _ = event_tx
                    .send(SignalingEvent::Error(format!("Connection failed: {e}")))
                    .await;
                SessionEnd::Reconnect
            }
            Err(_elapsed) => {
                failures += 1;
                error!(timeout = ?config.connect_timeout, "Signaling connection timed out");
                let _ = event_tx
                    .send(SignalingEvent::Error("Connection timed out".to_string()))
                    .await;
                SessionEnd::Reconnect
            }
        };

        if matches!(end, SessionEnd::Stop) {
            break;
        }
        if config.max_reconnect_attempts > 0 && failures >= config.max_reconnect_attempts {
            warn!(failures, "Giving up on signaling hub");
            break;
        }

        info!(delay = ?config.reconnect_delay, "Reconnecting to signaling hub");
        if !wait_for_retry(&config, &mut command_rx).await {
            break;
        }
    }

    *connected.write().await = false;
    let _ = event_tx.send(SignalingEvent::Stopped).await;
}

/// Sleep out the retry delay. Frames sent meanwhile are stale by the time
/// we reconnect, so they are dropped. Returns false on a disconnect request.
async fn wait_for_retry(
    config: &SignalingConfig,
    command_rx: &mut mpsc::Receiver<SignalingCommand>,
) -> bool {
    let mut sleep = pin!(tokio::time::sleep(config.reconnect_delay));
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = command_rx.recv() => match cmd {
                Some(SignalingCommand::Send(_)) => {
                    debug!("Dropping frame while disconnected");
                }
                Some(SignalingCommand::Disconnect) | None => return false,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

async fn run_session(
    ws: WsStream,
    config: &SignalingConfig,
    connected: &Arc<RwLock<bool>>,
    event_tx: &mpsc::Sender<SignalingEvent>,
    command_rx: &mut mpsc::Receiver<SignalingCommand>,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();

    let hello = HubHello::RoomHello {
        room_id: config.room_id.clone(),
        email: config.email.clone(),
    };
    let json = match serde_json::to_string(&hello) {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "Failed to encode room hello");
            return SessionEnd::Stop;
        }
    };
    if sink.send(WsMessage::Text(json.into())).await.is_err() {
        return SessionEnd::Reconnect;
    }

    let end = loop {
        tokio::select! {
            cmd = command_rx.recv() => match cmd {
                Some(SignalingCommand::Send(json)) => {
                    if sink.send(WsMessage::Text(json.into())).await.is_err() {
                        break SessionEnd::Reconnect;
                    }
                }
                Some(SignalingCommand::Disconnect) | None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break SessionEnd::Stop;
                }
            },

            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Some(end) = handle_frame(text.as_str(), connected, event_tx).await {
                        break end;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    info!(room = %config.room_id, "Signaling hub closed connection");
                    break SessionEnd::Reconnect;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    break SessionEnd::Reconnect;
                }
                _ => {}
            },
        }
    };

    *connected.write().await = false;
    let _ = event_tx.send(SignalingEvent::Disconnected).await;
    end
}

/// Dispatch one inbound text frame. Returns how the session ends, if it does.
async fn handle_frame(
    text: &str,
    connected: &Arc<RwLock<bool>>,
    event_tx: &mpsc::Sender<SignalingEvent>,
) -> Option<SessionEnd> {
    if let Some(control) = HubResponse::decode_control(text) {
        return match control {
            HubResponse::SessionReady { room_id } => {
                *connected.write().await = true;
                info!(room = %room_id, "Signaling channel ready");
                let _ = event_tx.send(SignalingEvent::Ready { room_id }).await;
                None
            }
            HubResponse::Evicted { reason } => {
                warn!(reason = %reason, "Evicted from room");
                let _ = event_tx.send(SignalingEvent::Evicted { reason }).await;
                Some(SessionEnd::Stop)
            }
            HubResponse::Error { message } => {
                warn!(message = %message, "Hub refused signaling channel");
                let _ = event_tx.send(SignalingEvent::Refused { message }).await;
                Some(SessionEnd::Stop)
            }
            HubResponse::RegistryReady => {
                debug!("Ignoring registry_ready on a signaling channel");
                None
            }
        };
    }

    match Envelope::decode(text) {
        Ok(Envelope::Unknown(kind)) => {
            debug!(kind = %kind, "Ignoring unknown envelope kind");
        }
        Ok(envelope) => {
            let _ = event_tx.send(SignalingEvent::Envelope(envelope)).await;
        }
        Err(e) => {
            debug!(error = %e, "Unrecognized frame from hub");
        }
    }
    None
}
