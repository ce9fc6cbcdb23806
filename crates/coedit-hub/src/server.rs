//! Accept loop and the state shared by every connection task.

use std::sync::Arc;

use coedit_config::HubConfig;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

use crate::connection::handle_connection;
use crate::registry::MembershipRegistry;
use crate::rooms::RoomHub;

/// Everything a connection task needs. Cheap to clone.
#[derive(Clone)]
pub struct HubState {
    pub registry: MembershipRegistry,
    pub rooms: RoomHub,
    pub config: Arc<HubConfig>,
}

impl HubState {
    pub fn new(config: HubConfig) -> Self {
        let registry = MembershipRegistry::new();
        let rooms = RoomHub::new(registry.clone());
        Self {
            registry,
            rooms,
            config: Arc::new(config),
        }
    }
}

/// Accept WebSocket connections until the listener fails permanently.
pub async fn serve(listener: TcpListener, state: HubState) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws) => handle_connection(ws, addr, state).await,
                        Err(e) => {
                            tracing::warn!(peer = %addr, error = %e, "WS handshake failed");
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
            }
        }
    }
}
