//! Public handle for the room's signaling channel.

use std::sync::Arc;

use coedit_common::{CoeditError, Envelope};
use tokio::sync::{mpsc, RwLock};

use super::connection::connection_loop;
use super::types::{SignalingCommand, SignalingConfig, SignalingEvent};

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Handle for sending envelopes over the room's signaling channel.
///
/// All methods are non-blocking and hand commands to the background
/// connection task.
pub struct SignalingClient {
    command_tx: mpsc::Sender<SignalingCommand>,
    connected: Arc<RwLock<bool>>,
}

impl SignalingClient {
    /// Create a client and start the background connection.
    /// Returns `(client, event_receiver)`.
    pub fn connect(config: SignalingConfig) -> (Self, mpsc::Receiver<SignalingEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(64);
        let connected = Arc::new(RwLock::new(false));

        let client = Self {
            command_tx,
            connected: Arc::clone(&connected),
        };

        tokio::spawn(connection_loop(config, connected, event_tx, command_rx));

        (client, event_rx)
    }

    /// Queue an envelope. Frames queued while disconnected are dropped.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), CoeditError> {
        let json = envelope.encode()?;
        self.command_tx
            .send(SignalingCommand::Send(json))
            .await
            .map_err(|_| CoeditError::Transport("signaling task has stopped".into()))
    }

    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    /// Close the channel and stop reconnecting.
    pub async fn disconnect(&self) {
        let _ = self.command_tx.send(SignalingCommand::Disconnect).await;
    }
}
