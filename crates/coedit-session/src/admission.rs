//! Admission controller: turns a join request into lobby wait, admission,
//! denial, or eviction by polling the membership registry.

use std::sync::Arc;
use std::time::Duration;

use coedit_common::{CoeditError, MemberRecord, MemberStatus, RoomId};
use coedit_config::AdmissionConfig;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry_client::MembershipApi;

/// Where this client stands with respect to one room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionState {
    Unjoined,
    AwaitingApproval,
    Admitted { host: bool },
    /// The host rejected the request. Terminal.
    Denied,
}

impl AdmissionState {
    pub fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted { .. })
    }

    /// Whether polling should stop in this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Unjoined | Self::Denied)
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Pure state machine. Feed it registry observations; it reports transitions.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    email: String,
    state: AdmissionState,
}

impl AdmissionController {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into().trim().to_lowercase(),
            state: AdmissionState::Unjoined,
        }
    }

    pub fn state(&self) -> AdmissionState {
        self.state
    }

    fn set(&mut self, next: AdmissionState) -> Option<AdmissionState> {
        if next == self.state {
            return None;
        }
        debug!(email = %self.email, from = ?self.state, to = ?next, "Admission transition");
        self.state = next;
        Some(next)
    }

    /// Apply the status returned by a successful join request.
    pub fn join_requested(&mut self, status: MemberStatus) -> Option<AdmissionState> {
        let next = match status {
            MemberStatus::Pending => AdmissionState::AwaitingApproval,
            MemberStatus::Accepted => AdmissionState::Admitted { host: false },
            MemberStatus::Admin => AdmissionState::Admitted { host: true },
            MemberStatus::Rejected | MemberStatus::Removed => AdmissionState::Denied,
        };
        self.set(next)
    }

    /// A join request failed. A refusal from the registry itself is a
    /// denial. Transport failures leave the state alone and are retried.
    pub fn join_failed(&mut self, error: &CoeditError) -> Option<AdmissionState> {
        match error {
            CoeditError::Registry(_) => self.set(AdmissionState::Denied),
            _ => None,
        }
    }

    /// Apply one `list_members` poll result.
    pub fn observe(&mut self, members: &[MemberRecord]) -> Option<AdmissionState> {
        let own = members
            .iter()
            .find(|m| m.email == self.email)
            .map(|m| m.status);

        let next = match (self.state, own) {
            (AdmissionState::AwaitingApproval, Some(MemberStatus::Accepted)) => {
                AdmissionState::Admitted { host: false }
            }
            (AdmissionState::AwaitingApproval, Some(MemberStatus::Admin)) => {
                AdmissionState::Admitted { host: true }
            }
            (AdmissionState::AwaitingApproval, Some(MemberStatus::Rejected)) => {
                AdmissionState::Denied
            }
            // Removed before ever being accepted cannot happen; treat as denial.
            (AdmissionState::AwaitingApproval, Some(MemberStatus::Removed)) => {
                AdmissionState::Denied
            }
            (AdmissionState::AwaitingApproval, _) => AdmissionState::AwaitingApproval,

            (AdmissionState::Admitted { .. }, Some(MemberStatus::Accepted)) => {
                AdmissionState::Admitted { host: false }
            }
            (AdmissionState::Admitted { .. }, Some(MemberStatus::Admin)) => {
                AdmissionState::Admitted { host: true }
            }
            // Absent, removed, or anything else after admission is an eviction.
            (AdmissionState::Admitted { .. }, _) => AdmissionState::Unjoined,

            (state @ (AdmissionState::Unjoined | AdmissionState::Denied), _) => state,
        };
        self.set(next)
    }

    /// How long to wait before the next poll, or `None` to stop.
    pub fn poll_interval(&self, config: &AdmissionConfig) -> Option<Duration> {
        match self.state {
            AdmissionState::AwaitingApproval => Some(config.pending_poll()),
            AdmissionState::Admitted { .. } => Some(config.admitted_poll()),
            AdmissionState::Unjoined | AdmissionState::Denied => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Background task that requests to join and then keeps polling, before and
/// after admission. Transient registry failures never change state.
pub struct AdmissionMonitor {
    state: Arc<RwLock<AdmissionState>>,
    task: JoinHandle<()>,
}

impl AdmissionMonitor {
    /// Start the monitor. Every state change is sent on the returned receiver;
    /// the channel closes when the monitor reaches `Unjoined` or `Denied`.
    pub fn spawn(
        api: Arc<dyn MembershipApi>,
        room_id: RoomId,
        config: AdmissionConfig,
    ) -> (Self, mpsc::Receiver<AdmissionState>) {
        let (event_tx, event_rx) = mpsc::channel(16);
        let state = Arc::new(RwLock::new(AdmissionState::Unjoined));
        let task = tokio::spawn(monitor_loop(
            api,
            room_id,
            config,
            Arc::clone(&state),
            event_tx,
        ));
        (Self { state, task }, event_rx)
    }

    pub async fn state(&self) -> AdmissionState {
        *self.state.read().await
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for AdmissionMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn monitor_loop(
    api: Arc<dyn MembershipApi>,
    room_id: RoomId,
    config: AdmissionConfig,
    shared: Arc<RwLock<AdmissionState>>,
    event_tx: mpsc::Sender<AdmissionState>,
) {
    let mut controller = AdmissionController::new(api.email());

    // Keep asking until the registry answers.
    loop {
        let transition = match api.request_join(&room_id).await {
            Ok(status) => {
                info!(room = %room_id, status = %status, "Join request answered");
                controller.join_requested(status)
            }
            Err(e) => match controller.join_failed(&e) {
                Some(denied) => {
                    warn!(room = %room_id, error = %e, "Join request refused");
                    Some(denied)
                }
                None => {
                    warn!(room = %room_id, error = %e, "Join request failed, retrying");
                    tokio::time::sleep(config.pending_poll()).await;
                    continue;
                }
            },
        };
        if let Some(next) = transition {
            *shared.write().await = next;
            let _ = event_tx.send(next).await;
        }
        break;
    }

    while let Some(interval) = controller.poll_interval(&config) {
        tokio::time::sleep(interval).await;
        let members = match api.list_members(&room_id).await {
            Ok(members) => members,
            Err(e) => {
                debug!(room = %room_id, error = %e, "Membership poll failed");
                continue;
            }
        };
        if let Some(next) = controller.observe(&members) {
            info!(room = %room_id, state = ?next, "Admission state changed");
            *shared.write().await = next;
            if event_tx.send(next).await.is_err() {
                break;
            }
        }
    }
}
