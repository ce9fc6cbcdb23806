//! Membership registry: the server-held source of truth for who has
//! requested, been admitted to, or been removed from each room.
//!
//! The outer map lock is only held to find or create a room. Every status
//! change for a room runs under that room's own mutex, so admits, rejects
//! and kicks are linearized per room without blocking other rooms.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use coedit_common::id::new_room_id;
use coedit_common::protocol::{MemberRecord, MemberStatus, RegistryRequest, RegistryResponse};
use coedit_common::{new_id, RegistryError, RoomId};
use regex::Regex;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

/// Canonical form used for every email comparison.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validated_email(email: &str) -> Result<String, RegistryError> {
    let email = normalize_email(email);
    if EMAIL_RE.is_match(&email) {
        Ok(email)
    } else {
        Err(RegistryError::InvalidEmail(email))
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Records for one room, in order of first request.
#[derive(Debug, Default)]
struct RoomMembers {
    records: Vec<MemberRecord>,
}

impl RoomMembers {
    fn with_admin(email: String) -> Self {
        Self {
            records: vec![MemberRecord {
                id: new_id(),
                email,
                status: MemberStatus::Admin,
                joined_at: now_rfc3339(),
            }],
        }
    }

    fn get(&self, email: &str) -> Option<&MemberRecord> {
        self.records.iter().find(|r| r.email == email)
    }

    fn get_mut(&mut self, email: &str) -> Option<&mut MemberRecord> {
        self.records.iter_mut().find(|r| r.email == email)
    }

    fn require_admin(&self, actor: &str) -> Result<(), RegistryError> {
        match self.get(actor) {
            Some(r) if r.status == MemberStatus::Admin => Ok(()),
            _ => Err(RegistryError::NotAuthorized(format!(
                "{actor} is not the host of this room"
            ))),
        }
    }
}

/// Thread-safe membership registry shared by every hub connection.
#[derive(Clone, Default)]
pub struct MembershipRegistry {
    rooms: Arc<RwLock<HashMap<RoomId, Arc<Mutex<RoomMembers>>>>>,
}

impl MembershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn room(&self, room_id: &RoomId) -> Result<Arc<Mutex<RoomMembers>>, RegistryError> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .cloned()
            .ok_or_else(|| RegistryError::RoomNotFound(room_id.to_string()))
    }

    /// Create a room with a fresh id. The caller becomes its host.
    pub async fn create_room(&self, host_email: &str) -> Result<RoomId, RegistryError> {
        let host = validated_email(host_email)?;
        let mut map = self.rooms.write().await;
        let mut room_id = new_room_id();
        while map.contains_key(&room_id) {
            room_id = new_room_id();
        }
        map.insert(
            room_id.clone(),
            Arc::new(Mutex::new(RoomMembers::with_admin(host.clone()))),
        );
        info!(room = %room_id, host = %host, "Room created");
        Ok(room_id)
    }

    /// Ask to join a room. Creates a pending record, or returns the existing
    /// status unchanged on repeat calls. The first requester of an unknown
    /// room creates it and becomes its host.
    pub async fn request_join(
        &self,
        room_id: &RoomId,
        email: &str,
    ) -> Result<MemberStatus, RegistryError> {
        let email = validated_email(email)?;

        let existing = self.rooms.read().await.get(room_id).cloned();
        let room = match existing {
            Some(room) => room,
            None => {
                let mut map = self.rooms.write().await;
                match map.get(room_id) {
                    Some(room) => Arc::clone(room),
                    None => {
                        map.insert(
                            room_id.clone(),
                            Arc::new(Mutex::new(RoomMembers::with_admin(email.clone()))),
                        );
                        info!(room = %room_id, host = %email, "Room created on first join request");
                        return Ok(MemberStatus::Admin);
                    }
                }
            }
        };

        let mut members = room.lock().await;
        if let Some(record) = members.get(&email) {
            debug!(room = %room_id, email = %email, status = %record.status, "Repeat join request");
            return Ok(record.status);
        }
        members.records.push(MemberRecord {
            id: new_id(),
            email: email.clone(),
            status: MemberStatus::Pending,
            joined_at: now_rfc3339(),
        });
        info!(room = %room_id, email = %email, "Join requested");
        Ok(MemberStatus::Pending)
    }

    /// All records for a room, including rejected and removed ones.
    pub async fn list_members(&self, room_id: &RoomId) -> Result<Vec<MemberRecord>, RegistryError> {
        let room = self.room(room_id).await?;
        let members = room.lock().await;
        Ok(members.records.clone())
    }

    pub async fn status_of(&self, room_id: &RoomId, email: &str) -> Option<MemberStatus> {
        let room = self.room(room_id).await.ok()?;
        let email = normalize_email(email);
        let members = room.lock().await;
        members.get(&email).map(|r| r.status)
    }

    /// Host-only: move a pending request to accepted or rejected.
    pub async fn respond_to_join(
        &self,
        room_id: &RoomId,
        actor: &str,
        email: &str,
        accept: bool,
    ) -> Result<MemberStatus, RegistryError> {
        let room = self.room(room_id).await?;
        let actor = normalize_email(actor);
        let email = normalize_email(email);
        let mut members = room.lock().await;

        if let Err(e) = members.require_admin(&actor) {
            warn!(room = %room_id, actor = %actor, target = %email, "Rejected respond_to_join from non-host");
            return Err(e);
        }

        let record = members
            .get_mut(&email)
            .ok_or_else(|| RegistryError::UnknownMember(email.clone()))?;
        if record.status != MemberStatus::Pending {
            return Err(RegistryError::InvalidTransition(format!(
                "{email} is {} and not pending",
                record.status
            )));
        }
        record.status = if accept {
            MemberStatus::Accepted
        } else {
            MemberStatus::Rejected
        };
        info!(room = %room_id, email = %email, status = %record.status, "Join request answered");
        Ok(record.status)
    }

    /// Host-only: remove an accepted participant.
    pub async fn kick(
        &self,
        room_id: &RoomId,
        actor: &str,
        email: &str,
    ) -> Result<MemberStatus, RegistryError> {
        let room = self.room(room_id).await?;
        let actor = normalize_email(actor);
        let email = normalize_email(email);
        let mut members = room.lock().await;

        if let Err(e) = members.require_admin(&actor) {
            warn!(room = %room_id, actor = %actor, target = %email, "Rejected kick from non-host");
            return Err(e);
        }

        let record = members
            .get_mut(&email)
            .ok_or_else(|| RegistryError::UnknownMember(email.clone()))?;
        if record.status != MemberStatus::Accepted {
            return Err(RegistryError::InvalidTransition(format!(
                "{email} is {} and cannot be removed",
                record.status
            )));
        }
        record.status = MemberStatus::Removed;
        info!(room = %room_id, email = %email, "Participant removed");
        Ok(MemberStatus::Removed)
    }

    /// Execute one control-channel request on behalf of `actor`.
    pub async fn handle(&self, actor: &str, request: RegistryRequest) -> RegistryResponse {
        let result = match request {
            RegistryRequest::CreateRoom => self
                .create_room(actor)
                .await
                .map(|room_id| RegistryResponse::RoomCreated { room_id }),
            RegistryRequest::RequestJoin { room_id } => {
                self.request_join(&room_id, actor)
                    .await
                    .map(|status| RegistryResponse::Status {
                        email: normalize_email(actor),
                        status,
                    })
            }
            RegistryRequest::ListMembers { room_id } => self
                .list_members(&room_id)
                .await
                .map(|members| RegistryResponse::Members { members }),
            RegistryRequest::RespondToJoin {
                room_id,
                email,
                accept,
            } => self
                .respond_to_join(&room_id, actor, &email, accept)
                .await
                .map(|status| RegistryResponse::Status {
                    email: normalize_email(&email),
                    status,
                }),
            RegistryRequest::Kick { room_id, email } => self
                .kick(&room_id, actor, &email)
                .await
                .map(|status| RegistryResponse::Status {
                    email: normalize_email(&email),
                    status,
                }),
        };
        result.unwrap_or_else(RegistryResponse::from)
    }

    /// Number of rooms currently known.
    pub async fn count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: &str) -> RoomId {
        RoomId::new(id)
    }

    async fn room_with_host(registry: &MembershipRegistry) -> RoomId {
        let id = room("R123");
        assert_eq!(
            registry.request_join(&id, "host@x.com").await.unwrap(),
            MemberStatus::Admin
        );
        id
    }

    #[tokio::test]
    async fn first_requester_becomes_host() {
        let registry = MembershipRegistry::new();
        let id = room_with_host(&registry).await;
        let members = registry.list_members(&id).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].status, MemberStatus::Admin);
    }

    #[tokio::test]
    async fn create_room_makes_caller_host() {
        let registry = MembershipRegistry::new();
        let id = registry.create_room("Host@X.com").await.unwrap();
        assert_eq!(
            registry.status_of(&id, "host@x.com").await,
            Some(MemberStatus::Admin)
        );
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn join_request_then_accept() {
        let registry = MembershipRegistry::new();
        let id = room_with_host(&registry).await;

        let status = registry.request_join(&id, "a@x.com").await.unwrap();
        assert_eq!(status, MemberStatus::Pending);

        let status = registry
            .respond_to_join(&id, "host@x.com", "a@x.com", true)
            .await
            .unwrap();
        assert_eq!(status, MemberStatus::Accepted);
        assert_eq!(
            registry.status_of(&id, "a@x.com").await,
            Some(MemberStatus::Accepted)
        );
    }

    #[tokio::test]
    async fn repeat_join_request_is_idempotent() {
        let registry = MembershipRegistry::new();
        let id = room_with_host(&registry).await;
        registry.request_join(&id, "a@x.com").await.unwrap();
        registry.request_join(&id, " A@x.com ").await.unwrap();
        let members = registry.list_members(&id).await.unwrap();
        assert_eq!(members.len(), 2);
    }

    #[tokio::test]
    async fn non_host_cannot_respond() {
        let registry = MembershipRegistry::new();
        let id = room_with_host(&registry).await;
        registry.request_join(&id, "a@x.com").await.unwrap();
        registry.request_join(&id, "b@x.com").await.unwrap();

        let err = registry
            .respond_to_join(&id, "b@x.com", "a@x.com", true)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotAuthorized(_)));
        assert_eq!(
            registry.status_of(&id, "a@x.com").await,
            Some(MemberStatus::Pending)
        );
    }

    #[tokio::test]
    async fn accepted_member_cannot_respond_either() {
        let registry = MembershipRegistry::new();
        let id = room_with_host(&registry).await;
        registry.request_join(&id, "a@x.com").await.unwrap();
        registry.request_join(&id, "b@x.com").await.unwrap();
        registry
            .respond_to_join(&id, "host@x.com", "a@x.com", true)
            .await
            .unwrap();

        let err = registry
            .respond_to_join(&id, "a@x.com", "b@x.com", true)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotAuthorized(_)));
        assert_eq!(
            registry.status_of(&id, "b@x.com").await,
            Some(MemberStatus::Pending)
        );
    }

    #[tokio::test]
    async fn rejection_is_terminal() {
        let registry = MembershipRegistry::new();
        let id = room_with_host(&registry).await;
        registry.request_join(&id, "a@x.com").await.unwrap();
        registry
            .respond_to_join(&id, "host@x.com", "a@x.com", false)
            .await
            .unwrap();

        // Asking again does not reopen the request.
        let status = registry.request_join(&id, "a@x.com").await.unwrap();
        assert_eq!(status, MemberStatus::Rejected);

        let err = registry
            .respond_to_join(&id, "host@x.com", "a@x.com", true)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn kick_accepted_member() {
        let registry = MembershipRegistry::new();
        let id = room_with_host(&registry).await;
        registry.request_join(&id, "a@x.com").await.unwrap();
        registry
            .respond_to_join(&id, "host@x.com", "a@x.com", true)
            .await
            .unwrap();

        let status = registry.kick(&id, "host@x.com", "a@x.com").await.unwrap();
        assert_eq!(status, MemberStatus::Removed);
        assert_eq!(
            registry.status_of(&id, "a@x.com").await,
            Some(MemberStatus::Removed)
        );
    }

    #[tokio::test]
    async fn kick_requires_accepted_target() {
        let registry = MembershipRegistry::new();
        let id = room_with_host(&registry).await;
        registry.request_join(&id, "a@x.com").await.unwrap();

        let err = registry.kick(&id, "host@x.com", "a@x.com").await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition(_)));

        let err = registry
            .kick(&id, "host@x.com", "host@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn non_host_cannot_kick() {
        let registry = MembershipRegistry::new();
        let id = room_with_host(&registry).await;
        for email in ["a@x.com", "b@x.com"] {
            registry.request_join(&id, email).await.unwrap();
            registry
                .respond_to_join(&id, "host@x.com", email, true)
                .await
                .unwrap();
        }
        let err = registry.kick(&id, "a@x.com", "b@x.com").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotAuthorized(_)));
        assert_eq!(
            registry.status_of(&id, "b@x.com").await,
            Some(MemberStatus::Accepted)
        );
    }

    #[tokio::test]
    async fn unknown_room_and_member() {
        let registry = MembershipRegistry::new();
        let err = registry.list_members(&room("nope")).await.unwrap_err();
        assert!(matches!(err, RegistryError::RoomNotFound(_)));

        let id = room_with_host(&registry).await;
        let err = registry
            .respond_to_join(&id, "host@x.com", "ghost@x.com", true)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownMember(_)));
    }

    #[tokio::test]
    async fn invalid_email_rejected() {
        let registry = MembershipRegistry::new();
        let err = registry
            .request_join(&room("R1"), "not-an-email")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidEmail(_)));
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn rooms_are_independent() {
        let registry = MembershipRegistry::new();
        let a = room("A");
        let b = room("B");
        registry.request_join(&a, "host-a@x.com").await.unwrap();
        registry.request_join(&b, "host-b@x.com").await.unwrap();
        registry.request_join(&a, "p@x.com").await.unwrap();

        // Host of B has no authority over A.
        let err = registry
            .respond_to_join(&a, "host-b@x.com", "p@x.com", true)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotAuthorized(_)));
        assert!(registry.status_of(&b, "p@x.com").await.is_none());
    }

    #[tokio::test]
    async fn concurrent_answers_are_linearized() {
        let registry = MembershipRegistry::new();
        let id = room_with_host(&registry).await;
        registry.request_join(&id, "a@x.com").await.unwrap();

        let mut handles = Vec::new();
        for accept in [true, false, true, false] {
            let registry = registry.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .respond_to_join(&id, "host@x.com", "a@x.com", accept)
                    .await
            }));
        }
        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn handle_maps_errors_to_responses() {
        let registry = MembershipRegistry::new();
        let id = room_with_host(&registry).await;
        let resp = registry
            .handle(
                "nobody@x.com",
                RegistryRequest::Kick {
                    room_id: id.clone(),
                    email: "host@x.com".into(),
                },
            )
            .await;
        assert!(matches!(
            resp,
            RegistryResponse::Error {
                kind: coedit_common::RegistryErrorKind::NotAuthorized,
                ..
            }
        ));

        let resp = registry
            .handle("a@x.com", RegistryRequest::RequestJoin { room_id: id })
            .await;
        assert_eq!(
            resp,
            RegistryResponse::Status {
                email: "a@x.com".into(),
                status: MemberStatus::Pending,
            }
        );
    }
}
