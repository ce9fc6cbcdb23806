//! Read model of a room's membership for the participants panel.

use coedit_common::{MemberRecord, MemberStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantsView {
    pub host: Option<MemberRecord>,
    pub accepted: Vec<MemberRecord>,
    /// Waiting in the lobby, oldest request first.
    pub pending: Vec<MemberRecord>,
    /// Rejected or removed.
    pub departed: Vec<MemberRecord>,
}

impl ParticipantsView {
    pub fn from_members(members: &[MemberRecord]) -> Self {
        let mut view = Self::default();
        for member in members {
            match member.status {
                MemberStatus::Admin => view.host = Some(member.clone()),
                MemberStatus::Accepted => view.accepted.push(member.clone()),
                MemberStatus::Pending => view.pending.push(member.clone()),
                MemberStatus::Rejected | MemberStatus::Removed => {
                    view.departed.push(member.clone())
                }
            }
        }
        // RFC 3339 timestamps in one zone sort lexically.
        view.pending.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        view
    }

    /// Everyone currently admitted, host first.
    pub fn present(&self) -> impl Iterator<Item = &MemberRecord> {
        self.host.iter().chain(self.accepted.iter())
    }

    pub fn is_host(&self, email: &str) -> bool {
        self.host.as_ref().is_some_and(|h| h.email == email)
    }
}
