//! Chat transcript with at-most-once application per message id.
//!
//! The visible transcript is a bounded ring buffer so memory stays
//! predictable. The processed-id set is not bounded: it lives as long as the
//! room session, so a message that has scrolled out of the transcript still
//! cannot be applied twice.

use std::collections::{HashSet, VecDeque};

use coedit_common::protocol::ChatMessagePayload;
use coedit_common::{new_id, Envelope};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One visible transcript line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub id: String,
    pub sender_email: String,
    pub message: String,
    pub sent_at: String,
    /// Local arrival sequence number.
    pub arrival: u64,
}

pub struct ChatTranscript {
    max_messages: usize,
    entries: VecDeque<ChatEntry>,
    seen: HashSet<String>,
    next_arrival: u64,
}

impl ChatTranscript {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages: max_messages.max(1),
            entries: VecDeque::new(),
            seen: HashSet::new(),
            next_arrival: 0,
        }
    }

    fn append(&mut self, id: String, sender_email: String, message: String, sent_at: String) -> &ChatEntry {
        if self.entries.len() >= self.max_messages {
            self.entries.pop_front();
        }
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        self.seen.insert(id.clone());
        self.entries.push_back(ChatEntry {
            id,
            sender_email,
            message,
            sent_at,
            arrival,
        });
        &self.entries[self.entries.len() - 1]
    }

    /// Append a local message and build the envelope to send. The hub does
    /// not echo back to the sender, so the local copy is the only one.
    pub fn compose(&mut self, sender_email: &str, message: &str) -> Envelope {
        let id = new_id();
        let sent_at = chrono::Utc::now().to_rfc3339();
        self.append(
            id.clone(),
            sender_email.to_string(),
            message.to_string(),
            sent_at.clone(),
        );
        Envelope::ChatMessage(ChatMessagePayload {
            id: Some(id),
            sender_email: sender_email.to_string(),
            message: message.to_string(),
            sent_at: Some(sent_at),
        })
    }

    /// Apply a relayed message. Returns the new entry, or `None` if its id
    /// was already processed.
    ///
    /// Messages without an id get one synthesized from the receipt time.
    /// Such messages cannot be deduplicated if they are delivered again.
    pub fn receive(&mut self, payload: ChatMessagePayload) -> Option<&ChatEntry> {
        let now = chrono::Utc::now();
        let id = match payload.id {
            Some(id) => id,
            None => format!("rx-{}-{}", now.timestamp_millis(), self.next_arrival),
        };
        if self.seen.contains(&id) {
            debug!(id = %id, "Dropping duplicate chat message");
            return None;
        }
        let sent_at = payload.sent_at.unwrap_or_else(|| now.to_rfc3339());
        Some(self.append(id, payload.sender_email, payload.message, sent_at))
    }

    /// Transcript lines, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &ChatEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_seen(&self, id: &str) -> bool {
        self.seen.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(id: Option<&str>, message: &str) -> ChatMessagePayload {
        ChatMessagePayload {
            id: id.map(str::to_string),
            sender_email: "b@x.com".into(),
            message: message.into(),
            sent_at: None,
        }
    }

    #[test]
    fn redelivery_is_applied_once() {
        let mut chat = ChatTranscript::new(10);
        assert!(chat.receive(payload(Some("m1"), "hi")).is_some());
        for _ in 0..5 {
            assert!(chat.receive(payload(Some("m1"), "hi")).is_none());
        }
        assert_eq!(chat.len(), 1);
    }

    #[test]
    fn compose_appends_locally_and_marks_seen() {
        let mut chat = ChatTranscript::new(10);
        let env = chat.compose("a@x.com", "hello");
        let id = match &env {
            Envelope::ChatMessage(msg) => msg.id.clone().unwrap(),
            other => panic!("unexpected envelope: {other:?}"),
        };
        assert_eq!(chat.len(), 1);
        assert!(chat.has_seen(&id));
        // An echo of our own message is dropped.
        assert!(chat.receive(payload(Some(&id), "hello")).is_none());
    }

    #[test]
    fn transcript_is_bounded_but_dedup_is_not() {
        let mut chat = ChatTranscript::new(2);
        chat.receive(payload(Some("m1"), "one"));
        chat.receive(payload(Some("m2"), "two"));
        chat.receive(payload(Some("m3"), "three"));
        let ids: Vec<&str> = chat.entries().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3"]);

        // m1 scrolled out, but must still not reappear.
        assert!(chat.receive(payload(Some("m1"), "one")).is_none());
        assert_eq!(chat.len(), 2);
    }

    #[test]
    fn missing_ids_are_synthesized_and_unique() {
        let mut chat = ChatTranscript::new(10);
        let a = chat.receive(payload(None, "x")).unwrap().id.clone();
        let b = chat.receive(payload(None, "x")).unwrap().id.clone();
        assert!(a.starts_with("rx-"));
        assert_ne!(a, b);
        assert_eq!(chat.len(), 2);
    }

    #[test]
    fn arrival_order_is_recorded() {
        let mut chat = ChatTranscript::new(10);
        chat.receive(payload(Some("m2"), "second sent, first seen"));
        chat.receive(payload(Some("m1"), "first sent, second seen"));
        let arrivals: Vec<(String, u64)> = chat.entries().map(|e| (e.id.clone(), e.arrival)).collect();
        assert_eq!(arrivals, vec![("m2".into(), 0), ("m1".into(), 1)]);
    }
}
