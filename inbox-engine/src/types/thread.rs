use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::types::folder::FolderId;
use crate::types::message::{Message, MessageSummary, MessageType, Participant, ThreadId};

/// Where a thread primarily lives; exactly one per thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    Inbox,
    Archived,
    Trash,
}

/// A conversation between a fixed participant set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub subject: String,
    pub participants: Vec<Participant>,
    pub last_message: MessageSummary,
    pub message_count: u32,
    pub unread_count: u32,
    /// Messages in this thread the user starred
    #[serde(default)]
    pub starred_count: u32,
    /// Messages in this thread authored by the user (drives Sent membership)
    #[serde(default)]
    pub outgoing_count: u32,
    #[serde(default)]
    pub custom_folder: Option<FolderId>,
    #[serde(default)]
    pub message_type: MessageType,
    pub is_pinned: bool,
    pub is_archived: bool,
    pub is_deleted: bool,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    pub fn location(&self) -> Location {
        if self.is_deleted {
            Location::Trash
        } else if self.is_archived {
            Location::Archived
        } else {
            Location::Inbox
        }
    }

    pub fn is_read(&self) -> bool {
        self.unread_count == 0
    }

    pub fn is_starred(&self) -> bool {
        self.starred_count > 0
    }

    pub fn has_outgoing(&self) -> bool {
        self.outgoing_count > 0
    }

    /// The first participant that is not the given user
    pub fn other_participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id != user_id)
    }

    pub fn summary(&self) -> ThreadSummary {
        ThreadSummary {
            id: self.id.clone(),
            subject: self.subject.clone(),
            participants: self.participants.clone(),
        }
    }

    /// Clamp counters and drop repeated participants
    ///
    /// Remote payloads are not trusted to respect the invariants. A thread
    /// left with fewer than two participants cannot be repaired here; see
    /// [`Thread::check_invariants`].
    pub fn normalized(mut self) -> Self {
        let mut seen = HashSet::new();
        self.participants.retain(|p| seen.insert(p.id.clone()));
        self.unread_count = self.unread_count.min(self.message_count);
        self.starred_count = self.starred_count.min(self.message_count);
        self.outgoing_count = self.outgoing_count.min(self.message_count);
        if self.is_deleted {
            self.is_archived = false;
        }
        self
    }

    pub fn check_invariants(&self) -> bool {
        self.participants.len() >= 2
            && self.unread_count <= self.message_count
            && self.starred_count <= self.message_count
            && self.outgoing_count <= self.message_count
            && !(self.is_deleted && self.is_archived)
    }

    /// Record a newly arrived or sent message on this thread
    pub fn record_message(&mut self, message: &Message, user_id: &str) {
        self.message_count += 1;
        if message.is_from(user_id) {
            self.outgoing_count += 1;
        } else if !message.is_read() {
            self.unread_count += 1;
        }
        if message.is_starred {
            self.starred_count += 1;
        }
        if message.created_at >= self.last_message.created_at {
            self.last_message = message.summary();
        }
        self.updated_at = self.updated_at.max(message.created_at);
    }

    /// Start a thread from its first message
    pub fn from_first_message(message: &Message, user_id: &str) -> Self {
        let mut participants = vec![message.sender.clone(), message.recipient.clone()];
        participants.sort();
        participants.dedup();

        let mut thread = Self {
            id: message.thread_id.clone(),
            subject: message.subject.clone(),
            participants,
            last_message: message.summary(),
            message_count: 0,
            unread_count: 0,
            starred_count: 0,
            outgoing_count: 0,
            custom_folder: None,
            message_type: message.message_type,
            is_pinned: false,
            is_archived: false,
            is_deleted: false,
            updated_at: message.created_at,
        };
        thread.record_message(message, user_id);
        thread
    }
}

/// Thread identity carried by search results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: ThreadId,
    pub subject: String,
    pub participants: Vec<Participant>,
}

/// Filters for thread listings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadFilters {
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default)]
    pub starred_only: bool,
    #[serde(default)]
    pub pinned_only: bool,
    pub message_type: Option<MessageType>,
    /// Only threads including this participant id
    pub participant: Option<String>,
}

impl ThreadFilters {
    pub fn matches(&self, thread: &Thread) -> bool {
        if self.unread_only && thread.is_read() {
            return false;
        }
        if self.starred_only && !thread.is_starred() {
            return false;
        }
        if self.pinned_only && !thread.is_pinned {
            return false;
        }
        if let Some(kind) = self.message_type {
            if thread.message_type != kind {
                return false;
            }
        }
        if let Some(participant) = &self.participant {
            if !thread.participants.iter().any(|p| &p.id == participant) {
                return false;
            }
        }
        true
    }
}

/// Listing order: pinned first, then most recently updated
pub fn sort_threads(threads: &mut [Thread]) {
    threads.sort_by(|a, b| {
        b.is_pinned
            .cmp(&a.is_pinned)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}
