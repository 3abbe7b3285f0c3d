use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type MessageId = String;
pub type ThreadId = String;
pub type UserId = String;

/// A conversation participant as resolved by the identity collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Participant {
    pub id: UserId,
    pub display_name: String,
}

impl Participant {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Direct,
    Announcement,
    CourseDiscussion,
    AssignmentFeedback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Delivery status, the only message field besides the star that changes after send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

/// Attachment metadata; the bytes live with the storage collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub file_name: String,
    pub file_url: String,
    pub file_type: String,
    pub file_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub sender: Participant,
    pub recipient: Participant,
    pub subject: String,
    pub content: String,
    pub message_type: MessageType,
    pub priority: Priority,
    pub status: MessageStatus,
    pub is_starred: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_read(&self) -> bool {
        self.status == MessageStatus::Read
    }

    pub fn is_from(&self, user_id: &str) -> bool {
        self.sender.id == user_id
    }

    /// Short preview of the content for thread listings
    pub fn preview(&self, max_chars: usize) -> String {
        let trimmed = self.content.trim();
        if trimmed.chars().count() <= max_chars {
            return trimmed.to_string();
        }
        let mut preview: String = trimmed.chars().take(max_chars).collect();
        preview.push('…');
        preview
    }

    pub fn summary(&self) -> MessageSummary {
        MessageSummary {
            id: self.id.clone(),
            sender: self.sender.clone(),
            preview: self.preview(120),
            created_at: self.created_at,
        }
    }
}

/// The last message of a thread as shown in listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: MessageId,
    pub sender: Participant,
    pub preview: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let msg = Message {
            id: "m1".into(),
            thread_id: "t1".into(),
            sender: Participant::new("u1", "Ada"),
            recipient: Participant::new("u2", "Bo"),
            subject: "Hi".into(),
            content: "  héllo wörld  ".into(),
            message_type: MessageType::Direct,
            priority: Priority::Normal,
            status: MessageStatus::Delivered,
            is_starred: false,
            attachments: vec![],
            created_at: Utc::now(),
        };
        assert_eq!(msg.preview(100), "héllo wörld");
        assert_eq!(msg.preview(5), "héllo…");
    }

    #[test]
    fn test_enum_wire_names() {
        let json = serde_json::to_string(&MessageType::AssignmentFeedback).unwrap();
        assert_eq!(json, "\"assignment_feedback\"");
        assert!(Priority::Urgent > Priority::High);
    }
}
