use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::error::{InboxError, Result};
use crate::types::message::{Attachment, MessageType, Priority, ThreadId, UserId};

pub type DraftId = String;

/// An unsent, editable message payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftData {
    #[serde(default)]
    pub recipient_ids: Vec<UserId>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Set when composing a reply inside an existing thread
    #[serde(default)]
    pub thread_id: Option<ThreadId>,
    #[serde(default = "default_true")]
    pub is_draft: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DraftData {
    fn default() -> Self {
        Self {
            recipient_ids: Vec::new(),
            subject: String::new(),
            content: String::new(),
            message_type: MessageType::default(),
            priority: Priority::default(),
            attachments: Vec::new(),
            thread_id: None,
            is_draft: true,
        }
    }
}

impl DraftData {
    /// Drafts without content are never saved to the remote
    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }

    /// Check the draft can be submitted as a message
    ///
    /// Runs before any remote call; an invalid draft never leaves the engine.
    pub fn validate_for_send(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.recipient_ids.iter().all(|r| r.trim().is_empty()) {
            missing.push("recipients");
        }
        if self.subject.trim().is_empty() {
            missing.push("subject");
        }
        if self.content.trim().is_empty() {
            missing.push("content");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(InboxError::ValidationFailed(format!(
                "missing {}",
                missing.join(", ")
            )))
        }
    }

    pub fn apply(&mut self, patch: DraftPatch) {
        if let Some(recipient_ids) = patch.recipient_ids {
            self.recipient_ids = recipient_ids;
        }
        if let Some(subject) = patch.subject {
            self.subject = subject;
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(message_type) = patch.message_type {
            self.message_type = message_type;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
    }
}

/// Partial update of the editable draft fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftPatch {
    pub recipient_ids: Option<Vec<UserId>>,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub message_type: Option<MessageType>,
    pub priority: Option<Priority>,
}

/// A draft persisted by the remote and listed in the Drafts folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedDraft {
    pub id: DraftId,
    pub data: DraftData,
    pub updated_at: DateTime<Utc>,
}

/// Initial content when opening the composer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposePrefill {
    pub data: DraftData,
    /// Continue editing a previously saved draft
    pub draft_id: Option<DraftId>,
}

impl From<SavedDraft> for ComposePrefill {
    fn from(saved: SavedDraft) -> Self {
        Self {
            data: saved.data,
            draft_id: Some(saved.id),
        }
    }
}

/// An outgoing file handed to the attachment collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentSource {
    pub path: PathBuf,
    pub file_name: String,
    pub file_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_reports_every_missing_field() {
        let draft = DraftData::default();
        match draft.validate_for_send() {
            Err(InboxError::ValidationFailed(msg)) => {
                assert_eq!(msg, "missing recipients, subject, content")
            }
            other => panic!("Expected ValidationFailed, got {:?}", other),
        }

        let draft = DraftData {
            recipient_ids: vec!["u2".into()],
            subject: "Hello".into(),
            content: "   ".into(),
            ..Default::default()
        };
        assert!(draft.validate_for_send().is_err());
    }

    #[test]
    fn test_patch_only_touches_given_fields() {
        let mut draft = DraftData {
            subject: "Keep".into(),
            ..Default::default()
        };
        draft.apply(DraftPatch {
            content: Some("new body".into()),
            priority: Some(Priority::High),
            ..Default::default()
        });
        assert_eq!(draft.subject, "Keep");
        assert_eq!(draft.content, "new body");
        assert_eq!(draft.priority, Priority::High);
        assert!(draft.is_draft);
    }
}
