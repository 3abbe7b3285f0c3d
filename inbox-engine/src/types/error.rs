//! Unified error types for the inbox engine
//!
//! This module defines error types that:
//! - Are serializable so a presentation layer can render them
//! - Carry the entity id of a failed write so the caller can retry it
//! - Report bulk failures per id instead of as a single boolean

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single entity that failed inside a bulk operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEntity {
    pub id: String,
    pub error: InboxError,
}

/// Engine error type for queries and commands
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum InboxError {
    /// Thread, message, draft or folder no longer exists
    #[error("Not found: {0}")]
    NotFound(String),

    /// The session identity cannot act on this entity
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resolved locally, never sent to the remote
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Transient network/service failure, including timeouts
    #[error("Remote unavailable{}: {reason}", entity_suffix(.entity_id))]
    RemoteUnavailable {
        entity_id: Option<String>,
        reason: String,
    },

    /// Bulk action where only some ids succeeded
    #[error("Partial failure: {} of {} succeeded", .succeeded.len(), .succeeded.len() + .failed.len())]
    PartialFailure {
        succeeded: Vec<String>,
        failed: Vec<FailedEntity>,
    },

    /// The result would apply to a context the user already left
    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

fn entity_suffix(entity_id: &Option<String>) -> String {
    match entity_id {
        Some(id) => format!(" ({})", id),
        None => String::new(),
    }
}

impl InboxError {
    /// Remote failure not tied to a specific entity
    pub fn remote(reason: impl Into<String>) -> Self {
        InboxError::RemoteUnavailable {
            entity_id: None,
            reason: reason.into(),
        }
    }

    /// Attach the id of the entity whose write failed
    ///
    /// Only remote failures carry an entity id; other variants already
    /// name the entity in their message.
    pub fn for_entity(self, id: &str) -> Self {
        match self {
            InboxError::RemoteUnavailable { reason, .. } => InboxError::RemoteUnavailable {
                entity_id: Some(id.to_string()),
                reason,
            },
            other => other,
        }
    }

    /// Whether retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, InboxError::RemoteUnavailable { .. })
    }

    /// The entity id attached to a failed write, if any
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            InboxError::RemoteUnavailable { entity_id, .. } => entity_id.as_deref(),
            _ => None,
        }
    }
}

// Implement From for common error types

impl From<std::io::Error> for InboxError {
    fn from(err: std::io::Error) -> Self {
        InboxError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for InboxError {
    fn from(err: toml::de::Error) -> Self {
        InboxError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for InboxError {
    fn from(err: serde_json::Error) -> Self {
        InboxError::Parse(err.to_string())
    }
}

impl From<rusqlite::Error> for InboxError {
    fn from(err: rusqlite::Error) -> Self {
        InboxError::Database(err.to_string())
    }
}

impl From<r2d2::Error> for InboxError {
    fn from(err: r2d2::Error) -> Self {
        InboxError::Database(err.to_string())
    }
}

/// Result type alias using InboxError
pub type Result<T> = std::result::Result<T, InboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_entity_only_tags_remote_failures() {
        let err = InboxError::remote("connection reset").for_entity("t-1");
        assert_eq!(err.entity_id(), Some("t-1"));
        assert_eq!(err.to_string(), "Remote unavailable (t-1): connection reset");

        let err = InboxError::NotFound("thread t-1".into()).for_entity("t-1");
        assert_eq!(err.entity_id(), None);
    }

    #[test]
    fn test_partial_failure_message_and_serialization() {
        let err = InboxError::PartialFailure {
            succeeded: vec!["a".into(), "b".into()],
            failed: vec![FailedEntity {
                id: "c".into(),
                error: InboxError::remote("timeout"),
            }],
        };
        assert_eq!(err.to_string(), "Partial failure: 2 of 3 succeeded");

        let json = serde_json::to_string(&err).unwrap();
        let back: InboxError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
