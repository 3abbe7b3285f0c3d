//! Bulk actions over the thread selection
//!
//! Each thread gets its own optimistic mutation and its own remote call, all
//! issued concurrently. The aggregate settles only once every call has, and
//! only then is the session selection touched.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::state::SessionContext;
use crate::sync::threads::ThreadService;
use crate::types::error::{FailedEntity, InboxError, Result};
use crate::types::ThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    MarkRead,
    Archive,
    /// Trash, or permanent removal when already in Trash
    Delete,
}

impl BulkAction {
    pub fn name(self) -> &'static str {
        match self {
            BulkAction::MarkRead => "mark_read",
            BulkAction::Archive => "archive",
            BulkAction::Delete => "delete",
        }
    }
}

/// Per-thread result of a bulk action
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOutcome {
    pub action: BulkAction,
    pub succeeded: Vec<ThreadId>,
    pub failed: Vec<FailedEntity>,
}

impl BulkOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Collapse into a `PartialFailure` when any thread failed
    pub fn into_result(self) -> Result<Vec<ThreadId>> {
        if self.failed.is_empty() {
            Ok(self.succeeded)
        } else {
            Err(InboxError::PartialFailure {
                succeeded: self.succeeded,
                failed: self.failed,
            })
        }
    }
}

pub struct BulkActionExecutor {
    threads: Arc<ThreadService>,
}

impl BulkActionExecutor {
    pub fn new(threads: Arc<ThreadService>) -> Self {
        Self { threads }
    }

    pub async fn apply_bulk_action(
        &self,
        session: &SessionContext,
        action: BulkAction,
        thread_ids: &[ThreadId],
    ) -> Result<BulkOutcome> {
        if thread_ids.is_empty() {
            return Err(InboxError::ValidationFailed("no threads selected".into()));
        }

        let mut unique: Vec<ThreadId> = Vec::with_capacity(thread_ids.len());
        for id in thread_ids {
            if !unique.contains(id) {
                unique.push(id.clone());
            }
        }

        let permanent = session.active_folder().is_trash();
        info!(
            "Bulk {} on {} threads{}",
            action.name(),
            unique.len(),
            if permanent && action == BulkAction::Delete { " (permanent)" } else { "" }
        );

        let results = join_all(unique.iter().map(|id| async move {
            let result = match action {
                BulkAction::MarkRead => self.threads.mark_thread_read(session, id).await.map(drop),
                BulkAction::Archive => self.threads.toggle_archive(session, id, true).await.map(drop),
                BulkAction::Delete => self.threads.delete_thread(session, id, permanent).await.map(drop),
            };
            (id.clone(), result)
        }))
        .await;

        let mut outcome = BulkOutcome {
            action,
            succeeded: Vec::new(),
            failed: Vec::new(),
        };
        for (id, result) in results {
            match result {
                Ok(()) => outcome.succeeded.push(id),
                Err(error) => outcome.failed.push(FailedEntity { id, error }),
            }
        }

        // Selection changes only after every sub-operation has settled
        for id in &outcome.succeeded {
            session.deselect(id);
        }
        if !outcome.failed.is_empty() {
            warn!(
                "Bulk {}: {} of {} threads failed",
                action.name(),
                outcome.failed.len(),
                unique.len()
            );
        }
        Ok(outcome)
    }
}
