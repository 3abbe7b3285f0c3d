//! Remote message API boundary
//!
//! The engine never talks to the network itself. Every remote read or write
//! goes through [`MessageBackend`], and every call is bounded by
//! [`with_timeout`] so a stalled request is treated as a failure instead of
//! being left pending.

pub mod memory;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::types::error::{InboxError, Result};
use crate::types::{
    Attachment, AttachmentSource, CustomFolder, DraftData, DraftId, FolderId, FolderRef,
    InboxStats, Message, MessageId, Paged, SavedDraft, SearchFilters, SearchHit, StatsPeriod,
    Thread, ThreadFilters, ThreadId, UserId,
};

pub use memory::InMemoryBackend;

/// A message accepted by the remote, with the thread it now belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub message: Message,
    pub thread: Thread,
}

/// The remote source of truth for folders, threads, messages and drafts
///
/// All calls are scoped to an identity already resolved by the auth
/// collaborator.
#[async_trait]
pub trait MessageBackend: Send + Sync {
    async fn list_custom_folders(&self, user: &UserId) -> Result<Vec<CustomFolder>>;

    async fn create_folder(&self, user: &UserId, name: &str) -> Result<CustomFolder>;

    async fn rename_folder(&self, user: &UserId, folder_id: &FolderId, name: &str) -> Result<()>;

    async fn delete_folder(&self, user: &UserId, folder_id: &FolderId) -> Result<()>;

    async fn list_threads(
        &self,
        user: &UserId,
        folder: &FolderRef,
        filters: &ThreadFilters,
        page: u32,
        page_size: u32,
    ) -> Result<Paged<Thread>>;

    /// Messages of a thread, oldest first
    async fn get_thread_messages(
        &self,
        user: &UserId,
        thread_id: &ThreadId,
        page: u32,
        page_size: u32,
    ) -> Result<Paged<Message>>;

    async fn mark_thread_read(&self, user: &UserId, thread_id: &ThreadId) -> Result<()>;

    async fn set_archived(&self, user: &UserId, thread_id: &ThreadId, archived: bool) -> Result<()>;

    async fn set_pinned(&self, user: &UserId, thread_id: &ThreadId, pinned: bool) -> Result<()>;

    async fn set_starred(&self, user: &UserId, message_id: &MessageId, starred: bool) -> Result<()>;

    async fn file_thread(
        &self,
        user: &UserId,
        thread_id: &ThreadId,
        folder_id: Option<&FolderId>,
    ) -> Result<()>;

    /// Move to Trash, or remove for good when `permanent` is set
    async fn delete_threads(&self, user: &UserId, thread_ids: &[ThreadId], permanent: bool)
        -> Result<()>;

    async fn reply_to_message(
        &self,
        user: &UserId,
        thread_id: &ThreadId,
        content: &str,
    ) -> Result<SentMessage>;

    async fn send_message(&self, user: &UserId, draft: &DraftData) -> Result<SentMessage>;

    /// Create or update a saved draft, returning its id
    async fn save_draft(
        &self,
        user: &UserId,
        draft_id: Option<&DraftId>,
        draft: &DraftData,
    ) -> Result<DraftId>;

    async fn delete_draft(&self, user: &UserId, draft_id: &DraftId) -> Result<()>;

    async fn list_drafts(&self, user: &UserId) -> Result<Vec<SavedDraft>>;

    async fn search(
        &self,
        user: &UserId,
        query: &str,
        filters: &SearchFilters,
        page: u32,
        page_size: u32,
    ) -> Result<Paged<SearchHit>>;

    async fn get_stats(&self, user: &UserId, period: StatsPeriod) -> Result<InboxStats>;
}

/// Storage collaborator for outgoing attachments
///
/// The engine hands over the file and keeps only the returned metadata.
#[async_trait]
pub trait AttachmentUploader: Send + Sync {
    async fn upload(&self, user: &UserId, source: &AttachmentSource) -> Result<Attachment>;
}

/// Run a remote call with an upper bound on its duration
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Remote call {} timed out after {:?}", operation, limit);
            Err(InboxError::remote(format!(
                "{} timed out after {}ms",
                operation,
                limit.as_millis()
            )))
        }
    }
}
