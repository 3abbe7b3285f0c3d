//! Data model shared by every engine component
//!
//! Entities use fixed, explicit fields only. Counters and highlights are
//! derived values and are never treated as authoritative input.

pub mod draft;
pub mod error;
pub mod folder;
pub mod message;
pub mod responses;
pub mod thread;

pub use draft::{
    AttachmentSource, ComposePrefill, DraftData, DraftId, DraftPatch, SavedDraft,
};
pub use error::{FailedEntity, InboxError, Result};
pub use folder::{CustomFolder, Folder, FolderCounters, FolderId, FolderKind, FolderRef, SystemFolder};
pub use message::{
    Attachment, Message, MessageId, MessageStatus, MessageSummary, MessageType, Participant,
    Priority, ThreadId, UserId,
};
pub use responses::{
    Highlight, Highlights, InboxStats, Paged, Pagination, SearchFilters, SearchHit, SearchResult,
    StatsPeriod,
};
pub use thread::{sort_threads, Location, Thread, ThreadFilters, ThreadSummary};
