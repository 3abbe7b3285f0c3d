//! Local mailbox state and everything that keeps it in step with the remote
//!
//! - `store`: the thread/message store and its derived snapshot
//! - `reconcile`: optimistic apply/confirm with per-thread ordering
//! - `threads`, `folders`, `bulk`, `drafts`: the user-facing operations
//! - `engine`: refresh and polling
//! - `events`: change notifications

pub mod bulk;
pub mod drafts;
pub mod engine;
pub mod events;
pub mod folders;
pub mod reconcile;
pub mod store;
pub mod threads;

pub use bulk::{BulkAction, BulkActionExecutor, BulkOutcome};
pub use drafts::{ComposeState, DraftManager, SaveOutcome, SavedDrafts};
pub use engine::{RefreshResult, SyncEngine, SyncState, SyncStatus};
pub use events::{EventBus, SyncEvent};
pub use folders::FolderTaxonomy;
pub use reconcile::{Confirmation, Mutation, Reconciler};
pub use store::{StoreSnapshot, ThreadStore};
pub use threads::ThreadService;
