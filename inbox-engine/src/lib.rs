//! Inbox engine - folders, threads, drafts, bulk actions and search
//!
//! The client-side core of an in-app messaging inbox. All remote access goes
//! through a [`backend::MessageBackend`]; the engine keeps the local view
//! consistent with optimistic updates and derived folder counters.
//!
//! ## Module Organization
//!
//! - `types/`: Data structures, pagination and the error type
//! - `backend/`: Remote API boundary and the in-memory backend
//! - `sync/`: Store, reconciliation and the user-facing operations
//! - `search/`: Remote search with local ranking and highlighting
//! - `services/`: The `InboxService` facade and scheduled tasks
//! - `state/`: Per-session view state
//! - `adapters/`: SQLite persistence for composer drafts
//! - `config/`: Configuration management

pub mod adapters;
pub mod backend;
pub mod config;
pub mod search;
pub mod services;
pub mod state;
pub mod sync;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

use tracing_subscriber::EnvFilter;

pub use backend::{AttachmentUploader, InMemoryBackend, MessageBackend};
pub use config::EngineConfig;
pub use search::{SearchQuery, SearchState};
pub use services::InboxService;
pub use state::{Identity, SessionContext};
pub use sync::{BulkAction, BulkOutcome, ComposeState, DraftManager, SyncEvent};
pub use types::{InboxError, Result};

/// Install the global tracing subscriber
///
/// Debug builds default to debug output for this crate; `RUST_LOG`
/// overrides either way. Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("inbox_engine=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
