//! Synchronization layer
//!
//! Pulls remote state into the store: on demand for the active folder or an
//! open thread, and periodically while polling. Merging goes through
//! [`ThreadStore`], so threads with unconfirmed mutations keep their
//! tentative state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::services::scheduler::ScheduledTask;
use crate::state::SessionContext;
use crate::sync::drafts::SavedDrafts;
use crate::sync::events::{EventBus, SyncEvent};
use crate::sync::folders::FolderTaxonomy;
use crate::sync::threads::ThreadService;
use crate::types::error::{InboxError, Result};
use crate::types::{FolderRef, SavedDraft, ThreadFilters, ThreadId};

/// Sync status for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub current_folder: Option<FolderRef>,
    pub last_sync: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub is_online: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    Idle,
    Syncing,
    Error,
}

/// What a folder refresh brought in
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshResult {
    pub folder: FolderRef,
    pub threads: Vec<ThreadId>,
    pub total: u32,
}

pub struct SyncEngine {
    threads: Arc<ThreadService>,
    folders: Arc<FolderTaxonomy>,
    drafts: Arc<SavedDrafts>,
    events: EventBus,
    config: EngineConfig,
    status: Arc<RwLock<SyncStatus>>,
}

impl SyncEngine {
    pub fn new(
        threads: Arc<ThreadService>,
        folders: Arc<FolderTaxonomy>,
        drafts: Arc<SavedDrafts>,
        events: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            threads,
            folders,
            drafts,
            events,
            config,
            status: Arc::new(RwLock::new(SyncStatus {
                state: SyncState::Idle,
                current_folder: None,
                last_sync: None,
                error: None,
                is_online: false,
            })),
        }
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Receiver for every engine event from now on
    pub fn subscribe(&self) -> flume::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    async fn update_status<F>(&self, update_fn: F)
    where
        F: FnOnce(&mut SyncStatus),
    {
        let mut status = self.status.write().await;
        update_fn(&mut status);
    }

    async fn record_failure(&self, err: &InboxError) {
        let message = err.to_string();
        self.update_status(|s| {
            s.state = SyncState::Error;
            s.error = Some(message);
            if err.is_retryable() {
                s.is_online = false;
            }
        })
        .await;
    }

    /// Re-fetch the first page of the session's active folder
    ///
    /// Folder counters are refreshed along with it. A refresh abandoned by a
    /// folder switch is `Cancelled` and leaves the status untouched.
    pub async fn refresh_folder(&self, session: &SessionContext) -> Result<RefreshResult> {
        let folder = session.active_folder();
        debug!("Refreshing folder {}", folder.id());

        self.update_status(|s| {
            s.state = SyncState::Syncing;
            s.current_folder = Some(folder.clone());
        })
        .await;

        let result = self
            .threads
            .list_threads(session, &folder, &ThreadFilters::default(), 1, None)
            .await;

        let page = match result {
            Ok(page) => page,
            Err(e @ InboxError::Cancelled(_)) => {
                self.update_status(|s| {
                    s.state = SyncState::Idle;
                    s.current_folder = None;
                })
                .await;
                return Err(e);
            }
            Err(e) => {
                error!("Refreshing folder {} failed: {}", folder.id(), e);
                self.record_failure(&e).await;
                return Err(e);
            }
        };

        if let Err(e) = self.folders.list_folders(session).await {
            error!("Refreshing folder list failed: {}", e);
            self.record_failure(&e).await;
            return Err(e);
        }

        self.update_status(|s| {
            s.state = SyncState::Idle;
            s.current_folder = None;
            s.last_sync = Some(Utc::now());
            s.error = None;
            s.is_online = true;
        })
        .await;

        let threads: Vec<ThreadId> = page.data.iter().map(|t| t.id.clone()).collect();
        info!("Refreshed folder {}: {} threads", folder.id(), threads.len());
        Ok(RefreshResult {
            folder,
            threads,
            total: page.pagination.total,
        })
    }

    /// Re-fetch every message of one thread
    ///
    /// Stops at the last page the remote reports or at the first empty
    /// page, whichever comes first.
    pub async fn refresh_thread(&self, session: &SessionContext, thread_id: &ThreadId) -> Result<usize> {
        let page_size = self.config.max_page_size;
        let mut page = 1;
        let mut fetched = 0;
        loop {
            let batch = self
                .threads
                .get_thread_messages(session, thread_id, page, Some(page_size))
                .await?;
            fetched += batch.data.len();
            if batch.data.is_empty() || !batch.pagination.has_next || page >= batch.pagination.total_pages {
                break;
            }
            page += 1;
        }
        debug!("Refreshed thread {}: {} messages", thread_id, fetched);
        Ok(fetched)
    }

    /// Re-fetch the saved drafts behind the Drafts counter
    pub async fn refresh_drafts(&self, session: &SessionContext) -> Result<Vec<SavedDraft>> {
        let drafts = self.drafts.list_drafts(session).await?;
        debug!("Refreshed drafts: {}", drafts.len());
        Ok(drafts)
    }

    /// Refresh the active folder every poll interval until the handle drops
    pub fn start_polling(self: &Arc<Self>, session: SessionContext) -> ScheduledTask {
        let engine = self.clone();
        info!("Polling every {:?}", self.config.poll_interval());
        ScheduledTask::every("folder_poll", self.config.poll_interval(), move || {
            let engine = engine.clone();
            let session = session.clone();
            async move {
                match engine.refresh_folder(&session).await {
                    Ok(_) | Err(InboxError::Cancelled(_)) => {}
                    Err(e) => engine.events.emit(SyncEvent::Error {
                        message: e.to_string(),
                    }),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::sync::reconcile::Reconciler;
    use crate::sync::store::ThreadStore;
    use crate::test_support::{incoming, seeded_backend, session, ME};
    use std::time::Duration;

    fn engine(backend: Arc<InMemoryBackend>) -> (Arc<SyncEngine>, Arc<ThreadService>) {
        let config = EngineConfig::default();
        let events = EventBus::new();
        let store = Arc::new(ThreadStore::new(ME));
        let reconciler = Arc::new(Reconciler::new(store.clone(), events.clone(), config.remote_timeout()));
        let threads = Arc::new(ThreadService::new(backend.clone(), reconciler, events.clone(), config.clone()));
        let folders = Arc::new(FolderTaxonomy::new(
            backend.clone(),
            store.clone(),
            events.clone(),
            config.remote_timeout(),
        ));
        let drafts = Arc::new(SavedDrafts::new(backend, store, events.clone(), config.clone()));
        (
            Arc::new(SyncEngine::new(threads.clone(), folders, drafts, events, config)),
            threads,
        )
    }

    #[tokio::test]
    async fn test_refresh_merges_remote_changes() {
        let backend = seeded_backend();
        let (engine, threads) = engine(backend.clone());
        let session = session();
        let events = engine.subscribe();

        let first = engine.refresh_folder(&session).await.unwrap();
        assert_eq!(first.total, 5);

        backend.insert_message(incoming("m6", "t6", "bob", "Fresh", 60));
        let second = engine.refresh_folder(&session).await.unwrap();
        assert_eq!(second.threads[0], "t6");
        assert!(threads.store().thread("t6").is_some());

        let updates: Vec<SyncEvent> = events.try_iter().collect();
        assert!(updates.iter().any(|e| matches!(
            e,
            SyncEvent::ThreadsUpdated { thread_ids } if thread_ids.contains(&"t6".to_string())
        )));

        let status = engine.status().await;
        assert_eq!(status.state, SyncState::Idle);
        assert!(status.is_online);
        assert!(status.last_sync.is_some());
    }

    #[tokio::test]
    async fn test_failed_refresh_reports_error() {
        let backend = seeded_backend();
        let (engine, _threads) = engine(backend.clone());
        backend.set_offline(true);

        let err = engine.refresh_folder(&session()).await.unwrap_err();
        assert!(err.is_retryable());
        let status = engine.status().await;
        assert_eq!(status.state, SyncState::Error);
        assert!(!status.is_online);
        assert!(status.error.is_some());
    }

    #[tokio::test]
    async fn test_refresh_thread_pages_through_messages() {
        let backend = seeded_backend();
        for n in 0..120 {
            backend.insert_message(incoming(&format!("m1-{}", n), "t1", "ann", "Topic 1", 10 + n));
        }
        let (engine, threads) = engine(backend);
        let session = session();

        let fetched = engine.refresh_thread(&session, &"t1".to_string()).await.unwrap();
        assert_eq!(fetched, 121);
        assert_eq!(threads.store().messages("t1").len(), 121);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_until_handle_dropped() {
        let backend = seeded_backend();
        let (engine, threads) = engine(backend.clone());
        let session = session();
        let events = engine.subscribe();

        let poller = engine.start_polling(session.clone());
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(backend.calls("list_threads"), 1);
        assert_eq!(threads.store().snapshot().threads.len(), 5);

        backend.set_offline(true);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(events.try_iter().any(|e| matches!(e, SyncEvent::Error { .. })));

        drop(poller);
        backend.set_offline(false);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(backend.calls("list_threads"), 2);
    }

    #[tokio::test]
    async fn test_thread_refresh_stops_at_the_last_page() {
        let backend = seeded_backend();
        let (engine, _threads) = engine(backend.clone());
        let session = session();
        backend.set_endless_pages(true);

        let fetched = engine.refresh_thread(&session, &"t1".to_string()).await.unwrap();
        assert_eq!(fetched, 1);
        assert_eq!(backend.calls("get_thread_messages"), 1);
    }
}
