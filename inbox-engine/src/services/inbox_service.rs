//! Inbox service
//!
//! The single entry point a presentation layer talks to. It wires the
//! components together around one mailbox owner and checks that every call
//! comes from a session of that owner.

use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::sqlite::pool::{create_memory_pool, create_pool};
use crate::adapters::sqlite::DbPool;
use crate::backend::{with_timeout, AttachmentUploader, MessageBackend};
use crate::config::EngineConfig;
use crate::search::ranking::RelevanceScorer;
use crate::search::{SearchDebouncer, SearchEngine, SearchEvent, SearchQuery, SearchState};
use crate::state::SessionContext;
use crate::sync::bulk::{BulkAction, BulkActionExecutor, BulkOutcome};
use crate::sync::drafts::{DraftManager, SavedDrafts};
use crate::sync::engine::SyncEngine;
use crate::sync::events::{EventBus, SyncEvent};
use crate::sync::folders::FolderTaxonomy;
use crate::sync::reconcile::Reconciler;
use crate::sync::store::ThreadStore;
use crate::sync::threads::ThreadService;
use crate::types::error::{InboxError, Result};
use crate::types::{
    CustomFolder, DraftData, DraftId, Folder, FolderId, FolderKind, FolderRef, InboxStats, Message,
    MessageId, Paged, SavedDraft, StatsPeriod, Thread, ThreadFilters, ThreadId, UserId,
};

pub struct InboxService {
    owner: UserId,
    backend: Arc<dyn MessageBackend>,
    store: Arc<ThreadStore>,
    events: EventBus,
    config: EngineConfig,
    pool: DbPool,
    uploader: Option<Arc<dyn AttachmentUploader>>,
    folders: Arc<FolderTaxonomy>,
    threads: Arc<ThreadService>,
    bulk: BulkActionExecutor,
    drafts: Arc<SavedDrafts>,
    search: Arc<SearchEngine>,
    sync: Arc<SyncEngine>,
}

impl InboxService {
    pub fn new(
        backend: Arc<dyn MessageBackend>,
        owner: impl Into<UserId>,
        config: EngineConfig,
        pool: DbPool,
    ) -> Self {
        let owner = owner.into();
        let events = EventBus::new();
        let store = Arc::new(ThreadStore::new(owner.clone()));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            events.clone(),
            config.remote_timeout(),
        ));
        let threads = Arc::new(ThreadService::new(
            backend.clone(),
            reconciler,
            events.clone(),
            config.clone(),
        ));
        let folders = Arc::new(FolderTaxonomy::new(
            backend.clone(),
            store.clone(),
            events.clone(),
            config.remote_timeout(),
        ));
        let drafts = Arc::new(SavedDrafts::new(
            backend.clone(),
            store.clone(),
            events.clone(),
            config.clone(),
        ));
        let sync = Arc::new(SyncEngine::new(
            threads.clone(),
            folders.clone(),
            drafts.clone(),
            events.clone(),
            config.clone(),
        ));

        Self {
            search: Arc::new(SearchEngine::new(backend.clone(), config.clone())),
            bulk: BulkActionExecutor::new(threads.clone()),
            owner,
            backend,
            store,
            events,
            config,
            pool,
            uploader: None,
            folders,
            threads,
            drafts,
            sync,
        }
    }

    /// Build with the draft store named in the config, in memory when unset
    pub fn open(backend: Arc<dyn MessageBackend>, owner: impl Into<UserId>, config: EngineConfig) -> Result<Self> {
        let pool = match &config.draft_db_path {
            Some(path) => {
                info!("Opening draft store at {:?}", path);
                create_pool(path)?
            }
            None => create_memory_pool()?,
        };
        Ok(Self::new(backend, owner, config, pool))
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.search = Arc::new(SearchEngine::new(self.backend.clone(), self.config.clone()).with_scorer(scorer));
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn AttachmentUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    pub fn store(&self) -> &Arc<ThreadStore> {
        &self.store
    }

    pub fn sync_engine(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    pub fn subscribe(&self) -> flume::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn authorize(&self, session: &SessionContext) -> Result<()> {
        if session.user_id() != &self.owner {
            warn!("Session for {} refused by mailbox of {}", session.user_id(), self.owner);
            return Err(InboxError::Unauthorized(format!(
                "{} cannot access this mailbox",
                session.user_id()
            )));
        }
        Ok(())
    }

    // ========== Folders ==========

    pub async fn list_folders(&self, session: &SessionContext) -> Result<Vec<Folder>> {
        self.authorize(session)?;
        self.folders.list_folders(session).await
    }

    pub fn select_folder(
        &self,
        session: &SessionContext,
        kind: FolderKind,
        folder_id: Option<&str>,
    ) -> Result<FolderRef> {
        self.authorize(session)?;
        self.folders.select_folder(session, kind, folder_id)
    }

    pub async fn create_folder(&self, session: &SessionContext, name: &str) -> Result<CustomFolder> {
        self.authorize(session)?;
        self.folders.create_folder(session, name).await
    }

    pub async fn rename_folder(&self, session: &SessionContext, folder_id: &FolderId, name: &str) -> Result<()> {
        self.authorize(session)?;
        self.folders.rename_folder(session, folder_id, name).await
    }

    pub async fn delete_folder(&self, session: &SessionContext, folder_id: &FolderId) -> Result<()> {
        self.authorize(session)?;
        self.folders.delete_folder(session, folder_id).await
    }

    pub async fn file_thread(
        &self,
        session: &SessionContext,
        thread_id: &ThreadId,
        folder_id: Option<FolderId>,
    ) -> Result<Thread> {
        self.authorize(session)?;
        self.threads.file_thread(session, thread_id, folder_id).await
    }

    // ========== Threads & messages ==========

    pub async fn list_threads(
        &self,
        session: &SessionContext,
        folder: &FolderRef,
        filters: &ThreadFilters,
        page: u32,
        page_size: Option<u32>,
    ) -> Result<Paged<Thread>> {
        self.authorize(session)?;
        self.threads
            .list_threads(session, folder, filters, page, page_size)
            .await
    }

    pub fn view_threads(
        &self,
        folder: &FolderRef,
        filters: &ThreadFilters,
        page: u32,
        page_size: Option<u32>,
    ) -> Paged<Thread> {
        self.threads.view_threads(folder, filters, page, page_size)
    }

    pub async fn get_thread_messages(
        &self,
        session: &SessionContext,
        thread_id: &ThreadId,
        page: u32,
        page_size: Option<u32>,
    ) -> Result<Paged<Message>> {
        self.authorize(session)?;
        self.threads
            .get_thread_messages(session, thread_id, page, page_size)
            .await
    }

    pub async fn mark_thread_read(&self, session: &SessionContext, thread_id: &ThreadId) -> Result<Thread> {
        self.authorize(session)?;
        self.threads.mark_thread_read(session, thread_id).await
    }

    pub async fn toggle_archive(&self, session: &SessionContext, thread_id: &ThreadId, archived: bool) -> Result<Thread> {
        self.authorize(session)?;
        self.threads.toggle_archive(session, thread_id, archived).await
    }

    pub async fn toggle_star(&self, session: &SessionContext, message_id: &MessageId, starred: bool) -> Result<Thread> {
        self.authorize(session)?;
        self.threads.toggle_star(session, message_id, starred).await
    }

    pub async fn toggle_pin(&self, session: &SessionContext, thread_id: &ThreadId, pinned: bool) -> Result<Thread> {
        self.authorize(session)?;
        self.threads.toggle_pin(session, thread_id, pinned).await
    }

    /// Trash whole threads, or remove them for good with `permanent`
    pub async fn delete_messages(
        &self,
        session: &SessionContext,
        thread_ids: &[ThreadId],
        permanent: bool,
    ) -> Result<Vec<ThreadId>> {
        self.authorize(session)?;
        self.threads.delete_threads(session, thread_ids, permanent).await
    }

    pub async fn reply_to_message(&self, session: &SessionContext, thread_id: &ThreadId, content: &str) -> Result<Message> {
        self.authorize(session)?;
        self.threads.reply_to_message(session, thread_id, content).await
    }

    /// Send a complete message without going through a composer
    pub async fn send_message(&self, session: &SessionContext, draft: &DraftData) -> Result<Message> {
        self.authorize(session)?;
        draft.validate_for_send()?;

        let sent = with_timeout(
            self.config.remote_timeout(),
            "send_message",
            self.backend.send_message(session.user_id(), draft),
        )
        .await?;
        info!("Sent message {} in thread {}", sent.message.id, sent.message.thread_id);

        self.store.record_sent(&sent);
        self.events.emit(SyncEvent::MessageSent {
            message_id: sent.message.id.clone(),
            thread_id: sent.message.thread_id.clone(),
        });
        Ok(sent.message)
    }

    // ========== Drafts ==========

    /// A composer for `session_key`; call `restore` to pick up its last draft
    pub fn draft_manager(&self, session: &SessionContext, session_key: &str) -> Result<DraftManager> {
        self.authorize(session)?;
        let manager = DraftManager::new(
            session.clone(),
            session_key,
            self.backend.clone(),
            self.store.clone(),
            self.events.clone(),
            self.pool.clone(),
            self.config.clone(),
        );
        Ok(match &self.uploader {
            Some(uploader) => manager.with_uploader(uploader.clone()),
            None => manager,
        })
    }

    pub async fn list_drafts(&self, session: &SessionContext) -> Result<Vec<SavedDraft>> {
        self.authorize(session)?;
        self.drafts.list_drafts(session).await
    }

    pub async fn save_draft(
        &self,
        session: &SessionContext,
        draft_id: Option<&DraftId>,
        draft: &DraftData,
    ) -> Result<DraftId> {
        self.authorize(session)?;
        self.drafts.save_draft(session, draft_id, draft).await
    }

    pub async fn delete_draft(&self, session: &SessionContext, draft_id: &DraftId) -> Result<()> {
        self.authorize(session)?;
        self.drafts.delete_draft(session, draft_id).await
    }

    // ========== Bulk, search, stats ==========

    pub async fn apply_bulk_action(
        &self,
        session: &SessionContext,
        action: BulkAction,
        thread_ids: &[ThreadId],
    ) -> Result<BulkOutcome> {
        self.authorize(session)?;
        self.bulk.apply_bulk_action(session, action, thread_ids).await
    }

    pub async fn search(&self, session: &SessionContext, query: &SearchQuery) -> Result<SearchState> {
        self.authorize(session)?;
        self.search.search(session, query).await
    }

    /// Search-as-you-type for one session
    pub fn search_debouncer(&self, session: &SessionContext) -> Result<(SearchDebouncer, flume::Receiver<SearchEvent>)> {
        self.authorize(session)?;
        Ok(SearchDebouncer::new(self.search.clone(), session.clone()))
    }

    pub async fn get_stats(&self, session: &SessionContext, period: StatsPeriod) -> Result<InboxStats> {
        self.authorize(session)?;
        with_timeout(
            self.config.remote_timeout(),
            "get_stats",
            self.backend.get_stats(session.user_id(), period),
        )
        .await
    }
}
