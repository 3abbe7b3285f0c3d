//! Draft manager
//!
//! One composer session edits exactly one draft. Edits are local and
//! written through to the SQLite draft store so a reload can pick them up.
//! The remote copy is refreshed by a periodic autosave and by explicit
//! saves; at most one save is in flight at any time and a save requested
//! while another runs is coalesced into it.
//!
//! State machine:
//!
//! ```text
//! Empty ──start──▶ Editing ◀──▶ Saving
//!                     │
//!                     ├──send────▶ Sent
//!                     ├──discard─▶ Discarded
//!                     └──close───▶ Empty
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::adapters::sqlite::drafts::{delete_local_draft, load_local_draft, save_local_draft, LocalDraft};
use crate::adapters::sqlite::DbPool;
use crate::backend::{with_timeout, AttachmentUploader, MessageBackend};
use crate::config::EngineConfig;
use crate::services::scheduler::ScheduledTask;
use crate::state::SessionContext;
use crate::sync::events::{EventBus, SyncEvent};
use crate::sync::store::ThreadStore;
use crate::types::error::{InboxError, Result};
use crate::types::{
    Attachment, AttachmentSource, ComposePrefill, DraftData, DraftId, DraftPatch, Message, SavedDraft,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComposeState {
    #[default]
    Empty,
    Editing,
    Saving,
    Sent,
    Discarded,
}

impl ComposeState {
    pub fn is_composing(self) -> bool {
        matches!(self, ComposeState::Editing | ComposeState::Saving)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(DraftId),
    /// Another save was already in flight and covers this request
    Coalesced,
    /// No content yet; nothing is saved
    SkippedEmpty,
    /// The remote copy is already current
    Unchanged,
}

#[derive(Debug, Default)]
struct Composer {
    state: ComposeState,
    draft: Option<DraftData>,
    draft_id: Option<DraftId>,
    /// Bumped on every local edit
    revision: u64,
    /// Last revision the remote acknowledged
    saved_revision: u64,
}

impl Composer {
    fn is_dirty(&self) -> bool {
        self.revision > self.saved_revision
    }

    fn editing(&mut self) -> Result<&mut DraftData> {
        if !self.state.is_composing() {
            return Err(InboxError::ValidationFailed("no draft is open".into()));
        }
        self.draft
            .as_mut()
            .ok_or_else(|| InboxError::ValidationFailed("no draft is open".into()))
    }
}

struct DraftInner {
    session: SessionContext,
    session_key: String,
    backend: Arc<dyn MessageBackend>,
    uploader: Option<Arc<dyn AttachmentUploader>>,
    store: Arc<ThreadStore>,
    events: EventBus,
    pool: DbPool,
    config: EngineConfig,
    composer: Mutex<Composer>,
    /// Held for the duration of a remote save, send or discard
    save_lock: tokio::sync::Mutex<()>,
}

impl DraftInner {
    fn composer(&self) -> MutexGuard<'_, Composer> {
        self.composer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, composer: &mut Composer, state: ComposeState) {
        if composer.state != state {
            debug!("Composer {}: {:?} -> {:?}", self.session_key, composer.state, state);
        }
        composer.state = state;
        self.session.set_compose_state(state);
    }

    fn persist_local(&self, composer: &Composer) -> Result<()> {
        let Some(data) = composer.draft.clone() else {
            return Ok(());
        };
        save_local_draft(
            &self.pool,
            &LocalDraft {
                session_key: self.session_key.clone(),
                remote_id: composer.draft_id.clone(),
                data,
                dirty: composer.is_dirty(),
                updated_at: Utc::now(),
            },
        )
    }

    fn clear_local(&self) {
        if let Err(e) = delete_local_draft(&self.pool, &self.session_key) {
            warn!("Failed to clear local draft {}: {}", self.session_key, e);
        }
    }

    /// Save unless another save is running
    async fn save(&self, force: bool) -> Result<SaveOutcome> {
        let Ok(_in_flight) = self.save_lock.try_lock() else {
            debug!("Save for {} coalesced into the one in flight", self.session_key);
            return Ok(SaveOutcome::Coalesced);
        };
        self.save_locked(force).await
    }

    /// Save with `save_lock` already held by the caller
    async fn save_locked(&self, force: bool) -> Result<SaveOutcome> {
        let (data, draft_id, revision) = {
            let mut composer = self.composer();
            if !composer.state.is_composing() {
                return Ok(SaveOutcome::Unchanged);
            }
            let Some(draft) = composer.draft.clone() else {
                return Ok(SaveOutcome::Unchanged);
            };
            if !draft.has_content() {
                return Ok(SaveOutcome::SkippedEmpty);
            }
            if !composer.is_dirty() {
                match (&composer.draft_id, force) {
                    (Some(id), true) => return Ok(SaveOutcome::Saved(id.clone())),
                    (Some(_), false) | (None, false) => return Ok(SaveOutcome::Unchanged),
                    // Never saved remotely yet
                    (None, true) => {}
                }
            }
            let snapshot = (draft, composer.draft_id.clone(), composer.revision);
            self.set_state(&mut composer, ComposeState::Saving);
            snapshot
        };

        let result = with_timeout(
            self.config.remote_timeout(),
            "save_draft",
            self.backend
                .save_draft(self.session.user_id(), draft_id.as_ref(), &data),
        )
        .await;

        let mut composer = self.composer();
        if composer.state == ComposeState::Saving {
            self.set_state(&mut composer, ComposeState::Editing);
        }

        let id = match result {
            Ok(id) => id,
            Err(e) => {
                warn!("Saving draft for {} failed: {}", self.session_key, e);
                return Err(e);
            }
        };

        composer.draft_id = Some(id.clone());
        composer.saved_revision = composer.saved_revision.max(revision);
        if let Err(e) = self.persist_local(&composer) {
            warn!("Failed to persist draft {} locally: {}", self.session_key, e);
        }
        drop(composer);

        info!("Saved draft {} for {}", id, self.session_key);
        self.store.upsert_draft(SavedDraft {
            id: id.clone(),
            data,
            updated_at: Utc::now(),
        });
        self.events.emit(SyncEvent::DraftSaved { draft_id: id.clone() });
        Ok(SaveOutcome::Saved(id))
    }
}

/// The composer for one session
pub struct DraftManager {
    inner: Arc<DraftInner>,
    autosave: Mutex<Option<ScheduledTask>>,
}

impl DraftManager {
    pub fn new(
        session: SessionContext,
        session_key: impl Into<String>,
        backend: Arc<dyn MessageBackend>,
        store: Arc<ThreadStore>,
        events: EventBus,
        pool: DbPool,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(DraftInner {
                session,
                session_key: session_key.into(),
                backend,
                uploader: None,
                store,
                events,
                pool,
                config,
                composer: Mutex::new(Composer::default()),
                save_lock: tokio::sync::Mutex::new(()),
            }),
            autosave: Mutex::new(None),
        }
    }

    /// Attachment storage; without it `attach` is refused
    pub fn with_uploader(mut self, uploader: Arc<dyn AttachmentUploader>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.uploader = Some(uploader);
        }
        self
    }

    pub fn session_key(&self) -> &str {
        &self.inner.session_key
    }

    pub fn state(&self) -> ComposeState {
        self.inner.composer().state
    }

    pub fn draft(&self) -> Option<DraftData> {
        self.inner.composer().draft.clone()
    }

    pub fn draft_id(&self) -> Option<DraftId> {
        self.inner.composer().draft_id.clone()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.inner.composer().is_dirty()
    }

    fn start_autosave(&self) {
        let inner = self.inner.clone();
        let task = ScheduledTask::every("draft_autosave", self.inner.config.autosave_interval(), move || {
            let inner = inner.clone();
            async move {
                if let Err(e) = inner.save(false).await {
                    debug!("Autosave for {} failed, retrying next tick: {}", inner.session_key, e);
                }
            }
        });
        *self.autosave.lock().unwrap_or_else(|p| p.into_inner()) = Some(task);
    }

    fn stop_autosave(&self) {
        self.autosave.lock().unwrap_or_else(|p| p.into_inner()).take();
    }

    // ========== Lifecycle ==========

    /// Pick up the draft this session left behind, if any
    pub fn restore(&self) -> Result<Option<DraftData>> {
        let Some(local) = load_local_draft(&self.inner.pool, &self.inner.session_key)? else {
            return Ok(None);
        };

        {
            let mut composer = self.inner.composer();
            composer.draft = Some(local.data.clone());
            composer.draft_id = local.remote_id;
            composer.revision = 1;
            composer.saved_revision = if local.dirty { 0 } else { 1 };
            self.inner.set_state(&mut composer, ComposeState::Editing);
        }
        info!("Restored draft for {}", self.inner.session_key);
        self.start_autosave();
        Ok(Some(local.data))
    }

    pub fn start_compose(&self, prefill: Option<ComposePrefill>) -> Result<DraftData> {
        let prefill = prefill.unwrap_or_default();
        let mut data = prefill.data;
        data.is_draft = true;

        {
            let mut composer = self.inner.composer();
            if composer.state.is_composing() {
                return Err(InboxError::ValidationFailed("a draft is already open".into()));
            }
            // A saved draft opened for editing is already current remotely;
            // fresh prefilled content (a quoted reply) is not
            let unsaved = prefill.draft_id.is_none() && data.has_content();
            *composer = Composer {
                state: composer.state,
                draft: Some(data.clone()),
                revision: u64::from(unsaved),
                saved_revision: 0,
                draft_id: prefill.draft_id,
            };
            self.inner.set_state(&mut composer, ComposeState::Editing);
            self.inner.persist_local(&composer)?;
        }
        self.start_autosave();
        Ok(data)
    }

    /// Local edit; reaches the remote with the next save
    pub fn update_draft(&self, patch: DraftPatch) -> Result<DraftData> {
        let mut composer = self.inner.composer();
        let draft = composer.editing()?;
        draft.apply(patch);
        let updated = draft.clone();
        composer.revision += 1;
        self.inner.persist_local(&composer)?;
        Ok(updated)
    }

    pub async fn attach(&self, source: AttachmentSource) -> Result<Attachment> {
        let uploader = self
            .inner
            .uploader
            .clone()
            .ok_or_else(|| InboxError::ValidationFailed("attachments are not available".into()))?;
        self.inner.composer().editing()?;

        let attachment = with_timeout(
            self.inner.config.remote_timeout(),
            "upload_attachment",
            uploader.upload(self.inner.session.user_id(), &source),
        )
        .await?;

        let mut composer = self.inner.composer();
        composer.editing()?.attachments.push(attachment.clone());
        composer.revision += 1;
        self.inner.persist_local(&composer)?;
        debug!("Attached {} to draft {}", attachment.file_name, self.inner.session_key);
        Ok(attachment)
    }

    pub fn remove_attachment(&self, attachment_id: &str) -> Result<()> {
        let mut composer = self.inner.composer();
        let draft = composer.editing()?;
        let before = draft.attachments.len();
        draft.attachments.retain(|a| a.id != attachment_id);
        if draft.attachments.len() == before {
            return Err(InboxError::NotFound(format!("attachment {}", attachment_id)));
        }
        composer.revision += 1;
        self.inner.persist_local(&composer)
    }

    /// Periodic save; does nothing for empty or unchanged drafts
    pub async fn autosave(&self) -> Result<SaveOutcome> {
        self.inner.save(false).await
    }

    /// Save right away, even a draft the remote has never seen
    pub async fn save_draft_now(&self) -> Result<SaveOutcome> {
        self.inner.save(true).await
    }

    /// Validate and send the draft
    ///
    /// Invalid drafts never reach the remote. On failure the draft stays
    /// open and unchanged.
    pub async fn send(&self) -> Result<Message> {
        let _in_flight = self.inner.save_lock.lock().await;

        let (data, draft_id) = {
            let mut composer = self.inner.composer();
            let draft = composer.editing()?;
            draft.validate_for_send()?;
            (draft.clone(), composer.draft_id.clone())
        };

        let user_id = self.inner.session.user_id();
        let sent = with_timeout(
            self.inner.config.remote_timeout(),
            "send_message",
            self.inner.backend.send_message(user_id, &data),
        )
        .await?;
        info!("Sent message {} in thread {}", sent.message.id, sent.message.thread_id);

        self.inner.store.record_sent(&sent);
        self.inner.events.emit(SyncEvent::MessageSent {
            message_id: sent.message.id.clone(),
            thread_id: sent.message.thread_id.clone(),
        });

        if let Some(id) = draft_id {
            let deleted = with_timeout(
                self.inner.config.remote_timeout(),
                "delete_draft",
                self.inner.backend.delete_draft(user_id, &id),
            )
            .await;
            match deleted {
                Ok(()) | Err(InboxError::NotFound(_)) => {}
                Err(e) => warn!("Sent draft {} could not be deleted remotely: {}", id, e),
            }
            self.inner.store.remove_draft(&id);
            self.inner.events.emit(SyncEvent::DraftDeleted { draft_id: id });
        }

        self.stop_autosave();
        self.inner.clear_local();
        {
            let mut composer = self.inner.composer();
            composer.draft = None;
            composer.draft_id = None;
            self.inner.set_state(&mut composer, ComposeState::Sent);
        }
        Ok(sent.message)
    }

    /// Throw the draft away, including its saved remote copy
    ///
    /// If the remote copy cannot be deleted the draft stays open.
    pub async fn discard(&self) -> Result<()> {
        let _in_flight = self.inner.save_lock.lock().await;

        let draft_id = {
            let composer = self.inner.composer();
            if !composer.state.is_composing() {
                return Ok(());
            }
            composer.draft_id.clone()
        };

        if let Some(id) = draft_id {
            let deleted = with_timeout(
                self.inner.config.remote_timeout(),
                "delete_draft",
                self.inner.backend.delete_draft(self.inner.session.user_id(), &id),
            )
            .await;
            match deleted {
                Ok(()) | Err(InboxError::NotFound(_)) => {}
                Err(e) => return Err(e.for_entity(&id)),
            }
            self.inner.store.remove_draft(&id);
            self.inner.events.emit(SyncEvent::DraftDeleted { draft_id: id });
        }

        self.stop_autosave();
        self.inner.clear_local();
        let mut composer = self.inner.composer();
        composer.draft = None;
        composer.draft_id = None;
        self.inner.set_state(&mut composer, ComposeState::Discarded);
        Ok(())
    }

    /// Leave the composer, saving unsaved content first
    ///
    /// Waits for a save already in flight. If the final save fails the
    /// composer stays open with its local copy intact.
    pub async fn close(&self) -> Result<()> {
        let _in_flight = self.inner.save_lock.lock().await;

        let needs_save = {
            let composer = self.inner.composer();
            composer.state.is_composing()
                && composer.is_dirty()
                && composer.draft.as_ref().is_some_and(DraftData::has_content)
        };
        if needs_save {
            self.inner.save_locked(false).await?;
        }

        self.stop_autosave();
        self.inner.clear_local();
        let mut composer = self.inner.composer();
        *composer = Composer::default();
        self.inner.set_state(&mut composer, ComposeState::Empty);
        Ok(())
    }
}

/// Saved drafts outside any composer session
pub struct SavedDrafts {
    backend: Arc<dyn MessageBackend>,
    store: Arc<ThreadStore>,
    events: EventBus,
    config: EngineConfig,
}

impl SavedDrafts {
    pub fn new(backend: Arc<dyn MessageBackend>, store: Arc<ThreadStore>, events: EventBus, config: EngineConfig) -> Self {
        Self {
            backend,
            store,
            events,
            config,
        }
    }

    /// Newest first; refreshes the Drafts counter
    pub async fn list_drafts(&self, session: &SessionContext) -> Result<Vec<SavedDraft>> {
        let drafts = with_timeout(
            self.config.remote_timeout(),
            "list_drafts",
            self.backend.list_drafts(session.user_id()),
        )
        .await?;
        self.store.set_drafts(drafts.clone());
        Ok(drafts)
    }

    pub async fn save_draft(
        &self,
        session: &SessionContext,
        draft_id: Option<&DraftId>,
        draft: &DraftData,
    ) -> Result<DraftId> {
        if !draft.has_content() {
            return Err(InboxError::ValidationFailed("missing content".into()));
        }
        let id = with_timeout(
            self.config.remote_timeout(),
            "save_draft",
            self.backend.save_draft(session.user_id(), draft_id, draft),
        )
        .await?;
        self.store.upsert_draft(SavedDraft {
            id: id.clone(),
            data: draft.clone(),
            updated_at: Utc::now(),
        });
        self.events.emit(SyncEvent::DraftSaved { draft_id: id.clone() });
        Ok(id)
    }

    pub async fn delete_draft(&self, session: &SessionContext, draft_id: &DraftId) -> Result<()> {
        with_timeout(
            self.config.remote_timeout(),
            "delete_draft",
            self.backend.delete_draft(session.user_id(), draft_id),
        )
        .await
        .map_err(|e| e.for_entity(draft_id))?;
        self.store.remove_draft(draft_id);
        self.events.emit(SyncEvent::DraftDeleted {
            draft_id: draft_id.clone(),
        });
        Ok(())
    }
}
