//! Local thread & message store
//!
//! The single in-memory copy of everything the user currently sees. All
//! writes happen under one lock and replace whole threads, so a reader
//! (folder counters, listings) never observes a half-applied mutation.
//!
//! Threads with unconfirmed mutations are marked pending. Remote refreshes
//! leave pending threads alone until their mutations settle.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

use crate::backend::SentMessage;
use crate::sync::reconcile::{Confirmation, Mutation, Tentative, Undo};
use crate::types::error::{InboxError, Result};
use crate::types::{
    sort_threads, CustomFolder, DraftId, FolderId, FolderRef, Message, MessageStatus, Paged,
    SavedDraft, Thread, ThreadFilters, ThreadId, UserId,
};

#[derive(Debug, Clone)]
struct StoredThread {
    thread: Thread,
    /// Unconfirmed mutations in flight
    pending: u32,
    /// Purged locally, waiting for the remote to confirm
    hidden: bool,
}

#[derive(Debug, Default)]
struct StoreState {
    threads: HashMap<ThreadId, StoredThread>,
    messages: HashMap<ThreadId, Vec<Message>>,
    /// `None` until the remote folder list has been fetched once
    custom_folders: Option<Vec<CustomFolder>>,
    drafts: Vec<SavedDraft>,
}

/// Result of applying a mutation locally
#[derive(Debug)]
pub enum Applied {
    /// Nothing to change; carries the current state
    Unchanged(Thread),
    Pending(Tentative),
}

/// Consistent point-in-time view used for counter derivation
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub threads: Vec<Thread>,
    pub custom_folders: Option<Vec<CustomFolder>>,
    pub draft_count: usize,
}

pub struct ThreadStore {
    user_id: UserId,
    state: RwLock<StoreState>,
}

impl ThreadStore {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            state: RwLock::new(StoreState::default()),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_participant(&self, thread: &Thread) -> bool {
        thread.participants.iter().any(|p| p.id == self.user_id)
    }

    // ========== Reads ==========

    pub fn thread(&self, thread_id: &str) -> Option<Thread> {
        self.read()
            .threads
            .get(thread_id)
            .filter(|stored| !stored.hidden)
            .map(|stored| stored.thread.clone())
    }

    pub fn message(&self, message_id: &str) -> Option<Message> {
        self.read()
            .messages
            .values()
            .flat_map(|messages| messages.iter())
            .find(|m| m.id == message_id)
            .cloned()
    }

    /// Loaded messages of a thread, oldest first
    pub fn messages(&self, thread_id: &str) -> Vec<Message> {
        self.read().messages.get(thread_id).cloned().unwrap_or_default()
    }

    pub fn pending(&self, thread_id: &str) -> u32 {
        self.read().threads.get(thread_id).map_or(0, |s| s.pending)
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.read();
        StoreSnapshot {
            threads: state
                .threads
                .values()
                .filter(|s| !s.hidden)
                .map(|s| s.thread.clone())
                .collect(),
            custom_folders: state.custom_folders.clone(),
            draft_count: state.drafts.len(),
        }
    }

    /// One page of the folder as currently held locally
    pub fn view(&self, folder: &FolderRef, filters: &ThreadFilters, page: u32, page_size: u32) -> Paged<Thread> {
        let mut threads: Vec<Thread> = self
            .read()
            .threads
            .values()
            .filter(|s| !s.hidden && folder.contains(&s.thread) && filters.matches(&s.thread))
            .map(|s| s.thread.clone())
            .collect();
        sort_threads(&mut threads);
        Paged::from_items(threads, page, page_size)
    }

    // ========== Remote merges ==========

    /// Replace local threads with remote state
    ///
    /// Threads the user is not part of are dropped. Threads with pending
    /// mutations keep their tentative state. Returns the ids that changed.
    pub fn merge_threads(&self, threads: Vec<Thread>) -> Vec<ThreadId> {
        let mut state = self.write();
        let mut updated = Vec::new();

        for thread in threads {
            if !self.is_participant(&thread) {
                debug!("Ignoring thread {} without the user as participant", thread.id);
                continue;
            }
            let thread = thread.normalized();
            if thread.participants.len() < 2 {
                debug!("Ignoring thread {} with fewer than two participants", thread.id);
                continue;
            }
            match state.threads.get_mut(&thread.id) {
                Some(stored) if stored.pending > 0 => {
                    trace!("Thread {} has pending mutations, keeping local state", thread.id);
                }
                Some(stored) => {
                    if stored.thread != thread {
                        updated.push(thread.id.clone());
                        stored.thread = thread;
                    }
                }
                None => {
                    updated.push(thread.id.clone());
                    state.threads.insert(
                        thread.id.clone(),
                        StoredThread {
                            thread,
                            pending: 0,
                            hidden: false,
                        },
                    );
                }
            }
        }
        updated
    }

    /// Replace or add messages of one thread; false when the thread is busy
    pub fn merge_messages(&self, thread_id: &str, messages: Vec<Message>) -> bool {
        let mut state = self.write();
        if state.threads.get(thread_id).is_some_and(|s| s.pending > 0) {
            trace!("Thread {} has pending mutations, skipping message merge", thread_id);
            return false;
        }

        let stored = state.messages.entry(thread_id.to_string()).or_default();
        for message in messages.into_iter().filter(|m| m.thread_id == thread_id) {
            match stored.iter_mut().find(|m| m.id == message.id) {
                Some(existing) => *existing = message,
                None => stored.push(message),
            }
        }
        stored.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        true
    }

    /// Add a message the remote accepted from this user
    pub fn record_sent(&self, sent: &SentMessage) {
        let mut state = self.write();
        let thread_id = sent.message.thread_id.clone();

        match state.threads.get_mut(&thread_id) {
            Some(stored) if stored.pending > 0 => {
                stored.thread.record_message(&sent.message, &self.user_id);
            }
            Some(stored) => stored.thread = sent.thread.clone().normalized(),
            None => {
                state.threads.insert(
                    thread_id.clone(),
                    StoredThread {
                        thread: sent.thread.clone().normalized(),
                        pending: 0,
                        hidden: false,
                    },
                );
            }
        }

        let messages = state.messages.entry(thread_id).or_default();
        if !messages.iter().any(|m| m.id == sent.message.id) {
            messages.push(sent.message.clone());
        }
    }

    // ========== Folders & drafts ==========

    pub fn custom_folders(&self) -> Option<Vec<CustomFolder>> {
        self.read().custom_folders.clone()
    }

    pub fn set_custom_folders(&self, folders: Vec<CustomFolder>) {
        self.write().custom_folders = Some(folders);
    }

    pub fn upsert_custom_folder(&self, folder: CustomFolder) {
        let mut state = self.write();
        let folders = state.custom_folders.get_or_insert_with(Vec::new);
        match folders.iter_mut().find(|f| f.id == folder.id) {
            Some(existing) => *existing = folder,
            None => folders.push(folder),
        }
    }

    /// Forget a custom folder and unfile its threads
    pub fn remove_custom_folder(&self, folder_id: &FolderId) {
        let mut state = self.write();
        if let Some(folders) = state.custom_folders.as_mut() {
            folders.retain(|f| &f.id != folder_id);
        }
        for stored in state.threads.values_mut() {
            if stored.thread.custom_folder.as_ref() == Some(folder_id) {
                stored.thread.custom_folder = None;
            }
        }
    }

    pub fn drafts(&self) -> Vec<SavedDraft> {
        self.read().drafts.clone()
    }

    pub fn set_drafts(&self, drafts: Vec<SavedDraft>) {
        self.write().drafts = drafts;
    }

    pub fn upsert_draft(&self, draft: SavedDraft) {
        let mut state = self.write();
        match state.drafts.iter_mut().find(|d| d.id == draft.id) {
            Some(existing) => *existing = draft,
            None => state.drafts.push(draft),
        }
    }

    pub fn remove_draft(&self, draft_id: &DraftId) {
        self.write().drafts.retain(|d| &d.id != draft_id);
    }

    // ========== Two-phase mutations ==========

    /// Apply a mutation locally and mark the thread pending
    pub fn apply(&self, thread_id: &str, mutation: Mutation) -> Result<Applied> {
        let mut guard = self.write();
        let state = &mut *guard;

        let stored = state
            .threads
            .get_mut(thread_id)
            .filter(|s| !s.hidden)
            .ok_or_else(|| InboxError::NotFound(format!("thread {}", thread_id)))?;
        if !stored.thread.participants.iter().any(|p| p.id == self.user_id) {
            return Err(InboxError::Unauthorized(format!(
                "{} is not a participant of thread {}",
                self.user_id, thread_id
            )));
        }
        let thread = &mut stored.thread;

        let undo = match &mutation {
            Mutation::MarkRead => {
                if thread.unread_count == 0 {
                    return Ok(Applied::Unchanged(thread.clone()));
                }
                let mut statuses = Vec::new();
                if let Some(messages) = state.messages.get_mut(thread_id) {
                    for message in messages
                        .iter_mut()
                        .filter(|m| !m.is_from(&self.user_id) && !m.is_read())
                    {
                        statuses.push((message.id.clone(), message.status));
                        message.status = MessageStatus::Read;
                    }
                }
                let undo = Undo::Read {
                    unread_count: thread.unread_count,
                    statuses,
                };
                thread.unread_count = 0;
                undo
            }
            Mutation::SetArchived(archived) => {
                if thread.is_archived == *archived && !(*archived && thread.is_deleted) {
                    return Ok(Applied::Unchanged(thread.clone()));
                }
                let undo = Undo::Location {
                    is_archived: thread.is_archived,
                    is_deleted: thread.is_deleted,
                };
                thread.is_archived = *archived;
                if *archived {
                    thread.is_deleted = false;
                }
                undo
            }
            Mutation::MoveToTrash => {
                if thread.is_deleted {
                    return Ok(Applied::Unchanged(thread.clone()));
                }
                let undo = Undo::Location {
                    is_archived: thread.is_archived,
                    is_deleted: thread.is_deleted,
                };
                thread.is_deleted = true;
                thread.is_archived = false;
                undo
            }
            Mutation::SetPinned(pinned) => {
                if thread.is_pinned == *pinned {
                    return Ok(Applied::Unchanged(thread.clone()));
                }
                let undo = Undo::Pinned(thread.is_pinned);
                thread.is_pinned = *pinned;
                undo
            }
            Mutation::SetStarred { message_id, starred } => {
                let message = state
                    .messages
                    .get_mut(thread_id)
                    .and_then(|messages| messages.iter_mut().find(|m| &m.id == message_id))
                    .ok_or_else(|| InboxError::NotFound(format!("message {}", message_id)))?;
                if message.is_starred == *starred {
                    return Ok(Applied::Unchanged(thread.clone()));
                }
                let undo = Undo::Starred {
                    message_id: message_id.clone(),
                    was_starred: message.is_starred,
                    starred_count: thread.starred_count,
                };
                message.is_starred = *starred;
                thread.starred_count = if *starred {
                    (thread.starred_count + 1).min(thread.message_count)
                } else {
                    thread.starred_count.saturating_sub(1)
                };
                undo
            }
            Mutation::FileInto(folder_id) => {
                if let (Some(id), Some(known)) = (folder_id, state.custom_folders.as_ref()) {
                    if !known.iter().any(|f| &f.id == id) {
                        return Err(InboxError::NotFound(format!("folder {}", id)));
                    }
                }
                if &thread.custom_folder == folder_id {
                    return Ok(Applied::Unchanged(thread.clone()));
                }
                let undo = Undo::Folder(thread.custom_folder.clone());
                thread.custom_folder = folder_id.clone();
                undo
            }
            Mutation::Purge => {
                stored.hidden = true;
                Undo::Hidden
            }
        };

        stored.pending += 1;
        debug!("Applied {} to thread {} (pending {})", mutation.name(), thread_id, stored.pending);

        Ok(Applied::Pending(Tentative {
            thread_id: thread_id.to_string(),
            thread: stored.thread.clone(),
            mutation,
            undo,
        }))
    }

    /// Settle a tentative mutation with the remote outcome
    pub fn confirm(&self, tentative: Tentative, outcome: Result<()>) -> Confirmation {
        let mut guard = self.write();
        let state = &mut *guard;
        let Tentative {
            thread_id,
            mutation,
            undo,
            ..
        } = tentative;

        if let Some(stored) = state.threads.get_mut(&thread_id) {
            stored.pending = stored.pending.saturating_sub(1);
        }

        match outcome {
            Ok(()) => {
                if mutation == Mutation::Purge {
                    state.threads.remove(&thread_id);
                    state.messages.remove(&thread_id);
                    return Confirmation::Committed(None);
                }
                Confirmation::Committed(state.threads.get(&thread_id).map(|s| s.thread.clone()))
            }
            Err(error) => {
                let Some(stored) = state.threads.get_mut(&thread_id) else {
                    return Confirmation::RolledBack {
                        error: error.for_entity(&thread_id),
                        thread_id,
                        restored: None,
                    };
                };
                let thread = &mut stored.thread;

                match undo {
                    Undo::Read { unread_count, statuses } => {
                        thread.unread_count = unread_count.min(thread.message_count);
                        if let Some(messages) = state.messages.get_mut(&thread_id) {
                            for (id, status) in statuses {
                                if let Some(message) = messages.iter_mut().find(|m| m.id == id) {
                                    message.status = status;
                                }
                            }
                        }
                    }
                    Undo::Location { is_archived, is_deleted } => {
                        thread.is_archived = is_archived;
                        thread.is_deleted = is_deleted;
                    }
                    Undo::Pinned(pinned) => thread.is_pinned = pinned,
                    Undo::Starred {
                        message_id,
                        was_starred,
                        starred_count,
                    } => {
                        thread.starred_count = starred_count.min(thread.message_count);
                        if let Some(message) = state
                            .messages
                            .get_mut(&thread_id)
                            .and_then(|messages| messages.iter_mut().find(|m| m.id == message_id))
                        {
                            message.is_starred = was_starred;
                        }
                    }
                    Undo::Folder(folder) => thread.custom_folder = folder,
                    Undo::Hidden => stored.hidden = false,
                }

                Confirmation::RolledBack {
                    error: error.for_entity(&thread_id),
                    restored: Some(stored.thread.clone()),
                    thread_id,
                }
            }
        }
    }
}
