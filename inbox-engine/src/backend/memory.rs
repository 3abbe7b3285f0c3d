//! In-memory message backend
//!
//! A complete [`MessageBackend`] held in process memory, seen from the
//! perspective of a single owner. Used by the demo binary and as the remote
//! double in tests: it can be taken offline, made slow, or told to reject
//! writes for specific entities, and it counts every call it receives.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::backend::{MessageBackend, SentMessage};
use crate::search::ranking::{HeuristicScorer, RelevanceScorer};
use crate::search::highlight::find_literal;
use crate::types::error::{InboxError, Result};
use crate::types::{
    sort_threads, CustomFolder, DraftData, DraftId, FolderId, FolderRef, InboxStats, Message,
    MessageId, MessageStatus, Paged, Participant, SavedDraft, SearchFilters, SearchHit,
    StatsPeriod, SystemFolder, Thread, ThreadFilters, ThreadId, UserId,
};

#[derive(Default)]
struct MemoryState {
    threads: HashMap<ThreadId, Thread>,
    messages: HashMap<ThreadId, Vec<Message>>,
    folders: Vec<CustomFolder>,
    drafts: HashMap<DraftId, SavedDraft>,
    directory: HashMap<UserId, Participant>,
    score_overrides: HashMap<MessageId, Option<f32>>,
}

#[derive(Default)]
struct FaultState {
    offline: bool,
    latency: Duration,
    failing_entities: HashSet<String>,
    endless_pages: bool,
    calls: HashMap<&'static str, usize>,
}

pub struct InMemoryBackend {
    owner: Participant,
    state: Mutex<MemoryState>,
    faults: Mutex<FaultState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryBackend {
    pub fn new(owner: Participant) -> Self {
        let mut state = MemoryState::default();
        state.directory.insert(owner.id.clone(), owner.clone());
        Self {
            owner,
            state: Mutex::new(state),
            faults: Mutex::new(FaultState::default()),
        }
    }

    pub fn owner(&self) -> &Participant {
        &self.owner
    }

    // ========== Seeding ==========

    /// Register a user so recipients resolve to display names
    pub fn add_contact(&self, participant: Participant) {
        lock(&self.state)
            .directory
            .insert(participant.id.clone(), participant);
    }

    /// Store a message, creating its thread on first sight
    pub fn insert_message(&self, message: Message) -> Thread {
        let mut state = lock(&self.state);
        Self::store_message(&mut state, &self.owner.id, message)
    }

    pub fn insert_folder(&self, folder: CustomFolder) {
        lock(&self.state).folders.push(folder);
    }

    /// Force the score reported for a message; `None` reports no score
    pub fn set_score(&self, message_id: &str, score: Option<f32>) {
        lock(&self.state)
            .score_overrides
            .insert(message_id.to_string(), score);
    }

    /// Overwrite thread flags directly, bypassing call accounting
    pub fn update_thread(&self, thread_id: &str, update: impl FnOnce(&mut Thread)) {
        if let Some(thread) = lock(&self.state).threads.get_mut(thread_id) {
            update(thread);
        }
    }

    pub fn thread(&self, thread_id: &str) -> Option<Thread> {
        lock(&self.state).threads.get(thread_id).cloned()
    }

    pub fn drafts(&self) -> Vec<SavedDraft> {
        lock(&self.state).drafts.values().cloned().collect()
    }

    // ========== Fault injection ==========

    pub fn set_offline(&self, offline: bool) {
        lock(&self.faults).offline = offline;
    }

    /// Delay applied to every call before it is answered
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.faults).latency = latency;
    }

    /// Reject every write that targets this thread, message, draft or folder id
    pub fn fail_entity(&self, id: &str) {
        lock(&self.faults).failing_entities.insert(id.to_string());
    }

    /// Report another page after every page of thread messages
    pub fn set_endless_pages(&self, endless: bool) {
        lock(&self.faults).endless_pages = endless;
    }

    pub fn calls(&self, operation: &str) -> usize {
        lock(&self.faults).calls.get(operation).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.faults).calls.values().sum()
    }

    pub fn reset_calls(&self) {
        lock(&self.faults).calls.clear();
    }

    // ========== Internals ==========

    async fn begin(&self, operation: &'static str, user: &UserId, entity: Option<&str>) -> Result<()> {
        let latency = {
            let mut faults = lock(&self.faults);
            *faults.calls.entry(operation).or_insert(0) += 1;
            faults.latency
        };
        debug!("backend call {} (entity: {:?})", operation, entity);

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let faults = lock(&self.faults);
        if faults.offline {
            return Err(InboxError::remote(format!("{}: backend offline", operation)));
        }
        if let Some(id) = entity {
            if faults.failing_entities.contains(id) {
                return Err(InboxError::remote(format!("{}: rejected for {}", operation, id)));
            }
        }
        drop(faults);

        if user != &self.owner.id {
            return Err(InboxError::Unauthorized(format!(
                "{} cannot act on this mailbox",
                user
            )));
        }
        Ok(())
    }

    fn store_message(state: &mut MemoryState, owner_id: &str, message: Message) -> Thread {
        let thread = match state.threads.get_mut(&message.thread_id) {
            Some(thread) => {
                thread.record_message(&message, owner_id);
                thread.clone()
            }
            None => {
                let thread = Thread::from_first_message(&message, owner_id);
                state.threads.insert(thread.id.clone(), thread.clone());
                thread
            }
        };
        let messages = state.messages.entry(message.thread_id.clone()).or_default();
        messages.push(message);
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        thread
    }

    fn thread_mut<'a>(state: &'a mut MemoryState, thread_id: &str) -> Result<&'a mut Thread> {
        state
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| InboxError::NotFound(format!("thread {}", thread_id)))
    }

    fn resolve(state: &MemoryState, user_id: &str) -> Participant {
        state
            .directory
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| Participant::new(user_id, user_id))
    }

    /// Existing live thread between exactly the owner and this recipient
    fn find_direct_thread(state: &MemoryState, owner_id: &str, recipient_id: &str) -> Option<ThreadId> {
        state
            .threads
            .values()
            .filter(|t| t.participants.len() == 2)
            .filter(|t| t.participants.iter().any(|p| p.id == owner_id))
            .filter(|t| t.participants.iter().any(|p| p.id == recipient_id))
            .max_by_key(|t| t.updated_at)
            .map(|t| t.id.clone())
    }

    fn outgoing_message(&self, thread_id: ThreadId, recipient: Participant, draft: &DraftData) -> Message {
        Message {
            id: Uuid::new_v4().to_string(),
            thread_id,
            sender: self.owner.clone(),
            recipient,
            subject: draft.subject.clone(),
            content: draft.content.clone(),
            message_type: draft.message_type,
            priority: draft.priority,
            status: MessageStatus::Sent,
            is_starred: false,
            attachments: draft.attachments.clone(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl MessageBackend for InMemoryBackend {
    async fn list_custom_folders(&self, user: &UserId) -> Result<Vec<CustomFolder>> {
        self.begin("list_custom_folders", user, None).await?;
        Ok(lock(&self.state).folders.clone())
    }

    async fn create_folder(&self, user: &UserId, name: &str) -> Result<CustomFolder> {
        self.begin("create_folder", user, None).await?;
        let folder = CustomFolder {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
        };
        lock(&self.state).folders.push(folder.clone());
        Ok(folder)
    }

    async fn rename_folder(&self, user: &UserId, folder_id: &FolderId, name: &str) -> Result<()> {
        self.begin("rename_folder", user, Some(folder_id.as_str())).await?;
        let mut state = lock(&self.state);
        let folder = state
            .folders
            .iter_mut()
            .find(|f| &f.id == folder_id)
            .ok_or_else(|| InboxError::NotFound(format!("folder {}", folder_id)))?;
        folder.name = name.to_string();
        Ok(())
    }

    async fn delete_folder(&self, user: &UserId, folder_id: &FolderId) -> Result<()> {
        self.begin("delete_folder", user, Some(folder_id.as_str())).await?;
        let mut state = lock(&self.state);
        let before = state.folders.len();
        state.folders.retain(|f| &f.id != folder_id);
        if state.folders.len() == before {
            return Err(InboxError::NotFound(format!("folder {}", folder_id)));
        }
        for thread in state.threads.values_mut() {
            if thread.custom_folder.as_ref() == Some(folder_id) {
                thread.custom_folder = None;
            }
        }
        Ok(())
    }

    async fn list_threads(
        &self,
        user: &UserId,
        folder: &FolderRef,
        filters: &ThreadFilters,
        page: u32,
        page_size: u32,
    ) -> Result<Paged<Thread>> {
        self.begin("list_threads", user, None).await?;
        let state = lock(&self.state);
        let mut threads: Vec<Thread> = state
            .threads
            .values()
            .filter(|t| folder.contains(t) && filters.matches(t))
            .cloned()
            .collect();
        sort_threads(&mut threads);
        Ok(Paged::from_items(threads, page, page_size))
    }

    async fn get_thread_messages(
        &self,
        user: &UserId,
        thread_id: &ThreadId,
        page: u32,
        page_size: u32,
    ) -> Result<Paged<Message>> {
        self.begin("get_thread_messages", user, None).await?;
        let endless = lock(&self.faults).endless_pages;
        let state = lock(&self.state);
        let messages = state
            .messages
            .get(thread_id)
            .ok_or_else(|| InboxError::NotFound(format!("thread {}", thread_id)))?;
        let mut paged = Paged::from_items(messages.clone(), page, page_size);
        if endless {
            paged.pagination.has_next = true;
        }
        Ok(paged)
    }

    async fn mark_thread_read(&self, user: &UserId, thread_id: &ThreadId) -> Result<()> {
        self.begin("mark_thread_read", user, Some(thread_id.as_str())).await?;
        let mut state = lock(&self.state);
        Self::thread_mut(&mut state, thread_id)?.unread_count = 0;
        if let Some(messages) = state.messages.get_mut(thread_id) {
            for message in messages.iter_mut().filter(|m| m.sender.id != self.owner.id) {
                message.status = MessageStatus::Read;
            }
        }
        Ok(())
    }

    async fn set_archived(&self, user: &UserId, thread_id: &ThreadId, archived: bool) -> Result<()> {
        self.begin("set_archived", user, Some(thread_id.as_str())).await?;
        let mut state = lock(&self.state);
        let thread = Self::thread_mut(&mut state, thread_id)?;
        thread.is_archived = archived;
        if archived {
            thread.is_deleted = false;
        }
        Ok(())
    }

    async fn set_pinned(&self, user: &UserId, thread_id: &ThreadId, pinned: bool) -> Result<()> {
        self.begin("set_pinned", user, Some(thread_id.as_str())).await?;
        let mut state = lock(&self.state);
        Self::thread_mut(&mut state, thread_id)?.is_pinned = pinned;
        Ok(())
    }

    async fn set_starred(&self, user: &UserId, message_id: &MessageId, starred: bool) -> Result<()> {
        self.begin("set_starred", user, Some(message_id.as_str())).await?;
        let mut state = lock(&self.state);
        let message = state
            .messages
            .values_mut()
            .flat_map(|m| m.iter_mut())
            .find(|m| &m.id == message_id)
            .ok_or_else(|| InboxError::NotFound(format!("message {}", message_id)))?;
        if message.is_starred == starred {
            return Ok(());
        }
        message.is_starred = starred;
        let thread_id = message.thread_id.clone();
        let thread = Self::thread_mut(&mut state, &thread_id)?;
        if starred {
            thread.starred_count += 1;
        } else {
            thread.starred_count = thread.starred_count.saturating_sub(1);
        }
        Ok(())
    }

    async fn file_thread(
        &self,
        user: &UserId,
        thread_id: &ThreadId,
        folder_id: Option<&FolderId>,
    ) -> Result<()> {
        self.begin("file_thread", user, Some(thread_id.as_str())).await?;
        let mut state = lock(&self.state);
        if let Some(folder_id) = folder_id {
            if !state.folders.iter().any(|f| &f.id == folder_id) {
                return Err(InboxError::NotFound(format!("folder {}", folder_id)));
            }
        }
        Self::thread_mut(&mut state, thread_id)?.custom_folder = folder_id.cloned();
        Ok(())
    }

    async fn delete_threads(
        &self,
        user: &UserId,
        thread_ids: &[ThreadId],
        permanent: bool,
    ) -> Result<()> {
        let entity = thread_ids.first().map(|s| s.as_str());
        self.begin("delete_threads", user, entity).await?;
        let mut state = lock(&self.state);
        for thread_id in thread_ids {
            if !state.threads.contains_key(thread_id) {
                return Err(InboxError::NotFound(format!("thread {}", thread_id)));
            }
        }
        for thread_id in thread_ids {
            if permanent {
                state.threads.remove(thread_id);
                state.messages.remove(thread_id);
            } else if let Some(thread) = state.threads.get_mut(thread_id) {
                thread.is_deleted = true;
                thread.is_archived = false;
            }
        }
        Ok(())
    }

    async fn reply_to_message(
        &self,
        user: &UserId,
        thread_id: &ThreadId,
        content: &str,
    ) -> Result<SentMessage> {
        self.begin("reply_to_message", user, Some(thread_id.as_str())).await?;
        let mut state = lock(&self.state);
        let thread = state
            .threads
            .get(thread_id)
            .ok_or_else(|| InboxError::NotFound(format!("thread {}", thread_id)))?;
        let recipient = thread
            .other_participant(&self.owner.id)
            .cloned()
            .ok_or_else(|| InboxError::ValidationFailed(format!("thread {} has no other participant", thread_id)))?;
        let draft = DraftData {
            subject: thread.subject.clone(),
            content: content.to_string(),
            message_type: thread.message_type,
            ..Default::default()
        };
        let message = self.outgoing_message(thread_id.clone(), recipient, &draft);
        let thread = Self::store_message(&mut state, &self.owner.id, message.clone());
        Ok(SentMessage { message, thread })
    }

    async fn send_message(&self, user: &UserId, draft: &DraftData) -> Result<SentMessage> {
        self.begin("send_message", user, draft.thread_id.as_deref()).await?;
        draft.validate_for_send()?;
        let mut state = lock(&self.state);
        let recipient_id = draft
            .recipient_ids
            .iter()
            .find(|r| !r.trim().is_empty())
            .ok_or_else(|| InboxError::ValidationFailed("missing recipients".into()))?;
        let recipient = Self::resolve(&state, recipient_id);

        let thread_id = match &draft.thread_id {
            Some(id) if state.threads.contains_key(id) => id.clone(),
            Some(id) => return Err(InboxError::NotFound(format!("thread {}", id))),
            None => Self::find_direct_thread(&state, &self.owner.id, recipient_id)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        };

        let message = self.outgoing_message(thread_id, recipient, draft);
        let thread = Self::store_message(&mut state, &self.owner.id, message.clone());
        Ok(SentMessage { message, thread })
    }

    async fn save_draft(
        &self,
        user: &UserId,
        draft_id: Option<&DraftId>,
        draft: &DraftData,
    ) -> Result<DraftId> {
        self.begin("save_draft", user, draft_id.map(|s| s.as_str())).await?;
        let mut state = lock(&self.state);
        let id = match draft_id {
            Some(id) if state.drafts.contains_key(id) => id.clone(),
            Some(id) => return Err(InboxError::NotFound(format!("draft {}", id))),
            None => Uuid::new_v4().to_string(),
        };
        state.drafts.insert(
            id.clone(),
            SavedDraft {
                id: id.clone(),
                data: draft.clone(),
                updated_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn delete_draft(&self, user: &UserId, draft_id: &DraftId) -> Result<()> {
        self.begin("delete_draft", user, Some(draft_id.as_str())).await?;
        lock(&self.state)
            .drafts
            .remove(draft_id)
            .map(|_| ())
            .ok_or_else(|| InboxError::NotFound(format!("draft {}", draft_id)))
    }

    async fn list_drafts(&self, user: &UserId) -> Result<Vec<SavedDraft>> {
        self.begin("list_drafts", user, None).await?;
        let mut drafts: Vec<SavedDraft> = lock(&self.state).drafts.values().cloned().collect();
        drafts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(drafts)
    }

    async fn search(
        &self,
        user: &UserId,
        query: &str,
        filters: &SearchFilters,
        page: u32,
        page_size: u32,
    ) -> Result<Paged<SearchHit>> {
        self.begin("search", user, None).await?;
        let state = lock(&self.state);
        let scorer = HeuristicScorer::default();
        let mut hits: Vec<SearchHit> = Vec::new();

        for (thread_id, messages) in &state.messages {
            let Some(thread) = state.threads.get(thread_id) else {
                continue;
            };
            for message in messages.iter().filter(|m| filters.matches(m)) {
                let matched = find_literal(&message.subject, query).is_some()
                    || find_literal(&message.content, query).is_some()
                    || find_literal(&message.sender.display_name, query).is_some();
                if !matched {
                    continue;
                }
                let relevance_score = match state.score_overrides.get(&message.id) {
                    Some(score) => *score,
                    None => Some(scorer.score(query, message)),
                };
                hits.push(SearchHit {
                    message: message.clone(),
                    thread: thread.summary(),
                    relevance_score,
                });
            }
        }

        hits.sort_by(|a, b| {
            b.relevance_score
                .unwrap_or(0.0)
                .total_cmp(&a.relevance_score.unwrap_or(0.0))
                .then_with(|| b.message.created_at.cmp(&a.message.created_at))
        });
        Ok(Paged::from_items(hits, page, page_size))
    }

    async fn get_stats(&self, user: &UserId, period: StatsPeriod) -> Result<InboxStats> {
        self.begin("get_stats", user, None).await?;
        let state = lock(&self.state);
        let since = period.since(Utc::now());
        let in_period = |m: &&Message| since.map_or(true, |s| m.created_at >= s);

        let mut stats = InboxStats {
            period,
            total_threads: 0,
            unread_threads: 0,
            unread_messages: 0,
            starred_threads: 0,
            messages_sent: 0,
            messages_received: 0,
        };

        for thread in state.threads.values() {
            if !FolderRef::System(SystemFolder::Trash).contains(thread)
                && since.map_or(true, |s| thread.updated_at >= s)
            {
                stats.total_threads += 1;
                if !thread.is_read() {
                    stats.unread_threads += 1;
                    stats.unread_messages += thread.unread_count;
                }
                if thread.is_starred() {
                    stats.starred_threads += 1;
                }
            }
        }

        for message in state.messages.values().flat_map(|m| m.iter()).filter(in_period) {
            if message.is_from(&self.owner.id) {
                stats.messages_sent += 1;
            } else {
                stats.messages_received += 1;
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessageType, Priority};

    fn incoming(id: &str, thread_id: &str, from: &str, subject: &str) -> Message {
        Message {
            id: id.into(),
            thread_id: thread_id.into(),
            sender: Participant::new(from, format!("User {}", from)),
            recipient: Participant::new("me", "Me"),
            subject: subject.into(),
            content: format!("{} body", subject),
            message_type: MessageType::Direct,
            priority: Priority::Normal,
            status: MessageStatus::Delivered,
            is_starred: false,
            attachments: vec![],
            created_at: Utc::now(),
        }
    }

    fn backend() -> InMemoryBackend {
        InMemoryBackend::new(Participant::new("me", "Me"))
    }

    #[tokio::test]
    async fn test_calls_are_counted_and_faults_injected() {
        let backend = backend();
        backend.insert_message(incoming("m1", "t1", "ann", "Hello"));
        let me = "me".to_string();

        backend.mark_thread_read(&me, &"t1".to_string()).await.unwrap();
        assert_eq!(backend.calls("mark_thread_read"), 1);
        assert_eq!(backend.thread("t1").unwrap().unread_count, 0);

        backend.fail_entity("t1");
        let err = backend.set_archived(&me, &"t1".to_string(), true).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!backend.thread("t1").unwrap().is_archived);

        backend.set_offline(true);
        assert!(backend.list_custom_folders(&me).await.is_err());
        assert_eq!(backend.total_calls(), 3);
    }

    #[tokio::test]
    async fn test_other_users_are_unauthorized() {
        let backend = backend();
        let err = backend
            .list_custom_folders(&"mallory".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, InboxError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_send_reuses_direct_thread() {
        let backend = backend();
        backend.add_contact(Participant::new("ann", "Ann"));
        backend.insert_message(incoming("m1", "t1", "ann", "Hello"));
        let draft = DraftData {
            recipient_ids: vec!["ann".into()],
            subject: "Re: Hello".into(),
            content: "Hi Ann".into(),
            ..Default::default()
        };

        let sent = backend.send_message(&"me".to_string(), &draft).await.unwrap();
        assert_eq!(sent.message.thread_id, "t1");
        assert_eq!(sent.thread.message_count, 2);
        assert_eq!(sent.thread.outgoing_count, 1);
        assert_eq!(sent.message.recipient.display_name, "Ann");
    }
}
