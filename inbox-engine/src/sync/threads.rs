//! Thread & message operations
//!
//! Reads fetch from the remote and merge into the [`ThreadStore`]; writes
//! go through the [`Reconciler`] so the user sees them immediately and
//! they are undone if the remote refuses.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backend::{with_timeout, MessageBackend};
use crate::config::EngineConfig;
use crate::state::{ContextGuard, SessionContext};
use crate::sync::events::{EventBus, SyncEvent};
use crate::sync::reconcile::{Mutation, Reconciler};
use crate::sync::store::ThreadStore;
use crate::types::error::{FailedEntity, InboxError, Result};
use crate::types::{
    sort_threads, FolderId, FolderRef, Message, MessageId, Paged, Thread, ThreadFilters, ThreadId,
};

/// Await `call` unless the context it was issued for goes away first
pub(crate) async fn unless_left<T>(
    guard: &mut ContextGuard,
    call: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    let result = tokio::select! {
        result = call => Some(result),
        _ = guard.left() => None,
    };
    match result {
        Some(result) if guard.is_current() => result,
        _ => {
            debug!("Context changed, abandoning fetch");
            Err(InboxError::Cancelled("context changed before the fetch completed".into()))
        }
    }
}

pub struct ThreadService {
    backend: Arc<dyn MessageBackend>,
    store: Arc<ThreadStore>,
    reconciler: Arc<Reconciler>,
    events: EventBus,
    config: EngineConfig,
}

impl ThreadService {
    pub fn new(
        backend: Arc<dyn MessageBackend>,
        reconciler: Arc<Reconciler>,
        events: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            backend,
            store: reconciler.store().clone(),
            reconciler,
            events,
            config,
        }
    }

    pub fn store(&self) -> &Arc<ThreadStore> {
        &self.store
    }

    // ========== Queries ==========

    /// One page of a folder, fresh from the remote with local changes on top
    ///
    /// Abandoned with `Cancelled` if the session switches folder while the
    /// request is in flight; the stale page is never merged.
    pub async fn list_threads(
        &self,
        session: &SessionContext,
        folder: &FolderRef,
        filters: &ThreadFilters,
        page: u32,
        page_size: Option<u32>,
    ) -> Result<Paged<Thread>> {
        let page_size = self.config.page_size(page_size);
        let mut guard = session.folder_context();

        let remote = unless_left(
            &mut guard,
            with_timeout(
                self.config.remote_timeout(),
                "list_threads",
                self.backend
                    .list_threads(session.user_id(), folder, filters, page, page_size),
            ),
        )
        .await?;

        let pagination = remote.pagination;
        let ids: Vec<ThreadId> = remote.data.iter().map(|t| t.id.clone()).collect();
        let updated = self.store.merge_threads(remote.data);
        if !updated.is_empty() {
            self.events.emit(SyncEvent::ThreadsUpdated { thread_ids: updated });
        }

        // Overlay: tentative state wins, and may move a thread out of view
        let mut data: Vec<Thread> = ids
            .iter()
            .filter_map(|id| self.store.thread(id))
            .filter(|t| folder.contains(t) && filters.matches(t))
            .collect();
        sort_threads(&mut data);
        Ok(Paged { data, pagination })
    }

    /// Page over the local store only; never calls the remote
    pub fn view_threads(
        &self,
        folder: &FolderRef,
        filters: &ThreadFilters,
        page: u32,
        page_size: Option<u32>,
    ) -> Paged<Thread> {
        self.store
            .view(folder, filters, page, self.config.page_size(page_size))
    }

    /// Messages of a thread, oldest first
    pub async fn get_thread_messages(
        &self,
        session: &SessionContext,
        thread_id: &ThreadId,
        page: u32,
        page_size: Option<u32>,
    ) -> Result<Paged<Message>> {
        let page_size = self.config.page_size(page_size);
        let mut guard = session.thread_context();

        let remote = unless_left(
            &mut guard,
            with_timeout(
                self.config.remote_timeout(),
                "get_thread_messages",
                self.backend
                    .get_thread_messages(session.user_id(), thread_id, page, page_size),
            ),
        )
        .await?;

        let visible = remote.data.iter().all(|m| {
            m.sender.id == *session.user_id() || m.recipient.id == *session.user_id()
        });
        if !visible {
            return Err(InboxError::Unauthorized(format!(
                "thread {} is not addressed to {}",
                thread_id,
                session.user_id()
            )));
        }

        self.store.merge_messages(thread_id, remote.data.clone());
        Ok(remote.map(|message| self.store.message(&message.id).unwrap_or(message)))
    }

    // ========== Commands ==========

    fn confirmed(thread_id: &str, thread: Option<Thread>) -> Result<Thread> {
        thread.ok_or_else(|| InboxError::NotFound(format!("thread {}", thread_id)))
    }

    /// Idempotent: a thread with nothing unread makes no remote call
    pub async fn mark_thread_read(&self, session: &SessionContext, thread_id: &ThreadId) -> Result<Thread> {
        let thread = self
            .reconciler
            .run(thread_id, Mutation::MarkRead, || {
                self.backend.mark_thread_read(session.user_id(), thread_id)
            })
            .await?;
        Self::confirmed(thread_id, thread)
    }

    pub async fn toggle_archive(
        &self,
        session: &SessionContext,
        thread_id: &ThreadId,
        archived: bool,
    ) -> Result<Thread> {
        let thread = self
            .reconciler
            .run(thread_id, Mutation::SetArchived(archived), || {
                self.backend.set_archived(session.user_id(), thread_id, archived)
            })
            .await?;
        Self::confirmed(thread_id, thread)
    }

    pub async fn toggle_pin(&self, session: &SessionContext, thread_id: &ThreadId, pinned: bool) -> Result<Thread> {
        let thread = self
            .reconciler
            .run(thread_id, Mutation::SetPinned(pinned), || {
                self.backend.set_pinned(session.user_id(), thread_id, pinned)
            })
            .await?;
        Self::confirmed(thread_id, thread)
    }

    /// Star or unstar one message; its thread must have been loaded
    pub async fn toggle_star(
        &self,
        session: &SessionContext,
        message_id: &MessageId,
        starred: bool,
    ) -> Result<Thread> {
        let thread_id = self
            .store
            .message(message_id)
            .map(|m| m.thread_id)
            .ok_or_else(|| InboxError::NotFound(format!("message {}", message_id)))?;

        let mutation = Mutation::SetStarred {
            message_id: message_id.clone(),
            starred,
        };
        let thread = self
            .reconciler
            .run(&thread_id, mutation, || {
                self.backend.set_starred(session.user_id(), message_id, starred)
            })
            .await?;
        Self::confirmed(&thread_id, thread)
    }

    /// File into a custom folder, or take it out with `None`
    pub async fn file_thread(
        &self,
        session: &SessionContext,
        thread_id: &ThreadId,
        folder_id: Option<FolderId>,
    ) -> Result<Thread> {
        let target = folder_id.clone();
        let thread = self
            .reconciler
            .run(thread_id, Mutation::FileInto(folder_id), || {
                self.backend
                    .file_thread(session.user_id(), thread_id, target.as_ref())
            })
            .await?;
        Self::confirmed(thread_id, thread)
    }

    /// Move to Trash, or remove for good when `permanent`
    ///
    /// Returns the thread's new state, `None` once permanently removed. A
    /// removed thread that was open in the session is closed.
    pub async fn delete_thread(
        &self,
        session: &SessionContext,
        thread_id: &ThreadId,
        permanent: bool,
    ) -> Result<Option<Thread>> {
        let ids = [thread_id.clone()];
        let mutation = if permanent {
            Mutation::Purge
        } else {
            Mutation::MoveToTrash
        };
        let thread = self
            .reconciler
            .run(thread_id, mutation, || {
                self.backend.delete_threads(session.user_id(), &ids, permanent)
            })
            .await?;
        if thread.is_none() && session.active_thread().as_ref() == Some(thread_id) {
            session.close_thread();
        }
        Ok(thread)
    }

    /// Delete several threads, each confirmed or rolled back on its own
    ///
    /// Repeated ids are dispatched once.
    pub async fn delete_threads(
        &self,
        session: &SessionContext,
        thread_ids: &[ThreadId],
        permanent: bool,
    ) -> Result<Vec<ThreadId>> {
        if thread_ids.is_empty() {
            return Err(InboxError::ValidationFailed("no threads to delete".into()));
        }

        let mut seen = HashSet::new();
        let unique: Vec<&ThreadId> = thread_ids.iter().filter(|id| seen.insert(id.as_str())).collect();

        let results = join_all(
            unique
                .iter()
                .map(|id| self.delete_thread(session, id, permanent)),
        )
        .await;

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (id, result) in unique.into_iter().zip(results) {
            match result {
                Ok(_) => succeeded.push(id.clone()),
                Err(error) => failed.push(FailedEntity {
                    id: id.clone(),
                    error,
                }),
            }
        }

        if failed.is_empty() {
            Ok(succeeded)
        } else {
            Err(InboxError::PartialFailure { succeeded, failed })
        }
    }

    /// Reply inside an existing thread
    pub async fn reply_to_message(
        &self,
        session: &SessionContext,
        thread_id: &ThreadId,
        content: &str,
    ) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(InboxError::ValidationFailed("missing content".into()));
        }
        if self.store.thread(thread_id).is_none() {
            return Err(InboxError::NotFound(format!("thread {}", thread_id)));
        }

        let _guard = self.reconciler.lock_thread(thread_id).await;
        let sent = with_timeout(
            self.config.remote_timeout(),
            "reply_to_message",
            self.backend
                .reply_to_message(session.user_id(), thread_id, content),
        )
        .await
        .map_err(|e| e.for_entity(thread_id))?;

        info!("Replied in thread {} with message {}", thread_id, sent.message.id);
        self.store.record_sent(&sent);
        self.events.emit(SyncEvent::MessageSent {
            message_id: sent.message.id.clone(),
            thread_id: thread_id.clone(),
        });
        Ok(sent.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::test_support::{incoming, seeded_backend, session};
    use crate::types::{CustomFolder, SystemFolder};
    use std::time::Duration;

    fn service(backend: Arc<InMemoryBackend>) -> ThreadService {
        let config = EngineConfig::default();
        let events = EventBus::new();
        let store = Arc::new(ThreadStore::new(backend.owner().id.clone()));
        let reconciler = Arc::new(Reconciler::new(store, events.clone(), config.remote_timeout()));
        ThreadService::new(backend, reconciler, events, config)
    }

    async fn loaded(backend: &Arc<InMemoryBackend>) -> (ThreadService, SessionContext) {
        let service = service(backend.clone());
        let session = session();
        service
            .list_threads(&session, &FolderRef::default(), &ThreadFilters::default(), 1, None)
            .await
            .unwrap();
        (service, session)
    }

    #[tokio::test]
    async fn test_list_orders_pinned_first() {
        let backend = seeded_backend();
        backend.update_thread("t2", |t| t.is_pinned = true);
        let (service, session) = loaded(&backend).await;

        let page = service
            .list_threads(&session, &FolderRef::default(), &ThreadFilters::default(), 1, Some(3))
            .await
            .unwrap();
        let ids: Vec<&str> = page.data.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t5", "t4"]);
        assert_eq!(page.pagination.total_pages, 2);
        assert!(page.pagination.has_next);
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let backend = seeded_backend();
        let (service, session) = loaded(&backend).await;
        let id = "t1".to_string();

        let thread = service.mark_thread_read(&session, &id).await.unwrap();
        assert_eq!(thread.unread_count, 0);
        let again = service.mark_thread_read(&session, &id).await.unwrap();
        assert_eq!(again, thread);
        assert_eq!(backend.calls("mark_thread_read"), 1);
    }

    #[tokio::test]
    async fn test_failed_archive_rolls_back() {
        let backend = seeded_backend();
        let (service, session) = loaded(&backend).await;
        backend.fail_entity("t3");

        let err = service
            .toggle_archive(&session, &"t3".to_string(), true)
            .await
            .unwrap_err();
        assert_eq!(err.entity_id(), Some("t3"));
        assert!(!service.store.thread("t3").unwrap().is_archived);

        let view = service.view_threads(&FolderRef::default(), &ThreadFilters::default(), 1, None);
        assert_eq!(view.pagination.total, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_folder_switch_cancels_listing() {
        let backend = seeded_backend();
        backend.set_latency(Duration::from_secs(1));
        let service = service(backend.clone());
        let session = session();

        let switcher = session.clone();
        let switch = async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            switcher.set_active_folder(FolderRef::System(SystemFolder::Archived));
        };
        let inbox = FolderRef::default();
        let filters = ThreadFilters::default();
        let list = service.list_threads(&session, &inbox, &filters, 1, None);
        let (result, _) = tokio::join!(list, switch);

        assert!(matches!(result.unwrap_err(), InboxError::Cancelled(_)));
        assert!(service.store.snapshot().threads.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pin_during_listing_comes_first() {
        let backend = seeded_backend();
        let (service, session) = loaded(&backend).await;
        backend.set_latency(Duration::from_secs(1));

        let inbox = FolderRef::default();
        let filters = ThreadFilters::default();
        let id = "t1".to_string();
        let pin = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            service.toggle_pin(&session, &id, true).await
        };
        let list = service.list_threads(&session, &inbox, &filters, 1, None);
        let (page, pinned) = tokio::join!(list, pin);

        assert!(pinned.unwrap().is_pinned);
        let page = page.unwrap();
        let ids: Vec<&str> = page.data.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t5", "t4", "t3", "t2"]);
        assert!(page.data[0].is_pinned);
    }

    #[tokio::test]
    async fn test_messages_oldest_first_and_star() {
        let backend = seeded_backend();
        backend.insert_message(incoming("m1b", "t1", "ann", "Topic 1", 30));
        let (service, session) = loaded(&backend).await;
        let id = "t1".to_string();

        let page = service.get_thread_messages(&session, &id, 1, None).await.unwrap();
        let ids: Vec<&str> = page.data.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m1b"]);

        let thread = service.toggle_star(&session, &"m1b".to_string(), true).await.unwrap();
        assert_eq!(thread.starred_count, 1);
        assert!(backend.thread("t1").unwrap().is_starred());

        let starred = service.view_threads(
            &FolderRef::System(SystemFolder::Starred),
            &ThreadFilters::default(),
            1,
            None,
        );
        assert_eq!(starred.data.len(), 1);

        let err = service.toggle_star(&session, &"unknown".to_string(), true).await.unwrap_err();
        assert!(matches!(err, InboxError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_then_purge_from_trash() {
        let backend = seeded_backend();
        let (service, session) = loaded(&backend).await;
        let id = "t4".to_string();

        let trashed = service.delete_thread(&session, &id, false).await.unwrap().unwrap();
        assert!(trashed.is_deleted);
        assert!(backend.thread("t4").unwrap().is_deleted);

        assert_eq!(service.delete_thread(&session, &id, true).await.unwrap(), None);
        assert!(service.store.thread("t4").is_none());
        assert!(backend.thread("t4").is_none());
    }

    #[tokio::test]
    async fn test_delete_many_reports_partial_failure() {
        let backend = seeded_backend();
        let (service, session) = loaded(&backend).await;
        backend.fail_entity("t2");
        let ids: Vec<ThreadId> = vec!["t1".into(), "t2".into()];

        match service.delete_threads(&session, &ids, false).await {
            Err(InboxError::PartialFailure { succeeded, failed }) => {
                assert_eq!(succeeded, vec!["t1".to_string()]);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].id, "t2");
            }
            other => panic!("Expected partial failure, got {:?}", other),
        }
        assert!(service.store.thread("t1").unwrap().is_deleted);
        assert!(!service.store.thread("t2").unwrap().is_deleted);
    }

    #[tokio::test]
    async fn test_delete_many_dispatches_repeated_ids_once() {
        let backend = seeded_backend();
        let (service, session) = loaded(&backend).await;
        let ids: Vec<ThreadId> = vec!["t1".into(), "t2".into(), "t1".into()];

        let deleted = service.delete_threads(&session, &ids, true).await.unwrap();
        assert_eq!(deleted, vec!["t1".to_string(), "t2".to_string()]);
        assert_eq!(backend.calls("delete_threads"), 2);
        assert!(service.store.thread("t1").is_none());
        assert!(backend.thread("t1").is_none());
    }

    #[tokio::test]
    async fn test_purging_the_open_thread_closes_it() {
        let backend = seeded_backend();
        let (service, session) = loaded(&backend).await;

        session.open_thread("t1");
        service.delete_thread(&session, &"t4".to_string(), true).await.unwrap();
        assert_eq!(session.active_thread().as_deref(), Some("t1"));

        service.delete_thread(&session, &"t1".to_string(), false).await.unwrap();
        assert_eq!(session.active_thread().as_deref(), Some("t1"));

        service.delete_thread(&session, &"t1".to_string(), true).await.unwrap();
        assert_eq!(session.active_thread(), None);
    }

    #[tokio::test]
    async fn test_reply_appends_to_thread() {
        let backend = seeded_backend();
        let (service, session) = loaded(&backend).await;
        let id = "t5".to_string();

        assert!(matches!(
            service.reply_to_message(&session, &id, "   ").await,
            Err(InboxError::ValidationFailed(_))
        ));

        let message = service.reply_to_message(&session, &id, "Thanks!").await.unwrap();
        assert_eq!(message.thread_id, "t5");
        let thread = service.store.thread("t5").unwrap();
        assert_eq!(thread.message_count, 2);
        assert!(thread.has_outgoing());
        assert_eq!(thread.last_message.id, message.id);
    }

    #[tokio::test]
    async fn test_file_into_custom_folder() {
        let backend = seeded_backend();
        backend.insert_folder(CustomFolder { id: "f1".into(), name: "Work".into() });
        let (service, session) = loaded(&backend).await;
        service.store.set_custom_folders(vec![CustomFolder { id: "f1".into(), name: "Work".into() }]);
        let id = "t1".to_string();

        let thread = service.file_thread(&session, &id, Some("f1".into())).await.unwrap();
        assert_eq!(thread.custom_folder.as_deref(), Some("f1"));
        let err = service.file_thread(&session, &id, Some("nope".into())).await.unwrap_err();
        assert!(matches!(err, InboxError::NotFound(_)));

        let filed = service.view_threads(&FolderRef::Custom("f1".into()), &ThreadFilters::default(), 1, None);
        assert_eq!(filed.data.len(), 1);
    }
}
