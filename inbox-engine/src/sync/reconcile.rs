//! Optimistic two-phase mutations
//!
//! A mutation is first applied to the local store (`apply`), which yields a
//! [`Tentative`] describing exactly what changed. Once the remote answers,
//! the tentative is confirmed: a success keeps the new state, a failure
//! puts back only the fields that mutation touched.
//!
//! Mutations on the same thread are serialized through [`ThreadLocks`], so
//! they reach the remote in the order they were issued. Different threads
//! never wait on each other.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::backend::with_timeout;
use crate::sync::events::{EventBus, SyncEvent};
use crate::sync::store::{Applied, ThreadStore};
use crate::types::error::{InboxError, Result};
use crate::types::{FolderId, MessageId, MessageStatus, Thread, ThreadId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    MarkRead,
    SetArchived(bool),
    SetPinned(bool),
    SetStarred { message_id: MessageId, starred: bool },
    /// File into a custom folder, or unfile with `None`
    FileInto(Option<FolderId>),
    MoveToTrash,
    /// Permanent removal; hidden locally until the remote confirms
    Purge,
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::MarkRead => "mark_read",
            Mutation::SetArchived(true) => "archive",
            Mutation::SetArchived(false) => "unarchive",
            Mutation::SetPinned(true) => "pin",
            Mutation::SetPinned(false) => "unpin",
            Mutation::SetStarred { starred: true, .. } => "star",
            Mutation::SetStarred { starred: false, .. } => "unstar",
            Mutation::FileInto(_) => "file",
            Mutation::MoveToTrash => "trash",
            Mutation::Purge => "purge",
        }
    }
}

/// Prior values of the fields a mutation overwrote
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Undo {
    Read {
        unread_count: u32,
        statuses: Vec<(MessageId, MessageStatus)>,
    },
    Location {
        is_archived: bool,
        is_deleted: bool,
    },
    Pinned(bool),
    Starred {
        message_id: MessageId,
        was_starred: bool,
        starred_count: u32,
    },
    Folder(Option<FolderId>),
    Hidden,
}

/// A locally applied mutation awaiting the remote verdict
#[must_use = "a tentative mutation must be confirmed"]
#[derive(Debug)]
pub struct Tentative {
    pub(crate) thread_id: ThreadId,
    pub(crate) mutation: Mutation,
    pub(crate) undo: Undo,
    pub(crate) thread: Thread,
}

impl Tentative {
    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    /// The optimistic state as now shown to the user
    pub fn thread(&self) -> &Thread {
        &self.thread
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    /// The thread's confirmed state; `None` once permanently removed
    Committed(Option<Thread>),
    RolledBack {
        thread_id: ThreadId,
        error: InboxError,
        restored: Option<Thread>,
    },
}

impl Confirmation {
    pub fn is_committed(&self) -> bool {
        matches!(self, Confirmation::Committed(_))
    }

    pub fn into_result(self) -> Result<Option<Thread>> {
        match self {
            Confirmation::Committed(thread) => Ok(thread),
            Confirmation::RolledBack { error, .. } => Err(error),
        }
    }
}

/// Per-thread FIFO locks
#[derive(Default)]
pub struct ThreadLocks {
    locks: Mutex<HashMap<ThreadId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ThreadLocks {
    pub async fn acquire(&self, thread_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Nobody holds or waits on an entry whose only owner is the map
            locks.retain(|id, lock| id == thread_id || Arc::strong_count(lock) > 1);
            locks.entry(thread_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drives mutations through apply, remote call and confirm
pub struct Reconciler {
    store: Arc<ThreadStore>,
    events: EventBus,
    locks: ThreadLocks,
    timeout: Duration,
}

impl Reconciler {
    pub fn new(store: Arc<ThreadStore>, events: EventBus, timeout: Duration) -> Self {
        Self {
            store,
            events,
            locks: ThreadLocks::default(),
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<ThreadStore> {
        &self.store
    }

    /// Hold a thread's lock for work that is not a store mutation
    pub async fn lock_thread(&self, thread_id: &str) -> OwnedMutexGuard<()> {
        self.locks.acquire(thread_id).await
    }

    /// Apply `mutation` locally, run `remote`, then commit or roll back
    ///
    /// A mutation that would change nothing skips the remote call entirely.
    pub async fn run<F, Fut>(&self, thread_id: &ThreadId, mutation: Mutation, remote: F) -> Result<Option<Thread>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let _guard = self.locks.acquire(thread_id).await;

        let tentative = match self.store.apply(thread_id, mutation)? {
            Applied::Unchanged(thread) => {
                debug!("Mutation on {} is a no-op, skipping remote", thread_id);
                return Ok(Some(thread));
            }
            Applied::Pending(tentative) => tentative,
        };

        let name = tentative.mutation().name();
        let outcome = with_timeout(self.timeout, name, remote()).await;
        let confirmation = self.store.confirm(tentative, outcome);

        match &confirmation {
            Confirmation::Committed(_) => {
                info!("Committed {} on thread {}", name, thread_id);
                self.events.emit(SyncEvent::MutationCommitted {
                    thread_id: thread_id.clone(),
                    mutation: name.to_string(),
                });
            }
            Confirmation::RolledBack { error, .. } => {
                warn!("Rolled back {} on thread {}: {}", name, thread_id, error);
                self.events.emit(SyncEvent::MutationRolledBack {
                    thread_id: thread_id.clone(),
                    mutation: name.to_string(),
                    error: error.clone(),
                });
            }
        }

        confirmation.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{incoming, ME};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn reconciler() -> (Reconciler, flume::Receiver<SyncEvent>) {
        let store = Arc::new(ThreadStore::new(ME));
        let thread = Thread::from_first_message(&incoming("m1", "t1", "ann", "Hi", 0), ME);
        store.merge_threads(vec![thread]);
        store.merge_messages("t1", vec![incoming("m1", "t1", "ann", "Hi", 0)]);
        let events = EventBus::new();
        let rx = events.subscribe();
        (Reconciler::new(store, events, Duration::from_secs(15)), rx)
    }

    #[tokio::test]
    async fn test_commit_keeps_state_and_emits() {
        let (reconciler, rx) = reconciler();
        let thread = reconciler
            .run(&"t1".to_string(), Mutation::SetArchived(true), || async { Ok(()) })
            .await
            .unwrap()
            .unwrap();

        assert!(thread.is_archived);
        assert!(reconciler.store().thread("t1").unwrap().is_archived);
        assert_eq!(reconciler.store().pending("t1"), 0);
        assert_eq!(
            rx.try_recv().unwrap(),
            SyncEvent::MutationCommitted {
                thread_id: "t1".into(),
                mutation: "archive".into()
            }
        );
    }

    #[tokio::test]
    async fn test_failure_restores_and_tags_entity() {
        let (reconciler, rx) = reconciler();
        let err = reconciler
            .run(&"t1".to_string(), Mutation::MarkRead, || async {
                Err(InboxError::remote("offline"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.entity_id(), Some("t1"));
        let thread = reconciler.store().thread("t1").unwrap();
        assert_eq!(thread.unread_count, 1);
        assert!(!reconciler.store().message("m1").unwrap().is_read());
        assert!(matches!(
            rx.try_recv().unwrap(),
            SyncEvent::MutationRolledBack { .. }
        ));
    }

    #[tokio::test]
    async fn test_noop_skips_remote() {
        let (reconciler, _rx) = reconciler();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let remote = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        reconciler.run(&"t1".to_string(), Mutation::SetPinned(false), remote).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_thread_mutations_keep_issue_order() {
        let (reconciler, _rx) = reconciler();
        let log = Mutex::new(Vec::new());
        let order = &log;
        let id = "t1".to_string();

        let first = reconciler.run(&id, Mutation::SetArchived(true), move || async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            order.lock().unwrap().push("archive");
            Ok(())
        });
        let second = reconciler.run(&id, Mutation::SetArchived(false), move || async move {
            order.lock().unwrap().push("unarchive");
            Ok(())
        });
        let (a, b) = tokio::join!(first, second);
        a.unwrap();
        b.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["archive", "unarchive"]);
        assert!(!reconciler.store().thread("t1").unwrap().is_archived);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_timeout_rolls_back() {
        let (reconciler, _rx) = reconciler();
        let err = reconciler
            .run(&"t1".to_string(), Mutation::SetPinned(true), || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(!reconciler.store().thread("t1").unwrap().is_pinned);
    }

    #[tokio::test]
    async fn test_locks_are_pruned() {
        let locks = ThreadLocks::default();
        drop(locks.acquire("a").await);
        drop(locks.acquire("b").await);
        let _held = locks.acquire("c").await;
        assert_eq!(locks.len(), 1);
    }
}
