//! Session context
//!
//! Holds what the presentation layer would otherwise keep as ambient UI
//! state: who is acting, which folder and thread are open, the current
//! thread selection and the composer status. It is passed explicitly to
//! every engine operation.
//!
//! Switching folder or thread bumps a generation counter published on a
//! `watch` channel. In-flight fetches hold a [`ContextGuard`] and abandon
//! their result once the generation they started under is gone.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tracing::debug;

use crate::sync::drafts::ComposeState;
use crate::types::{FolderRef, ThreadId, UserId};

/// Resolved identity supplied by the auth collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ViewState {
    active_folder: FolderRef,
    active_thread: Option<ThreadId>,
    selection: BTreeSet<ThreadId>,
    compose: ComposeState,
}

struct SessionInner {
    identity: Identity,
    view: RwLock<ViewState>,
    folder_generation: watch::Sender<u64>,
    thread_generation: watch::Sender<u64>,
}

/// Cheap-to-clone handle on one user's session
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("identity", &self.inner.identity)
            .field("view", &*self.view())
            .finish()
    }
}

impl SessionContext {
    pub fn new(identity: Identity) -> Self {
        let (folder_generation, _) = watch::channel(0);
        let (thread_generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(SessionInner {
                identity,
                view: RwLock::new(ViewState::default()),
                folder_generation,
                thread_generation,
            }),
        }
    }

    fn view(&self) -> RwLockReadGuard<'_, ViewState> {
        self.inner
            .view
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn view_mut(&self) -> RwLockWriteGuard<'_, ViewState> {
        self.inner
            .view
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn user_id(&self) -> &UserId {
        &self.inner.identity.user_id
    }

    // ========== Folder context ==========

    pub fn active_folder(&self) -> FolderRef {
        self.view().active_folder.clone()
    }

    /// Switch folders; cancels fetches started for the previous one
    pub fn set_active_folder(&self, folder: FolderRef) {
        let changed = {
            let mut view = self.view_mut();
            let changed = view.active_folder != folder;
            view.active_folder = folder;
            if changed {
                view.active_thread = None;
                view.selection.clear();
            }
            changed
        };
        if changed {
            self.inner.folder_generation.send_modify(|g| *g += 1);
            self.inner.thread_generation.send_modify(|g| *g += 1);
            debug!("Active folder changed to {}", self.active_folder().id());
        }
    }

    pub fn folder_context(&self) -> ContextGuard {
        ContextGuard::new(self.inner.folder_generation.subscribe())
    }

    // ========== Thread context ==========

    pub fn active_thread(&self) -> Option<ThreadId> {
        self.view().active_thread.clone()
    }

    pub fn open_thread(&self, thread_id: &str) {
        let changed = {
            let mut view = self.view_mut();
            let changed = view.active_thread.as_deref() != Some(thread_id);
            view.active_thread = Some(thread_id.to_string());
            changed
        };
        if changed {
            self.inner.thread_generation.send_modify(|g| *g += 1);
        }
    }

    pub fn close_thread(&self) {
        let changed = self.view_mut().active_thread.take().is_some();
        if changed {
            self.inner.thread_generation.send_modify(|g| *g += 1);
        }
    }

    pub fn thread_context(&self) -> ContextGuard {
        ContextGuard::new(self.inner.thread_generation.subscribe())
    }

    // ========== Selection ==========

    pub fn selection(&self) -> Vec<ThreadId> {
        self.view().selection.iter().cloned().collect()
    }

    pub fn select(&self, thread_id: &str) {
        self.view_mut().selection.insert(thread_id.to_string());
    }

    pub fn deselect(&self, thread_id: &str) {
        self.view_mut().selection.remove(thread_id);
    }

    pub fn set_selection<I: IntoIterator<Item = ThreadId>>(&self, thread_ids: I) {
        self.view_mut().selection = thread_ids.into_iter().collect();
    }

    // ========== Composer ==========

    pub fn compose_state(&self) -> ComposeState {
        self.view().compose
    }

    pub fn set_compose_state(&self, state: ComposeState) {
        self.view_mut().compose = state;
    }
}

/// Watches one context generation for the lifetime of a fetch
pub struct ContextGuard {
    rx: watch::Receiver<u64>,
    generation: u64,
}

impl ContextGuard {
    fn new(rx: watch::Receiver<u64>) -> Self {
        let generation = *rx.borrow();
        Self { rx, generation }
    }

    pub fn is_current(&self) -> bool {
        *self.rx.borrow() == self.generation
    }

    /// Resolves once the user has left the context this guard was taken in
    pub async fn left(&mut self) {
        loop {
            if !self.is_current() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Session dropped; the context can no longer change
                futures::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SystemFolder;
    use std::time::Duration;

    fn session() -> SessionContext {
        SessionContext::new(Identity::new("me", "Me"))
    }

    #[test]
    fn test_folder_switch_resets_view() {
        let session = session();
        session.open_thread("t1");
        session.select("t1");
        let guard = session.folder_context();

        session.set_active_folder(FolderRef::System(SystemFolder::Archived));
        assert!(!guard.is_current());
        assert_eq!(session.active_thread(), None);
        assert!(session.selection().is_empty());

        let guard = session.folder_context();
        session.set_active_folder(FolderRef::System(SystemFolder::Archived));
        assert!(guard.is_current());
    }

    #[tokio::test(start_paused = true)]
    async fn test_left_resolves_on_thread_switch() {
        let session = session();
        session.open_thread("t1");
        let mut guard = session.thread_context();

        let switcher = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            switcher.open_thread("t2");
        });

        tokio::time::timeout(Duration::from_secs(1), guard.left())
            .await
            .expect("guard should resolve after the switch");
        assert!(!guard.is_current());
    }
}
