//! Folder taxonomy
//!
//! System folders are fixed; custom folders come from the remote. Every
//! counter is derived from a store snapshot and never stored.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::backend::{with_timeout, MessageBackend};
use crate::state::SessionContext;
use crate::sync::events::{EventBus, SyncEvent};
use crate::sync::store::{StoreSnapshot, ThreadStore};
use crate::types::error::{InboxError, Result};
use crate::types::{
    CustomFolder, Folder, FolderCounters, FolderId, FolderKind, FolderRef, SystemFolder,
};

/// Counters for one folder over a consistent snapshot
pub fn derive_counters(folder: &FolderRef, snapshot: &StoreSnapshot) -> FolderCounters {
    if let FolderRef::System(SystemFolder::Drafts) = folder {
        return FolderCounters {
            message_count: u32::try_from(snapshot.draft_count).unwrap_or(u32::MAX),
            unread_count: 0,
        };
    }

    snapshot
        .threads
        .iter()
        .filter(|thread| folder.contains(thread))
        .fold(FolderCounters::default(), |mut counters, thread| {
            counters.message_count = counters.message_count.saturating_add(thread.message_count);
            counters.unread_count = counters.unread_count.saturating_add(thread.unread_count);
            counters
        })
}

fn sort_custom(folders: &mut [CustomFolder]) {
    folders.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn refuse_system(folder_id: &str) -> Result<()> {
    match SystemFolder::from_id(folder_id) {
        Some(folder) => Err(InboxError::ValidationFailed(format!(
            "{} is a system folder",
            folder.name()
        ))),
        None => Ok(()),
    }
}

fn valid_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(InboxError::ValidationFailed("folder name is empty".into()));
    }
    Ok(name.to_string())
}

pub struct FolderTaxonomy {
    backend: Arc<dyn MessageBackend>,
    store: Arc<ThreadStore>,
    events: EventBus,
    timeout: Duration,
}

impl FolderTaxonomy {
    pub fn new(
        backend: Arc<dyn MessageBackend>,
        store: Arc<ThreadStore>,
        events: EventBus,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            store,
            events,
            timeout,
        }
    }

    /// System folders in fixed order, then custom folders by name
    ///
    /// When the remote folder list cannot be fetched, the last known custom
    /// folders are shown and every counter is unknown.
    pub async fn list_folders(&self, session: &SessionContext) -> Result<Vec<Folder>> {
        let fetched = with_timeout(
            self.timeout,
            "list_custom_folders",
            self.backend.list_custom_folders(session.user_id()),
        )
        .await;

        let known_counters = match fetched {
            Ok(folders) => {
                self.store.set_custom_folders(folders);
                true
            }
            Err(err @ InboxError::Unauthorized(_)) => return Err(err),
            Err(err) => {
                warn!("Custom folders unavailable, counters unknown: {}", err);
                false
            }
        };

        let snapshot = self.store.snapshot();
        let counters = |folder: &FolderRef| known_counters.then(|| derive_counters(folder, &snapshot));

        let mut listing: Vec<Folder> = SystemFolder::ALL
            .into_iter()
            .map(|system| {
                let folder_ref = FolderRef::System(system);
                Folder {
                    id: system.id().to_string(),
                    name: system.name().to_string(),
                    kind: FolderKind::System(system),
                    counters: counters(&folder_ref),
                }
            })
            .collect();

        let mut custom = snapshot.custom_folders.clone().unwrap_or_default();
        sort_custom(&mut custom);
        listing.extend(custom.into_iter().map(|folder| {
            let folder_ref = FolderRef::Custom(folder.id.clone());
            Folder {
                counters: counters(&folder_ref),
                id: folder.id,
                name: folder.name,
                kind: FolderKind::Custom,
            }
        }));

        Ok(listing)
    }

    /// Make a folder active; purely local
    pub fn select_folder(
        &self,
        session: &SessionContext,
        kind: FolderKind,
        folder_id: Option<&str>,
    ) -> Result<FolderRef> {
        let folder = match kind {
            FolderKind::System(system) => FolderRef::System(system),
            FolderKind::Custom => {
                let id = folder_id.ok_or_else(|| {
                    InboxError::ValidationFailed("custom folder selection needs an id".into())
                })?;
                let known = self
                    .store
                    .custom_folders()
                    .is_some_and(|folders| folders.iter().any(|f| f.id == id));
                if !known {
                    return Err(InboxError::NotFound(format!("folder {}", id)));
                }
                FolderRef::Custom(id.to_string())
            }
        };
        session.set_active_folder(folder.clone());
        Ok(folder)
    }

    pub async fn create_folder(&self, session: &SessionContext, name: &str) -> Result<CustomFolder> {
        let name = valid_name(name)?;
        if SystemFolder::ALL
            .iter()
            .any(|f| f.name().eq_ignore_ascii_case(&name))
        {
            return Err(InboxError::ValidationFailed(format!("{} is a system folder", name)));
        }
        let duplicate = self
            .store
            .custom_folders()
            .unwrap_or_default()
            .iter()
            .any(|f| f.name.to_lowercase() == name.to_lowercase());
        if duplicate {
            return Err(InboxError::ValidationFailed(format!("folder {} already exists", name)));
        }

        let folder = with_timeout(
            self.timeout,
            "create_folder",
            self.backend.create_folder(session.user_id(), &name),
        )
        .await?;
        info!("Created folder {} ({})", folder.name, folder.id);
        self.store.upsert_custom_folder(folder.clone());
        self.events.emit(SyncEvent::FoldersChanged);
        Ok(folder)
    }

    pub async fn rename_folder(&self, session: &SessionContext, folder_id: &FolderId, name: &str) -> Result<()> {
        refuse_system(folder_id)?;
        let name = valid_name(name)?;

        with_timeout(
            self.timeout,
            "rename_folder",
            self.backend.rename_folder(session.user_id(), folder_id, &name),
        )
        .await
        .map_err(|e| e.for_entity(folder_id))?;

        self.store.upsert_custom_folder(CustomFolder {
            id: folder_id.clone(),
            name,
        });
        self.events.emit(SyncEvent::FoldersChanged);
        Ok(())
    }

    /// Remove a custom folder; its threads stay where they are, unfiled
    pub async fn delete_folder(&self, session: &SessionContext, folder_id: &FolderId) -> Result<()> {
        refuse_system(folder_id)?;

        with_timeout(
            self.timeout,
            "delete_folder",
            self.backend.delete_folder(session.user_id(), folder_id),
        )
        .await
        .map_err(|e| e.for_entity(folder_id))?;

        info!("Deleted folder {}", folder_id);
        self.store.remove_custom_folder(folder_id);
        if session.active_folder() == FolderRef::Custom(folder_id.clone()) {
            session.set_active_folder(FolderRef::default());
        }
        self.events.emit(SyncEvent::FoldersChanged);
        Ok(())
    }
}
