use serde::{Deserialize, Serialize};

use crate::types::thread::{Location, Thread};

pub type FolderId = String;

/// The fixed, per-user system folders in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemFolder {
    Inbox,
    Sent,
    Drafts,
    Starred,
    Archived,
    Trash,
}

impl SystemFolder {
    pub const ALL: [SystemFolder; 6] = [
        SystemFolder::Inbox,
        SystemFolder::Sent,
        SystemFolder::Drafts,
        SystemFolder::Starred,
        SystemFolder::Archived,
        SystemFolder::Trash,
    ];

    pub fn id(self) -> &'static str {
        match self {
            SystemFolder::Inbox => "inbox",
            SystemFolder::Sent => "sent",
            SystemFolder::Drafts => "drafts",
            SystemFolder::Starred => "starred",
            SystemFolder::Archived => "archived",
            SystemFolder::Trash => "trash",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SystemFolder::Inbox => "Inbox",
            SystemFolder::Sent => "Sent",
            SystemFolder::Drafts => "Drafts",
            SystemFolder::Starred => "Starred",
            SystemFolder::Archived => "Archived",
            SystemFolder::Trash => "Trash",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.id() == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FolderKind {
    System(SystemFolder),
    Custom,
}

/// Which folder a view or operation targets
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FolderRef {
    System(SystemFolder),
    Custom(FolderId),
}

impl Default for FolderRef {
    fn default() -> Self {
        FolderRef::System(SystemFolder::Inbox)
    }
}

impl FolderRef {
    pub fn id(&self) -> &str {
        match self {
            FolderRef::System(f) => f.id(),
            FolderRef::Custom(id) => id,
        }
    }

    pub fn is_trash(&self) -> bool {
        matches!(self, FolderRef::System(SystemFolder::Trash))
    }

    /// Thread membership predicate for this folder
    ///
    /// Drafts hold no threads; they are counted separately.
    pub fn contains(&self, thread: &Thread) -> bool {
        let location = thread.location();
        match self {
            FolderRef::System(SystemFolder::Inbox) => location == Location::Inbox,
            FolderRef::System(SystemFolder::Archived) => location == Location::Archived,
            FolderRef::System(SystemFolder::Trash) => location == Location::Trash,
            FolderRef::System(SystemFolder::Starred) => {
                thread.is_starred() && location != Location::Trash
            }
            FolderRef::System(SystemFolder::Sent) => {
                thread.has_outgoing() && location != Location::Trash
            }
            FolderRef::System(SystemFolder::Drafts) => false,
            FolderRef::Custom(id) => {
                thread.custom_folder.as_deref() == Some(id.as_str())
                    && location != Location::Trash
            }
        }
    }
}

/// Derived counters; absent when they could not be computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FolderCounters {
    pub message_count: u32,
    pub unread_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    pub kind: FolderKind,
    /// `None` means unknown, which is not the same as zero
    pub counters: Option<FolderCounters>,
}

impl Folder {
    pub fn folder_ref(&self) -> FolderRef {
        match self.kind {
            FolderKind::System(f) => FolderRef::System(f),
            FolderKind::Custom => FolderRef::Custom(self.id.clone()),
        }
    }
}

/// A user-defined folder as stored by the remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFolder {
    pub id: FolderId,
    pub name: String,
}
