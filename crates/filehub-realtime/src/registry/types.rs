//! Subscription index keys and fan-out reports.

use std::fmt;

use filehub_core::types::FolderId;

/// Key of the folder subscription index.
///
/// A command or broadcast without a folder id addresses `Root`, which is a
/// key of its own rather than a wildcard over all folders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FolderKey {
    /// The root folder sentinel.
    Root,
    /// A concrete folder.
    Folder(FolderId),
}

impl From<Option<FolderId>> for FolderKey {
    fn from(folder_id: Option<FolderId>) -> Self {
        folder_id.map_or(FolderKey::Root, FolderKey::Folder)
    }
}

impl fmt::Display for FolderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FolderKey::Root => f.write_str("root"),
            FolderKey::Folder(id) => write!(f, "folder:{id}"),
        }
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Messages placed in an outbound buffer.
    pub delivered: usize,
    /// Messages dropped because a buffer was full or already closed.
    pub dropped: usize,
}

impl Delivery {
    /// Number of connections the fan-out targeted.
    pub fn recipients(&self) -> usize {
        self.delivered + self.dropped
    }
}
