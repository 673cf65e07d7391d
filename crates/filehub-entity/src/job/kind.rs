//! Job type tags used by producers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Job types enqueued by the rest of FileHub.
///
/// The queue stores the tag as a plain string, so tags outside this list are
/// still valid records; they simply fail as unhandled unless a handler is
/// registered for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Render preview thumbnails for a file.
    Thumbnail,
    /// Remove temporary and orphaned data.
    Cleanup,
    /// Deliver a user notification.
    Notification,
    /// Update the search index for a file.
    FileIndex,
    /// Recompute a user's storage quota usage.
    QuotaCheck,
    /// Prune old file versions.
    VersionCleanup,
    /// Pull mail from a connected mailbox.
    EmailSync,
}

impl JobKind {
    /// Every known job kind.
    pub const ALL: [JobKind; 7] = [
        Self::Thumbnail,
        Self::Cleanup,
        Self::Notification,
        Self::FileIndex,
        Self::QuotaCheck,
        Self::VersionCleanup,
        Self::EmailSync,
    ];

    /// The wire/storage tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thumbnail => "thumbnail",
            Self::Cleanup => "cleanup",
            Self::Notification => "notification",
            Self::FileIndex => "file_index",
            Self::QuotaCheck => "quota_check",
            Self::VersionCleanup => "version_cleanup",
            Self::EmailSync => "email_sync",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown job kind '{s}'"))
    }
}
