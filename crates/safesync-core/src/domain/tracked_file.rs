//! Tracked files
//!
//! A [`TrackedFile`] is the persisted three-way state of one file for one
//! provider: what is known locally, the remote snapshot as of the last
//! successful sync, and the change flags computed since.
//!
//! ## Invariants
//!
//! - `remote_id == None` means the file never completed a remote round
//!   trip; it is matched by case-insensitive title before any remote
//!   operation other than a create.
//! - Snapshot fields (`remote_*`) only change after a successful operation
//!   or when a pass folds a fresh listing into the row.
//! - `version` increases on every write and guards post-operation updates.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{
    errors::DomainError,
    newtypes::{ProviderId, TrackedFileId},
    remote_file::RemoteFile,
};

/// Remote modification date recorded when nothing is known yet
pub const UNKNOWN_MOD_DATE: i64 = -1;

/// Change of one side of a file since the last sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChange {
    #[default]
    None,
    Added,
    Modified,
    Removed,
}

impl FileChange {
    /// Storage name used in the database
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }

    /// Added or modified
    #[must_use]
    pub const fn is_content_change(&self) -> bool {
        matches!(self, Self::Added | Self::Modified)
    }
}

impl Display for FileChange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileChange {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "added" => Ok(Self::Added),
            "modified" => Ok(Self::Modified),
            "removed" => Ok(Self::Removed),
            other => Err(DomainError::InvalidFileChange(other.to_string())),
        }
    }
}

/// One tracked file row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedFile {
    pub id: TrackedFileId,
    pub provider_id: ProviderId,

    /// Name of the content file inside the provider's files directory
    pub local_file: Option<String>,
    /// Display title; matched case-insensitively against remote titles
    pub local_title: String,
    pub local_folder: Option<String>,
    /// Epoch millis
    pub local_mod_date: i64,
    pub local_deleted: bool,

    pub remote_id: Option<String>,
    pub remote_title: Option<String>,
    pub remote_folder: Option<String>,
    /// Epoch millis, [`UNKNOWN_MOD_DATE`] when unknown
    pub remote_mod_date: i64,
    pub remote_hash: Option<String>,
    pub remote_deleted: bool,

    pub local_change: FileChange,
    pub remote_change: FileChange,

    pub version: i64,
}

impl TrackedFile {
    /// Content file name for a row id
    #[must_use]
    pub fn local_file_name(id: TrackedFileId) -> String {
        format!("syncfile-{id}")
    }

    /// Whether the row has completed a remote round trip
    #[must_use]
    pub fn is_remote_resolved(&self) -> bool {
        self.remote_id.is_some()
    }

    /// Whether either side carries an unsynced change
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.local_change != FileChange::None || self.remote_change != FileChange::None
    }

    /// Whether a fresh listing entry differs from the stored snapshot
    ///
    /// A missing local content file counts as a difference so the file is
    /// pulled again.
    #[must_use]
    pub fn differs_from(&self, remote: &RemoteFile) -> bool {
        self.local_file.is_none()
            || self.remote_title.as_deref() != Some(remote.title.as_str())
            || self.remote_folder != remote.folder
            || self.remote_mod_date != remote.mod_date
            || self.remote_hash != remote.hash
    }

    /// Local title and folder for log lines
    #[must_use]
    pub fn local_description(&self) -> String {
        describe(self.local_folder.as_deref(), &self.local_title)
    }

    /// Remote title and folder for log lines, falling back to the local title
    #[must_use]
    pub fn remote_description(&self) -> String {
        describe(
            self.remote_folder.as_deref(),
            self.remote_title.as_deref().unwrap_or(&self.local_title),
        )
    }
}

fn describe(folder: Option<&str>, title: &str) -> String {
    match folder {
        Some(folder) if !folder.is_empty() && folder != "/" => {
            format!("{}/{}", folder.trim_end_matches('/'), title)
        }
        _ => title.to_string(),
    }
}
