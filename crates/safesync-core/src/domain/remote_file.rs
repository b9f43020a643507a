//! Remote file descriptors
//!
//! [`RemoteFile`] is the provider-agnostic view of one remote file. It is
//! rebuilt every pass and never persisted directly; the tracked row keeps
//! a snapshot of its fields instead.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::newtypes::TrackedFileId;

/// One file as reported by a remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Provider identifier (Dropbox lowercased path, ownCloud WebDAV path)
    pub remote_id: String,
    pub title: String,
    pub folder: Option<String>,
    /// Epoch millis
    pub mod_date: i64,
    /// Content hash or etag
    pub hash: Option<String>,
}

/// Remote state gathered at the start of a pass
///
/// Files found for rows that already have a remote id are keyed by that
/// id. Files found by title for unresolved rows are keyed by the row so
/// the pass can attach the identity to the right row.
#[derive(Debug, Clone, Default)]
pub struct SyncRemoteFiles {
    files: HashMap<String, RemoteFile>,
    for_new: HashMap<TrackedFileId, RemoteFile>,
}

impl SyncRemoteFiles {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a remote file under its own id
    pub fn add_remote_file(&mut self, file: RemoteFile) {
        self.files.insert(file.remote_id.clone(), file);
    }

    /// Record the remote file matched for an unresolved row
    pub fn add_remote_file_for_new(&mut self, id: TrackedFileId, file: RemoteFile) {
        self.for_new.insert(id, file);
    }

    #[must_use]
    pub fn get_remote_file(&self, remote_id: &str) -> Option<&RemoteFile> {
        self.files.get(remote_id)
    }

    #[must_use]
    pub fn get_remote_file_for_new(&self, id: TrackedFileId) -> Option<&RemoteFile> {
        self.for_new.get(&id)
    }

    /// All files keyed by remote id
    pub fn remote_files(&self) -> impl Iterator<Item = &RemoteFile> {
        self.files.values()
    }

    /// Whether an unresolved row already claimed this remote id
    #[must_use]
    pub fn is_claimed_for_new(&self, remote_id: &str) -> bool {
        self.for_new.values().any(|f| f.remote_id == remote_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len() + self.for_new.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.for_new.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(id: &str) -> RemoteFile {
        RemoteFile {
            remote_id: id.to_string(),
            title: id.trim_start_matches('/').to_string(),
            folder: Some("/".to_string()),
            mod_date: 10,
            hash: None,
        }
    }

    #[test]
    fn test_lookup_by_id_and_row() {
        let mut files = SyncRemoteFiles::new();
        assert!(files.is_empty());

        files.add_remote_file(remote("/a.psafe3"));
        files.add_remote_file_for_new(TrackedFileId::new(3), remote("/b.psafe3"));

        assert_eq!(files.len(), 2);
        assert!(files.get_remote_file("/a.psafe3").is_some());
        assert!(files.get_remote_file("/b.psafe3").is_none());
        assert_eq!(
            files
                .get_remote_file_for_new(TrackedFileId::new(3))
                .map(|f| f.remote_id.as_str()),
            Some("/b.psafe3")
        );
        assert!(files.is_claimed_for_new("/b.psafe3"));
        assert!(!files.is_claimed_for_new("/a.psafe3"));
    }
}
