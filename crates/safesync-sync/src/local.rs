//! Local content files
//!
//! Each provider owns a files directory holding one content file per
//! tracked row (`syncfile-<id>`). [`LocalFileStore`] manages that
//! directory; [`LocalFiles`] is the entry point for local edits, keeping
//! the sync database flags in step with the content.
//!
//! Replacements go through a temporary file in the same directory
//! followed by a rename, so a reader never sees partial content.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use safesync_core::domain::{FileChange, ProviderId, TrackedFile, TrackedFileId};
use safesync_core::ports::ISyncDb;

use crate::SyncError;

/// SHA-256 of a content file
pub type ContentDigest = [u8; 32];

// ============================================================================
// LocalFileStore
// ============================================================================

/// The files directory of one provider
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    dir: PathBuf,
}

impl LocalFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a content file
    pub fn path_for(&self, local_file: &str) -> PathBuf {
        self.dir.join(local_file)
    }

    /// Path of the temporary file used while replacing `local_file`
    pub fn temp_path_for(&self, local_file: &str) -> PathBuf {
        self.dir.join(format!(".{local_file}.part"))
    }

    pub async fn ensure_dir(&self) -> Result<(), SyncError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    pub async fn exists(&self, local_file: &str) -> bool {
        tokio::fs::try_exists(self.path_for(local_file))
            .await
            .unwrap_or(false)
    }

    pub async fn read(&self, local_file: &str) -> Result<Vec<u8>, SyncError> {
        Ok(tokio::fs::read(self.path_for(local_file)).await?)
    }

    /// Replace `local_file` with `data` via temp file and rename
    pub async fn write_atomic(&self, local_file: &str, data: &[u8]) -> Result<(), SyncError> {
        self.ensure_dir().await?;
        let tmp = self.temp_path_for(local_file);
        debug!(?tmp, "writing to temporary file");
        if let Err(err) = tokio::fs::write(&tmp, data).await {
            self.discard(&tmp).await;
            return Err(err.into());
        }
        self.commit_temp(&tmp, local_file).await
    }

    /// Rename a fully written temporary file over `local_file`
    ///
    /// The temporary file is removed when the rename fails.
    pub async fn commit_temp(&self, tmp: &Path, local_file: &str) -> Result<(), SyncError> {
        let target = self.path_for(local_file);
        if let Err(source) = tokio::fs::rename(tmp, &target).await {
            self.discard(tmp).await;
            return Err(SyncError::ReplaceFailed {
                path: target,
                source,
            });
        }
        Ok(())
    }

    /// Best-effort removal of a temporary file
    pub async fn discard(&self, tmp: &Path) {
        match tokio::fs::remove_file(tmp).await {
            Ok(()) => debug!(?tmp, "removed temporary file"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(?tmp, %err, "failed to remove temporary file"),
        }
    }

    /// Delete a content file; a missing file is not an error
    pub async fn remove(&self, local_file: &str) -> Result<(), SyncError> {
        match tokio::fs::remove_file(self.path_for(local_file)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// SHA-256 of a content file, `None` when it does not exist
    pub async fn digest(&self, local_file: &str) -> Result<Option<ContentDigest>, SyncError> {
        digest_path(&self.path_for(local_file)).await
    }

    /// Modification time of a content file in epoch millis
    pub async fn mod_time(&self, local_file: &str) -> Result<i64, SyncError> {
        let modified = tokio::fs::metadata(self.path_for(local_file))
            .await?
            .modified()?;
        let millis = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Ok(millis)
    }

    /// Set the modification time of a content file; negative values are ignored
    pub async fn set_mod_time(&self, local_file: &str, millis: i64) -> Result<(), SyncError> {
        let Ok(millis) = u64::try_from(millis) else {
            return Ok(());
        };
        let path = self.path_for(local_file);
        let time = UNIX_EPOCH + Duration::from_millis(millis);
        tokio::task::spawn_blocking(move || set_modified(&path, time))
            .await
            .map_err(std::io::Error::other)??;
        Ok(())
    }
}

/// SHA-256 of a file, `None` when it does not exist
pub async fn digest_path(path: &Path) -> Result<Option<ContentDigest>, SyncError> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(Sha256::digest(&data).into())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn set_modified(path: &Path, time: SystemTime) -> std::io::Result<()> {
    std::fs::File::options()
        .write(true)
        .open(path)?
        .set_modified(time)
}

// ============================================================================
// LocalFiles: local edit hooks
// ============================================================================

/// Local edits for one provider
///
/// Every edit writes content first and then records the change, so the
/// next pass pushes it.
pub struct LocalFiles {
    db: Arc<dyn ISyncDb>,
    store: LocalFileStore,
    provider: ProviderId,
}

impl LocalFiles {
    pub fn new(db: Arc<dyn ISyncDb>, store: LocalFileStore, provider: ProviderId) -> Self {
        Self {
            db,
            store,
            provider,
        }
    }

    /// Start tracking a new local file
    ///
    /// Fails with [`SyncError::TitleInUse`] when a row of the provider
    /// already has this title locally or remotely, compared ignoring case.
    pub async fn insert_local_file(&self, title: &str, content: &[u8]) -> Result<TrackedFileId> {
        let wanted = title.to_lowercase();
        let in_use = self.db.get_files(self.provider).await?.iter().any(|f| {
            f.local_title.to_lowercase() == wanted
                || f.remote_title.as_deref().is_some_and(|t| t.to_lowercase() == wanted)
        });
        if in_use {
            return Err(SyncError::TitleInUse(title.to_string()).into());
        }

        let now = Utc::now().timestamp_millis();
        let id = self.db.add_local_file(self.provider, title, now).await?;
        let name = TrackedFile::local_file_name(id);

        if let Err(err) = self.store.write_atomic(&name, content).await {
            let _ = self.db.remove_file(id).await?;
            return Err(err).with_context(|| format!("Failed to store content for {title}"));
        }
        self.store.set_mod_time(&name, now).await?;

        debug!(file = %id, provider = %self.provider, title, "Inserted local file");
        Ok(id)
    }

    /// Replace the content of a tracked file
    ///
    /// An unchanged or removed file becomes MODIFIED; an added file stays
    /// ADDED until its first push.
    pub async fn update_local_file(&self, id: TrackedFileId, content: &[u8]) -> Result<()> {
        let file = self.file(id).await?;
        let name = file
            .local_file
            .clone()
            .unwrap_or_else(|| TrackedFile::local_file_name(id));

        self.store.write_atomic(&name, content).await?;
        let mod_date = self.store.mod_time(&name).await?;

        self.db
            .update_local_file(
                id,
                Some(&name),
                &file.local_title,
                file.local_folder.as_deref(),
                mod_date,
            )
            .await?
            .ensure_applied(format!("file {id}"))?;

        if matches!(file.local_change, FileChange::None | FileChange::Removed) {
            self.db
                .update_local_file_change(id, FileChange::Modified)
                .await?
                .ensure_applied(format!("file {id}"))?;
        }

        debug!(file = %id, "Updated local file");
        Ok(())
    }

    /// Mark a tracked file deleted locally
    ///
    /// The content stays on disk until the remove operation completes.
    pub async fn delete_local_file(&self, id: TrackedFileId) -> Result<()> {
        self.file(id).await?;
        self.db
            .update_local_file_deleted(id)
            .await?
            .ensure_applied(format!("file {id}"))?;
        debug!(file = %id, "Deleted local file");
        Ok(())
    }

    /// Current content of a tracked file
    pub async fn read_local_file(&self, id: TrackedFileId) -> Result<Vec<u8>> {
        let file = self.file(id).await?;
        let name = file
            .local_file
            .ok_or_else(|| SyncError::MissingContent(file.local_title.clone()))?;
        Ok(self.store.read(&name).await?)
    }

    async fn file(&self, id: TrackedFileId) -> Result<TrackedFile> {
        let file = self
            .db
            .get_file(id)
            .await?
            .with_context(|| format!("File {id} is not tracked"))?;
        anyhow::ensure!(
            file.provider_id == self.provider,
            "File {id} belongs to provider {}",
            file.provider_id
        );
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_write_atomic_and_read() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path().join("files"));

        store.write_atomic("syncfile-1", b"one").await.unwrap();
        store.write_atomic("syncfile-1", b"two").await.unwrap();

        assert_eq!(store.read("syncfile-1").await.unwrap(), b"two");
        assert!(!store.temp_path_for("syncfile-1").exists());
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path());
        store.remove("syncfile-9").await.unwrap();
        assert!(!store.exists("syncfile-9").await);
    }

    #[tokio::test]
    async fn test_digest() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path());

        assert_eq!(store.digest("syncfile-1").await.unwrap(), None);
        store.write_atomic("syncfile-1", b"abc").await.unwrap();
        let a = store.digest("syncfile-1").await.unwrap().unwrap();
        store.write_atomic("syncfile-1", b"abd").await.unwrap();
        let b = store.digest("syncfile-1").await.unwrap().unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_mod_time_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path());
        store.write_atomic("syncfile-1", b"abc").await.unwrap();

        store.set_mod_time("syncfile-1", 1_600_000_000_000).await.unwrap();
        assert_eq!(store.mod_time("syncfile-1").await.unwrap(), 1_600_000_000_000);

        // Unknown remote dates leave the file alone.
        store.set_mod_time("syncfile-1", -1).await.unwrap();
        assert_eq!(store.mod_time("syncfile-1").await.unwrap(), 1_600_000_000_000);
    }

    #[tokio::test]
    async fn test_commit_temp_failure_removes_temp() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path());
        let tmp = store.temp_path_for("syncfile-1");
        tokio::fs::write(&tmp, b"partial").await.unwrap();
        // A directory in the way makes the rename fail.
        tokio::fs::create_dir_all(store.path_for("syncfile-1").join("blocker"))
            .await
            .unwrap();

        let err = store.commit_temp(&tmp, "syncfile-1").await.unwrap_err();
        assert!(matches!(err, SyncError::ReplaceFailed { .. }));
        assert!(!tmp.exists());
    }
}
