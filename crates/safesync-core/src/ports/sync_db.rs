//! Sync database port (driven/secondary port)
//!
//! Persistent storage for provider accounts, tracked files and sync logs.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific.
//! - Every write runs in its own short transaction scoped to one row (or
//!   one provider) and bumps the row `version`.
//! - Updates return a [`WriteOutcome`]. A stale outcome means the row was
//!   deleted or, for guarded writes, changed after the caller read it.
//!   Callers must look at it; the type is `#[must_use]`.
//! - Guarded writes (`complete_*`, `fold_*`, `split_*`,
//!   `relabel_as_local_add`) take the row snapshot the caller planned
//!   with and only apply when its `version` is still current.

use std::fmt::Display;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::domain::{
    DbProvider, DomainError, FileChange, ProviderId, ProviderType, RemoteFile, SyncLogEntry,
    SyncLogId, SyncLogRecord, TrackedFile, TrackedFileId,
};

// ============================================================================
// WriteOutcome
// ============================================================================

/// Result of a row-scoped write
#[must_use = "a stale write leaves the row untouched"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    rows_affected: u64,
}

impl WriteOutcome {
    pub const fn from_rows(rows_affected: u64) -> Self {
        Self { rows_affected }
    }

    pub const fn applied() -> Self {
        Self { rows_affected: 1 }
    }

    pub const fn stale() -> Self {
        Self { rows_affected: 0 }
    }

    #[must_use]
    pub const fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    #[must_use]
    pub const fn is_applied(&self) -> bool {
        self.rows_affected > 0
    }

    #[must_use]
    pub const fn is_stale(&self) -> bool {
        self.rows_affected == 0
    }

    /// Turn a stale outcome into [`DomainError::StaleRow`]
    pub fn ensure_applied(self, what: impl Display) -> Result<(), DomainError> {
        if self.is_applied() {
            Ok(())
        } else {
            Err(DomainError::StaleRow(what.to_string()))
        }
    }
}

// ============================================================================
// ISyncDb trait
// ============================================================================

#[async_trait::async_trait]
pub trait ISyncDb: Send + Sync {
    // ------------------------------------------------------------------
    // Providers
    // ------------------------------------------------------------------

    async fn add_provider(
        &self,
        acct: &str,
        provider_type: ProviderType,
        sync_freq: u32,
    ) -> Result<ProviderId>;

    /// Delete a provider and all of its tracked files
    async fn delete_provider(&self, id: ProviderId) -> Result<WriteOutcome>;

    async fn get_provider(&self, id: ProviderId) -> Result<Option<DbProvider>>;

    async fn get_provider_by_account(
        &self,
        acct: &str,
        provider_type: ProviderType,
    ) -> Result<Option<DbProvider>>;

    async fn get_providers(&self) -> Result<Vec<DbProvider>>;

    async fn update_provider_display_name(
        &self,
        id: ProviderId,
        display_name: &str,
    ) -> Result<WriteOutcome>;

    async fn update_provider_sync_freq(&self, id: ProviderId, sync_freq: u32)
        -> Result<WriteOutcome>;

    /// Record the end of a pass as the last success or last failure
    async fn update_provider_sync_time(
        &self,
        id: ProviderId,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<WriteOutcome>;

    // ------------------------------------------------------------------
    // Tracked files
    // ------------------------------------------------------------------

    async fn get_file(&self, id: TrackedFileId) -> Result<Option<TrackedFile>>;

    async fn get_file_by_remote_id(
        &self,
        provider: ProviderId,
        remote_id: &str,
    ) -> Result<Option<TrackedFile>>;

    /// All rows of a provider, ordered by id
    async fn get_files(&self, provider: ProviderId) -> Result<Vec<TrackedFile>>;

    /// Track a new local file; the row gets `local_change = ADDED` and a
    /// content file name derived from its id
    async fn add_local_file(
        &self,
        provider: ProviderId,
        title: &str,
        mod_date: i64,
    ) -> Result<TrackedFileId>;

    /// Track a file first seen remotely; the row gets `remote_change = ADDED`
    async fn add_remote_file(&self, provider: ProviderId, remote: &RemoteFile)
        -> Result<TrackedFileId>;

    async fn update_local_file(
        &self,
        id: TrackedFileId,
        local_file: Option<&str>,
        title: &str,
        folder: Option<&str>,
        mod_date: i64,
    ) -> Result<WriteOutcome>;

    async fn update_local_file_change(
        &self,
        id: TrackedFileId,
        change: FileChange,
    ) -> Result<WriteOutcome>;

    /// Mark the local copy deleted (`local_change = REMOVED`)
    async fn update_local_file_deleted(&self, id: TrackedFileId) -> Result<WriteOutcome>;

    /// Replace the remote snapshot with a fresh listing entry
    async fn update_remote_file(
        &self,
        id: TrackedFileId,
        remote: &RemoteFile,
    ) -> Result<WriteOutcome>;

    async fn update_remote_file_change(
        &self,
        id: TrackedFileId,
        change: FileChange,
    ) -> Result<WriteOutcome>;

    /// Mark the remote copy deleted (`remote_change = REMOVED`)
    async fn update_remote_file_deleted(&self, id: TrackedFileId) -> Result<WriteOutcome>;

    /// Store a listing entry as the snapshot of `file` together with its
    /// remote change flag, in one guarded write
    async fn fold_remote_file(
        &self,
        file: &TrackedFile,
        remote: &RemoteFile,
        change: FileChange,
    ) -> Result<WriteOutcome>;

    /// Guarded form of [`update_remote_file_deleted`](Self::update_remote_file_deleted)
    async fn fold_remote_deleted(&self, file: &TrackedFile) -> Result<WriteOutcome>;

    /// Keep both sides of a conflict in one transaction
    ///
    /// The remote snapshot of `file` moves to a new row (`remote_change =
    /// ADDED`) and `file` becomes a local add titled `new_title`. Returns
    /// `None` when `file` is stale.
    async fn split_conflict(
        &self,
        file: &TrackedFile,
        new_title: &str,
    ) -> Result<Option<TrackedFileId>>;

    /// Move the remote identity of `file` to a new row
    ///
    /// The new row carries the remote snapshot with `remote_change =
    /// ADDED`; `file` loses its snapshot. Returns `None` when `file` is
    /// stale.
    async fn split_remote_to_new_file(&self, file: &TrackedFile) -> Result<Option<TrackedFileId>>;

    /// Reset the remote snapshot of `file` and mark it as a local add under
    /// `new_title`
    async fn relabel_as_local_add(&self, file: &TrackedFile, new_title: &str)
        -> Result<WriteOutcome>;

    /// Local side now mirrors the remote snapshot of `file`
    async fn complete_pull(&self, file: &TrackedFile, local_file: &str) -> Result<WriteOutcome>;

    /// Store the uploaded metadata as the new snapshot
    ///
    /// The remote snapshot is recorded even when `file` is stale so the
    /// upload is not mistaken for a remote change; only the local side
    /// and change flags are guarded.
    async fn complete_push(&self, file: &TrackedFile, remote: &RemoteFile)
        -> Result<WriteOutcome>;

    /// Delete the row of a completed remove
    async fn complete_remove(&self, file: &TrackedFile) -> Result<WriteOutcome>;

    /// Delete a row unconditionally
    async fn remove_file(&self, id: TrackedFileId) -> Result<WriteOutcome>;

    // ------------------------------------------------------------------
    // Sync logs
    // ------------------------------------------------------------------

    async fn add_sync_log(&self, record: &SyncLogRecord) -> Result<SyncLogId>;

    /// Most recent logs first
    async fn get_sync_logs(&self, limit: u32) -> Result<Vec<SyncLogEntry>>;

    async fn delete_sync_logs_before(&self, before: DateTime<Utc>) -> Result<WriteOutcome>;
}
