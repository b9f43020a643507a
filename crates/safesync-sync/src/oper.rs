//! Sync operations
//!
//! A [`SyncOper`] moves one tracked file one step towards agreement:
//! pull (remote to local), push (local to remote) or remove. Running an
//! operation is split in two: [`SyncOper::do_oper`] talks to the remote
//! store and the filesystem, [`SyncOper::post_update`] records the result
//! in the sync database with a version-guarded write.
//!
//! ## Retry Logic
//!
//! Remote calls that fail transiently (rate limiting, server errors,
//! transport errors) are retried with exponential backoff: 1s, 2s. A
//! `Retry-After` hint from the provider replaces the computed delay.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use safesync_core::domain::{DomainError, RemoteFile, TrackedFile};
use safesync_core::ports::{is_not_found, IRemoteStore, ISyncDb, RemoteError, WriteOutcome};

use crate::local::LocalFileStore;
use crate::SyncError;

// ============================================================================
// Retry logic
// ============================================================================

/// Maximum number of retries for transient errors
const MAX_RETRIES: u32 = 2;

/// Base delay for exponential backoff (1 second)
const BASE_DELAY_SECS: u64 = 1;

/// Whether an error is worth retrying, and after how long
fn transient_delay(err: &anyhow::Error, attempt: u32) -> Option<Duration> {
    let backoff = Duration::from_secs(BASE_DELAY_SECS * 2u64.pow(attempt));
    err.chain().find_map(|cause| match cause.downcast_ref::<RemoteError>() {
        Some(RemoteError::TooManyRequests { retry_after }) => Some(retry_after.unwrap_or(backoff)),
        Some(RemoteError::Server(_)) | Some(RemoteError::Network(_)) => Some(backoff),
        _ => None,
    })
}

/// Executes a remote call with exponential backoff retry
async fn with_retry<F, Fut, T>(operation_name: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => match transient_delay(&err, attempt) {
                Some(delay) if attempt < MAX_RETRIES => {
                    warn!(
                        operation = operation_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                _ => return Err(err),
            },
        }
    }
}

// ============================================================================
// SyncOper
// ============================================================================

/// Kind of operation; the derive order is the execution order of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncOperKind {
    Remove,
    Pull,
    Push,
}

impl Display for SyncOperKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Remove => "remove",
            Self::Pull => "pull",
            Self::Push => "push",
        })
    }
}

/// Collaborators an operation works with
pub struct OperContext<'a> {
    pub store: &'a dyn IRemoteStore,
    pub db: &'a dyn ISyncDb,
    pub local: &'a LocalFileStore,
}

/// Result of [`SyncOper::do_oper`], consumed by [`SyncOper::post_update`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperOutcome {
    /// Content downloaded and moved into place
    Pulled {
        local_file: String,
        content_changed: bool,
    },
    /// Content uploaded; the new remote metadata
    Pushed(RemoteFile),
    /// Remote copy deleted, or already gone
    Removed,
    /// The file to pull no longer exists remotely
    RemoteMissing,
}

/// One operation on one tracked file
///
/// The embedded row is the snapshot the operation was planned with; its
/// `version` guards the post-operation update.
#[derive(Debug, Clone)]
pub struct SyncOper {
    kind: SyncOperKind,
    file: TrackedFile,
}

impl SyncOper {
    pub fn push(file: TrackedFile) -> Self {
        Self {
            kind: SyncOperKind::Push,
            file,
        }
    }

    pub fn pull(file: TrackedFile) -> Self {
        Self {
            kind: SyncOperKind::Pull,
            file,
        }
    }

    pub fn remove(file: TrackedFile) -> Self {
        Self {
            kind: SyncOperKind::Remove,
            file,
        }
    }

    pub fn kind(&self) -> SyncOperKind {
        self.kind
    }

    pub fn file(&self) -> &TrackedFile {
        &self.file
    }

    /// Log line announcing the operation
    pub fn description(&self) -> String {
        match self.kind {
            SyncOperKind::Push => format!("Sync local to remote: {}", self.file.local_description()),
            SyncOperKind::Pull => format!("Sync remote to local: {}", self.file.remote_description()),
            SyncOperKind::Remove => format!("Remove: {}", self.file.local_description()),
        }
    }

    /// Run the operation and record its result
    pub async fn execute(&self, ctx: &OperContext<'_>) -> Result<(OperOutcome, WriteOutcome)> {
        let outcome = self.do_oper(ctx).await?;
        let write = self.post_update(ctx, &outcome).await?;
        if write.is_stale() {
            warn!(
                file = %self.file.id,
                kind = %self.kind,
                "File changed during sync, leaving it for the next pass"
            );
        }
        Ok((outcome, write))
    }

    /// Remote and filesystem part of the operation
    ///
    /// Leaves the database untouched. A failure leaves the local content
    /// as it was.
    pub async fn do_oper(&self, ctx: &OperContext<'_>) -> Result<OperOutcome> {
        match self.kind {
            SyncOperKind::Pull => self.do_pull(ctx).await,
            SyncOperKind::Push => self.do_push(ctx).await,
            SyncOperKind::Remove => self.do_remove(ctx).await,
        }
    }

    /// Database part of the operation
    pub async fn post_update(
        &self,
        ctx: &OperContext<'_>,
        outcome: &OperOutcome,
    ) -> Result<WriteOutcome> {
        let file = &self.file;
        match outcome {
            OperOutcome::Pulled { local_file, .. } => ctx.db.complete_pull(file, local_file).await,
            OperOutcome::Pushed(remote) => {
                let write = ctx.db.complete_push(file, remote).await?;
                if write.is_applied() {
                    if let Some(name) = file.local_file.as_deref() {
                        if let Err(err) = ctx.local.set_mod_time(name, remote.mod_date).await {
                            warn!(file = %file.id, %err, "Can't set mod time");
                        }
                    }
                }
                Ok(write)
            }
            OperOutcome::Removed | OperOutcome::RemoteMissing => {
                let write = ctx.db.complete_remove(file).await?;
                if write.is_applied() {
                    if let Some(name) = file.local_file.as_deref() {
                        ctx.local.remove(name).await?;
                    }
                }
                Ok(write)
            }
        }
    }

    // ------------------------------------------------------------------
    // Pull
    // ------------------------------------------------------------------

    async fn do_pull(&self, ctx: &OperContext<'_>) -> Result<OperOutcome> {
        let file = &self.file;
        let remote_id = file
            .remote_id
            .as_deref()
            .with_context(|| format!("File {} has no remote id to pull", file.id))?;
        let local_file = TrackedFile::local_file_name(file.id);

        ctx.local.ensure_dir().await?;
        let tmp = ctx.local.temp_path_for(&local_file);

        let downloaded = with_retry("download", || ctx.store.download(remote_id, &tmp)).await;
        if let Err(err) = downloaded {
            ctx.local.discard(&tmp).await;
            if is_not_found(&err) {
                info!(file = %file.id, remote_id, "Remote file gone, dropping it");
                return Ok(OperOutcome::RemoteMissing);
            }
            return Err(err.context(format!("Download {}", file.remote_description())));
        }

        match self.replace_local(ctx, &tmp, &local_file).await {
            Ok(content_changed) => {
                if let Err(err) = ctx.local.set_mod_time(&local_file, file.remote_mod_date).await {
                    warn!(file = %file.id, %err, "Can't set mod time");
                }
                debug!(file = %file.id, content_changed, "Pulled file");
                Ok(OperOutcome::Pulled {
                    local_file,
                    content_changed,
                })
            }
            Err(err) => {
                ctx.local.discard(&tmp).await;
                Err(err)
            }
        }
    }

    /// Move a downloaded temp file over the content file
    ///
    /// Refuses when the row changed since planning so a concurrent local
    /// edit is never overwritten.
    async fn replace_local(
        &self,
        ctx: &OperContext<'_>,
        tmp: &std::path::Path,
        local_file: &str,
    ) -> Result<bool> {
        let file = &self.file;
        let before = ctx.local.digest(local_file).await?;
        let after = crate::local::digest_path(tmp).await?;

        let current = ctx.db.get_file(file.id).await?;
        if current.map(|c| c.version) != Some(file.version) {
            return Err(SyncError::DomainError(DomainError::StaleRow(format!("file {}", file.id))).into());
        }

        ctx.local.commit_temp(tmp, local_file).await?;
        Ok(before != after)
    }

    // ------------------------------------------------------------------
    // Push
    // ------------------------------------------------------------------

    async fn do_push(&self, ctx: &OperContext<'_>) -> Result<OperOutcome> {
        let file = &self.file;
        let local_file = file
            .local_file
            .as_deref()
            .ok_or_else(|| SyncError::MissingContent(file.local_title.clone()))?;
        let path = ctx.local.path_for(local_file);

        let remote = with_retry("upload", || ctx.store.upload(file, &path))
            .await
            .with_context(|| format!("Upload {}", file.local_description()))?;
        debug!(file = %file.id, remote_id = %remote.remote_id, "Pushed file");
        Ok(OperOutcome::Pushed(remote))
    }

    // ------------------------------------------------------------------
    // Remove
    // ------------------------------------------------------------------

    async fn do_remove(&self, ctx: &OperContext<'_>) -> Result<OperOutcome> {
        let file = &self.file;
        let remote_id = match file.remote_id.as_deref() {
            Some(id) if !file.remote_deleted => id,
            _ => return Ok(OperOutcome::Removed),
        };

        match with_retry("delete", || ctx.store.delete(remote_id)).await {
            Ok(()) => Ok(OperOutcome::Removed),
            Err(err) if is_not_found(&err) => {
                debug!(file = %file.id, remote_id, "Remote file already gone");
                Ok(OperOutcome::Removed)
            }
            Err(err) => Err(err.context(format!("Delete {}", file.remote_description()))),
        }
    }
}
