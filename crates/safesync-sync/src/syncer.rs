//! ProviderSyncer - one sync pass for one provider account
//!
//! A pass has three phases:
//!
//! 1. **Fold** the remote listing into the tracked rows
//!    ([`ProviderSyncer::update_db_files`]), computing each row's remote
//!    change flag.
//! 2. **Resolve** every row into at most one [`SyncOper`] using the
//!    local × remote change table, splitting or relabelling rows for
//!    conflicts ([`ProviderSyncer::resolve_sync_opers`]).
//! 3. **Execute** the operations sequentially: removes, then pulls, then
//!    pushes.
//!
//! ## Design Notes
//!
//! - A failed operation is logged with its file id and leaves its row
//!   dirty; the pass continues with the next operation. Failed writes
//!   while folding the listing are handled the same way.
//! - A remote id belongs to at most one row. A new local row whose title
//!   is already tracked is renamed "(conflicted copy ...)" before it can
//!   claim that remote file.
//! - Cancellation is checked before each operation; a running operation
//!   completes.
//! - An authentication failure ends the operation phase.
//! - Conflicts keep both copies:
//!   - both sides changed: the remote copy moves to a new row that is
//!     pulled, the local row is renamed "(conflicted copy ...)" and pushed
//!     as a new remote file;
//!   - local changed, remote removed: the local row is renamed
//!     "(recreated copy ...)" and pushed;
//!   - local removed, remote changed: the remote copy moves to a new row
//!     that is pulled, the original row is removed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use safesync_core::domain::{
    DbProvider, FileChange, ProviderId, RemoteFile, SyncConnectivityResult, SyncLogRecord, SyncRemoteFiles,
    TrackedFile, TrackedFileId,
};
use safesync_core::ports::{is_auth_error, IRemoteStore, ISyncDb};

use crate::conflict::{ConflictNamer, CopyKind};
use crate::local::LocalFileStore;
use crate::oper::{OperContext, SyncOper, SyncOperKind};

// ============================================================================
// SyncResult
// ============================================================================

/// Summary of a completed pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    /// Files downloaded, or dropped because the remote copy was gone
    pub files_pulled: u32,
    /// Files uploaded
    pub files_pushed: u32,
    /// Files removed
    pub files_removed: u32,
    /// Conflicts resolved by keeping both copies
    pub conflicts: u32,
    /// Operations that failed
    pub failures: u32,
    /// Operations whose row changed while they ran
    pub stale: u32,
    /// Wall-clock duration of the pass in milliseconds
    pub duration_ms: u64,
}

impl SyncResult {
    /// Total operations that completed
    pub fn completed(&self) -> u32 {
        self.files_pulled + self.files_pushed + self.files_removed
    }
}

// ============================================================================
// ProviderSyncer
// ============================================================================

/// Runs sync passes for one provider account
pub struct ProviderSyncer {
    store: Arc<dyn IRemoteStore>,
    db: Arc<dyn ISyncDb>,
    local: LocalFileStore,
    cancel: CancellationToken,
}

impl ProviderSyncer {
    pub fn new(
        store: Arc<dyn IRemoteStore>,
        db: Arc<dyn ISyncDb>,
        local: LocalFileStore,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            db,
            local,
            cancel,
        }
    }

    /// Run one pass
    ///
    /// Only failures before the operation phase are returned as errors;
    /// failed operations are recorded in `log` and counted in the result.
    #[tracing::instrument(skip_all, fields(provider = %provider.id, acct = %provider.acct))]
    pub async fn sync(
        &self,
        provider: &DbProvider,
        conn: &SyncConnectivityResult,
        log: &mut SyncLogRecord,
    ) -> Result<SyncResult> {
        let start = Instant::now();
        let mut result = SyncResult::default();

        self.sync_display_name(provider, conn).await?;

        let files = self
            .db
            .get_files(provider.id)
            .await
            .context("Failed to load tracked files")?;
        info!(files = files.len(), "Starting sync pass");

        let remote_files = match self.store.get_sync_remote_files(&files).await {
            Ok(remote_files) => remote_files,
            Err(err) => {
                if is_auth_error(&err) {
                    log.set_auth_failed();
                }
                return Err(err.context("Failed to list remote files"));
            }
        };
        debug!(remote_files = remote_files.len(), "Listed remote files");

        let renamed = self.update_db_files(provider.id, &files, &remote_files, log).await?;
        let (opers, conflicts) = self.resolve_sync_opers(provider, log).await?;
        result.conflicts = renamed + conflicts;

        info!(ops = opers.len(), conflicts, "Resolved sync operations");
        self.run_opers(&opers, log, &mut result).await;

        result.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            pulled = result.files_pulled,
            pushed = result.files_pushed,
            removed = result.files_removed,
            failures = result.failures,
            duration_ms = result.duration_ms,
            "Sync pass completed"
        );
        Ok(result)
    }

    async fn sync_display_name(
        &self,
        provider: &DbProvider,
        conn: &SyncConnectivityResult,
    ) -> Result<()> {
        if provider.display_name.as_deref() == Some(conn.display_name.as_str()) {
            return Ok(());
        }
        debug!(display_name = %conn.display_name, "Updating display name");
        self.db
            .update_provider_display_name(provider.id, &conn.display_name)
            .await?
            .ensure_applied(format!("provider {}", provider.id))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fold the remote listing into the rows
    // ------------------------------------------------------------------

    /// Record the remote listing in the tracked rows
    ///
    /// Writes only rows whose stored snapshot differs from the listing, so
    /// a pass over unchanged state leaves the database untouched. Each row
    /// is folded on its own: a failed or stale write is logged and that
    /// row waits for the next pass.
    ///
    /// A new local row never takes a remote id another row already
    /// tracks. When its title clashes with such a row it is renamed as a
    /// conflicted copy instead, which is counted in the returned total.
    pub async fn update_db_files(
        &self,
        provider: ProviderId,
        files: &[TrackedFile],
        remote_files: &SyncRemoteFiles,
        log: &mut SyncLogRecord,
    ) -> Result<u32> {
        let known: HashSet<&str> = files.iter().filter_map(|f| f.remote_id.as_deref()).collect();
        let mut titles: HashSet<String> =
            files.iter().map(|f| f.local_title.to_lowercase()).collect();
        let mut processed: HashSet<&str> = HashSet::new();
        let mut claimed: HashSet<&str> = HashSet::new();
        let mut renamed = 0;
        let now = Utc::now();

        for file in files {
            let folded = match file.remote_id.as_deref() {
                None => {
                    let claim = remote_files.get_remote_file_for_new(file.id);
                    let owned = claim.is_some_and(|r| {
                        known.contains(r.remote_id.as_str()) || claimed.contains(r.remote_id.as_str())
                    });
                    if owned || title_taken(files, file) {
                        if file.local_deleted {
                            continue;
                        }
                        let new_title =
                            unique_copy_name(&file.local_title, CopyKind::Conflicted, now, &mut titles);
                        let result = self.rename_new_file(file, &new_title, log).await;
                        if matches!(result, Ok(true)) {
                            renamed += 1;
                        }
                        result.map(|_| ())
                    } else if let Some(remote) = claim {
                        claimed.insert(remote.remote_id.as_str());
                        debug!(file = %file.id, remote_id = %remote.remote_id, "Found remote file for new row");
                        self.fold(file, remote, FileChange::Added).await
                    } else {
                        Ok(())
                    }
                }
                Some(remote_id) => match remote_files.get_remote_file(remote_id) {
                    Some(remote) => {
                        processed.insert(remote.remote_id.as_str());
                        if !file.differs_from(remote) && self.local_content_present(file).await {
                            continue;
                        }
                        debug!(file = %file.id, remote_id, "Remote file changed");
                        let change = if file.remote_change.is_content_change() {
                            file.remote_change
                        } else {
                            FileChange::Modified
                        };
                        self.fold(file, remote, change).await
                    }
                    None if !file.remote_deleted => {
                        debug!(file = %file.id, remote_id, "Remote file removed");
                        self.db.fold_remote_deleted(file).await.map(|write| {
                            if write.is_stale() {
                                debug!(file = %file.id, "Row changed during fold, skipped");
                            }
                        })
                    }
                    None => Ok(()),
                },
            };
            if let Err(err) = folded {
                error!(file = %file.id, error = %format!("{err:#}"), "Failed to record remote state");
                let what = file.local_description();
                log.add_failure(&err.context(format!("Failed to record remote state of {what}")));
            }
        }

        for remote in remote_files.remote_files() {
            let id = remote.remote_id.as_str();
            if processed.contains(id) || known.contains(id) || remote_files.is_claimed_for_new(id)
            {
                continue;
            }
            match self.db.add_remote_file(provider, remote).await {
                Ok(new_id) => debug!(file = %new_id, remote_id = id, "Tracking new remote file"),
                Err(err) => {
                    error!(remote_id = id, error = %format!("{err:#}"), "Failed to track remote file");
                    log.add_failure(&err.context(format!("Failed to track remote file {id}")));
                }
            }
        }
        Ok(renamed)
    }

    /// Snapshot and change flag of one row, written together
    async fn fold(&self, file: &TrackedFile, remote: &RemoteFile, change: FileChange) -> Result<()> {
        let write = self.db.fold_remote_file(file, remote, change).await?;
        if write.is_stale() {
            debug!(file = %file.id, "Row changed during fold, skipped");
        }
        Ok(())
    }

    /// Give a new local row a title no other row uses
    async fn rename_new_file(
        &self,
        file: &TrackedFile,
        new_title: &str,
        log: &mut SyncLogRecord,
    ) -> Result<bool> {
        if self.db.relabel_as_local_add(file, new_title).await?.is_stale() {
            debug!(file = %file.id, "Row changed during fold, skipped");
            return Ok(false);
        }
        warn!(file = %file.id, new_title, "Local title already tracked, renamed");
        log.add_conflict(format!(
            "{} is already tracked, local copy kept as {new_title}",
            file.local_description()
        ));
        Ok(true)
    }

    async fn local_content_present(&self, file: &TrackedFile) -> bool {
        match file.local_file.as_deref() {
            Some(name) => self.local.exists(name).await,
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Resolve rows into operations
    // ------------------------------------------------------------------

    /// Plan the operations of this pass, resolving conflicts on the way
    ///
    /// Returns the operations in execution order and the number of
    /// conflicts resolved.
    pub async fn resolve_sync_opers(
        &self,
        provider: &DbProvider,
        log: &mut SyncLogRecord,
    ) -> Result<(Vec<SyncOper>, u32)> {
        let files = self.db.get_files(provider.id).await?;
        let mut titles: HashSet<String> =
            files.iter().map(|f| f.local_title.to_lowercase()).collect();
        let mut opers = Vec::new();
        let mut conflicts = 0;
        let now = Utc::now();

        use FileChange::{Added, Modified, None as Unchanged, Removed};
        for file in files {
            match (file.local_change, file.remote_change) {
                (Unchanged, Unchanged) => {}
                (Added | Modified, Unchanged) => opers.push(self.create_local_to_remote_oper(file)),
                (Unchanged, Added | Modified) => opers.push(self.create_remote_to_local_oper(file)),
                (Unchanged | Removed, Removed) | (Removed, Unchanged) => {
                    opers.push(self.create_rm_file_oper(file))
                }

                (Added | Modified, Added | Modified) => {
                    let new_title = unique_copy_name(&file.local_title, CopyKind::Conflicted, now, &mut titles);
                    let Some(new_id) = self.db.split_conflict(&file, &new_title).await? else {
                        warn!(file = %file.id, "File changed while resolving conflict");
                        continue;
                    };
                    conflicts += 1;
                    log.add_conflict(format!(
                        "{} changed on both sides, local copy kept as {new_title}",
                        file.local_description()
                    ));
                    if let Some(split) = self.reload(new_id).await? {
                        opers.push(self.create_remote_to_local_oper(split));
                    }
                    if let Some(original) = self.reload(file.id).await? {
                        opers.push(self.create_local_to_remote_oper(original));
                    }
                }

                (Added | Modified, Removed) => {
                    let new_title = unique_copy_name(&file.local_title, CopyKind::Recreated, now, &mut titles);
                    if self.db.relabel_as_local_add(&file, &new_title).await?.is_stale() {
                        warn!(file = %file.id, "File changed while resolving conflict");
                        continue;
                    }
                    conflicts += 1;
                    log.add_conflict(format!(
                        "{} removed remotely but changed locally, recreated as {new_title}",
                        file.local_description()
                    ));
                    if let Some(relabelled) = self.reload(file.id).await? {
                        opers.push(self.create_local_to_remote_oper(relabelled));
                    }
                }

                (Removed, Added | Modified) => {
                    let Some(new_id) = self.db.split_remote_to_new_file(&file).await? else {
                        warn!(file = %file.id, "File changed while resolving conflict");
                        continue;
                    };
                    conflicts += 1;
                    log.add_conflict(format!(
                        "{} removed locally but changed remotely, keeping remote copy",
                        file.remote_description()
                    ));
                    if let Some(split) = self.reload(new_id).await? {
                        opers.push(self.create_remote_to_local_oper(split));
                    }
                    if let Some(original) = self.reload(file.id).await? {
                        opers.push(self.create_rm_file_oper(original));
                    }
                }
            }
        }

        opers.sort_by_key(SyncOper::kind);
        Ok((opers, conflicts))
    }

    async fn reload(&self, id: TrackedFileId) -> Result<Option<TrackedFile>> {
        let file = self.db.get_file(id).await?;
        if file.is_none() {
            warn!(file = %id, "File vanished while resolving conflict");
        }
        Ok(file)
    }

    pub fn create_local_to_remote_oper(&self, file: TrackedFile) -> SyncOper {
        SyncOper::push(file)
    }

    pub fn create_remote_to_local_oper(&self, file: TrackedFile) -> SyncOper {
        SyncOper::pull(file)
    }

    pub fn create_rm_file_oper(&self, file: TrackedFile) -> SyncOper {
        SyncOper::remove(file)
    }

    // ------------------------------------------------------------------
    // Execute
    // ------------------------------------------------------------------

    async fn run_opers(&self, opers: &[SyncOper], log: &mut SyncLogRecord, result: &mut SyncResult) {
        let ctx = OperContext {
            store: self.store.as_ref(),
            db: self.db.as_ref(),
            local: &self.local,
        };

        for oper in opers {
            if self.cancel.is_cancelled() {
                info!("Sync pass cancelled");
                log.set_interrupted();
                break;
            }

            log.add_entry(oper.description());
            match oper.execute(&ctx).await {
                Ok((_, write)) => {
                    if write.is_stale() {
                        result.stale += 1;
                    }
                    match oper.kind() {
                        SyncOperKind::Push => result.files_pushed += 1,
                        SyncOperKind::Pull => result.files_pulled += 1,
                        SyncOperKind::Remove => result.files_removed += 1,
                    }
                }
                Err(err) => {
                    error!(
                        file = %oper.file().id,
                        kind = %oper.kind(),
                        error = %format!("{err:#}"),
                        "Sync operation failed"
                    );
                    result.failures += 1;
                    log.add_failure(&err);
                    if is_auth_error(&err) {
                        warn!("Authentication failed, skipping remaining operations");
                        log.set_auth_failed();
                        break;
                    }
                }
            }
        }
    }
}

/// Whether another row already uses the title of new row `file`
///
/// Rows with a remote identity always count; among new rows only earlier
/// ones do, so the first keeps its title.
fn title_taken(files: &[TrackedFile], file: &TrackedFile) -> bool {
    let title = file.local_title.to_lowercase();
    files.iter().any(|other| {
        other.id != file.id
            && (other.remote_id.is_some() || other.id < file.id)
            && (other.local_title.to_lowercase() == title
                || other
                    .remote_title
                    .as_deref()
                    .is_some_and(|t| t.to_lowercase() == title))
    })
}

/// Copy name not yet used by any row, compared case-insensitively
fn unique_copy_name(
    title: &str,
    kind: CopyKind,
    now: chrono::DateTime<Utc>,
    titles: &mut HashSet<String>,
) -> String {
    let name = ConflictNamer::generate_unique(title, kind, now, |candidate| {
        titles.contains(&candidate.to_lowercase())
    });
    titles.insert(name.to_lowercase());
    name
}
