//! SQLite implementation of ISyncDb
//!
//! Concrete storage for the sync database port defined in safesync-core.
//!
//! ## Type Mapping
//!
//! | Domain Type                  | SQL Type | Strategy                                   |
//! |------------------------------|----------|--------------------------------------------|
//! | ProviderId, TrackedFileId    | INTEGER  | `as_i64()` / `From<i64>`                   |
//! | ProviderType, FileChange     | TEXT     | `as_str()` / `FromStr`                     |
//! | DateTime<Utc>                | TEXT     | RFC 3339 with millis, `Z` suffix           |
//! | mod dates                    | INTEGER  | epoch millis, -1 when unknown              |
//! | bool                         | INTEGER  | 0 / 1                                      |
//!
//! Timestamps are always written in the same RFC 3339 shape so that
//! string comparison in SQL orders them chronologically.

use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use safesync_core::domain::{
    DbProvider, FileChange, ProviderId, ProviderType, RemoteFile,
    SyncLogEntry, SyncLogId, SyncLogRecord, TrackedFile, TrackedFileId,
};
use safesync_core::ports::{ISyncDb, WriteOutcome};

use crate::CacheError;

/// SQLite-based implementation of the sync database port
pub struct SqliteSyncDb {
    pool: SqlitePool,
}

impl SqliteSyncDb {
    /// Creates a new repository instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Conversion helpers
// ============================================================================

fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a DateTime<Utc> from an ISO 8601 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            CacheError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, CacheError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

fn parse_change(s: &str) -> Result<FileChange, CacheError> {
    FileChange::from_str(s).map_err(|e| CacheError::SerializationError(e.to_string()))
}

// ============================================================================
// Row mapping functions
// ============================================================================

fn provider_from_row(row: &SqliteRow) -> Result<DbProvider, CacheError> {
    let type_str: String = row.get("type");
    let provider_type = ProviderType::from_str(&type_str)
        .map_err(|e| CacheError::SerializationError(e.to_string()))?;

    Ok(DbProvider {
        id: ProviderId::new(row.get("id")),
        provider_type,
        acct: row.get("acct"),
        display_name: row.get("display_name"),
        sync_freq: row.get("sync_freq"),
        last_success: parse_optional_datetime(row.get("sync_last_success"))?,
        last_failure: parse_optional_datetime(row.get("sync_last_failure"))?,
    })
}

fn tracked_file_from_row(row: &SqliteRow) -> Result<TrackedFile, CacheError> {
    let local_change: String = row.get("local_change");
    let remote_change: String = row.get("remote_change");

    Ok(TrackedFile {
        id: TrackedFileId::new(row.get("id")),
        provider_id: ProviderId::new(row.get("provider_id")),
        local_file: row.get("local_file"),
        local_title: row.get("local_title"),
        local_folder: row.get("local_folder"),
        local_mod_date: row.get("local_mod_date"),
        local_deleted: row.get("local_deleted"),
        remote_id: row.get("remote_id"),
        remote_title: row.get("remote_title"),
        remote_folder: row.get("remote_folder"),
        remote_mod_date: row.get("remote_mod_date"),
        remote_hash: row.get("remote_hash"),
        remote_deleted: row.get("remote_deleted"),
        local_change: parse_change(&local_change)?,
        remote_change: parse_change(&remote_change)?,
        version: row.get("version"),
    })
}

fn sync_log_from_row(row: &SqliteRow) -> Result<SyncLogEntry, CacheError> {
    let start: String = row.get("start");
    Ok(SyncLogEntry {
        id: SyncLogId::new(row.get("id")),
        account: row.get("acct"),
        start: parse_datetime(&start)?,
        end: parse_optional_datetime(row.get("end"))?,
        flags: row.get("flags"),
        log: row.get("log"),
        failures: row.get("failures"),
    })
}

const RESET_REMOTE_SNAPSHOT: &str = "remote_id = NULL, remote_title = NULL, \
     remote_folder = NULL, remote_mod_date = -1, remote_hash = NULL, \
     remote_deleted = 0, remote_change = 'none'";

/// New row holding the remote snapshot of `file`, to be pulled
async fn insert_split_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    file: &TrackedFile,
) -> anyhow::Result<TrackedFileId> {
    let remote_id = file
        .remote_id
        .as_deref()
        .with_context(|| format!("File {} has no remote identity to split", file.id))?;

    let title = file.remote_title.as_deref().unwrap_or(&file.local_title);
    let result = sqlx::query(
        "INSERT INTO files \
         (provider_id, local_title, remote_id, remote_title, remote_folder, \
          remote_mod_date, remote_hash, remote_change) \
         VALUES (?, ?, ?, ?, ?, ?, ?, 'added')",
    )
    .bind(file.provider_id.as_i64())
    .bind(title)
    .bind(remote_id)
    .bind(title)
    .bind(&file.remote_folder)
    .bind(file.remote_mod_date)
    .bind(&file.remote_hash)
    .execute(&mut **tx)
    .await?;
    Ok(TrackedFileId::new(result.last_insert_rowid()))
}

// ============================================================================
// ISyncDb implementation
// ============================================================================

#[async_trait::async_trait]
impl ISyncDb for SqliteSyncDb {
    // --- Providers ---

    async fn add_provider(
        &self,
        acct: &str,
        provider_type: ProviderType,
        sync_freq: u32,
    ) -> anyhow::Result<ProviderId> {
        let result = sqlx::query("INSERT INTO providers (type, acct, sync_freq) VALUES (?, ?, ?)")
            .bind(provider_type.as_str())
            .bind(acct)
            .bind(sync_freq)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to add {provider_type} provider {acct}"))?;

        let id = ProviderId::new(result.last_insert_rowid());
        tracing::debug!(provider = %id, %provider_type, "Added provider");
        Ok(id)
    }

    async fn delete_provider(&self, id: ProviderId) -> anyhow::Result<WriteOutcome> {
        let mut tx = self.pool.begin().await?;
        let files = sqlx::query("DELETE FROM files WHERE provider_id = ?")
            .bind(id.as_i64())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM providers WHERE id = ?")
            .bind(id.as_i64())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(provider = %id, files = files.rows_affected(), "Deleted provider");
        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }

    async fn get_provider(&self, id: ProviderId) -> anyhow::Result<Option<DbProvider>> {
        let row = sqlx::query("SELECT * FROM providers WHERE id = ?")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(provider_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_provider_by_account(
        &self,
        acct: &str,
        provider_type: ProviderType,
    ) -> anyhow::Result<Option<DbProvider>> {
        let row = sqlx::query("SELECT * FROM providers WHERE acct = ? AND type = ?")
            .bind(acct)
            .bind(provider_type.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(provider_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_providers(&self) -> anyhow::Result<Vec<DbProvider>> {
        let rows = sqlx::query("SELECT * FROM providers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let providers = rows
            .iter()
            .map(provider_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(providers)
    }

    async fn update_provider_display_name(
        &self,
        id: ProviderId,
        display_name: &str,
    ) -> anyhow::Result<WriteOutcome> {
        let result = sqlx::query("UPDATE providers SET display_name = ? WHERE id = ?")
            .bind(display_name)
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }

    async fn update_provider_sync_freq(
        &self,
        id: ProviderId,
        sync_freq: u32,
    ) -> anyhow::Result<WriteOutcome> {
        let result = sqlx::query("UPDATE providers SET sync_freq = ? WHERE id = ?")
            .bind(sync_freq)
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }

    async fn update_provider_sync_time(
        &self,
        id: ProviderId,
        success: bool,
        at: DateTime<Utc>,
    ) -> anyhow::Result<WriteOutcome> {
        let sql = if success {
            "UPDATE providers SET sync_last_success = ? WHERE id = ?"
        } else {
            "UPDATE providers SET sync_last_failure = ? WHERE id = ?"
        };
        let result = sqlx::query(sql)
            .bind(format_datetime(at))
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }

    // --- Tracked files ---

    async fn get_file(&self, id: TrackedFileId) -> anyhow::Result<Option<TrackedFile>> {
        let row = sqlx::query("SELECT * FROM files WHERE id = ?")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(tracked_file_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_file_by_remote_id(
        &self,
        provider: ProviderId,
        remote_id: &str,
    ) -> anyhow::Result<Option<TrackedFile>> {
        let row = sqlx::query("SELECT * FROM files WHERE provider_id = ? AND remote_id = ?")
            .bind(provider.as_i64())
            .bind(remote_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(tracked_file_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_files(&self, provider: ProviderId) -> anyhow::Result<Vec<TrackedFile>> {
        let rows = sqlx::query("SELECT * FROM files WHERE provider_id = ? ORDER BY id")
            .bind(provider.as_i64())
            .fetch_all(&self.pool)
            .await?;

        let files = rows
            .iter()
            .map(tracked_file_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(files)
    }

    async fn add_local_file(
        &self,
        provider: ProviderId,
        title: &str,
        mod_date: i64,
    ) -> anyhow::Result<TrackedFileId> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO files (provider_id, local_title, local_mod_date, local_change) \
             VALUES (?, ?, ?, 'added')",
        )
        .bind(provider.as_i64())
        .bind(title)
        .bind(mod_date)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to add local file {title}"))?;

        let id = TrackedFileId::new(result.last_insert_rowid());
        sqlx::query("UPDATE files SET local_file = ? WHERE id = ?")
            .bind(TrackedFile::local_file_name(id))
            .bind(id.as_i64())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::trace!(file = %id, provider = %provider, title, "Added local file");
        Ok(id)
    }

    async fn add_remote_file(
        &self,
        provider: ProviderId,
        remote: &RemoteFile,
    ) -> anyhow::Result<TrackedFileId> {
        let result = sqlx::query(
            "INSERT INTO files \
             (provider_id, local_title, remote_id, remote_title, remote_folder, \
              remote_mod_date, remote_hash, remote_change) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 'added')",
        )
        .bind(provider.as_i64())
        .bind(&remote.title)
        .bind(&remote.remote_id)
        .bind(&remote.title)
        .bind(&remote.folder)
        .bind(remote.mod_date)
        .bind(&remote.hash)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to add remote file {}", remote.remote_id))?;

        let id = TrackedFileId::new(result.last_insert_rowid());
        tracing::trace!(file = %id, remote_id = %remote.remote_id, "Added remote file");
        Ok(id)
    }

    async fn update_local_file(
        &self,
        id: TrackedFileId,
        local_file: Option<&str>,
        title: &str,
        folder: Option<&str>,
        mod_date: i64,
    ) -> anyhow::Result<WriteOutcome> {
        let result = sqlx::query(
            "UPDATE files SET local_file = ?, local_title = ?, local_folder = ?, \
             local_mod_date = ?, version = version + 1 WHERE id = ?",
        )
        .bind(local_file)
        .bind(title)
        .bind(folder)
        .bind(mod_date)
        .bind(id.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }

    async fn update_local_file_change(
        &self,
        id: TrackedFileId,
        change: FileChange,
    ) -> anyhow::Result<WriteOutcome> {
        let result =
            sqlx::query("UPDATE files SET local_change = ?, version = version + 1 WHERE id = ?")
                .bind(change.as_str())
                .bind(id.as_i64())
                .execute(&self.pool)
                .await?;
        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }

    async fn update_local_file_deleted(&self, id: TrackedFileId) -> anyhow::Result<WriteOutcome> {
        let result = sqlx::query(
            "UPDATE files SET local_deleted = 1, local_change = 'removed', \
             version = version + 1 WHERE id = ?",
        )
        .bind(id.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }

    async fn update_remote_file(
        &self,
        id: TrackedFileId,
        remote: &RemoteFile,
    ) -> anyhow::Result<WriteOutcome> {
        let result = sqlx::query(
            "UPDATE files SET remote_id = ?, remote_title = ?, remote_folder = ?, \
             remote_mod_date = ?, remote_hash = ?, remote_deleted = 0, \
             version = version + 1 WHERE id = ?",
        )
        .bind(&remote.remote_id)
        .bind(&remote.title)
        .bind(&remote.folder)
        .bind(remote.mod_date)
        .bind(&remote.hash)
        .bind(id.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }

    async fn update_remote_file_change(
        &self,
        id: TrackedFileId,
        change: FileChange,
    ) -> anyhow::Result<WriteOutcome> {
        let result =
            sqlx::query("UPDATE files SET remote_change = ?, version = version + 1 WHERE id = ?")
                .bind(change.as_str())
                .bind(id.as_i64())
                .execute(&self.pool)
                .await?;
        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }

    async fn update_remote_file_deleted(&self, id: TrackedFileId) -> anyhow::Result<WriteOutcome> {
        let result = sqlx::query(
            "UPDATE files SET remote_deleted = 1, remote_change = 'removed', \
             version = version + 1 WHERE id = ?",
        )
        .bind(id.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }

    async fn fold_remote_file(
        &self,
        file: &TrackedFile,
        remote: &RemoteFile,
        change: FileChange,
    ) -> anyhow::Result<WriteOutcome> {
        let result = sqlx::query(
            "UPDATE files SET remote_id = ?, remote_title = ?, remote_folder = ?, \
             remote_mod_date = ?, remote_hash = ?, remote_deleted = 0, remote_change = ?, \
             version = version + 1 WHERE id = ? AND version = ?",
        )
        .bind(&remote.remote_id)
        .bind(&remote.title)
        .bind(&remote.folder)
        .bind(remote.mod_date)
        .bind(&remote.hash)
        .bind(change.as_str())
        .bind(file.id.as_i64())
        .bind(file.version)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to record remote {} for file {}", remote.remote_id, file.id))?;
        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }

    async fn fold_remote_deleted(&self, file: &TrackedFile) -> anyhow::Result<WriteOutcome> {
        let result = sqlx::query(
            "UPDATE files SET remote_deleted = 1, remote_change = 'removed', \
             version = version + 1 WHERE id = ? AND version = ?",
        )
        .bind(file.id.as_i64())
        .bind(file.version)
        .execute(&self.pool)
        .await?;
        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }

    async fn split_conflict(
        &self,
        file: &TrackedFile,
        new_title: &str,
    ) -> anyhow::Result<Option<TrackedFileId>> {
        let mut tx = self.pool.begin().await?;
        let relabel = sqlx::query(&format!(
            "UPDATE files SET local_title = ?, local_change = 'added', \
             {RESET_REMOTE_SNAPSHOT}, version = version + 1 \
             WHERE id = ? AND version = ?"
        ))
        .bind(new_title)
        .bind(file.id.as_i64())
        .bind(file.version)
        .execute(&mut *tx)
        .await?;
        if relabel.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let new_id = insert_split_row(&mut tx, file).await?;
        tx.commit().await?;
        tracing::debug!(file = %file.id, new_file = %new_id, new_title, "Split conflict");
        Ok(Some(new_id))
    }

    async fn split_remote_to_new_file(
        &self,
        file: &TrackedFile,
    ) -> anyhow::Result<Option<TrackedFileId>> {
        let mut tx = self.pool.begin().await?;
        let reset = sqlx::query(&format!(
            "UPDATE files SET {RESET_REMOTE_SNAPSHOT}, version = version + 1 \
             WHERE id = ? AND version = ?"
        ))
        .bind(file.id.as_i64())
        .bind(file.version)
        .execute(&mut *tx)
        .await?;
        if reset.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let new_id = insert_split_row(&mut tx, file).await?;
        tx.commit().await?;
        tracing::debug!(file = %file.id, new_file = %new_id, "Split remote file to new row");
        Ok(Some(new_id))
    }

    async fn relabel_as_local_add(
        &self,
        file: &TrackedFile,
        new_title: &str,
    ) -> anyhow::Result<WriteOutcome> {
        let result = sqlx::query(&format!(
            "UPDATE files SET local_title = ?, local_change = 'added', \
             {RESET_REMOTE_SNAPSHOT}, version = version + 1 \
             WHERE id = ? AND version = ?"
        ))
        .bind(new_title)
        .bind(file.id.as_i64())
        .bind(file.version)
        .execute(&self.pool)
        .await?;
        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }

    async fn complete_pull(
        &self,
        file: &TrackedFile,
        local_file: &str,
    ) -> anyhow::Result<WriteOutcome> {
        let title = file.remote_title.as_deref().unwrap_or(&file.local_title);
        let result = sqlx::query(
            "UPDATE files SET local_file = ?, local_title = ?, local_folder = ?, \
             local_mod_date = ?, local_deleted = 0, local_change = 'none', \
             remote_change = 'none', version = version + 1 \
             WHERE id = ? AND version = ?",
        )
        .bind(local_file)
        .bind(title)
        .bind(&file.remote_folder)
        .bind(file.remote_mod_date)
        .bind(file.id.as_i64())
        .bind(file.version)
        .execute(&self.pool)
        .await?;

        tracing::trace!(file = %file.id, applied = result.rows_affected(), "Completed pull");
        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }

    async fn complete_push(
        &self,
        file: &TrackedFile,
        remote: &RemoteFile,
    ) -> anyhow::Result<WriteOutcome> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE files SET remote_id = ?, remote_title = ?, remote_folder = ?, \
             remote_mod_date = ?, remote_hash = ?, remote_deleted = 0, \
             remote_change = 'none', local_title = ?, local_folder = ?, \
             local_mod_date = ?, local_deleted = 0, local_change = 'none', \
             version = version + 1 WHERE id = ? AND version = ?",
        )
        .bind(&remote.remote_id)
        .bind(&remote.title)
        .bind(&remote.folder)
        .bind(remote.mod_date)
        .bind(&remote.hash)
        .bind(&remote.title)
        .bind(&remote.folder)
        .bind(remote.mod_date)
        .bind(file.id.as_i64())
        .bind(file.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Local side moved on during the upload: keep the new remote
            // snapshot, leave the local change pending.
            sqlx::query(
                "UPDATE files SET remote_id = ?, remote_title = ?, remote_folder = ?, \
                 remote_mod_date = ?, remote_hash = ?, remote_deleted = 0, \
                 remote_change = 'none', version = version + 1 WHERE id = ?",
            )
            .bind(&remote.remote_id)
            .bind(&remote.title)
            .bind(&remote.folder)
            .bind(remote.mod_date)
            .bind(&remote.hash)
            .bind(file.id.as_i64())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::trace!(file = %file.id, applied = result.rows_affected(), "Completed push");
        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }

    async fn complete_remove(&self, file: &TrackedFile) -> anyhow::Result<WriteOutcome> {
        let result = sqlx::query("DELETE FROM files WHERE id = ? AND version = ?")
            .bind(file.id.as_i64())
            .bind(file.version)
            .execute(&self.pool)
            .await?;
        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }

    async fn remove_file(&self, id: TrackedFileId) -> anyhow::Result<WriteOutcome> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }

    // --- Sync logs ---

    async fn add_sync_log(&self, record: &SyncLogRecord) -> anyhow::Result<SyncLogId> {
        let result = sqlx::query(
            "INSERT INTO sync_logs (acct, start, end, flags, log, failures) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(record.account())
        .bind(format_datetime(record.start()))
        .bind(record.end().map(format_datetime))
        .bind(record.flags())
        .bind(record.log_text())
        .bind(record.failures_text())
        .execute(&self.pool)
        .await?;
        Ok(SyncLogId::new(result.last_insert_rowid()))
    }

    async fn get_sync_logs(&self, limit: u32) -> anyhow::Result<Vec<SyncLogEntry>> {
        let rows = sqlx::query("SELECT * FROM sync_logs ORDER BY start DESC, id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let logs = rows
            .iter()
            .map(sync_log_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    async fn delete_sync_logs_before(&self, before: DateTime<Utc>) -> anyhow::Result<WriteOutcome> {
        let result = sqlx::query("DELETE FROM sync_logs WHERE start < ?")
            .bind(format_datetime(before))
            .execute(&self.pool)
            .await?;
        tracing::trace!(deleted = result.rows_affected(), "Pruned sync logs");
        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }
}
