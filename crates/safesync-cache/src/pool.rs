//! Sync database pool
//!
//! The daemon and the CLI share one database file, so file pools run in
//! WAL mode with a busy timeout. The schema version lives in SQLite's
//! `user_version` pragma and each pending migration is applied once.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::CacheError;

/// Schema migrations in order; entry `n` moves the schema to version `n + 1`
const MIGRATIONS: &[&str] = &[include_str!("migrations/20261019_initial.sql")];

const FILE_POOL_SIZE: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Open (creating if needed) the database at `db_path` and migrate it
    ///
    /// Foreign keys are on, so deleting a provider deletes its files.
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| {
                CacheError::ConnectionFailed(format!("Cannot create {}: {e}", dir.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = Self::open(options, FILE_POOL_SIZE).await?;
        info!(path = %db_path.display(), "Opened sync database");
        Ok(pool)
    }

    /// Private in-memory database
    ///
    /// One connection only: every SQLite in-memory connection is a separate
    /// database.
    pub async fn in_memory() -> Result<Self, CacheError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?
            .foreign_keys(true);
        Self::open(options, 1).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Current schema version
    pub async fn schema_version(&self) -> Result<usize, CacheError> {
        user_version(&self.pool).await
    }

    async fn open(options: SqliteConnectOptions, size: u32) -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(size)
            .connect_with(options)
            .await
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?;

        migrate(&pool).await?;
        Ok(Self { pool })
    }
}

async fn user_version(pool: &SqlitePool) -> Result<usize, CacheError> {
    let version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    Ok(usize::try_from(version).unwrap_or(0))
}

async fn migrate(pool: &SqlitePool) -> Result<(), CacheError> {
    let current = user_version(pool).await?;
    if current > MIGRATIONS.len() {
        return Err(CacheError::MigrationFailed(format!(
            "database schema {current} is newer than this build ({})",
            MIGRATIONS.len()
        )));
    }

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current) {
        let version = index + 1;
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| CacheError::MigrationFailed(format!("schema {version}: {e}")))?;
        // PRAGMA does not take bind parameters
        sqlx::raw_sql(&format!("PRAGMA user_version = {version}"))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(version, "Applied schema migration");
    }
    Ok(())
}
