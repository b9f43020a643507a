//! SafeSync Cache - Sync database persistence
//!
//! SQLite-based storage for:
//! - Linked provider accounts
//! - Tracked files with their remote snapshots and change flags
//! - Sync logs
//!
//! ## Architecture
//!
//! This crate implements the `ISyncDb` port from `safesync-core` using
//! SQLite as the storage backend. It is a driven (secondary) adapter in
//! the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteSyncDb`] - Full `ISyncDb` implementation
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use safesync_cache::{DatabasePool, SqliteSyncDb};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/safesync/safesync.db")).await?;
//! let db = SqliteSyncDb::new(pool.pool().clone());
//! // Use db as ISyncDb...
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod repository;

pub use pool::DatabasePool;
pub use repository::SqliteSyncDb;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be converted to its domain type
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}
