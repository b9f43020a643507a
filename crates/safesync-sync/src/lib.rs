//! SafeSync Sync - Provider sync passes
//!
//! Provides:
//! - Three-way reconciliation of tracked rows against a remote listing
//! - Ordered push/pull/remove operations with per-file failure isolation
//! - Keep-both conflict resolution
//! - Local content storage with atomic replacement
//!
//! ## Modules
//!
//! - [`syncer`] - One sync pass for one provider account
//! - [`oper`] - The push, pull and remove operations
//! - [`conflict`] - Names for conflicted and recreated copies
//! - [`local`] - Content files on disk and the local edit hooks
//! - [`runner`] - Connectivity check, pass execution and log bookkeeping

pub mod conflict;
pub mod local;
pub mod oper;
pub mod runner;
pub mod syncer;

use std::path::PathBuf;

use thiserror::Error;

pub use local::{LocalFileStore, LocalFiles};
pub use oper::{SyncOper, SyncOperKind};
pub use runner::{check_sync_connectivity, ProviderSync};
pub use syncer::{ProviderSyncer, SyncResult};

/// Errors raised by local content handling
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred during file operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A content file could not be moved into place
    #[error("Failed to replace {path}: {source}")]
    ReplaceFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A tracked row has no local content file
    #[error("No local content for file {0}")]
    MissingContent(String),

    /// Another row of the provider already uses this title (ignoring case)
    #[error("A file named {0} is already tracked")]
    TitleInUse(String),

    /// A domain-level error propagated from safesync-core
    #[error("Domain error: {0}")]
    DomainError(#[from] safesync_core::domain::errors::DomainError),
}
