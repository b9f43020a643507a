//! Domain entities and business rules
//!
//! - Newtypes for row identifiers
//! - Provider accounts and their types
//! - Tracked files with their change flags
//! - Remote file descriptors and per-pass listings
//! - Sync log records
//! - Domain-specific error types

pub mod errors;
pub mod newtypes;
pub mod provider;
pub mod remote_file;
pub mod sync_log;
pub mod tracked_file;

pub use errors::DomainError;
pub use newtypes::*;
pub use provider::{DbProvider, ProviderType, SyncConnectivityResult};
pub use remote_file::{RemoteFile, SyncRemoteFiles};
pub use sync_log::{SyncLogEntry, SyncLogRecord};
pub use tracked_file::{FileChange, TrackedFile};
