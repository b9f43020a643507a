//! Remote store port (driven/secondary port)
//!
//! Interface between the syncer and one authenticated provider account.
//! Dropbox and ownCloud adapters implement it in `safesync-remote`; tests
//! implement it in memory.
//!
//! ## Design Notes
//!
//! - Methods return `anyhow::Result`; adapters attach a [`RemoteError`]
//!   to classify failures the syncer reacts to (authentication, not
//!   found). Use [`is_auth_error`] and [`is_not_found`] to inspect a
//!   chain.
//! - The adapter owns token freshness: every call may refresh and persist
//!   credentials before touching the network.
//! - Downloads write into a caller-supplied path so the caller controls
//!   temp-file placement and the final rename.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ProviderType, RemoteFile, SyncRemoteFiles, TrackedFile};

// ============================================================================
// Error classification
// ============================================================================

/// Classified failure of a remote call
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Credentials missing, expired beyond refresh, or rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The addressed file or folder does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limited by the provider
    #[error("Too many requests, retry after {retry_after:?}")]
    TooManyRequests { retry_after: Option<Duration> },

    /// Provider-side failure (5xx or an error result)
    #[error("Server error: {0}")]
    Server(String),

    /// Transport failure before a response arrived
    #[error("Network error: {0}")]
    Network(String),

    /// A response that could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Whether an error chain carries [`RemoteError::Unauthorized`]
#[must_use]
pub fn is_auth_error(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<RemoteError>(), Some(RemoteError::Unauthorized(_))))
}

/// Whether an error chain carries [`RemoteError::NotFound`]
#[must_use]
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<RemoteError>(), Some(RemoteError::NotFound(_))))
}

// ============================================================================
// Tokens
// ============================================================================

/// OAuth tokens held by token-based adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    /// Bearer token for API requests
    pub access_token: String,
    /// Token for obtaining a new access token without user interaction
    pub refresh_token: Option<String>,
    /// When the access token expires
    pub expires_at: DateTime<Utc>,
}

impl Tokens {
    /// Returns true if the access token has expired
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Returns true if the access token will expire within the given duration
    #[must_use]
    pub fn expires_within(&self, duration: chrono::Duration) -> bool {
        Utc::now() + duration >= self.expires_at
    }
}

// ============================================================================
// IRemoteStore trait
// ============================================================================

/// One authenticated provider account
#[async_trait::async_trait]
pub trait IRemoteStore: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Name shown to the user for this account
    async fn resolve_display_name(&self) -> Result<String>;

    /// Stable account identifier stored as the provider's `acct`
    async fn resolve_account_id(&self) -> Result<String>;

    /// Gather the remote state needed to reconcile `files`
    ///
    /// Unresolved rows are matched by case-insensitive title and reported
    /// through [`SyncRemoteFiles::add_remote_file_for_new`]. Resolved rows
    /// are looked up by remote id unless already known removed. Files the
    /// provider holds that no row knows may be included so they can be
    /// pulled. A missing file is absent from the result, never an error.
    async fn get_sync_remote_files(&self, files: &[TrackedFile]) -> Result<SyncRemoteFiles>;

    /// Files directly inside `folder` ("" or "/" for the root)
    async fn list_files(&self, folder: &str) -> Result<Vec<RemoteFile>>;

    /// Current metadata of one file, `None` when it does not exist
    async fn fetch_metadata(&self, remote_id: &str) -> Result<Option<RemoteFile>>;

    /// Upload the content at `local_path` for `file`
    ///
    /// Existing rows overwrite their remote id; new rows create a file
    /// named after `local_title`. Returns the resulting metadata.
    async fn upload(&self, file: &TrackedFile, local_path: &Path) -> Result<RemoteFile>;

    /// Write the content of `remote_id` into `dest`
    async fn download(&self, remote_id: &str, dest: &Path) -> Result<()>;

    /// Delete `remote_id`
    async fn delete(&self, remote_id: &str) -> Result<()>;
}
