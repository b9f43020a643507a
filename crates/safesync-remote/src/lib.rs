//! SafeSync Remote - provider adapters
//!
//! Implements [`IRemoteStore`] for the supported cloud providers and the
//! account link flows that authorize them.
//!
//! ## Modules
//!
//! - [`auth`] - OAuth2 PKCE flow and loopback redirect server (Dropbox)
//! - [`credentials`] - Keyring-backed [`ICredentialStore`]
//! - [`dropbox`] - Dropbox v2 API store and account linking
//! - [`http`] - Client construction and status classification
//! - [`owncloud`] - ownCloud WebDAV store and account linking

pub mod auth;
pub mod credentials;
pub mod dropbox;
pub mod http;
pub mod owncloud;

use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;

use safesync_core::config::Config;
use safesync_core::domain::{DbProvider, ProviderType};
use safesync_core::ports::{ICredentialStore, IRemoteStore};

pub use credentials::KeyringCredentialStore;
pub use dropbox::{DropboxAccount, DropboxStore};
pub use owncloud::{OwncloudAccount, OwncloudStore};

/// Failures of an account link flow
#[derive(Debug, Error)]
pub enum LinkError {
    /// A setting the flow needs is missing
    #[error("Not configured: {0}")]
    NotConfigured(&'static str),

    /// The redirect's state does not belong to this link attempt
    #[error("Authorization state mismatch, possible CSRF")]
    StateMismatch,

    /// The server URL is not an http(s) URL with a host
    #[error("Invalid server URL: {0}")]
    InvalidServerUrl(String),
}

/// Open the remote store of a provider row
pub fn open_store(
    provider: &DbProvider,
    config: &Config,
    creds: Arc<dyn ICredentialStore>,
) -> Result<Arc<dyn IRemoteStore>> {
    Ok(match provider.provider_type {
        ProviderType::Dropbox => Arc::new(DropboxStore::open(config, creds)?),
        ProviderType::Owncloud => {
            Arc::new(OwncloudStore::open(config, creds.as_ref(), &provider.acct)?)
        }
    })
}
