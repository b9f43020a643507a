//! Port definitions (hexagonal architecture interfaces)
//!
//! ## Ports Overview
//!
//! - [`IRemoteStore`] - One authenticated provider account (Dropbox, ownCloud)
//! - [`ISyncDb`] - Persistent tracked-file, provider and log storage
//! - [`ICredentialStore`] - Secret storage for provider credentials

pub mod credentials;
pub mod remote_store;
pub mod sync_db;

pub use credentials::ICredentialStore;
pub use remote_store::{is_auth_error, is_not_found, IRemoteStore, RemoteError, Tokens};
pub use sync_db::{ISyncDb, WriteOutcome};
