//! Credential storage port
//!
//! Provider adapters keep their secrets (OAuth tokens, app passwords)
//! behind this trait. Values are opaque strings, usually JSON.
//!
//! ## Design Notes
//!
//! - Synchronous: keyring backends block briefly and are called outside
//!   hot loops.
//! - `load` returns `Ok(None)` for a missing entry; only backend failures
//!   are errors.

use anyhow::Result;

/// Secret storage keyed by a short name (`dropbox`, `owncloud:jo@host`)
pub trait ICredentialStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>>;

    fn store(&self, key: &str, value: &str) -> Result<()>;

    /// Remove an entry; clearing a missing entry succeeds
    fn clear(&self, key: &str) -> Result<()>;
}
