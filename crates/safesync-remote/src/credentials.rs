//! Keyring-backed credential storage
//!
//! Secrets live in the OS credential store (GNOME Keyring, KDE Wallet,
//! macOS Keychain) under the service name "safesync", one entry per key.

use anyhow::{Context, Result};
use tracing::{debug, info};

use safesync_core::ports::ICredentialStore;

/// Keyring service name for all SafeSync secrets
const KEYRING_SERVICE: &str = "safesync";

/// [`ICredentialStore`] on top of the system keyring
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
        }
    }

    /// Store under a different service name, e.g. for a second profile
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, key).context("Failed to create keyring entry")
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ICredentialStore for KeyringCredentialStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => {
                debug!(key, "Loaded credential from keyring");
                Ok(Some(value))
            }
            Err(keyring::Error::NoEntry) => {
                debug!(key, "No credential in keyring");
                Ok(None)
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to read from keyring")),
        }
    }

    fn store(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store credential in keyring")?;
        debug!(key, "Stored credential in keyring");
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => {
                info!(key, "Cleared credential from keyring");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to delete from keyring")),
        }
    }
}
