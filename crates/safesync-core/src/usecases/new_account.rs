//! Persisting a freshly linked account
//!
//! Finishing an account link yields a [`NewAccountTask`] when the
//! provider does not yet know which account it was authorized for. The
//! task runs once, after the link flow returned, and turns the
//! authorization into a provider row.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::{
    domain::DbProvider,
    ports::{IRemoteStore, ISyncDb},
};

/// One-shot task that records a newly authorized account
pub struct NewAccountTask {
    store: Arc<dyn IRemoteStore>,
    sync_freq: u32,
}

impl std::fmt::Debug for NewAccountTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewAccountTask")
            .field("sync_freq", &self.sync_freq)
            .finish_non_exhaustive()
    }
}

impl NewAccountTask {
    /// # Arguments
    ///
    /// * `store` - Remote store authorized by the link flow
    /// * `sync_freq` - Automatic sync interval in seconds for the new provider
    pub fn new(store: Arc<dyn IRemoteStore>, sync_freq: u32) -> Self {
        Self { store, sync_freq }
    }

    /// Resolve the account and add it to the database
    ///
    /// Linking an account that already has a provider row returns that row
    /// unchanged apart from a refreshed display name. Consumes the task.
    ///
    /// # Errors
    ///
    /// Returns an error if the account or display name cannot be resolved
    /// remotely, or if the database write fails.
    pub async fn run(self, db: &dyn ISyncDb) -> Result<DbProvider> {
        let provider_type = self.store.provider_type();
        let acct = self
            .store
            .resolve_account_id()
            .await
            .context("Failed to resolve account id")?;
        let display_name = self
            .store
            .resolve_display_name()
            .await
            .context("Failed to resolve account display name")?;

        let id = match db.get_provider_by_account(&acct, provider_type).await? {
            Some(existing) => existing.id,
            None => db.add_provider(&acct, provider_type, self.sync_freq).await?,
        };

        db.update_provider_display_name(id, &display_name)
            .await?
            .ensure_applied(format!("provider {id}"))?;

        db.get_provider(id)
            .await?
            .with_context(|| format!("Provider {id} vanished after it was added"))
    }
}
