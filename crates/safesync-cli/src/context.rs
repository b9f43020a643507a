//! Shared wiring for the commands
//!
//! Loads the configuration, opens the sync database and the keyring, and
//! resolves the provider a command refers to.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use safesync_cache::{DatabasePool, SqliteSyncDb};
use safesync_core::config::Config;
use safesync_core::domain::DbProvider;
use safesync_core::ports::{ICredentialStore, IRemoteStore, ISyncDb};
use safesync_remote::KeyringCredentialStore;
use safesync_sync::{LocalFileStore, LocalFiles};
use tracing::debug;

use crate::output::{get_formatter, OutputFormat, OutputFormatter};

pub struct AppContext {
    pub config: Config,
    pub db: Arc<dyn ISyncDb>,
    pub creds: Arc<dyn ICredentialStore>,
    pub format: OutputFormat,
    quiet: bool,
}

impl AppContext {
    /// `config_path` overrides the default configuration file, which must
    /// then exist
    pub async fn open(config_path: Option<&str>, format: OutputFormat, quiet: bool) -> Result<Self> {
        let config = match config_path {
            Some(path) => Config::load(Path::new(path))
                .with_context(|| format!("Failed to load configuration from {path}"))?,
            None => Config::load_or_default(&Config::default_path()),
        };

        let db_path = config.db_path();
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let pool = DatabasePool::new(&db_path)
            .await
            .context("Failed to open database")?;
        debug!(db = %db_path.display(), "Opened sync database");

        Ok(Self {
            config,
            db: Arc::new(SqliteSyncDb::new(pool.pool().clone())),
            creds: Arc::new(KeyringCredentialStore::new()),
            format,
            quiet,
        })
    }

    pub fn formatter(&self) -> Box<dyn OutputFormatter> {
        get_formatter(self.format, self.quiet)
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    pub async fn provider(&self, selector: &str) -> Result<DbProvider> {
        let providers = self.db.get_providers().await?;
        find_provider(&providers, selector)
    }

    pub fn store(&self, provider: &DbProvider) -> Result<Arc<dyn IRemoteStore>> {
        safesync_remote::open_store(provider, &self.config, Arc::clone(&self.creds))
    }

    pub fn local_store(&self, provider: &DbProvider) -> LocalFileStore {
        LocalFileStore::new(self.config.files_dir(provider.id))
    }

    pub fn local_files(&self, provider: &DbProvider) -> LocalFiles {
        LocalFiles::new(Arc::clone(&self.db), self.local_store(provider), provider.id)
    }
}

/// Provider by id, account id or display name (case-insensitive)
pub fn find_provider(providers: &[DbProvider], selector: &str) -> Result<DbProvider> {
    if let Ok(id) = selector.parse::<i64>() {
        if let Some(p) = providers.iter().find(|p| p.id.as_i64() == id) {
            return Ok(p.clone());
        }
    }

    let matches: Vec<&DbProvider> = providers
        .iter()
        .filter(|p| {
            p.acct == selector
                || p
                    .display_name
                    .as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(selector))
        })
        .collect();

    match matches.as_slice() {
        [one] => Ok((*one).clone()),
        [] => bail!("No linked account matches '{selector}'. See 'safesync account list'."),
        many => bail!(
            "'{selector}' matches {} accounts; use the account id instead",
            many.len()
        ),
    }
}
