//! SafeSync Daemon - Background synchronization service
//!
//! Runs as a user service and syncs every linked provider account on its
//! own interval:
//! - Wakes every `sync.poll_interval` seconds
//! - Runs a pass for each provider whose `sync_freq` has elapsed, all due
//!   providers concurrently
//! - Shuts down gracefully on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! A `CancellationToken` is cancelled by the signal handler. Each pass
//! gets a child token, so a pass in flight stops before its next
//! operation and its log is saved as interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use safesync_cache::{DatabasePool, SqliteSyncDb};
use safesync_core::config::{Config, LoggingConfig};
use safesync_core::domain::{DbProvider, SyncLogRecord};
use safesync_core::ports::{ICredentialStore, IRemoteStore, ISyncDb};
use safesync_remote::KeyringCredentialStore;
use safesync_sync::{LocalFileStore, ProviderSync};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Opens the remote store of a provider row
type StoreOpener = Arc<dyn Fn(&DbProvider) -> Result<Arc<dyn IRemoteStore>> + Send + Sync>;

// ============================================================================
// DaemonService
// ============================================================================

/// Schedules sync passes for all linked providers
struct DaemonService {
    config: Config,
    db: Arc<dyn ISyncDb>,
    open_store: StoreOpener,
    /// Token for signalling graceful shutdown to all passes
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Open the database and the keyring-backed provider stores
    async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let db_path = config.db_path();
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let pool = DatabasePool::new(&db_path)
            .await
            .context("Failed to open database")?;
        let db: Arc<dyn ISyncDb> = Arc::new(SqliteSyncDb::new(pool.pool().clone()));
        info!(db = %db_path.display(), "Opened sync database");

        let creds: Arc<dyn ICredentialStore> = Arc::new(KeyringCredentialStore::new());
        let store_config = config.clone();
        let open_store: StoreOpener = Arc::new(move |provider: &DbProvider| {
            safesync_remote::open_store(provider, &store_config, Arc::clone(&creds))
        });

        Ok(Self::with_parts(config, db, open_store, shutdown))
    }

    fn with_parts(
        config: Config,
        db: Arc<dyn ISyncDb>,
        open_store: StoreOpener,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            db,
            open_store,
            shutdown,
        }
    }

    /// Poll until shutdown
    ///
    /// The first tick fires immediately, so due providers sync at
    /// startup.
    async fn run(&self) -> Result<()> {
        let poll_secs = self.config.sync.poll_interval;
        info!(poll_interval_secs = poll_secs, "Starting sync loop");

        let mut interval = tokio::time::interval(Duration::from_secs(poll_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
            self.sync_due(Utc::now()).await;
        }

        info!("Sync loop terminated");
        Ok(())
    }

    /// Run a pass for every provider due at `now` and wait for all of them
    async fn sync_due(&self, now: DateTime<Utc>) -> Vec<SyncLogRecord> {
        let providers = match self.db.get_providers().await {
            Ok(providers) => providers,
            Err(err) => {
                error!(error = %format!("{err:#}"), "Failed to load providers");
                return Vec::new();
            }
        };

        let mut passes = JoinSet::new();
        for provider in providers.into_iter().filter(|p| p.is_sync_due(now)) {
            let store = match (self.open_store)(&provider) {
                Ok(store) => store,
                Err(err) => {
                    warn!(
                        provider = %provider.id,
                        error = %format!("{err:#}"),
                        "Cannot open provider store, skipping"
                    );
                    continue;
                }
            };

            let sync = ProviderSync::new(
                Arc::clone(&self.db),
                store,
                LocalFileStore::new(self.config.files_dir(provider.id)),
                self.shutdown.child_token(),
            )
            .with_log_retention_days(self.config.sync.log_retention_days);

            info!(provider = %provider.id, account = %provider.label(), "Starting sync");
            passes.spawn(async move {
                let result = sync.run(&provider, false).await;
                (provider, result)
            });
        }

        let mut logs = Vec::new();
        while let Some(joined) = passes.join_next().await {
            match joined {
                Ok((provider, Ok(log))) => {
                    if !log.is_success() {
                        warn!(
                            provider = %provider.id,
                            failures = %log.failures_text(),
                            "Sync finished with failures"
                        );
                    }
                    logs.push(log);
                }
                Ok((provider, Err(err))) => {
                    error!(provider = %provider.id, error = %format!("{err:#}"), "Sync bookkeeping failed");
                }
                Err(err) => error!(error = %err, "Sync task aborted"),
            }
        }
        logs
    }
}

// ============================================================================
// Signals and tracing
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }

    token.cancel();
}

/// `RUST_LOG` wins over the configured level
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::default_path();
    let config = Config::load_or_default(&config_path);
    init_tracing(&config.logging);

    info!(config_path = %config_path.display(), "SafeSync daemon starting (safesyncd)");
    for problem in config.validate() {
        warn!(field = %problem.field, "Invalid configuration: {}", problem.message);
    }

    let shutdown_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown_token.clone()));

    let service = DaemonService::new(config, shutdown_token).await?;
    let result = service.run().await;

    match &result {
        Ok(()) => info!("SafeSync daemon shut down gracefully"),
        Err(e) => error!(error = %e, "SafeSync daemon exiting with error"),
    }
    result
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::path::Path;

    use safesync_core::config::ConfigBuilder;
    use safesync_core::domain::sync_log::FLAG_INTERRUPTED;
    use safesync_core::domain::{ProviderType, RemoteFile, SyncRemoteFiles, TrackedFile};

    use super::*;

    /// Reachable account with nothing stored
    struct EmptyStore;

    #[async_trait::async_trait]
    impl IRemoteStore for EmptyStore {
        fn provider_type(&self) -> ProviderType {
            ProviderType::Owncloud
        }
        async fn resolve_display_name(&self) -> Result<String> {
            Ok("jo (https://cloud.example.com)".to_string())
        }
        async fn resolve_account_id(&self) -> Result<String> {
            Ok("jo@cloud.example.com".to_string())
        }
        async fn get_sync_remote_files(&self, _files: &[TrackedFile]) -> Result<SyncRemoteFiles> {
            Ok(SyncRemoteFiles::new())
        }
        async fn list_files(&self, _folder: &str) -> Result<Vec<RemoteFile>> {
            Ok(Vec::new())
        }
        async fn fetch_metadata(&self, _remote_id: &str) -> Result<Option<RemoteFile>> {
            Ok(None)
        }
        async fn upload(&self, _file: &TrackedFile, _local_path: &Path) -> Result<RemoteFile> {
            anyhow::bail!("read-only")
        }
        async fn download(&self, _remote_id: &str, _dest: &Path) -> Result<()> {
            anyhow::bail!("empty")
        }
        async fn delete(&self, _remote_id: &str) -> Result<()> {
            Ok(())
        }
    }

    async fn setup(shutdown: CancellationToken) -> (DaemonService, Arc<dyn ISyncDb>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::in_memory().await.unwrap();
        let db: Arc<dyn ISyncDb> = Arc::new(SqliteSyncDb::new(pool.pool().clone()));
        let config = ConfigBuilder::new()
            .sync_data_dir(dir.path().to_path_buf())
            .sync_poll_interval(1)
            .build();
        let open_store: StoreOpener =
            Arc::new(|_: &DbProvider| -> Result<Arc<dyn IRemoteStore>> { Ok(Arc::new(EmptyStore)) });
        let service = DaemonService::with_parts(config, Arc::clone(&db), open_store, shutdown);
        (service, db, dir)
    }

    #[tokio::test]
    async fn test_due_provider_is_synced_once_per_interval() {
        let (service, db, _dir) = setup(CancellationToken::new()).await;
        let id = db
            .add_provider("jo@cloud.example.com", ProviderType::Owncloud, 900)
            .await
            .unwrap();

        let logs = service.sync_due(Utc::now()).await;
        assert_eq!(logs.len(), 1);
        assert!(logs[0].is_success());

        let provider = db.get_provider(id).await.unwrap().unwrap();
        assert!(provider.last_success.is_some());

        let logs = service.sync_due(Utc::now()).await;
        assert!(logs.is_empty(), "not due again within sync_freq");

        let later = Utc::now() + chrono::Duration::seconds(901);
        assert_eq!(service.sync_due(later).await.len(), 1);
        assert_eq!(db.get_sync_logs(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_manual_only_provider_is_skipped() {
        let (service, db, _dir) = setup(CancellationToken::new()).await;
        db.add_provider("jo@cloud.example.com", ProviderType::Owncloud, 0)
            .await
            .unwrap();

        assert!(service.sync_due(Utc::now()).await.is_empty());
    }

    #[tokio::test]
    async fn test_store_open_failure_skips_provider() {
        let (mut service, db, _dir) = setup(CancellationToken::new()).await;
        service.open_store = Arc::new(|_: &DbProvider| -> Result<Arc<dyn IRemoteStore>> {
            anyhow::bail!("keyring locked")
        });
        db.add_provider("jo@cloud.example.com", ProviderType::Owncloud, 900)
            .await
            .unwrap();

        assert!(service.sync_due(Utc::now()).await.is_empty());
        assert!(db.get_sync_logs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_pass_and_stops_loop() {
        let shutdown = CancellationToken::new();
        let (service, db, _dir) = setup(shutdown.clone()).await;
        db.add_provider("jo@cloud.example.com", ProviderType::Owncloud, 900)
            .await
            .unwrap();

        shutdown.cancel();
        let logs = service.sync_due(Utc::now()).await;
        assert_eq!(logs.len(), 1);
        assert!(logs[0].is_interrupted());

        let stored = db.get_sync_logs(1).await.unwrap();
        assert!(stored[0].has_flag(FLAG_INTERRUPTED));

        tokio::time::timeout(Duration::from_secs(5), service.run())
            .await
            .expect("loop stops once cancelled")
            .unwrap();
    }
}
