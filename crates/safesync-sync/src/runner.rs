//! Pass runner
//!
//! Wraps a [`ProviderSyncer`] pass with the bookkeeping around it: the
//! connectivity check, the sync log record, log retention and the
//! provider's last success/failure times.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use safesync_core::domain::{DbProvider, SyncConnectivityResult, SyncLogRecord};
use safesync_core::ports::{is_auth_error, IRemoteStore, ISyncDb};

use crate::local::LocalFileStore;
use crate::syncer::ProviderSyncer;

/// Default number of days sync logs are kept
pub const DEFAULT_LOG_RETENTION_DAYS: u32 = 14;

/// Check that the account is reachable and resolve its display name
pub async fn check_sync_connectivity(store: &dyn IRemoteStore) -> Result<SyncConnectivityResult> {
    let display_name = store
        .resolve_display_name()
        .await
        .with_context(|| format!("{} not reachable", store.provider_type()))?;
    Ok(SyncConnectivityResult { display_name })
}

/// Runs complete passes for one provider account
pub struct ProviderSync {
    db: Arc<dyn ISyncDb>,
    store: Arc<dyn IRemoteStore>,
    local: LocalFileStore,
    log_retention: Duration,
    cancel: CancellationToken,
}

impl ProviderSync {
    pub fn new(
        db: Arc<dyn ISyncDb>,
        store: Arc<dyn IRemoteStore>,
        local: LocalFileStore,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            db,
            store,
            local,
            log_retention: Duration::days(i64::from(DEFAULT_LOG_RETENTION_DAYS)),
            cancel,
        }
    }

    pub fn with_log_retention_days(mut self, days: u32) -> Self {
        self.log_retention = Duration::days(i64::from(days));
        self
    }

    /// Run one pass and persist its log
    ///
    /// Pass failures end up in the returned record; an error is returned
    /// only when the bookkeeping itself fails.
    pub async fn run(&self, provider: &DbProvider, manual: bool) -> Result<SyncLogRecord> {
        let mut log = SyncLogRecord::new(provider.label(), provider.provider_type, manual);

        match check_sync_connectivity(self.store.as_ref()).await {
            Ok(conn) => {
                log.set_account(conn.display_name.clone());
                if self.cancel.is_cancelled() {
                    log.set_interrupted();
                } else {
                    let syncer = ProviderSyncer::new(
                        Arc::clone(&self.store),
                        Arc::clone(&self.db),
                        self.local.clone(),
                        self.cancel.clone(),
                    );
                    if let Err(err) = syncer.sync(provider, &conn, &mut log).await {
                        warn!(provider = %provider.id, error = %format!("{err:#}"), "Sync pass failed");
                        log.add_failure(&err);
                    }
                }
            }
            Err(err) => {
                warn!(provider = %provider.id, error = %format!("{err:#}"), "Provider not connected");
                log.add_failure(&err);
                log.set_not_connected();
                if is_auth_error(&err) {
                    log.set_auth_failed();
                }
            }
        }

        self.finish(provider, &mut log).await?;
        Ok(log)
    }

    async fn finish(&self, provider: &DbProvider, log: &mut SyncLogRecord) -> Result<()> {
        let now = Utc::now();
        log.set_end(now);

        self.db
            .add_sync_log(log)
            .await
            .context("Failed to save sync log")?;

        let pruned = self
            .db
            .delete_sync_logs_before(now - self.log_retention)
            .await?;
        if pruned.rows_affected() > 0 {
            info!(pruned = pruned.rows_affected(), "Pruned old sync logs");
        }

        let success = log.is_success();
        let stamped = self
            .db
            .update_provider_sync_time(provider.id, success, now)
            .await?;
        if stamped.is_stale() {
            debug!(provider = %provider.id, "Provider gone, sync time not recorded");
        }

        info!(
            provider = %provider.id,
            success,
            entries = log.entries().len(),
            failures = log.failures().len(),
            "Sync finished"
        );
        Ok(())
    }
}
