//! Sync command - run a manual sync pass now
//!
//! Syncs one account, or every linked account in turn. Ctrl+C interrupts
//! the running pass before its next operation; the pass log is still
//! saved.

use anyhow::Result;
use clap::Args;
use safesync_core::domain::sync_log::{FLAG_AUTH_FAILED, FLAG_NOT_CONNECTED};
use safesync_core::domain::{DbProvider, SyncLogRecord};
use safesync_sync::ProviderSync;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::context::AppContext;
use crate::output::{format_duration_ms, plural, OutputFormatter};

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Account id, account name or provider number; all accounts if omitted
    pub provider: Option<String>,
}

impl SyncCommand {
    pub async fn execute(&self, ctx: &AppContext) -> Result<()> {
        let fmt = ctx.formatter();

        let providers = match &self.provider {
            Some(selector) => vec![ctx.provider(selector).await?],
            None => ctx.db.get_providers().await?,
        };
        if providers.is_empty() {
            fmt.error("No linked accounts. Run 'safesync account link' first.");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let on_ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_ctrl_c.cancel();
            }
        });

        let mut results = Vec::new();
        for provider in &providers {
            if cancel.is_cancelled() {
                break;
            }
            fmt.info(&format!("Syncing {}...", provider.label()));
            let log = run_pass(ctx, provider, cancel.clone()).await?;
            if ctx.is_json() {
                results.push(log_json(provider, &log));
            } else {
                print_summary(&*fmt, &log);
            }
        }

        if ctx.is_json() {
            fmt.print_json(&serde_json::Value::Array(results));
        }
        Ok(())
    }
}

async fn run_pass(
    ctx: &AppContext,
    provider: &DbProvider,
    cancel: CancellationToken,
) -> Result<SyncLogRecord> {
    let store = ctx.store(provider)?;
    let sync = ProviderSync::new(ctx.db.clone(), store, ctx.local_store(provider), cancel)
        .with_log_retention_days(ctx.config.sync.log_retention_days);
    let log = sync.run(provider, true).await?;
    info!(provider = %provider.id, success = log.is_success(), "Manual sync finished");
    Ok(log)
}

fn log_duration_ms(log: &SyncLogRecord) -> u64 {
    log.end()
        .map(|end| (end - log.start()).num_milliseconds().max(0) as u64)
        .unwrap_or(0)
}

fn print_summary(fmt: &dyn OutputFormatter, log: &SyncLogRecord) {
    let flags = log.flags();
    if flags & FLAG_NOT_CONNECTED != 0 {
        if flags & FLAG_AUTH_FAILED != 0 {
            fmt.error(&format!(
                "{}: authorization failed, link the account again",
                log.account()
            ));
        } else {
            fmt.error(&format!("{}: not connected", log.account()));
        }
    } else if log.is_interrupted() {
        fmt.warn(&format!("{}: sync interrupted", log.account()));
    } else if log.entries().is_empty() && log.failures().is_empty() {
        fmt.success(&format!("{}: already up to date", log.account()));
    } else {
        fmt.success(&format!(
            "{}: {} in {}",
            log.account(),
            plural(log.entries().len() as u32, "operation"),
            format_duration_ms(log_duration_ms(log))
        ));
    }

    for entry in log.entries() {
        fmt.info(entry);
    }
    for conflict in log.conflicts() {
        fmt.warn(conflict);
    }
    if !log.failures().is_empty() {
        fmt.error(&plural(log.failures().len() as u32, "failure"));
        for failure in log.failures() {
            fmt.info(&format!("  - {failure}"));
        }
    }
}

fn log_json(provider: &DbProvider, log: &SyncLogRecord) -> serde_json::Value {
    let flags = log.flags();
    serde_json::json!({
        "provider": provider.id.as_i64(),
        "account": log.account(),
        "type": log.provider_type().as_str(),
        "success": log.is_success(),
        "not_connected": flags & FLAG_NOT_CONNECTED != 0,
        "auth_failed": log.is_auth_failed(),
        "interrupted": log.is_interrupted(),
        "duration_ms": log_duration_ms(log),
        "entries": log.entries(),
        "conflicts": log.conflicts(),
        "failures": log.failures(),
    })
}

#[cfg(test)]
mod tests {
    use safesync_core::domain::ProviderType;

    use super::*;

    #[test]
    fn test_log_json_flags() {
        let mut log = SyncLogRecord::new("Jo", ProviderType::Dropbox, true);
        log.add_entry("Sync remote to local: a.psafe3");
        log.add_failure(&anyhow::anyhow!("boom"));
        log.set_auth_failed();
        log.set_end(log.start() + chrono::Duration::milliseconds(1200));

        let provider = DbProvider {
            id: safesync_core::domain::ProviderId::new(4),
            provider_type: ProviderType::Dropbox,
            acct: "dbid:x".to_string(),
            display_name: Some("Jo".to_string()),
            sync_freq: 0,
            last_success: None,
            last_failure: None,
        };
        let json = log_json(&provider, &log);

        assert_eq!(json["provider"], 4);
        assert_eq!(json["type"], "dropbox");
        assert_eq!(json["success"], false);
        assert_eq!(json["auth_failed"], true);
        assert_eq!(json["duration_ms"], 1200);
        assert_eq!(json["entries"][0], "Sync remote to local: a.psafe3");
    }
}
