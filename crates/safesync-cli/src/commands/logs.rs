//! Logs command - show recent sync logs
//!
//! Each pass stores one log with its operations, failures and flags.
//! Logs older than `sync.log_retention_days` are pruned after each pass.

use anyhow::Result;
use clap::Args;
use safesync_core::domain::sync_log::{
    FLAG_AUTH_FAILED, FLAG_INTERRUPTED, FLAG_MANUAL, FLAG_NOT_CONNECTED,
};
use safesync_core::domain::SyncLogEntry;

use crate::context::AppContext;

#[derive(Debug, Args)]
pub struct LogsCommand {
    /// Maximum number of logs to show, newest first
    #[arg(long, default_value = "20")]
    pub limit: u32,

    /// Only show logs with failures
    #[arg(long)]
    pub failures: bool,
}

impl LogsCommand {
    pub async fn execute(&self, ctx: &AppContext) -> Result<()> {
        let fmt = ctx.formatter();
        let logs: Vec<SyncLogEntry> = ctx
            .db
            .get_sync_logs(self.limit)
            .await?
            .into_iter()
            .filter(|l| !self.failures || !l.is_success())
            .collect();

        if ctx.is_json() {
            fmt.print_json(&serde_json::to_value(&logs)?);
            return Ok(());
        }

        if logs.is_empty() {
            fmt.info("No sync logs");
            return Ok(());
        }
        for log in &logs {
            let status = if log.is_success() { "ok" } else { "FAILED" };
            println!(
                "{}  {:<6} {}{}",
                log.start.format("%Y-%m-%d %H:%M:%S"),
                status,
                log.account,
                flag_labels(log.flags)
            );
            for line in log.log.lines() {
                println!("    {line}");
            }
            for line in log.failures.lines() {
                println!("    ! {line}");
            }
        }
        Ok(())
    }
}

/// " [manual, interrupted]" or ""
fn flag_labels(flags: u32) -> String {
    let labels: Vec<&str> = [
        (FLAG_MANUAL, "manual"),
        (FLAG_NOT_CONNECTED, "not connected"),
        (FLAG_AUTH_FAILED, "authorization failed"),
        (FLAG_INTERRUPTED, "interrupted"),
    ]
    .into_iter()
    .filter(|(flag, _)| flags & flag != 0)
    .map(|(_, label)| label)
    .collect();

    if labels.is_empty() {
        String::new()
    } else {
        format!(" [{}]", labels.join(", "))
    }
}
