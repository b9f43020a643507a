//! Status command - per-account sync state
//!
//! For every linked account: last success and failure, whether an
//! automatic sync is due, and how many tracked files carry unsynced
//! changes.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use safesync_core::domain::{FileChange, TrackedFile};

use crate::commands::account::provider_json;
use crate::context::AppContext;
use crate::output::plural;

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Limit to one account
    pub provider: Option<String>,
}

/// Counts of a provider's rows
#[derive(Debug, Default, PartialEq, Eq)]
struct FileCounts {
    total: u32,
    local_pending: u32,
    remote_pending: u32,
}

impl FileCounts {
    fn of(files: &[TrackedFile]) -> Self {
        let mut counts = Self::default();
        for f in files {
            counts.total += 1;
            if f.local_change != FileChange::None || f.local_deleted {
                counts.local_pending += 1;
            }
            if f.remote_change != FileChange::None {
                counts.remote_pending += 1;
            }
        }
        counts
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| {
        t.with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    })
    .unwrap_or_else(|| "never".to_string())
}

impl StatusCommand {
    pub async fn execute(&self, ctx: &AppContext) -> Result<()> {
        let fmt = ctx.formatter();
        let providers = match &self.provider {
            Some(selector) => vec![ctx.provider(selector).await?],
            None => ctx.db.get_providers().await?,
        };

        if providers.is_empty() {
            if ctx.is_json() {
                fmt.print_json(&serde_json::json!([]));
            } else {
                fmt.info("No linked accounts. Run 'safesync account link' first.");
            }
            return Ok(());
        }

        let now = Utc::now();
        let mut json = Vec::new();
        for provider in &providers {
            let files = ctx.db.get_files(provider.id).await?;
            let counts = FileCounts::of(&files);
            let due = provider.is_sync_due(now);

            if ctx.is_json() {
                let mut value = provider_json(provider);
                value["sync_due"] = due.into();
                value["files"] = serde_json::json!({
                    "total": counts.total,
                    "local_pending": counts.local_pending,
                    "remote_pending": counts.remote_pending,
                });
                json.push(value);
                continue;
            }

            println!("{} ({})", provider.label(), provider.provider_type);
            println!("  Last success: {}", format_time(provider.last_success));
            println!("  Last failure: {}", format_time(provider.last_failure));
            if provider.sync_freq == 0 {
                println!("  Automatic sync: off");
            } else {
                println!(
                    "  Automatic sync: every {}s{}",
                    provider.sync_freq,
                    if due { " (due)" } else { "" }
                );
            }
            println!(
                "  Files: {} tracked, {} to push, {} to pull",
                counts.total,
                plural(counts.local_pending, "change"),
                plural(counts.remote_pending, "change")
            );
        }

        if ctx.is_json() {
            fmt.print_json(&serde_json::Value::Array(json));
        }
        Ok(())
    }
}
