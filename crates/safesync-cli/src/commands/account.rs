//! Account commands - link, unlink and list provider accounts
//!
//! - `link dropbox` runs the OAuth2 PKCE flow in the browser
//! - `link owncloud` verifies a login against the server's WebDAV root
//! - `unlink` forgets the credential, the provider row, its tracked files
//!   and their local content
//! - `list` shows the linked accounts
//! - `set-freq` changes the automatic sync interval

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use clap::Subcommand;
use safesync_core::domain::{DbProvider, ProviderType};
use safesync_core::usecases::NewAccountTask;
use safesync_remote::{DropboxAccount, OwncloudAccount};
use tracing::info;

use crate::context::AppContext;
use crate::output::OutputFormatter;

#[derive(Debug, Subcommand)]
pub enum AccountCommand {
    /// Link a cloud account
    #[command(subcommand)]
    Link(LinkCommand),
    /// Unlink an account and forget its tracked files
    Unlink {
        /// Account id, account name or provider number
        provider: String,
    },
    /// List linked accounts
    List,
    /// Set the automatic sync interval in seconds (0 disables it)
    SetFreq {
        provider: String,
        seconds: u32,
    },
}

#[derive(Debug, Subcommand)]
pub enum LinkCommand {
    /// Authorize a Dropbox account in the browser
    Dropbox {
        /// Automatic sync interval in seconds
        #[arg(long)]
        sync_freq: Option<u32>,
    },
    /// Add an ownCloud login
    Owncloud {
        /// Server URL, e.g. https://cloud.example.com
        url: String,
        user: String,
        /// Password or app password; read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
        /// Automatic sync interval in seconds
        #[arg(long)]
        sync_freq: Option<u32>,
    },
}

impl AccountCommand {
    pub async fn execute(&self, ctx: &AppContext) -> Result<()> {
        let fmt = ctx.formatter();
        match self {
            AccountCommand::Link(link) => link.execute(ctx, &*fmt).await,
            AccountCommand::Unlink { provider } => execute_unlink(ctx, &*fmt, provider).await,
            AccountCommand::List => execute_list(ctx, &*fmt).await,
            AccountCommand::SetFreq { provider, seconds } => {
                let provider = ctx.provider(provider).await?;
                ctx.db
                    .update_provider_sync_freq(provider.id, *seconds)
                    .await?
                    .ensure_applied(format!("provider {}", provider.id))?;
                fmt.success(&format!(
                    "Sync interval of {} set to {seconds}s",
                    provider.label()
                ));
                Ok(())
            }
        }
    }
}

impl LinkCommand {
    async fn execute(&self, ctx: &AppContext, fmt: &dyn OutputFormatter) -> Result<()> {
        let default_freq = ctx.config.sync.default_sync_freq;
        match self {
            LinkCommand::Dropbox { sync_freq } => {
                let account = DropboxAccount::new(&ctx.config, ctx.creds.clone());
                fmt.info("Opening browser for Dropbox authorization...");
                let task = account
                    .link_interactive(sync_freq.unwrap_or(default_freq), |url| {
                        fmt.info(&format!("If the browser does not open, visit: {url}"));
                    })
                    .await
                    .context("Dropbox authorization failed")?;

                match task {
                    Some(task) => finish_link(ctx, fmt, task).await,
                    None => {
                        fmt.success("Dropbox account re-authorized");
                        Ok(())
                    }
                }
            }
            LinkCommand::Owncloud {
                url,
                user,
                password,
                sync_freq,
            } => {
                let password = match password {
                    Some(p) => p.clone(),
                    None => read_password()?,
                };
                let account = OwncloudAccount::new(&ctx.config, ctx.creds.clone());
                let task = account
                    .link_account(url, user, &password, sync_freq.unwrap_or(default_freq))
                    .await?;
                finish_link(ctx, fmt, task).await
            }
        }
    }
}

async fn finish_link(
    ctx: &AppContext,
    fmt: &dyn OutputFormatter,
    task: NewAccountTask,
) -> Result<()> {
    let provider = task.run(ctx.db.as_ref()).await?;
    info!(provider = %provider.id, acct = %provider.acct, "Linked account");

    if ctx.is_json() {
        fmt.print_json(&provider_json(&provider));
    } else {
        fmt.success(&format!(
            "Linked {} account {}",
            provider.provider_type,
            provider.label()
        ));
    }
    Ok(())
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn execute_unlink(ctx: &AppContext, fmt: &dyn OutputFormatter, selector: &str) -> Result<()> {
    let provider = ctx.provider(selector).await?;

    match provider.provider_type {
        ProviderType::Dropbox => {
            DropboxAccount::new(&ctx.config, ctx.creds.clone())
                .unlink_account()
                .await?
        }
        ProviderType::Owncloud => {
            OwncloudAccount::new(&ctx.config, ctx.creds.clone()).unlink_account(&provider.acct)?
        }
    }

    ctx.db.delete_provider(provider.id).await?;
    let dir = ctx.local_store(&provider).dir().to_path_buf();
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => fmt.warn(&format!("Could not remove {}: {err}", dir.display())),
    }

    fmt.success(&format!("Unlinked {}", provider.label()));
    Ok(())
}

async fn execute_list(ctx: &AppContext, fmt: &dyn OutputFormatter) -> Result<()> {
    let providers = ctx.db.get_providers().await?;

    if ctx.is_json() {
        let list: Vec<_> = providers.iter().map(provider_json).collect();
        fmt.print_json(&serde_json::Value::Array(list));
        return Ok(());
    }

    if providers.is_empty() {
        fmt.info("No linked accounts. Run 'safesync account link dropbox' or 'safesync account link owncloud'.");
        return Ok(());
    }
    println!("{:<4} {:<9} {:<40} {:>8}", "ID", "TYPE", "ACCOUNT", "SYNC");
    for p in &providers {
        let freq = if p.sync_freq == 0 {
            "manual".to_string()
        } else {
            format!("{}s", p.sync_freq)
        };
        println!(
            "{:<4} {:<9} {:<40} {:>8}",
            p.id,
            p.provider_type.label(),
            p.label(),
            freq
        );
    }
    Ok(())
}

pub fn provider_json(p: &DbProvider) -> serde_json::Value {
    serde_json::json!({
        "id": p.id.as_i64(),
        "type": p.provider_type.as_str(),
        "account": p.acct,
        "display_name": p.display_name,
        "sync_freq": p.sync_freq,
        "last_success": p.last_success.map(|t| t.to_rfc3339()),
        "last_failure": p.last_failure.map(|t| t.to_rfc3339()),
    })
}
