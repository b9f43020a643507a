//! SafeSync CLI - Command-line interface for SafeSync
//!
//! Provides commands for:
//! - Linking and unlinking Dropbox and ownCloud accounts
//! - Running a manual sync
//! - Managing tracked password safes
//! - Viewing sync logs and account status

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod context;
mod output;

use commands::{
    account::AccountCommand, completions::CompletionsCommand, files::FilesCommand,
    logs::LogsCommand, status::StatusCommand, sync::SyncCommand,
};
use context::AppContext;
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "safesync", version, about = "Sync password safes with Dropbox and ownCloud")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<String>,

    /// Minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage linked accounts
    #[command(subcommand)]
    Account(AccountCommand),
    /// Sync now
    Sync(SyncCommand),
    /// Manage tracked files
    #[command(subcommand)]
    Files(FilesCommand),
    /// Show recent sync logs
    Logs(LogsCommand),
    /// Show account sync status
    Status(StatusCommand),
    /// Generate shell completions
    Completions(CompletionsCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info,safesync_sync=debug,safesync_remote=debug",
        _ => "debug",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Completions(cmd) = &cli.command {
        return cmd.execute();
    }

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let ctx = AppContext::open(cli.config.as_deref(), format, cli.quiet).await?;

    match &cli.command {
        Commands::Account(cmd) => cmd.execute(&ctx).await,
        Commands::Sync(cmd) => cmd.execute(&ctx).await,
        Commands::Files(cmd) => cmd.execute(&ctx).await,
        Commands::Logs(cmd) => cmd.execute(&ctx).await,
        Commands::Status(cmd) => cmd.execute(&ctx).await,
        Commands::Completions(cmd) => cmd.execute(),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_owncloud_link() {
        let cli = Cli::try_parse_from([
            "safesync",
            "account",
            "link",
            "owncloud",
            "https://cloud.example.com",
            "jo",
            "--sync-freq",
            "600",
        ])
        .unwrap();
        match cli.command {
            Commands::Account(AccountCommand::Link(commands::account::LinkCommand::Owncloud {
                url,
                user,
                password,
                sync_freq,
            })) => {
                assert_eq!(url, "https://cloud.example.com");
                assert_eq!(user, "jo");
                assert!(password.is_none());
                assert_eq!(sync_freq, Some(600));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_files_rm_with_global_json() {
        let cli = Cli::try_parse_from(["safesync", "files", "rm", "Jo", "7", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Files(FilesCommand::Rm { id: 7, .. })
        ));
    }
}
