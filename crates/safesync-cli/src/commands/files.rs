//! Files commands - manage the tracked password safes of an account
//!
//! Local edits go through the same hooks the sync pass relies on: adding,
//! updating or removing a file records the change, and the next sync
//! pushes it.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use safesync_core::domain::{DbProvider, FileChange, TrackedFile, TrackedFileId};

use crate::context::AppContext;
use crate::output::OutputFormatter;

#[derive(Debug, Subcommand)]
pub enum FilesCommand {
    /// List tracked files
    List { provider: String },
    /// List remote files that can be tracked
    Remote {
        provider: String,
        /// Remote folder
        #[arg(default_value = "/")]
        folder: String,
    },
    /// Start tracking a local file; it is uploaded on the next sync
    Add {
        provider: String,
        path: PathBuf,
        /// Title to store it under (defaults to the file name)
        #[arg(long)]
        title: Option<String>,
    },
    /// Start tracking a remote file; it is downloaded on the next sync
    Track {
        provider: String,
        /// Remote id as shown by `files remote`
        remote_id: String,
    },
    /// Replace the content of a tracked file
    Update {
        provider: String,
        id: i64,
        path: PathBuf,
    },
    /// Delete a tracked file here and, on the next sync, remotely
    Rm { provider: String, id: i64 },
    /// Copy the local content of a tracked file
    Export {
        provider: String,
        id: i64,
        dest: PathBuf,
    },
}

impl FilesCommand {
    pub async fn execute(&self, ctx: &AppContext) -> Result<()> {
        let fmt = ctx.formatter();
        match self {
            FilesCommand::List { provider } => {
                let provider = ctx.provider(provider).await?;
                execute_list(ctx, &*fmt, &provider).await
            }
            FilesCommand::Remote { provider, folder } => {
                let provider = ctx.provider(provider).await?;
                execute_remote(ctx, &*fmt, &provider, folder).await
            }
            FilesCommand::Add {
                provider,
                path,
                title,
            } => {
                let provider = ctx.provider(provider).await?;
                let title = match title {
                    Some(t) => t.clone(),
                    None => file_title(path)?,
                };
                let content = read_content(path).await?;
                let id = ctx
                    .local_files(&provider)
                    .insert_local_file(&title, &content)
                    .await?;
                fmt.success(&format!("Tracking {title} as file {id}"));
                Ok(())
            }
            FilesCommand::Track {
                provider,
                remote_id,
            } => {
                let provider = ctx.provider(provider).await?;
                execute_track(ctx, &*fmt, &provider, remote_id).await
            }
            FilesCommand::Update { provider, id, path } => {
                let provider = ctx.provider(provider).await?;
                let content = read_content(path).await?;
                ctx.local_files(&provider)
                    .update_local_file(TrackedFileId::new(*id), &content)
                    .await?;
                fmt.success(&format!("Updated file {id}"));
                Ok(())
            }
            FilesCommand::Rm { provider, id } => {
                let provider = ctx.provider(provider).await?;
                ctx.local_files(&provider)
                    .delete_local_file(TrackedFileId::new(*id))
                    .await?;
                fmt.success(&format!("File {id} will be removed on the next sync"));
                Ok(())
            }
            FilesCommand::Export { provider, id, dest } => {
                let provider = ctx.provider(provider).await?;
                let content = ctx
                    .local_files(&provider)
                    .read_local_file(TrackedFileId::new(*id))
                    .await?;
                tokio::fs::write(dest, &content)
                    .await
                    .with_context(|| format!("Failed to write {}", dest.display()))?;
                fmt.success(&format!("Exported file {id} to {}", dest.display()));
                Ok(())
            }
        }
    }
}

fn file_title(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}

async fn read_content(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// One-word sync state of a row
fn file_state(file: &TrackedFile) -> &'static str {
    if file.local_deleted {
        return "removing";
    }
    match (file.local_change, file.remote_change) {
        (FileChange::None, FileChange::None) if file.local_file.is_none() => "pending",
        (FileChange::None, FileChange::None) => "synced",
        (FileChange::None, _) => "remote-changed",
        (_, FileChange::None) => "local-changed",
        _ => "conflict",
    }
}

async fn execute_list(
    ctx: &AppContext,
    fmt: &dyn OutputFormatter,
    provider: &DbProvider,
) -> Result<()> {
    let files = ctx.db.get_files(provider.id).await?;

    if ctx.is_json() {
        let list: Vec<_> = files
            .iter()
            .map(|f| {
                serde_json::json!({
                    "id": f.id.as_i64(),
                    "title": f.local_title,
                    "folder": f.local_folder,
                    "remote_id": f.remote_id,
                    "state": file_state(f),
                    "local_change": f.local_change.as_str(),
                    "remote_change": f.remote_change.as_str(),
                })
            })
            .collect();
        fmt.print_json(&serde_json::Value::Array(list));
        return Ok(());
    }

    if files.is_empty() {
        fmt.info(&format!("No tracked files for {}", provider.label()));
        return Ok(());
    }
    println!("{:<5} {:<15} {}", "ID", "STATE", "TITLE");
    for f in &files {
        println!("{:<5} {:<15} {}", f.id, file_state(f), f.local_description());
    }
    Ok(())
}

async fn execute_remote(
    ctx: &AppContext,
    fmt: &dyn OutputFormatter,
    provider: &DbProvider,
    folder: &str,
) -> Result<()> {
    let store = ctx.store(provider)?;
    let remote = store.list_files(folder).await?;
    let tracked = ctx.db.get_files(provider.id).await?;
    let is_tracked = |remote_id: &str| {
        tracked
            .iter()
            .any(|f| f.remote_id.as_deref() == Some(remote_id))
    };

    if ctx.is_json() {
        let list: Vec<_> = remote
            .iter()
            .map(|r| {
                serde_json::json!({
                    "remote_id": r.remote_id,
                    "title": r.title,
                    "folder": r.folder,
                    "tracked": is_tracked(&r.remote_id),
                })
            })
            .collect();
        fmt.print_json(&serde_json::Value::Array(list));
        return Ok(());
    }

    if remote.is_empty() {
        fmt.info(&format!("No files in {folder}"));
        return Ok(());
    }
    for r in &remote {
        let mark = if is_tracked(&r.remote_id) { "*" } else { " " };
        println!("{mark} {}", r.remote_id);
    }
    Ok(())
}

async fn execute_track(
    ctx: &AppContext,
    fmt: &dyn OutputFormatter,
    provider: &DbProvider,
    remote_id: &str,
) -> Result<()> {
    if ctx
        .db
        .get_file_by_remote_id(provider.id, remote_id)
        .await?
        .is_some()
    {
        bail!("{remote_id} is already tracked");
    }

    let store = ctx.store(provider)?;
    let Some(remote) = store.fetch_metadata(remote_id).await? else {
        bail!("{remote_id} does not exist on {}", provider.label());
    };

    let id = ctx.db.add_remote_file(provider.id, &remote).await?;
    fmt.success(&format!(
        "Tracking {} as file {id}; it is downloaded on the next sync",
        remote.title
    ));
    Ok(())
}
