//! Dropbox remote store
//!
//! Talks to the Dropbox v2 HTTP API: RPC endpoints on the API host,
//! uploads and downloads on the content host. Paths are relative to the
//! app folder; the lowercased path (`path_lower`) is the remote id.
//!
//! ## Credentials
//!
//! One linked account per installation, stored as JSON under the
//! credential key "dropbox": the OAuth tokens and, once known, the
//! account id. A rejected token clears the tokens but keeps the account
//! id, so re-linking the same account does not create a new provider.
//!
//! ## Token freshness
//!
//! Before every call the access token is refreshed when it expires within
//! five minutes, and the refreshed token is persisted before the call
//! proceeds.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use oauth2::{CsrfToken, PkceCodeVerifier};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use safesync_core::config::Config;
use safesync_core::domain::tracked_file::UNKNOWN_MOD_DATE;
use safesync_core::domain::{ProviderType, RemoteFile, SyncRemoteFiles, TrackedFile};
use safesync_core::ports::{is_auth_error, ICredentialStore, IRemoteStore, RemoteError, Tokens};
use safesync_core::usecases::NewAccountTask;

use crate::auth::{CallbackParams, LocalCallbackServer, OAuth2Config, PKCEFlow};
use crate::http::{build_client, retry_after, send_error, status_error, stream_to_file};
use crate::LinkError;

/// Credential key of the linked Dropbox account
pub const CREDENTIAL_KEY: &str = "dropbox";

/// Refresh tokens expiring within this window
const REFRESH_MARGIN_MINUTES: i64 = 5;

// ============================================================================
// Credential
// ============================================================================

/// Persisted authorization of the linked account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DropboxCredential {
    pub tokens: Option<Tokens>,
    pub account_id: Option<String>,
}

impl DropboxCredential {
    pub fn load(creds: &dyn ICredentialStore) -> Result<Self> {
        match creds.load(CREDENTIAL_KEY)? {
            Some(json) => serde_json::from_str(&json).context("Invalid Dropbox credential"),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, creds: &dyn ICredentialStore) -> Result<()> {
        let json = serde_json::to_string(self).context("Failed to serialize Dropbox credential")?;
        creds.store(CREDENTIAL_KEY, &json)
    }

    pub fn is_authorized(&self) -> bool {
        self.tokens.is_some()
    }
}

// ============================================================================
// API types
// ============================================================================

/// File or folder metadata; upload responses carry no tag
#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(rename = ".tag")]
    tag: Option<String>,
    name: String,
    path_lower: Option<String>,
    path_display: Option<String>,
    server_modified: Option<String>,
    rev: Option<String>,
    content_hash: Option<String>,
}

impl Metadata {
    fn into_remote_file(self) -> Option<RemoteFile> {
        if self.tag.as_deref().is_some_and(|t| t != "file") {
            return None;
        }
        let remote_id = self.path_lower?;
        let display = self.path_display.unwrap_or_else(|| remote_id.clone());
        let folder = match display.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(pos) => display[..pos].to_string(),
        };
        let mod_date = self
            .server_modified
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.timestamp_millis())
            .unwrap_or(UNKNOWN_MOD_DATE);

        Some(RemoteFile {
            remote_id,
            title: self.name,
            folder: Some(folder),
            mod_date,
            hash: self.content_hash.or(self.rev),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ListFolderResult {
    entries: Vec<Metadata>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct FullAccount {
    account_id: String,
    name: AccountName,
}

#[derive(Debug, Deserialize)]
struct AccountName {
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error_summary: Option<String>,
}

/// `Dropbox-API-Arg` header value; non-ASCII characters must be escaped
fn api_arg_header(arg: &serde_json::Value) -> String {
    let mut out = String::new();
    for c in arg.to_string().chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut buf = [0u16; 2];
            for unit in c.encode_utf16(&mut buf) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}

// ============================================================================
// DropboxStore
// ============================================================================

/// [`IRemoteStore`] for the linked Dropbox account
pub struct DropboxStore {
    http: Client,
    api_url: String,
    content_url: String,
    flow: Option<PKCEFlow>,
    creds: Arc<dyn ICredentialStore>,
    credential: Mutex<DropboxCredential>,
}

impl DropboxStore {
    /// Open the store with the stored credential
    ///
    /// Opening succeeds without a credential; calls then fail as
    /// unauthorized.
    pub fn open(config: &Config, creds: Arc<dyn ICredentialStore>) -> Result<Self> {
        let credential = DropboxCredential::load(creds.as_ref())?;
        let flow = match OAuth2Config::from_dropbox(&config.dropbox) {
            Ok(oauth) => Some(PKCEFlow::new(&oauth)?),
            Err(_) => None,
        };

        Ok(Self {
            http: build_client(&config.network)?,
            api_url: config.dropbox.api_url.trim_end_matches('/').to_string(),
            content_url: config.dropbox.content_url.trim_end_matches('/').to_string(),
            flow,
            creds,
            credential: Mutex::new(credential),
        })
    }

    /// A valid access token, refreshed first when about to expire
    async fn access_token(&self) -> Result<String> {
        let mut credential = self.credential.lock().await;
        let tokens = credential
            .tokens
            .clone()
            .ok_or_else(|| RemoteError::Unauthorized("Dropbox account not linked".to_string()))?;

        if !tokens.expires_within(Duration::minutes(REFRESH_MARGIN_MINUTES)) {
            return Ok(tokens.access_token);
        }

        let (Some(flow), Some(refresh)) = (self.flow.as_ref(), tokens.refresh_token.as_deref())
        else {
            if tokens.is_expired() {
                credential.tokens = None;
                credential.save(self.creds.as_ref())?;
                return Err(RemoteError::Unauthorized("Dropbox token expired".to_string()).into());
            }
            return Ok(tokens.access_token);
        };

        match flow.refresh_token(refresh).await {
            Ok(fresh) => {
                let access = fresh.access_token.clone();
                credential.tokens = Some(fresh);
                credential.save(self.creds.as_ref())?;
                debug!("Stored refreshed Dropbox token");
                Ok(access)
            }
            Err(err) => {
                if is_auth_error(&err) {
                    warn!("Dropbox refresh token rejected, account needs re-linking");
                    credential.tokens = None;
                    credential.save(self.creds.as_ref())?;
                }
                Err(err)
            }
        }
    }

    /// Forget the tokens after the server rejected them
    async fn mark_unauthorized(&self) {
        let mut credential = self.credential.lock().await;
        if credential.tokens.take().is_some() {
            warn!("Dropbox rejected the access token, account needs re-linking");
            if let Err(err) = credential.save(self.creds.as_ref()) {
                warn!(%err, "Failed to clear Dropbox token");
            }
        }
    }

    async fn check(&self, response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry = retry_after(&response);
        let body = response.text().await.unwrap_or_default();
        let summary = serde_json::from_str::<ApiError>(&body)
            .ok()
            .and_then(|e| e.error_summary)
            .unwrap_or(body);
        let message = format!("{what}: {summary}");

        let err = if status == StatusCode::CONFLICT && summary.contains("not_found") {
            RemoteError::NotFound(message)
        } else {
            status_error(status, retry, message)
        };
        if matches!(err, RemoteError::Unauthorized(_)) {
            self.mark_unauthorized().await;
        }
        Err(err.into())
    }

    /// Call an RPC endpoint with a JSON argument
    async fn rpc<T: DeserializeOwned>(&self, endpoint: &str, arg: serde_json::Value) -> Result<T> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{}/2/{endpoint}", self.api_url))
            .bearer_auth(token)
            .json(&arg)
            .send()
            .await
            .map_err(send_error)?;
        let response = self.check(response, endpoint).await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(format!("{endpoint}: {e}")).into())
    }

    async fn current_account(&self) -> Result<FullAccount> {
        self.rpc("users/get_current_account", serde_json::Value::Null)
            .await
    }

    async fn get_metadata(&self, path: &str) -> Result<Option<RemoteFile>> {
        match self
            .rpc::<Metadata>("files/get_metadata", json!({ "path": path }))
            .await
        {
            Ok(meta) => Ok(meta.into_remote_file()),
            Err(err) if safesync_core::ports::is_not_found(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Revoke the access token server-side
    pub async fn revoke(&self) -> Result<()> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{}/2/auth/token/revoke", self.api_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(send_error)?;
        self.check(response, "auth/token/revoke").await?;
        info!("Revoked Dropbox token");
        Ok(())
    }
}

/// Remote path of a row, for uploads and for matching new rows: the
/// existing remote id, else the title in its folder
fn remote_path(file: &TrackedFile) -> String {
    if let Some(remote_id) = &file.remote_id {
        return remote_id.clone();
    }
    match file.local_folder.as_deref() {
        Some(folder) if !folder.is_empty() && folder != "/" => {
            format!("{}/{}", folder.trim_end_matches('/'), file.local_title)
        }
        _ => format!("/{}", file.local_title),
    }
}

#[async_trait::async_trait]
impl IRemoteStore for DropboxStore {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Dropbox
    }

    async fn resolve_display_name(&self) -> Result<String> {
        Ok(self.current_account().await?.name.display_name)
    }

    async fn resolve_account_id(&self) -> Result<String> {
        let account_id = self.current_account().await?.account_id;
        let mut credential = self.credential.lock().await;
        if credential.account_id.as_deref() != Some(account_id.as_str()) {
            credential.account_id = Some(account_id.clone());
            credential.save(self.creds.as_ref())?;
        }
        Ok(account_id)
    }

    async fn get_sync_remote_files(&self, files: &[TrackedFile]) -> Result<SyncRemoteFiles> {
        let tracked: HashSet<String> = files
            .iter()
            .filter_map(|f| f.remote_id.as_deref())
            .map(str::to_lowercase)
            .collect();

        let mut remote_files = SyncRemoteFiles::new();
        for file in files {
            match &file.remote_id {
                None => {
                    let path = remote_path(file).to_lowercase();
                    if tracked.contains(&path) {
                        continue;
                    }
                    let Some(remote) = self.get_metadata(&path).await? else {
                        continue;
                    };
                    if tracked.contains(&remote.remote_id)
                        || remote_files.is_claimed_for_new(&remote.remote_id)
                    {
                        continue;
                    }
                    debug!(file = %file.id, remote_id = %remote.remote_id, "Dropbox file for local");
                    remote_files.add_remote_file_for_new(file.id, remote);
                }
                Some(_) if file.remote_deleted => {}
                Some(remote_id) => {
                    if let Some(remote) = self.get_metadata(remote_id).await? {
                        remote_files.add_remote_file(remote);
                    }
                }
            }
        }
        Ok(remote_files)
    }

    async fn list_files(&self, folder: &str) -> Result<Vec<RemoteFile>> {
        let path = if folder == "/" { "" } else { folder };
        let mut result: ListFolderResult = self
            .rpc("files/list_folder", json!({ "path": path, "recursive": false }))
            .await?;

        let mut files = Vec::new();
        loop {
            files.extend(result.entries.into_iter().filter_map(Metadata::into_remote_file));
            if !result.has_more {
                break;
            }
            result = self
                .rpc("files/list_folder/continue", json!({ "cursor": result.cursor }))
                .await?;
        }
        Ok(files)
    }

    async fn fetch_metadata(&self, remote_id: &str) -> Result<Option<RemoteFile>> {
        self.get_metadata(remote_id).await
    }

    async fn upload(&self, file: &TrackedFile, local_path: &Path) -> Result<RemoteFile> {
        let content = tokio::fs::read(local_path)
            .await
            .with_context(|| format!("Failed to read {}", local_path.display()))?;
        let path = remote_path(file);
        let arg = json!({ "path": path, "mode": "overwrite", "autorename": false, "mute": true });

        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{}/2/files/upload", self.content_url))
            .bearer_auth(token)
            .header("Dropbox-API-Arg", api_arg_header(&arg))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content)
            .send()
            .await
            .map_err(send_error)?;
        let response = self.check(response, "files/upload").await?;

        let meta: Metadata = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(format!("files/upload: {e}")))?;
        let remote = meta.into_remote_file().ok_or_else(|| {
            RemoteError::InvalidResponse(format!("files/upload: no file metadata for {path}"))
        })?;
        debug!(remote_id = %remote.remote_id, "Uploaded to Dropbox");
        Ok(remote)
    }

    async fn download(&self, remote_id: &str, dest: &Path) -> Result<()> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{}/2/files/download", self.content_url))
            .bearer_auth(token)
            .header("Dropbox-API-Arg", api_arg_header(&json!({ "path": remote_id })))
            .send()
            .await
            .map_err(send_error)?;
        let response = self.check(response, "files/download").await?;
        stream_to_file(response, dest).await?;
        Ok(())
    }

    async fn delete(&self, remote_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .rpc("files/delete_v2", json!({ "path": remote_id }))
            .await?;
        debug!(remote_id, "Deleted from Dropbox");
        Ok(())
    }
}

// ============================================================================
// Account linking
// ============================================================================

/// A started account link, waiting for the authorization redirect
pub struct AccountLink {
    pub auth_url: String,
    csrf: CsrfToken,
    verifier: PkceCodeVerifier,
    flow: PKCEFlow,
}

/// Links and unlinks the Dropbox account
pub struct DropboxAccount {
    config: Config,
    creds: Arc<dyn ICredentialStore>,
}

impl DropboxAccount {
    pub fn new(config: &Config, creds: Arc<dyn ICredentialStore>) -> Self {
        Self {
            config: config.clone(),
            creds,
        }
    }

    pub fn is_authorized(&self) -> Result<bool> {
        Ok(DropboxCredential::load(self.creds.as_ref())?.is_authorized())
    }

    pub fn open_store(&self) -> Result<DropboxStore> {
        DropboxStore::open(&self.config, Arc::clone(&self.creds))
    }

    /// Begin linking; an authorized account is unlinked first
    pub async fn start_account_link(&self) -> Result<AccountLink> {
        if self.is_authorized()? {
            self.unlink_account().await?;
        }
        let flow = PKCEFlow::new(&OAuth2Config::from_dropbox(&self.config.dropbox)?)?;
        let (auth_url, csrf, verifier) = flow.generate_auth_url();
        Ok(AccountLink {
            auth_url,
            csrf,
            verifier,
            flow,
        })
    }

    /// Complete linking with the redirect parameters
    ///
    /// Returns a [`NewAccountTask`] for a new account and `None` when an
    /// account with a known id was re-authorized.
    pub async fn finish_account_link(
        &self,
        link: AccountLink,
        callback: CallbackParams,
        sync_freq: u32,
    ) -> Result<Option<NewAccountTask>> {
        if callback.state != *link.csrf.secret() {
            return Err(LinkError::StateMismatch.into());
        }
        let tokens = link.flow.exchange_code(callback.code, link.verifier).await?;

        let mut credential = DropboxCredential::load(self.creds.as_ref())?;
        credential.tokens = Some(tokens);
        credential.save(self.creds.as_ref())?;

        if credential.account_id.is_some() {
            info!("Dropbox account re-authorized");
            return Ok(None);
        }
        let store: Arc<dyn IRemoteStore> = Arc::new(self.open_store()?);
        Ok(Some(NewAccountTask::new(store, sync_freq)))
    }

    /// Run the whole link flow: loopback server, browser, code exchange
    ///
    /// `on_url` receives the authorization URL before the browser opens,
    /// for display when no browser is available.
    pub async fn link_interactive(
        &self,
        sync_freq: u32,
        on_url: impl FnOnce(&str),
    ) -> Result<Option<NewAccountTask>> {
        let link = self.start_account_link().await?;
        let server = LocalCallbackServer::bind(self.config.dropbox.redirect_port).await?;

        on_url(&link.auth_url);
        if let Err(err) = webbrowser::open(&link.auth_url) {
            warn!(%err, "Failed to open browser");
        }

        let callback = server.wait().await?;
        self.finish_account_link(link, callback, sync_freq).await
    }

    /// Revoke the token and forget the account
    pub async fn unlink_account(&self) -> Result<()> {
        if self.is_authorized()? {
            if let Err(err) = self.open_store()?.revoke().await {
                warn!(error = %format!("{err:#}"), "Failed to revoke Dropbox token");
            }
        }
        self.creds.clear(CREDENTIAL_KEY)?;
        info!("Unlinked Dropbox account");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use safesync_core::domain::{FileChange, ProviderId, TrackedFileId};

    use super::*;

    #[test]
    fn test_metadata_to_remote_file() {
        let meta: Metadata = serde_json::from_value(json!({
            ".tag": "file",
            "name": "Work.psafe3",
            "path_lower": "/safes/work.psafe3",
            "path_display": "/Safes/Work.psafe3",
            "server_modified": "2026-10-19T08:00:00Z",
            "rev": "a1c10ce0dd78",
            "content_hash": "e3b0c442"
        }))
        .unwrap();

        let remote = meta.into_remote_file().unwrap();
        assert_eq!(remote.remote_id, "/safes/work.psafe3");
        assert_eq!(remote.title, "Work.psafe3");
        assert_eq!(remote.folder.as_deref(), Some("/Safes"));
        assert_eq!(remote.mod_date, 1_792_396_800_000);
        assert_eq!(remote.hash.as_deref(), Some("e3b0c442"));
    }

    #[test]
    fn test_metadata_folder_and_deleted_are_skipped() {
        for tag in ["folder", "deleted"] {
            let meta: Metadata = serde_json::from_value(json!({
                ".tag": tag,
                "name": "x",
                "path_lower": "/x"
            }))
            .unwrap();
            assert!(meta.into_remote_file().is_none());
        }
    }

    #[test]
    fn test_root_file_folder() {
        let meta: Metadata = serde_json::from_value(json!({
            "name": "a.psafe3",
            "path_lower": "/a.psafe3",
            "path_display": "/a.psafe3",
            "rev": "015"
        }))
        .unwrap();
        let remote = meta.into_remote_file().unwrap();
        assert_eq!(remote.folder.as_deref(), Some("/"));
        assert_eq!(remote.mod_date, UNKNOWN_MOD_DATE);
        assert_eq!(remote.hash.as_deref(), Some("015"));
    }

    #[test]
    fn test_api_arg_header_escapes_non_ascii() {
        let header = api_arg_header(&json!({ "path": "/café.psafe3" }));
        assert_eq!(header, r#"{"path":"/caf\u00e9.psafe3"}"#);
    }

    #[test]
    fn test_remote_path() {
        let mut file = TrackedFile {
            id: TrackedFileId::new(1),
            provider_id: ProviderId::new(1),
            local_file: None,
            local_title: "New.psafe3".to_string(),
            local_folder: None,
            local_mod_date: 0,
            local_deleted: false,
            remote_id: None,
            remote_title: None,
            remote_folder: None,
            remote_mod_date: UNKNOWN_MOD_DATE,
            remote_hash: None,
            remote_deleted: false,
            local_change: FileChange::Added,
            remote_change: FileChange::None,
            version: 1,
        };
        assert_eq!(remote_path(&file), "/New.psafe3");

        file.local_folder = Some("/Safes/".to_string());
        assert_eq!(remote_path(&file), "/Safes/New.psafe3");

        file.remote_id = Some("/safes/new.psafe3".to_string());
        assert_eq!(remote_path(&file), "/safes/new.psafe3");
    }
}
