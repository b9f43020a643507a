//! ownCloud remote store over WebDAV
//!
//! Files are addressed by their path below the WebDAV root (for example
//! `/Work.psafe3`); that path is the remote id. Only files directly in the
//! root carrying the configured suffix take part in sync.
//!
//! ## Design Notes
//!
//! - Basic authentication with the login stored per account under the
//!   credential key `owncloud:{user}@{host}`.
//! - Listings use `PROPFIND` with `Depth: 1`; the etag is the content
//!   hash and `getlastmodified` the modification time.
//! - Error statuses are reported as "ownCloud error result {status}" with
//!   the server's message when it sends one.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::DateTime;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use safesync_core::config::Config;
use safesync_core::domain::tracked_file::UNKNOWN_MOD_DATE;
use safesync_core::domain::{ProviderType, RemoteFile, SyncRemoteFiles, TrackedFile};
use safesync_core::ports::{ICredentialStore, IRemoteStore, RemoteError};
use safesync_core::usecases::NewAccountTask;

use crate::http::{build_client, retry_after, send_error, status_error, stream_to_file};
use crate::LinkError;

/// Prefix of ownCloud credential keys
pub const CREDENTIAL_PREFIX: &str = "owncloud:";

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:resourcetype/>
    <d:getlastmodified/>
    <d:getetag/>
  </d:prop>
</d:propfind>"#;

const DAV_NS: &str = "DAV:";

// ============================================================================
// Credential
// ============================================================================

/// Login for one ownCloud account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwncloudCredential {
    pub server_url: String,
    pub user: String,
    pub password: String,
}

impl OwncloudCredential {
    pub fn new(server_url: &str, user: &str, password: &str) -> Result<Self, LinkError> {
        let url = Url::parse(server_url)
            .map_err(|e| LinkError::InvalidServerUrl(format!("{server_url}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(LinkError::InvalidServerUrl(server_url.to_string()));
        }
        Ok(Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    /// `{user}@{host}`, with the port when not the scheme default
    pub fn account_id(&self) -> Result<String> {
        let url = Url::parse(&self.server_url)
            .with_context(|| format!("Invalid ownCloud server URL {}", self.server_url))?;
        let host = url.host_str().unwrap_or_default();
        Ok(match url.port() {
            Some(port) => format!("{}@{host}:{port}", self.user),
            None => format!("{}@{host}", self.user),
        })
    }

    pub fn key(acct: &str) -> String {
        format!("{CREDENTIAL_PREFIX}{acct}")
    }

    pub fn load(creds: &dyn ICredentialStore, acct: &str) -> Result<Option<Self>> {
        match creds.load(&Self::key(acct))? {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("Invalid ownCloud credential")?,
            )),
            None => Ok(None),
        }
    }

    pub fn save(&self, creds: &dyn ICredentialStore) -> Result<()> {
        let json =
            serde_json::to_string(self).context("Failed to serialize ownCloud credential")?;
        creds.store(&Self::key(&self.account_id()?), &json)
    }
}

// ============================================================================
// Multistatus parsing
// ============================================================================

/// One `<d:response>` of a multistatus body
#[derive(Debug, Clone, PartialEq)]
struct DavEntry {
    /// Decoded path below the WebDAV root
    path: String,
    is_collection: bool,
    last_modified: i64,
    etag: Option<String>,
}

impl DavEntry {
    fn into_remote_file(self) -> Option<RemoteFile> {
        if self.is_collection {
            return None;
        }
        let (folder, title) = match self.path.rfind('/') {
            Some(0) => ("/".to_string(), self.path[1..].to_string()),
            Some(pos) => (self.path[..pos].to_string(), self.path[pos + 1..].to_string()),
            None => ("/".to_string(), self.path.clone()),
        };
        if title.is_empty() {
            return None;
        }
        Some(RemoteFile {
            remote_id: self.path,
            title,
            folder: Some(folder),
            mod_date: self.last_modified,
            hash: self.etag,
        })
    }
}

/// Path below `dav_prefix` for a response href
fn relative_path(href: &str, dav_prefix: &str) -> String {
    let path = match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.to_string(),
    };
    let decoded = urlencoding::decode(&path)
        .map(|p| p.into_owned())
        .unwrap_or(path);
    let rest = decoded
        .strip_prefix(dav_prefix.trim_end_matches('/'))
        .unwrap_or(&decoded);
    let rest = rest.trim_end_matches('/');
    if rest.is_empty() {
        "/".to_string()
    } else if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    }
}

fn parse_multistatus(xml: &str, dav_prefix: &str) -> Result<Vec<DavEntry>> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| RemoteError::InvalidResponse(format!("Invalid multistatus: {e}")))?;

    let dav = |node: &roxmltree::Node, name: &str| {
        node.is_element()
            && node.tag_name().name() == name
            && node.tag_name().namespace() == Some(DAV_NS)
    };
    let text_of = |parent: &roxmltree::Node, name: &str| {
        parent
            .descendants()
            .find(|n| dav(n, name))
            .and_then(|n| n.text())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    };

    let mut entries = Vec::new();
    for response in doc.descendants().filter(|n| dav(n, "response")) {
        let Some(href) = text_of(&response, "href") else {
            continue;
        };
        let last_modified = text_of(&response, "getlastmodified")
            .and_then(|d| DateTime::parse_from_rfc2822(&d).ok())
            .map(|d| d.timestamp_millis())
            .unwrap_or(UNKNOWN_MOD_DATE);

        entries.push(DavEntry {
            path: relative_path(&href, dav_prefix),
            is_collection: response.descendants().any(|n| dav(&n, "collection")),
            last_modified,
            etag: text_of(&response, "getetag").map(|e| e.trim_matches('"').to_string()),
        });
    }
    Ok(entries)
}

/// The `<s:message>` of an ownCloud error body
fn error_message(body: &str) -> Option<String> {
    let doc = roxmltree::Document::parse(body).ok()?;
    doc.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "message")
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

// ============================================================================
// OwncloudStore
// ============================================================================

/// [`IRemoteStore`] for one ownCloud login
pub struct OwncloudStore {
    http: Client,
    root: Url,
    dav_prefix: String,
    suffix: String,
    credential: OwncloudCredential,
}

impl OwncloudStore {
    /// Open the store of a linked account
    pub fn open(config: &Config, creds: &dyn ICredentialStore, acct: &str) -> Result<Self> {
        let credential = OwncloudCredential::load(creds, acct)?.ok_or_else(|| {
            RemoteError::Unauthorized(format!("No ownCloud login stored for {acct}"))
        })?;
        Self::with_credential(config, credential)
    }

    pub fn with_credential(config: &Config, credential: OwncloudCredential) -> Result<Self> {
        let root = Url::parse(&format!(
            "{}/{}/",
            credential.server_url,
            config.owncloud.webdav_path.trim_matches('/')
        ))
        .with_context(|| format!("Invalid ownCloud server URL {}", credential.server_url))?;
        let dav_prefix = urlencoding::decode(root.path())
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| root.path().to_string());

        Ok(Self {
            http: build_client(&config.network)?,
            root,
            dav_prefix,
            suffix: config.owncloud.file_suffix.to_lowercase(),
            credential,
        })
    }

    pub fn credential(&self) -> &OwncloudCredential {
        &self.credential
    }

    fn url_for(&self, path: &str) -> Result<Url> {
        let mut url = self.root.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("ownCloud URL {} cannot carry a path", self.root))?
            .pop_if_empty()
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.credential.user, Some(&self.credential.password))
    }

    async fn check(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry = retry_after(&response);
        let body = response.text().await.unwrap_or_default();
        let detail = error_message(&body)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());
        let message = format!("ownCloud error result {}: {what}: {detail}", status.as_u16());
        Err(status_error(status, retry, message).into())
    }

    async fn propfind(&self, path: &str, depth: u8) -> Result<Option<Vec<DavEntry>>> {
        let method = Method::from_bytes(b"PROPFIND").context("PROPFIND method")?;
        let response = self
            .request(method, self.url_for(path)?)
            .header("Depth", depth.to_string())
            .header(reqwest::header::CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_BODY)
            .send()
            .await
            .map_err(send_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response, &format!("list {path}")).await?;
        let body = response.text().await.map_err(send_error)?;
        Ok(Some(parse_multistatus(&body, &self.dav_prefix)?))
    }

    /// Confirm the login by listing the WebDAV root
    pub async fn verify(&self) -> Result<()> {
        self.propfind("/", 0)
            .await?
            .ok_or_else(|| RemoteError::NotFound(format!("WebDAV root {}", self.root)))?;
        Ok(())
    }

    fn is_synced_file(&self, file: &RemoteFile) -> bool {
        file.title.to_lowercase().ends_with(&self.suffix)
    }
}

fn upload_path(file: &TrackedFile) -> String {
    file.remote_id
        .clone()
        .unwrap_or_else(|| format!("/{}", file.local_title))
}

#[async_trait::async_trait]
impl IRemoteStore for OwncloudStore {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Owncloud
    }

    async fn resolve_display_name(&self) -> Result<String> {
        Ok(format!(
            "{} ({})",
            self.credential.user, self.credential.server_url
        ))
    }

    async fn resolve_account_id(&self) -> Result<String> {
        self.credential.account_id()
    }

    async fn get_sync_remote_files(&self, files: &[TrackedFile]) -> Result<SyncRemoteFiles> {
        let listing: Vec<RemoteFile> = self
            .list_files("/")
            .await?
            .into_iter()
            .filter(|f| self.is_synced_file(f))
            .collect();

        let tracked: HashSet<&str> = files.iter().filter_map(|f| f.remote_id.as_deref()).collect();

        let mut remote_files = SyncRemoteFiles::new();
        for file in files.iter().filter(|f| f.remote_id.is_none()) {
            let title = file.local_title.to_lowercase();
            let found = listing.iter().find(|r| {
                r.title.to_lowercase() == title
                    && !tracked.contains(r.remote_id.as_str())
                    && !remote_files.is_claimed_for_new(&r.remote_id)
            });
            if let Some(remote) = found {
                debug!(file = %file.id, remote_id = %remote.remote_id, "ownCloud file for local");
                remote_files.add_remote_file_for_new(file.id, remote.clone());
            }
        }
        for remote in listing {
            remote_files.add_remote_file(remote);
        }
        Ok(remote_files)
    }

    async fn list_files(&self, folder: &str) -> Result<Vec<RemoteFile>> {
        let folder = if folder.is_empty() { "/" } else { folder };
        let entries = self
            .propfind(folder, 1)
            .await?
            .ok_or_else(|| RemoteError::NotFound(format!("ownCloud folder {folder}")))?;
        Ok(entries
            .into_iter()
            .filter_map(DavEntry::into_remote_file)
            .collect())
    }

    async fn fetch_metadata(&self, remote_id: &str) -> Result<Option<RemoteFile>> {
        Ok(self
            .propfind(remote_id, 0)
            .await?
            .and_then(|entries| entries.into_iter().next())
            .and_then(DavEntry::into_remote_file))
    }

    async fn upload(&self, file: &TrackedFile, local_path: &Path) -> Result<RemoteFile> {
        let content = tokio::fs::read(local_path)
            .await
            .with_context(|| format!("Failed to read {}", local_path.display()))?;
        let path = upload_path(file);

        let response = self
            .request(Method::PUT, self.url_for(&path)?)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content)
            .send()
            .await
            .map_err(send_error)?;
        Self::check(response, &format!("upload {path}")).await?;
        debug!(%path, "Uploaded to ownCloud");

        self.fetch_metadata(&path).await?.ok_or_else(|| {
            RemoteError::InvalidResponse(format!("{path} missing after upload")).into()
        })
    }

    async fn download(&self, remote_id: &str, dest: &Path) -> Result<()> {
        let response = self
            .request(Method::GET, self.url_for(remote_id)?)
            .send()
            .await
            .map_err(send_error)?;
        let response = Self::check(response, &format!("download {remote_id}")).await?;
        stream_to_file(response, dest).await?;
        Ok(())
    }

    async fn delete(&self, remote_id: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, self.url_for(remote_id)?)
            .send()
            .await
            .map_err(send_error)?;
        Self::check(response, &format!("delete {remote_id}")).await?;
        debug!(remote_id, "Deleted from ownCloud");
        Ok(())
    }
}

// ============================================================================
// Account linking
// ============================================================================

/// Links and unlinks ownCloud logins
pub struct OwncloudAccount {
    config: Config,
    creds: Arc<dyn ICredentialStore>,
}

impl OwncloudAccount {
    pub fn new(config: &Config, creds: Arc<dyn ICredentialStore>) -> Self {
        Self {
            config: config.clone(),
            creds,
        }
    }

    pub fn open_store(&self, acct: &str) -> Result<OwncloudStore> {
        OwncloudStore::open(&self.config, self.creds.as_ref(), acct)
    }

    /// Verify the login against the server and store it
    pub async fn link_account(
        &self,
        server_url: &str,
        user: &str,
        password: &str,
        sync_freq: u32,
    ) -> Result<NewAccountTask> {
        let credential = OwncloudCredential::new(server_url, user, password)?;
        let store = OwncloudStore::with_credential(&self.config, credential)?;
        store
            .verify()
            .await
            .with_context(|| format!("Failed to verify ownCloud login at {server_url}"))?;

        store.credential().save(self.creds.as_ref())?;
        info!(acct = %store.credential().account_id()?, "Linked ownCloud account");
        Ok(NewAccountTask::new(Arc::new(store), sync_freq))
    }

    pub fn unlink_account(&self, acct: &str) -> Result<()> {
        self.creds.clear(&OwncloudCredential::key(acct))?;
        info!(acct, "Unlinked ownCloud account");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:s="http://sabredav.org/ns" xmlns:oc="http://owncloud.org/ns">
  <d:response>
    <d:href>/remote.php/webdav/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/></d:resourcetype>
        <d:getlastmodified>Mon, 19 Oct 2026 08:00:00 GMT</d:getlastmodified>
        <d:getetag>"5f2a"</d:getetag>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/webdav/My%20Safe.psafe3</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype/>
        <d:getlastmodified>Mon, 19 Oct 2026 08:00:00 GMT</d:getlastmodified>
        <d:getetag>"a1b2c3"</d:getetag>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/webdav/Photos/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/></d:resourcetype>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

    #[test]
    fn test_parse_multistatus() {
        let entries = parse_multistatus(LISTING, "/remote.php/webdav/").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].path, "/");
        assert!(entries[0].is_collection);

        assert_eq!(entries[1].path, "/My Safe.psafe3");
        assert!(!entries[1].is_collection);
        assert_eq!(entries[1].last_modified, 1_792_396_800_000);
        assert_eq!(entries[1].etag.as_deref(), Some("a1b2c3"));

        assert_eq!(entries[2].path, "/Photos");
        assert_eq!(entries[2].last_modified, UNKNOWN_MOD_DATE);
    }

    #[test]
    fn test_only_files_become_remote_files() {
        let files: Vec<RemoteFile> = parse_multistatus(LISTING, "/remote.php/webdav")
            .unwrap()
            .into_iter()
            .filter_map(DavEntry::into_remote_file)
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].remote_id, "/My Safe.psafe3");
        assert_eq!(files[0].title, "My Safe.psafe3");
        assert_eq!(files[0].folder.as_deref(), Some("/"));
    }

    #[test]
    fn test_relative_path_absolute_href() {
        assert_eq!(
            relative_path(
                "https://cloud.example.com/remote.php/webdav/Sub/a%2Bb.psafe3",
                "/remote.php/webdav/"
            ),
            "/Sub/a+b.psafe3"
        );
    }

    #[test]
    fn test_error_message() {
        let body = r#"<?xml version="1.0" encoding="utf-8"?>
<d:error xmlns:d="DAV:" xmlns:s="http://sabredav.org/ns">
  <s:exception>Sabre\DAV\Exception\NotAuthenticated</s:exception>
  <s:message>No public access to this resource.</s:message>
</d:error>"#;
        assert_eq!(
            error_message(body).as_deref(),
            Some("No public access to this resource.")
        );
        assert_eq!(error_message("not xml"), None);
    }

    #[test]
    fn test_credential_account_id() {
        let cred = OwncloudCredential::new("https://cloud.example.com/", "jo", "pw").unwrap();
        assert_eq!(cred.server_url, "https://cloud.example.com");
        assert_eq!(cred.account_id().unwrap(), "jo@cloud.example.com");

        let cred = OwncloudCredential::new("http://10.0.0.2:8080/oc", "jo", "pw").unwrap();
        assert_eq!(cred.account_id().unwrap(), "jo@10.0.0.2:8080");
    }

    #[test]
    fn test_credential_rejects_bad_url() {
        assert!(matches!(
            OwncloudCredential::new("ftp://host", "jo", "pw"),
            Err(LinkError::InvalidServerUrl(_))
        ));
        assert!(matches!(
            OwncloudCredential::new("not a url", "jo", "pw"),
            Err(LinkError::InvalidServerUrl(_))
        ));
    }
}
