//! Dropbox store and account link against a mock API

use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use wiremock::matchers::{body_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use safesync_core::ports::{is_auth_error, is_not_found, IRemoteStore};
use safesync_remote::auth::CallbackParams;
use safesync_remote::dropbox::CREDENTIAL_KEY;
use safesync_remote::{DropboxAccount, DropboxStore, LinkError};

use crate::common::{self, MemoryCredentialStore};

fn file_metadata(name: &str, rev: &str) -> serde_json::Value {
    json!({
        ".tag": "file",
        "name": name,
        "id": format!("id:{rev}"),
        "path_lower": format!("/{}", name.to_lowercase()),
        "path_display": format!("/{name}"),
        "server_modified": "2026-10-19T08:00:00Z",
        "client_modified": "2026-10-19T07:59:00Z",
        "rev": rev,
        "size": 4096,
        "content_hash": format!("hash-{rev}")
    })
}

fn not_found() -> ResponseTemplate {
    ResponseTemplate::new(409).set_body_json(json!({
        "error_summary": "path/not_found/..",
        "error": { ".tag": "path", "path": { ".tag": "not_found" } }
    }))
}

/// `Dropbox-API-Arg` of the last request received
async fn api_arg(server: &MockServer) -> serde_json::Value {
    let requests = server.received_requests().await.unwrap();
    let last = requests.last().unwrap();
    let value = last.headers.get("dropbox-api-arg").unwrap().to_str().unwrap();
    serde_json::from_str(value).unwrap()
}

async fn setup() -> (MockServer, Arc<MemoryCredentialStore>, DropboxStore) {
    let server = MockServer::start().await;
    let creds = MemoryCredentialStore::shared();
    common::link_dropbox(&creds, "test-token", Duration::hours(4));
    let store = DropboxStore::open(&common::dropbox_config(&server), creds.clone()).unwrap();
    (server, creds, store)
}

#[tokio::test]
async fn test_sync_remote_files_match_new_and_resolved_rows() {
    let (server, _creds, store) = setup().await;

    Mock::given(method("POST"))
        .and(path("/2/files/get_metadata"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_json(json!({ "path": "/work.psafe3" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(file_metadata("Work.psafe3", "a1")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/files/get_metadata"))
        .and(body_json(json!({ "path": "/home.psafe3" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(file_metadata("Home.psafe3", "b7")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/files/get_metadata"))
        .and(body_json(json!({ "path": "/gone.psafe3" })))
        .respond_with(not_found())
        .mount(&server)
        .await;

    let files = vec![
        common::tracked(1, "WORK.psafe3", None),
        common::tracked(2, "Home.psafe3", Some("/home.psafe3")),
        common::tracked(3, "Gone.psafe3", Some("/gone.psafe3")),
    ];
    let remote = store.get_sync_remote_files(&files).await.unwrap();

    let for_new = remote.get_remote_file_for_new(files[0].id).unwrap();
    assert_eq!(for_new.remote_id, "/work.psafe3");
    assert_eq!(for_new.title, "Work.psafe3");

    let home = remote.get_remote_file("/home.psafe3").unwrap();
    assert_eq!(home.hash.as_deref(), Some("hash-b7"));
    assert!(remote.get_remote_file("/gone.psafe3").is_none());
}

#[tokio::test]
async fn test_new_rows_never_match_tracked_files() {
    let (server, _creds, store) = setup().await;
    Mock::given(method("POST"))
        .and(path("/2/files/get_metadata"))
        .and(body_json(json!({ "path": "/a.psafe3" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(file_metadata("a.psafe3", "a1")))
        .expect(1)
        .mount(&server)
        .await;

    let files = vec![
        common::tracked(1, "a.psafe3", Some("/a.psafe3")),
        common::tracked(2, "A.psafe3", None),
    ];
    let remote = store.get_sync_remote_files(&files).await.unwrap();

    assert!(remote.get_remote_file("/a.psafe3").is_some());
    assert!(remote.get_remote_file_for_new(files[1].id).is_none());
}

#[tokio::test]
async fn test_new_row_is_looked_up_in_its_folder() {
    let (server, _creds, store) = setup().await;
    Mock::given(method("POST"))
        .and(path("/2/files/get_metadata"))
        .and(body_json(json!({ "path": "/safes/a (conflicted copy).psafe3" })))
        .respond_with(not_found())
        .expect(1)
        .mount(&server)
        .await;

    let mut file = common::tracked(1, "a (conflicted copy).psafe3", None);
    file.local_folder = Some("/Safes".to_string());
    let remote = store.get_sync_remote_files(&[file]).await.unwrap();
    assert!(remote.is_empty());
}

#[tokio::test]
async fn test_sync_remote_files_skips_removed_rows() {
    let (server, _creds, store) = setup().await;
    Mock::given(method("POST"))
        .and(path("/2/files/get_metadata"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let mut file = common::tracked(1, "a.psafe3", Some("/a.psafe3"));
    file.remote_deleted = true;
    let remote = store.get_sync_remote_files(&[file]).await.unwrap();
    assert!(remote.is_empty());
}

#[tokio::test]
async fn test_upload_overwrites_path() {
    let (server, _creds, store) = setup().await;
    Mock::given(method("POST"))
        .and(path("/2/files/upload"))
        .and(header_exists("dropbox-api-arg"))
        .and(header("content-type", "application/octet-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Home.psafe3",
            "path_lower": "/home.psafe3",
            "path_display": "/Home.psafe3",
            "server_modified": "2026-10-19T08:00:00Z",
            "rev": "c3",
            "content_hash": "hash-c3"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("1.psafe3");
    std::fs::write(&local, b"PWS3 content").unwrap();

    let file = common::tracked(2, "Home.psafe3", Some("/home.psafe3"));
    let uploaded = store.upload(&file, &local).await.unwrap();
    assert_eq!(uploaded.remote_id, "/home.psafe3");
    assert_eq!(uploaded.hash.as_deref(), Some("hash-c3"));

    let arg = api_arg(&server).await;
    assert_eq!(arg["path"], "/home.psafe3");
    assert_eq!(arg["mode"], "overwrite");
}

#[tokio::test]
async fn test_download_writes_content() {
    let (server, _creds, store) = setup().await;
    Mock::given(method("POST"))
        .and(path("/2/files/download"))
        .and(header_exists("dropbox-api-arg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PWS3 remote".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("download.tmp");
    store.download("/home.psafe3", &dest).await.unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"PWS3 remote");
    assert_eq!(api_arg(&server).await["path"], "/home.psafe3");
}

#[tokio::test]
async fn test_delete_missing_is_not_found() {
    let (server, _creds, store) = setup().await;
    Mock::given(method("POST"))
        .and(path("/2/files/delete_v2"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error_summary": "path_lookup/not_found/...",
            "error": { ".tag": "path_lookup" }
        })))
        .mount(&server)
        .await;

    let err = store.delete("/gone.psafe3").await.unwrap_err();
    assert!(is_not_found(&err));
}

#[tokio::test]
async fn test_list_files_follows_cursor() {
    let (server, _creds, store) = setup().await;
    Mock::given(method("POST"))
        .and(path("/2/files/list_folder"))
        .and(body_json(json!({ "path": "", "recursive": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entries": [
                file_metadata("a.psafe3", "1"),
                { ".tag": "folder", "name": "Sub", "path_lower": "/sub", "path_display": "/Sub" }
            ],
            "cursor": "cursor-1",
            "has_more": true
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/files/list_folder/continue"))
        .and(body_json(json!({ "cursor": "cursor-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entries": [file_metadata("b.psafe3", "2")],
            "cursor": "cursor-2",
            "has_more": false
        })))
        .mount(&server)
        .await;

    let files = store.list_files("/").await.unwrap();
    let titles: Vec<_> = files.iter().map(|f| f.title.as_str()).collect();
    assert_eq!(titles, vec!["a.psafe3", "b.psafe3"]);
}

#[tokio::test]
async fn test_account_identity() {
    let (server, creds, store) = setup().await;
    Mock::given(method("POST"))
        .and(path("/2/users/get_current_account"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "account_id": "dbid:BBnew",
            "name": { "display_name": "Jo Example", "given_name": "Jo" },
            "email": "jo@example.com"
        })))
        .mount(&server)
        .await;

    assert_eq!(store.resolve_display_name().await.unwrap(), "Jo Example");
    assert_eq!(store.resolve_account_id().await.unwrap(), "dbid:BBnew");
    assert_eq!(
        common::stored_dropbox(&creds).account_id.as_deref(),
        Some("dbid:BBnew")
    );
}

#[tokio::test]
async fn test_expiring_token_is_refreshed_and_stored() {
    let server = MockServer::start().await;
    let creds = MemoryCredentialStore::shared();
    common::link_dropbox(&creds, "old-token", Duration::minutes(1));

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-token",
            "token_type": "bearer",
            "expires_in": 14400
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/files/get_metadata"))
        .and(header("authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(file_metadata("a.psafe3", "1")))
        .mount(&server)
        .await;

    let store = DropboxStore::open(&common::dropbox_config(&server), creds.clone()).unwrap();
    let meta = store.fetch_metadata("/a.psafe3").await.unwrap();
    assert!(meta.is_some());

    let stored = common::stored_dropbox(&creds).tokens.unwrap();
    assert_eq!(stored.access_token, "fresh-token");
    assert_eq!(stored.refresh_token.as_deref(), Some("test-refresh"));
}

#[tokio::test]
async fn test_rejected_refresh_clears_tokens_keeps_account() {
    let server = MockServer::start().await;
    let creds = MemoryCredentialStore::shared();
    common::link_dropbox(&creds, "old-token", Duration::minutes(-10));

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token is invalid or revoked"
        })))
        .mount(&server)
        .await;

    let store = DropboxStore::open(&common::dropbox_config(&server), creds.clone()).unwrap();
    let err = store.fetch_metadata("/a.psafe3").await.unwrap_err();
    assert!(is_auth_error(&err));

    let stored = common::stored_dropbox(&creds);
    assert!(stored.tokens.is_none());
    assert_eq!(stored.account_id.as_deref(), Some("dbid:AAH4f99"));
}

#[tokio::test]
async fn test_unauthorized_response_clears_tokens() {
    let (server, creds, store) = setup().await;
    Mock::given(method("POST"))
        .and(path("/2/files/get_metadata"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error_summary": "expired_access_token/..",
            "error": { ".tag": "expired_access_token" }
        })))
        .mount(&server)
        .await;

    let err = store.fetch_metadata("/a.psafe3").await.unwrap_err();
    assert!(is_auth_error(&err));
    assert!(common::stored_dropbox(&creds).tokens.is_none());

    let err = store.fetch_metadata("/a.psafe3").await.unwrap_err();
    assert!(is_auth_error(&err), "no request without a token");
}

#[tokio::test]
async fn test_rate_limit_carries_retry_after() {
    let (server, _creds, store) = setup().await;
    Mock::given(method("POST"))
        .and(path("/2/files/get_metadata"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "7")
                .set_body_json(json!({ "error_summary": "too_many_requests/.." })),
        )
        .mount(&server)
        .await;

    let err = store.fetch_metadata("/a.psafe3").await.unwrap_err();
    let remote = err
        .downcast_ref::<safesync_core::ports::RemoteError>()
        .unwrap();
    assert!(matches!(
        remote,
        safesync_core::ports::RemoteError::TooManyRequests { retry_after: Some(d) }
            if *d == std::time::Duration::from_secs(7)
    ));
}

// ============================================================================
// Account link
// ============================================================================

fn state_of(auth_url: &str) -> String {
    url::Url::parse(auth_url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

async fn mount_token_exchange(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "linked-token",
            "refresh_token": "linked-refresh",
            "token_type": "bearer",
            "expires_in": 14400,
            "account_id": "dbid:AAH4f99"
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_link_rejects_foreign_state() {
    let server = MockServer::start().await;
    let creds = MemoryCredentialStore::shared();
    let account = DropboxAccount::new(&common::dropbox_config(&server), creds.clone());

    let link = account.start_account_link().await.unwrap();
    assert!(link.auth_url.contains("token_access_type=offline"));
    assert!(link.auth_url.contains("code_challenge_method=S256"));

    let callback = CallbackParams {
        code: "code".to_string(),
        state: "forged".to_string(),
    };
    let err = account.finish_account_link(link, callback, 900).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<LinkError>(), Some(LinkError::StateMismatch)));
    assert!(creds.get(CREDENTIAL_KEY).is_none());
}

#[tokio::test]
async fn test_link_new_account_yields_task() {
    let server = MockServer::start().await;
    mount_token_exchange(&server).await;
    let creds = MemoryCredentialStore::shared();
    let account = DropboxAccount::new(&common::dropbox_config(&server), creds.clone());

    let link = account.start_account_link().await.unwrap();
    let callback = CallbackParams {
        code: "auth-code".to_string(),
        state: state_of(&link.auth_url),
    };
    let task = account.finish_account_link(link, callback, 900).await.unwrap();

    assert!(task.is_some());
    assert!(account.is_authorized().unwrap());
    let tokens = common::stored_dropbox(&creds).tokens.unwrap();
    assert_eq!(tokens.access_token, "linked-token");
}

#[tokio::test]
async fn test_relink_after_auth_failure_reuses_account() {
    let server = MockServer::start().await;
    mount_token_exchange(&server).await;
    let creds = MemoryCredentialStore::shared();
    safesync_remote::dropbox::DropboxCredential {
        tokens: None,
        account_id: Some("dbid:AAH4f99".to_string()),
    }
    .save(creds.as_ref())
    .unwrap();
    let account = DropboxAccount::new(&common::dropbox_config(&server), creds.clone());

    let link = account.start_account_link().await.unwrap();
    let callback = CallbackParams {
        code: "auth-code".to_string(),
        state: state_of(&link.auth_url),
    };
    let task = account.finish_account_link(link, callback, 900).await.unwrap();

    assert!(task.is_none());
    assert!(account.is_authorized().unwrap());
}

#[tokio::test]
async fn test_unlink_revokes_and_forgets() {
    let server = MockServer::start().await;
    let creds = MemoryCredentialStore::shared();
    common::link_dropbox(&creds, "test-token", Duration::hours(4));

    Mock::given(method("POST"))
        .and(path("/2/auth/token/revoke"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(null)))
        .expect(1)
        .mount(&server)
        .await;

    let account = DropboxAccount::new(&common::dropbox_config(&server), creds.clone());
    account.unlink_account().await.unwrap();

    assert!(creds.get(CREDENTIAL_KEY).is_none());
    assert!(!account.is_authorized().unwrap());
}
