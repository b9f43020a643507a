//! ownCloud WebDAV store and account link against a mock server

use std::sync::Arc;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use safesync_core::config::Config;
use safesync_core::ports::{is_auth_error, is_not_found, IRemoteStore};
use safesync_remote::owncloud::{OwncloudCredential, OwncloudStore};
use safesync_remote::OwncloudAccount;

use crate::common::{self, MemoryCredentialStore};

const ROOT: &str = "/remote.php/webdav";

fn multistatus(files: &[(&str, &str)]) -> String {
    let mut body = String::from(
        r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:s="http://sabredav.org/ns">
  <d:response>
    <d:href>/remote.php/webdav/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop>
    <d:status>HTTP/1.1 200 OK</d:status></d:propstat>
  </d:response>"#,
    );
    for (href, etag) in files {
        let collection = if href.ends_with('/') {
            "<d:collection/>"
        } else {
            ""
        };
        body.push_str(&format!(
            r#"
  <d:response>
    <d:href>/remote.php/webdav/{href}</d:href>
    <d:propstat><d:prop>
      <d:resourcetype>{collection}</d:resourcetype>
      <d:getlastmodified>Mon, 19 Oct 2026 08:00:00 GMT</d:getlastmodified>
      <d:getetag>"{etag}"</d:getetag>
    </d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat>
  </d:response>"#
        ));
    }
    body.push_str("\n</d:multistatus>");
    body
}

fn dav_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(207).set_body_raw(body, "application/xml; charset=utf-8")
}

async fn setup() -> (MockServer, OwncloudStore) {
    let server = MockServer::start().await;
    let credential = OwncloudCredential::new(&server.uri(), "jo", "secret").unwrap();
    let store = OwncloudStore::with_credential(&Config::default(), credential).unwrap();
    (server, store)
}

#[tokio::test]
async fn test_sync_remote_files_lists_safes_in_root() {
    let (server, store) = setup().await;
    Mock::given(method("PROPFIND"))
        .and(path(ROOT))
        .and(header("depth", "1"))
        .and(header("authorization", "Basic am86c2VjcmV0"))
        .respond_with(dav_response(multistatus(&[
            ("Work.psafe3", "e1"),
            ("Home%20Safe.psafe3", "e2"),
            ("notes.txt", "e3"),
            ("Archive/", "e4"),
        ])))
        .mount(&server)
        .await;

    let files = vec![
        common::tracked(1, "work.PSAFE3", None),
        common::tracked(2, "Old.psafe3", Some("/Old.psafe3")),
    ];
    let remote = store.get_sync_remote_files(&files).await.unwrap();

    let for_new = remote.get_remote_file_for_new(files[0].id).unwrap();
    assert_eq!(for_new.remote_id, "/Work.psafe3");
    assert_eq!(for_new.hash.as_deref(), Some("e1"));

    let home = remote.get_remote_file("/Home Safe.psafe3").unwrap();
    assert_eq!(home.title, "Home Safe.psafe3");
    assert_eq!(home.mod_date, 1_792_396_800_000);

    assert!(remote.get_remote_file("/notes.txt").is_none());
    assert!(remote.get_remote_file("/Old.psafe3").is_none());
    assert_eq!(remote.remote_files().count(), 2);
}

#[tokio::test]
async fn test_new_rows_never_match_tracked_files() {
    let (server, store) = setup().await;
    Mock::given(method("PROPFIND"))
        .and(path(ROOT))
        .respond_with(dav_response(multistatus(&[("Work.psafe3", "e1")])))
        .mount(&server)
        .await;

    let files = vec![
        common::tracked(1, "Work.psafe3", Some("/Work.psafe3")),
        common::tracked(2, "WORK.psafe3", None),
        common::tracked(3, "work.psafe3", None),
    ];
    let remote = store.get_sync_remote_files(&files).await.unwrap();

    assert!(remote.get_remote_file_for_new(files[1].id).is_none());
    assert!(remote.get_remote_file_for_new(files[2].id).is_none());
    assert!(remote.get_remote_file("/Work.psafe3").is_some());
}

#[tokio::test]
async fn test_upload_then_reads_metadata() {
    let (server, store) = setup().await;
    Mock::given(method("PUT"))
        .and(path(format!("{ROOT}/New%20Safe.psafe3")))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PROPFIND"))
        .and(path(format!("{ROOT}/New%20Safe.psafe3")))
        .and(header("depth", "0"))
        .respond_with(dav_response(
            r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/remote.php/webdav/New%20Safe.psafe3</d:href>
    <d:propstat><d:prop>
      <d:resourcetype/>
      <d:getlastmodified>Mon, 19 Oct 2026 08:00:00 GMT</d:getlastmodified>
      <d:getetag>"n1"</d:getetag>
    </d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat>
  </d:response>
</d:multistatus>"#
                .to_string(),
        ))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("3.psafe3");
    std::fs::write(&local, b"PWS3 new").unwrap();

    let file = common::tracked(3, "New Safe.psafe3", None);
    let uploaded = store.upload(&file, &local).await.unwrap();
    assert_eq!(uploaded.remote_id, "/New Safe.psafe3");
    assert_eq!(uploaded.hash.as_deref(), Some("n1"));
}

#[tokio::test]
async fn test_download_and_missing_metadata() {
    let (server, store) = setup().await;
    Mock::given(method("GET"))
        .and(path(format!("{ROOT}/Work.psafe3")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PWS3 work".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("PROPFIND"))
        .and(path(format!("{ROOT}/Gone.psafe3")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("pull.tmp");
    store.download("/Work.psafe3", &dest).await.unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"PWS3 work");

    assert!(store.fetch_metadata("/Gone.psafe3").await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_missing_is_not_found() {
    let (server, store) = setup().await;
    Mock::given(method("DELETE"))
        .and(path(format!("{ROOT}/Gone.psafe3")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = store.delete("/Gone.psafe3").await.unwrap_err();
    assert!(is_not_found(&err));
}

#[tokio::test]
async fn test_rejected_login_is_auth_error() {
    let (server, store) = setup().await;
    Mock::given(method("PROPFIND"))
        .respond_with(ResponseTemplate::new(401).set_body_raw(
            r#"<?xml version="1.0" encoding="utf-8"?>
<d:error xmlns:d="DAV:" xmlns:s="http://sabredav.org/ns">
  <s:message>Username or password was incorrect</s:message>
</d:error>"#,
            "application/xml",
        ))
        .mount(&server)
        .await;

    let err = store.get_sync_remote_files(&[]).await.unwrap_err();
    assert!(is_auth_error(&err));
    let text = format!("{err:#}");
    assert!(text.contains("ownCloud error result 401"), "{text}");
    assert!(text.contains("Username or password was incorrect"), "{text}");
}

#[tokio::test]
async fn test_link_stores_verified_login() {
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .and(path(ROOT))
        .and(header("depth", "0"))
        .respond_with(dav_response(multistatus(&[])))
        .mount(&server)
        .await;

    let creds = MemoryCredentialStore::shared();
    let account = OwncloudAccount::new(&Config::default(), creds.clone());
    let task = account
        .link_account(&server.uri(), "jo", "secret", 900)
        .await
        .unwrap();
    drop(task);

    let port = server.address().port();
    let acct = format!("jo@127.0.0.1:{port}");
    let stored = OwncloudCredential::load(creds.as_ref(), &acct).unwrap().unwrap();
    assert_eq!(stored.password, "secret");

    let store = account.open_store(&acct).unwrap();
    assert_eq!(store.resolve_account_id().await.unwrap(), acct);
    assert_eq!(
        store.resolve_display_name().await.unwrap(),
        format!("jo ({})", server.uri())
    );

    account.unlink_account(&acct).unwrap();
    assert!(OwncloudCredential::load(creds.as_ref(), &acct).unwrap().is_none());
}

#[tokio::test]
async fn test_link_with_bad_password_stores_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let creds: Arc<MemoryCredentialStore> = MemoryCredentialStore::shared();
    let account = OwncloudAccount::new(&Config::default(), creds.clone());
    let err = account
        .link_account(&server.uri(), "jo", "wrong", 900)
        .await
        .unwrap_err();

    assert!(is_auth_error(&err));
    let acct = format!("jo@127.0.0.1:{}", server.address().port());
    assert!(creds.get(&OwncloudCredential::key(&acct)).is_none());
}
