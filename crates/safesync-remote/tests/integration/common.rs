//! Shared helpers: in-memory credentials, configs pointing at a mock
//! server, and tracked-file fixtures.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use wiremock::MockServer;

use safesync_core::config::{Config, ConfigBuilder};
use safesync_core::domain::tracked_file::UNKNOWN_MOD_DATE;
use safesync_core::domain::{FileChange, ProviderId, TrackedFile, TrackedFileId};
use safesync_core::ports::{ICredentialStore, Tokens};
use safesync_remote::dropbox::DropboxCredential;

#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        entries.get(key).cloned()
    }
}

impl ICredentialStore for MemoryCredentialStore {
    fn load(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.get(key))
    }

    fn store(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(key);
        Ok(())
    }
}

/// Config with both Dropbox hosts and the token endpoint on `server`
pub fn dropbox_config(server: &MockServer) -> Config {
    let mut config = ConfigBuilder::new()
        .dropbox_app_key("test-app-key")
        .dropbox_base_url(server.uri())
        .build();
    config.dropbox.token_url = format!("{}/oauth2/token", server.uri());
    config
}

/// Store a Dropbox credential whose access token expires in `expires_in`
pub fn link_dropbox(creds: &MemoryCredentialStore, access: &str, expires_in: Duration) {
    let credential = DropboxCredential {
        tokens: Some(Tokens {
            access_token: access.to_string(),
            refresh_token: Some("test-refresh".to_string()),
            expires_at: Utc::now() + expires_in,
        }),
        account_id: Some("dbid:AAH4f99".to_string()),
    };
    credential.save(creds).unwrap();
}

pub fn stored_dropbox(creds: &MemoryCredentialStore) -> DropboxCredential {
    DropboxCredential::load(creds).unwrap()
}

/// Row for `title`, resolved to `remote_id` when given
pub fn tracked(id: i64, title: &str, remote_id: Option<&str>) -> TrackedFile {
    TrackedFile {
        id: TrackedFileId::new(id),
        provider_id: ProviderId::new(1),
        local_file: None,
        local_title: title.to_string(),
        local_folder: None,
        local_mod_date: UNKNOWN_MOD_DATE,
        local_deleted: false,
        remote_id: remote_id.map(str::to_string),
        remote_title: None,
        remote_folder: None,
        remote_mod_date: UNKNOWN_MOD_DATE,
        remote_hash: None,
        remote_deleted: false,
        local_change: if remote_id.is_some() {
            FileChange::None
        } else {
            FileChange::Added
        },
        remote_change: FileChange::None,
        version: 1,
    }
}
