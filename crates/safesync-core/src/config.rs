//! Configuration module for SafeSync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::ProviderId;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for SafeSync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
    pub dropbox: DropboxConfig,
    pub owncloud: OwncloudConfig,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory holding the database and the per-provider content files.
    pub data_dir: PathBuf,
    /// Seconds between daemon wake-ups.
    pub poll_interval: u64,
    /// Automatic sync interval, in seconds, given to newly linked accounts.
    pub default_sync_freq: u32,
    /// Sync logs older than this many days are deleted after each pass.
    pub log_retention_days: u32,
}

/// HTTP client settings shared by all providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,
    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output (daemon only).
    pub json: bool,
}

/// Dropbox application and endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DropboxConfig {
    /// Dropbox app key. `None` until configured.
    pub app_key: Option<String>,
    /// RPC endpoint host.
    pub api_url: String,
    /// Content upload/download host.
    pub content_url: String,
    /// OAuth2 authorization page.
    pub auth_url: String,
    /// OAuth2 token endpoint.
    pub token_url: String,
    /// Loopback port for the OAuth2 redirect.
    pub redirect_port: u16,
}

/// ownCloud settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OwncloudConfig {
    /// WebDAV root below the server URL.
    pub webdav_path: String,
    /// Only files with this suffix are synced.
    pub file_suffix: String,
}

// ---------------------------------------------------------------------------
// Loading and paths
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/safesync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("safesync")
            .join("config.yaml")
    }

    /// SQLite database location.
    pub fn db_path(&self) -> PathBuf {
        self.sync.data_dir.join("safesync.db")
    }

    /// Directory holding the content files of one provider.
    pub fn files_dir(&self, provider: ProviderId) -> PathBuf {
        self.sync.data_dir.join("files").join(provider.to_string())
    }
}

// ---------------------------------------------------------------------------
// Section defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("safesync"),
            poll_interval: 60,
            default_sync_freq: 15 * 60,
            log_retention_days: 14,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            connect_timeout_secs: 15,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for DropboxConfig {
    fn default() -> Self {
        Self {
            app_key: None,
            api_url: "https://api.dropboxapi.com".to_string(),
            content_url: "https://content.dropboxapi.com".to_string(),
            auth_url: "https://www.dropbox.com/oauth2/authorize".to_string(),
            token_url: "https://api.dropboxapi.com/oauth2/token".to_string(),
            redirect_port: 8400,
        }
    }
}

impl Default for OwncloudConfig {
    fn default() -> Self {
        Self {
            webdav_path: "/remote.php/webdav".to_string(),
            file_suffix: ".psafe3".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation problem found in a [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `sync.poll_interval`.
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn is_http_url(value: &str) -> bool {
    value.starts_with("https://") || value.starts_with("http://")
}

impl Config {
    /// Check every section and return all problems found.
    ///
    /// An empty vector means the configuration is usable.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut positive = |field: &str, value: u64| {
            if value == 0 {
                errors.push(ValidationError {
                    field: field.into(),
                    message: "must be greater than 0".into(),
                });
            }
        };

        // --- sync ---
        positive("sync.poll_interval", self.sync.poll_interval);
        positive("sync.default_sync_freq", u64::from(self.sync.default_sync_freq));
        positive("sync.log_retention_days", u64::from(self.sync.log_retention_days));

        // --- network ---
        positive("network.timeout_secs", self.network.timeout_secs);
        positive("network.connect_timeout_secs", self.network.connect_timeout_secs);
        if self.network.connect_timeout_secs > self.network.timeout_secs {
            errors.push(ValidationError {
                field: "network.connect_timeout_secs".into(),
                message: format!(
                    "connect_timeout_secs ({}) must not exceed timeout_secs ({})",
                    self.network.connect_timeout_secs, self.network.timeout_secs
                ),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        // --- dropbox ---
        for (field, value) in [
            ("dropbox.api_url", &self.dropbox.api_url),
            ("dropbox.content_url", &self.dropbox.content_url),
            ("dropbox.auth_url", &self.dropbox.auth_url),
            ("dropbox.token_url", &self.dropbox.token_url),
        ] {
            if !is_http_url(value) {
                errors.push(ValidationError {
                    field: field.into(),
                    message: format!("'{value}' is not an http(s) URL"),
                });
            }
        }
        if matches!(self.dropbox.app_key.as_deref(), Some(key) if key.trim().is_empty()) {
            errors.push(ValidationError {
                field: "dropbox.app_key".into(),
                message: "must not be empty when set".into(),
            });
        }
        if self.dropbox.redirect_port == 0 {
            errors.push(ValidationError {
                field: "dropbox.redirect_port".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- owncloud ---
        if !self.owncloud.webdav_path.starts_with('/') {
            errors.push(ValidationError {
                field: "owncloud.webdav_path".into(),
                message: "must start with '/'".into(),
            });
        }
        if !self.owncloud.file_suffix.starts_with('.') {
            errors.push(ValidationError {
                field: "owncloud.file_suffix".into(),
                message: "must start with '.'".into(),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use safesync_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .sync_data_dir(PathBuf::from("/var/lib/safesync"))
///     .sync_poll_interval(30)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_data_dir(mut self, dir: PathBuf) -> Self {
        self.config.sync.data_dir = dir;
        self
    }

    pub fn sync_poll_interval(mut self, seconds: u64) -> Self {
        self.config.sync.poll_interval = seconds;
        self
    }

    pub fn sync_default_sync_freq(mut self, seconds: u32) -> Self {
        self.config.sync.default_sync_freq = seconds;
        self
    }

    pub fn sync_log_retention_days(mut self, days: u32) -> Self {
        self.config.sync.log_retention_days = days;
        self
    }

    // --- network ---

    pub fn network_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.network.timeout_secs = seconds;
        self
    }

    pub fn network_connect_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.network.connect_timeout_secs = seconds;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    // --- dropbox ---

    pub fn dropbox_app_key(mut self, app_key: impl Into<String>) -> Self {
        self.config.dropbox.app_key = Some(app_key.into());
        self
    }

    /// Point both Dropbox hosts at one base URL (used against mock servers).
    pub fn dropbox_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.config.dropbox.api_url = url.clone();
        self.config.dropbox.content_url = url;
        self
    }

    pub fn dropbox_redirect_port(mut self, port: u16) -> Self {
        self.config.dropbox.redirect_port = port;
        self
    }

    // --- owncloud ---

    pub fn owncloud_webdav_path(mut self, path: impl Into<String>) -> Self {
        self.config.owncloud.webdav_path = path.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the [`Config`] without validation.
    pub fn build(self) -> Config {
        self.config
    }

    /// Consume the builder, validate, and return the [`Config`] or the
    /// list of validation errors.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let errors = self.config.validate();
        if errors.is_empty() {
            Ok(self.config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
