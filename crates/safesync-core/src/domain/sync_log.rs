//! Sync log records
//!
//! A [`SyncLogRecord`] collects the human-readable progress of one pass.
//! It is append-only while the pass runs and persisted once at the end as
//! a [`SyncLogEntry`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{newtypes::SyncLogId, provider::ProviderType};

/// The pass was started by the user rather than the scheduler
pub const FLAG_MANUAL: u32 = 1;
/// The connectivity check failed
pub const FLAG_NOT_CONNECTED: u32 = 1 << 1;
/// The remote rejected our credentials
pub const FLAG_AUTH_FAILED: u32 = 1 << 2;
/// The pass was cancelled before all operations ran
pub const FLAG_INTERRUPTED: u32 = 1 << 3;

/// Progress of one sync pass
#[derive(Debug, Clone)]
pub struct SyncLogRecord {
    account: String,
    provider_type: ProviderType,
    manual: bool,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    entries: Vec<String>,
    failures: Vec<String>,
    conflicts: Vec<String>,
    not_connected: bool,
    auth_failed: bool,
    interrupted: bool,
}

impl SyncLogRecord {
    #[must_use]
    pub fn new(account: impl Into<String>, provider_type: ProviderType, manual: bool) -> Self {
        Self {
            account: account.into(),
            provider_type,
            manual,
            start: Utc::now(),
            end: None,
            entries: Vec::new(),
            failures: Vec::new(),
            conflicts: Vec::new(),
            not_connected: false,
            auth_failed: false,
            interrupted: false,
        }
    }

    pub fn add_entry(&mut self, entry: impl Into<String>) {
        self.entries.push(entry.into());
    }

    /// Record a failure; the full error chain is kept
    pub fn add_failure(&mut self, err: &anyhow::Error) {
        self.failures.push(format!("{err:#}"));
    }

    /// Record a resolved conflict
    pub fn add_conflict(&mut self, description: impl Into<String>) {
        let description = description.into();
        self.entries.push(format!("Conflict: {description}"));
        self.conflicts.push(description);
    }

    pub fn set_account(&mut self, account: impl Into<String>) {
        self.account = account.into();
    }

    pub fn set_not_connected(&mut self) {
        self.not_connected = true;
    }

    pub fn set_auth_failed(&mut self) {
        self.auth_failed = true;
    }

    pub fn set_interrupted(&mut self) {
        self.interrupted = true;
    }

    pub fn set_end(&mut self, end: DateTime<Utc>) {
        self.end = Some(end);
    }

    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    #[must_use]
    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.end
    }

    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    #[must_use]
    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    #[must_use]
    pub fn conflicts(&self) -> &[String] {
        &self.conflicts
    }

    #[must_use]
    pub fn is_auth_failed(&self) -> bool {
        self.auth_failed
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    /// A pass succeeds when it connected and no operation failed
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.not_connected && !self.auth_failed && self.failures.is_empty()
    }

    #[must_use]
    pub fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.manual {
            flags |= FLAG_MANUAL;
        }
        if self.not_connected {
            flags |= FLAG_NOT_CONNECTED;
        }
        if self.auth_failed {
            flags |= FLAG_AUTH_FAILED;
        }
        if self.interrupted {
            flags |= FLAG_INTERRUPTED;
        }
        flags
    }

    /// Entries joined one per line
    #[must_use]
    pub fn log_text(&self) -> String {
        self.entries.join("\n")
    }

    /// Failures joined one per line
    #[must_use]
    pub fn failures_text(&self) -> String {
        self.failures.join("\n")
    }
}

/// A persisted sync log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub id: SyncLogId,
    pub account: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub flags: u32,
    pub log: String,
    pub failures: String,
}

impl SyncLogEntry {
    #[must_use]
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.has_flag(FLAG_NOT_CONNECTED | FLAG_AUTH_FAILED)
    }
}
