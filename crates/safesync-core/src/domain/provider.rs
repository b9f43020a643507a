//! Provider accounts
//!
//! A provider is one linked cloud account (a Dropbox user or an ownCloud
//! login on a given server). Every tracked file belongs to exactly one
//! provider.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{errors::DomainError, newtypes::ProviderId};

/// The kind of remote store behind a provider account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Dropbox,
    Owncloud,
}

impl ProviderType {
    /// Storage name used in the database and credential store
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Dropbox => "dropbox",
            Self::Owncloud => "owncloud",
        }
    }

    /// Human-readable name
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Dropbox => "Dropbox",
            Self::Owncloud => "ownCloud",
        }
    }
}

impl Display for ProviderType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ProviderType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dropbox" => Ok(Self::Dropbox),
            "owncloud" => Ok(Self::Owncloud),
            other => Err(DomainError::UnknownProviderType(other.to_string())),
        }
    }
}

/// A linked provider account as stored in the sync database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbProvider {
    pub id: ProviderId,
    pub provider_type: ProviderType,
    /// Stable account identifier (Dropbox account id, `user@host` for ownCloud)
    pub acct: String,
    /// Name shown to the user, refreshed on every successful connectivity check
    pub display_name: Option<String>,
    /// Seconds between automatic syncs
    pub sync_freq: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

impl DbProvider {
    /// Display name if known, otherwise the account identifier
    #[must_use]
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.acct)
    }

    /// Whether an automatic sync is due at `now`
    ///
    /// A provider that never synced is always due. Otherwise the most
    /// recent attempt, successful or not, starts the next interval.
    #[must_use]
    pub fn is_sync_due(&self, now: DateTime<Utc>) -> bool {
        if self.sync_freq == 0 {
            return false;
        }
        let last = match (self.last_success, self.last_failure) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => return true,
        };
        now - last >= chrono::Duration::seconds(i64::from(self.sync_freq))
    }
}

/// Outcome of a successful connectivity check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConnectivityResult {
    pub display_name: String,
}
