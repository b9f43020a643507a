//! Row identifier newtypes
//!
//! SQLite assigns integer keys to providers, tracked files and sync logs.
//! Each key gets its own type so a file id can never be passed where a
//! provider id is expected.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            #[doc = concat!("Create a ", stringify!($name), " from an i64 value")]
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the inner i64 value
            #[must_use]
            pub const fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<i64>()
                    .map(Self)
                    .map_err(|e| {
                        DomainError::InvalidId(format!(
                            concat!("Invalid ", stringify!($name), ": {}"),
                            e
                        ))
                    })
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

row_id!(
    /// Identifier of a linked provider account
    ProviderId
);

row_id!(
    /// Identifier of a tracked file row
    TrackedFileId
);

row_id!(
    /// Identifier of a persisted sync log
    SyncLogId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip() {
        let id = TrackedFileId::new(42);
        assert_eq!(id.as_i64(), 42);
        assert_eq!(id.to_string(), "42");
        assert_eq!("42".parse::<TrackedFileId>().unwrap(), id);
        assert_eq!(ProviderId::from(3), ProviderId::new(3));
    }

    #[test]
    fn test_id_parse_error() {
        let err = "abc".parse::<ProviderId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(msg) if msg.contains("ProviderId")));
    }

    #[test]
    fn test_id_serde_transparent() {
        let json = serde_json::to_string(&SyncLogId::new(9)).unwrap();
        assert_eq!(json, "9");
    }
}
