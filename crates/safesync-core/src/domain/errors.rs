//! Domain error types
//!
//! Validation failures on identifiers and enum values read back from
//! storage, plus the stale-row signal raised when a guarded write finds
//! that its row moved on.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    /// Unknown provider type name
    #[error("Unknown provider type: {0}")]
    UnknownProviderType(String),

    /// Unknown file change flag
    #[error("Invalid file change value: {0}")]
    InvalidFileChange(String),

    /// A guarded write matched no row: the row was deleted or modified
    /// after the caller read it
    #[error("Stale row: {0}")]
    StaleRow(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::UnknownProviderType("gdrive".to_string());
        assert_eq!(err.to_string(), "Unknown provider type: gdrive");

        let err = DomainError::StaleRow("file 7".to_string());
        assert_eq!(err.to_string(), "Stale row: file 7");
    }

    #[test]
    fn test_error_equality() {
        let a = DomainError::InvalidFileChange("x".to_string());
        let b = DomainError::InvalidFileChange("x".to_string());
        assert_eq!(a, b.clone());
        assert_ne!(a, DomainError::InvalidFileChange("y".to_string()));
    }
}
