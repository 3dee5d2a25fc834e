//! Error types for shift-core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using shift-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for migration operations
#[derive(Error, Debug)]
pub enum Error {
    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("Unsupported database URL: {0}")]
    UnsupportedUrl(String),

    #[error("Unexpected value in column {column}: {value}")]
    UnexpectedValue { column: &'static str, value: String },

    #[error("Invalid timestamp in ledger: {0}")]
    InvalidTimestamp(String),

    #[error("Ledger round {0} is the last representable round")]
    RoundOverflow(u32),

    // Catalog errors
    #[error("Cannot read migrations directory {}: {source}", path.display())]
    Catalog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid migration name: {0} (expected lowercase snake_case)")]
    InvalidName(String),

    // Integrity errors
    #[error("Checksum mismatch for migration {name}: recorded {recorded}, found {current}")]
    ChecksumMismatch {
        name: String,
        recorded: String,
        current: String,
    },

    // Execution errors
    #[error("Migration {name} failed: {source}")]
    Execution {
        name: String,
        #[source]
        source: Box<Error>,
    },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap a failure raised while running a migration script
    pub fn execution(name: impl Into<String>, source: Error) -> Self {
        Self::Execution {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Check if this error is a checksum mismatch on an applied migration
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::ChecksumMismatch { .. })
    }

    /// Check if this error came from a failing migration script
    pub fn is_execution_failure(&self) -> bool {
        matches!(self, Self::Execution { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_mismatch_names_migration() {
        let err = Error::ChecksumMismatch {
            name: "20230101000000_init".into(),
            recorded: "aaa".into(),
            current: "bbb".into(),
        };
        assert!(err.is_integrity_violation());
        assert!(!err.is_execution_failure());
        assert!(err.to_string().contains("20230101000000_init"));
    }

    #[test]
    fn test_execution_wraps_source() {
        let err = Error::execution("20230102000000_users", Error::Other("syntax error".into()));
        assert!(err.is_execution_failure());
        assert_eq!(
            err.to_string(),
            "Migration 20230102000000_users failed: syntax error"
        );
    }

    #[test]
    fn test_catalog_error_includes_path() {
        let err = Error::Catalog {
            path: PathBuf::from("/nope/migrations"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("/nope/migrations"));
    }
}
