//! Error types for the shift CLI.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors, reported before any database work starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No database URL. Pass --database-url, set SHIFT_DATABASE_URL or DATABASE_URL, or add [database] url to shift.toml")]
    MissingDatabaseUrl,

    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
