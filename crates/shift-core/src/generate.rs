//! Creating new migration files.
//!
//! Files are named `<YYYYMMDDHHMMSS>_<snake_case_name>.sql` so that sorting by
//! file name is sorting by creation time.

use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::catalog::MIGRATION_EXTENSION;
use crate::error::{Error, Result};

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Whether `name` is lowercase snake case: `[a-z][a-z0-9_]*`, no `__`, no trailing `_`
pub fn is_valid_name(name: &str) -> bool {
    name.starts_with(|c: char| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.ends_with('_')
        && !name.contains("__")
}

/// File name for a migration created at `now`
pub fn migration_file_name(name: &str, now: DateTime<Utc>) -> Result<String> {
    if !is_valid_name(name) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(format!(
        "{}_{name}.{MIGRATION_EXTENSION}",
        now.format(TIMESTAMP_FORMAT)
    ))
}

/// Create an empty migration in `dir`, creating the directory if needed
pub fn create_migration(dir: &Path, name: &str, now: DateTime<Utc>) -> Result<PathBuf> {
    let file_name = migration_file_name(name, now)?;
    fs::create_dir_all(dir)?;

    let path = dir.join(&file_name);
    let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
    writeln!(file, "-- {name}")?;
    writeln!(file, "-- created {}", now.format("%Y-%m-%d %H:%M:%S UTC"))?;
    writeln!(file)?;

    info!("created migration {}", path.display());
    Ok(path)
}
