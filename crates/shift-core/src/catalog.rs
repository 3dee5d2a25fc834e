//! Migration catalogs.
//!
//! A catalog is the ordered list of migrations that should exist, each with a
//! checksum of its current content. [`DirectorySource`] reads `*.sql` files
//! from a directory; [`StaticSource`] holds scripts in memory.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::checksum::{checksum_bytes, checksum_file};
use crate::error::{Error, Result};

/// File extension recognised as a migration script
pub const MIGRATION_EXTENSION: &str = "sql";

/// Where the content of a migration lives
#[derive(Debug, Clone, PartialEq, Eq)]
enum Origin {
    File(PathBuf),
    Inline(String),
}

/// A migration discovered in a catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// Unique name, the file name without its extension
    pub name: String,
    /// SHA-256 hex digest of the current content
    pub checksum: String,
    origin: Origin,
}

impl MigrationFile {
    /// Location of the script on disk, if it came from a directory
    pub fn path(&self) -> Option<&Path> {
        match &self.origin {
            Origin::File(path) => Some(path),
            Origin::Inline(_) => None,
        }
    }

    /// Load the script content for execution
    pub fn load(&self) -> Result<String> {
        match &self.origin {
            Origin::File(path) => Ok(fs::read_to_string(path)?),
            Origin::Inline(sql) => Ok(sql.clone()),
        }
    }
}

/// Anything that can list migrations in application order
pub trait MigrationSource: Send + Sync {
    /// List every migration, sorted by name
    fn list(&self) -> Result<Vec<MigrationFile>>;

    /// Human readable location, used in logs
    fn describe(&self) -> String;
}

/// Migrations stored as `*.sql` files in a directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn absolute_dir(&self) -> Result<PathBuf> {
        fs::canonicalize(&self.dir).map_err(|source| Error::Catalog {
            path: self.dir.clone(),
            source,
        })
    }
}

impl MigrationSource for DirectorySource {
    fn list(&self) -> Result<Vec<MigrationFile>> {
        let dir = self.absolute_dir()?;
        let entries = fs::read_dir(&dir).map_err(|source| Error::Catalog {
            path: dir.clone(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| Error::Catalog {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some(MIGRATION_EXTENSION) {
                debug!("skipping non-migration file {}", path.display());
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                debug!("skipping migration with non UTF-8 name {}", path.display());
                continue;
            };

            files.push(MigrationFile {
                name: name.to_string(),
                checksum: checksum_file(&path)?,
                origin: Origin::File(path.clone()),
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("found {} migration(s) in {}", files.len(), dir.display());
        Ok(files)
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Migrations held in memory, e.g. scripts embedded with `include_str!`
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    migrations: Vec<(String, String)>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a migration script under `name`
    pub fn with(mut self, name: impl Into<String>, sql: impl Into<String>) -> Self {
        self.migrations.push((name.into(), sql.into()));
        self
    }
}

impl MigrationSource for StaticSource {
    fn list(&self) -> Result<Vec<MigrationFile>> {
        let mut files: Vec<MigrationFile> = self
            .migrations
            .iter()
            .map(|(name, sql)| MigrationFile {
                name: name.clone(),
                checksum: checksum_bytes(sql.as_bytes()),
                origin: Origin::Inline(sql.clone()),
            })
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    fn describe(&self) -> String {
        format!("{} embedded migration(s)", self.migrations.len())
    }
}
