//! Configuration management for shift.
//!
//! Configuration is loaded from multiple sources with precedence:
//! 1. Command line flags
//! 2. Environment variables (SHIFT_*, DATABASE_URL)
//! 3. Config file (./shift.toml, then the user config directory)
//! 4. Default values

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use shift_core::ConnectOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

const LOCAL_CONFIG_FILE: &str = "shift.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database connection settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Migration catalog settings
    #[serde(default)]
    pub migrations: MigrationsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `postgres://...`, `sqlite://path` or a plain SQLite file path
    pub url: Option<String>,

    /// How long SQLite waits for a locked database, in milliseconds
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// PostgreSQL pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Directory holding the *.sql migration files
    #[serde(default = "default_migrations_dir")]
    pub dir: PathBuf,
}

// Default value functions
fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_max_connections() -> u32 {
    1
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_migrations_dir(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// `explicit` must exist when given; otherwise the first existing of
    /// `./shift.toml` and the user config file is used.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::config_candidates().into_iter().find(|p| p.exists()),
        };

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Candidate config file locations, in lookup order
    pub fn config_candidates() -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(proj_dirs) = ProjectDirs::from("dev", "shift", "shift") {
            candidates.push(proj_dirs.config_dir().join("config.toml"));
        }
        candidates
    }

    /// Overlay environment variables read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SHIFT_DATABASE_URL").or_else(|| lookup("DATABASE_URL")) {
            self.database.url = Some(url);
        }
        if let Some(dir) = lookup("SHIFT_MIGRATIONS_DIR") {
            self.migrations.dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup("SHIFT_BUSY_TIMEOUT_MS") {
            self.database.busy_timeout_ms =
                value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: "SHIFT_BUSY_TIMEOUT_MS",
                    value,
                })?;
        }
        Ok(())
    }

    /// The database URL, or an error naming every way to set it
    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database
            .url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingDatabaseUrl)
    }

    /// Migrations directory, preferring an explicit override
    pub fn migrations_dir(&self, flag: Option<&Path>) -> PathBuf {
        flag.map(Path::to_path_buf)
            .unwrap_or_else(|| self.migrations.dir.clone())
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            busy_timeout: Duration::from_millis(self.database.busy_timeout_ms),
            max_connections: self.database.max_connections,
        }
    }
}
