//! Command implementations for the shift CLI.
//!
//! Each submodule implements the logic for one subcommand.

pub mod apply;
pub mod new;
pub mod reset;
pub mod status;

use anyhow::{Context, Result};
use shift_core::{DatabaseUrl, Migrator};
use tracing::debug;

use crate::config::Config;

/// Connect to the configured database
pub async fn open_migrator(config: &Config) -> Result<Migrator> {
    let url = config.database_url()?;
    match DatabaseUrl::parse(url)? {
        DatabaseUrl::Postgres(_) => debug!("using postgres backend"),
        DatabaseUrl::SqliteMemory => debug!("using in-memory sqlite backend"),
        DatabaseUrl::SqliteFile(path) => debug!("using sqlite backend at {}", path.display()),
    }
    let backend = shift_core::connect(url, &config.connect_options())
        .await
        .context("Failed to connect to database")?;
    Ok(Migrator::new(backend))
}
