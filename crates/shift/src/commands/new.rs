//! Create a new migration file.

use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use shift_core::generate::create_migration;
use std::path::Path;

pub fn execute(dir: &Path, name: &str) -> Result<()> {
    let path = create_migration(dir, name, Utc::now())
        .with_context(|| format!("Failed to create migration {name}"))?;
    println!("{} Created {}", "✓".green(), path.display().to_string().cyan());
    Ok(())
}
