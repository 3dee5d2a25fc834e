//! Apply pending migrations.

use anyhow::{Context, Result};
use colored::Colorize;
use shift_core::{ApplyReport, DirectorySource};
use std::path::Path;

use super::open_migrator;
use crate::config::Config;

pub async fn execute(dir: &Path, config: &Config) -> Result<()> {
    let migrator = open_migrator(config).await?;
    let report = migrator
        .apply(&DirectorySource::new(dir))
        .await
        .with_context(|| format!("Failed to apply migrations from {}", dir.display()))?;

    print_report(&report);
    Ok(())
}

pub fn print_report(report: &ApplyReport) {
    match report.round {
        Some(round) => {
            println!(
                "{} Applied {} migration(s) in round {}",
                "✓".green(),
                report.count(),
                round.to_string().cyan()
            );
            for name in &report.applied {
                println!("  • {}", name);
            }
        }
        None => println!("{}", "Nothing to apply".yellow()),
    }

    if !report.orphaned.is_empty() {
        println!();
        println!(
            "{}",
            "Applied migrations with no file in the catalog:".yellow()
        );
        for name in &report.orphaned {
            println!("  ○ {}", name);
        }
    }
}
