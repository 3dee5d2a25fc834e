//! Show migration status.

use anyhow::{Context, Result};
use colored::Colorize;
use shift_core::{DirectorySource, StatusReport};
use std::path::Path;

use super::open_migrator;
use crate::config::Config;

pub async fn execute(dir: &Path, json: bool, config: &Config) -> Result<()> {
    let migrator = open_migrator(config).await?;
    let report = migrator
        .status(&DirectorySource::new(dir))
        .await
        .with_context(|| format!("Failed to read status for {}", dir.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_status(&report);
    }

    if !report.is_consistent() {
        anyhow::bail!(
            "{} applied migration(s) were modified after being applied",
            report.mismatched.len()
        );
    }
    Ok(())
}

fn print_status(report: &StatusReport) {
    println!("{}", "Migration Status".cyan().bold());
    println!("{}", "─".repeat(50));

    if report.applied.is_empty() {
        println!("  {}", "No migrations applied".yellow());
    }
    let mut current_round = None;
    for entry in &report.applied {
        if current_round != Some(entry.round) {
            current_round = Some(entry.round);
            println!("  {}", format!("Round {}", entry.round).bold());
        }
        let marker = if report.mismatched.contains(&entry.name) {
            "✗ modified".red()
        } else if report.orphaned.contains(&entry.name) {
            "○ file missing".yellow()
        } else {
            "✓".green()
        };
        println!(
            "    {} {} {}",
            marker,
            entry.name,
            entry.applied_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
    }

    println!();
    if report.pending.is_empty() {
        println!("{}", "✓ Up to date".green().bold());
    } else {
        println!("{}", format!("{} pending:", report.pending.len()).yellow().bold());
        for name in &report.pending {
            println!("  • {}", name);
        }
    }
}
