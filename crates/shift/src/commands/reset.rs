//! Drop everything and replay all migrations.

use anyhow::{Context, Result};
use colored::Colorize;
use shift_core::{DirectorySource, ResetOutcome};
use std::path::Path;

use super::{apply::print_report, open_migrator};
use crate::config::Config;
use crate::prompt::TerminalPrompt;

pub async fn execute(dir: &Path, yes: bool, config: &Config) -> Result<()> {
    let migrator = open_migrator(config).await?;
    let outcome = migrator
        .reset(&DirectorySource::new(dir), &TerminalPrompt, yes)
        .await
        .context("Reset failed")?;

    match outcome {
        ResetOutcome::Aborted => println!("{}", "Aborted.".yellow()),
        ResetOutcome::Completed { dropped, report } => {
            println!("{} Dropped {} relation(s)", "✓".green(), dropped.len());
            print_report(&report);
        }
    }
    Ok(())
}
