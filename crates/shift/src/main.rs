//! shift - forward-only SQL migrations
//!
//! Thin command-line layer over shift-core: configuration, prompts and
//! console output.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;
mod commands;
mod config;
mod error;
mod prompt;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(
            EnvFilter::from_default_env()
                .add_directive(format!("shift={level}").parse()?)
                .add_directive(format!("shift_core={level}").parse()?),
        )
        .init();

    // Load configuration
    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.database_url {
        config.database.url = Some(url);
    }

    // Execute command
    match cli.command {
        Commands::Apply(dir) => {
            let dir = config.migrations_dir(dir.dir.as_deref());
            commands::apply::execute(&dir, &config).await
        }
        Commands::Reset { dir, yes } => {
            let dir = config.migrations_dir(dir.dir.as_deref());
            commands::reset::execute(&dir, yes, &config).await
        }
        Commands::Status { dir, json } => {
            let dir = config.migrations_dir(dir.dir.as_deref());
            commands::status::execute(&dir, json, &config).await
        }
        Commands::New { name, dir } => {
            let dir = config.migrations_dir(dir.dir.as_deref());
            commands::new::execute(&dir, &name)
        }
        Commands::Version => {
            println!("shift {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
