//! CLI argument definitions using clap derive macros.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Forward-only SQL migrations
///
/// Applies pending migrations as one all-or-nothing round, detects edited
/// migrations by checksum, and can rebuild a database from scratch.
#[derive(Parser, Debug)]
#[command(name = "shift")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Database URL (overrides SHIFT_DATABASE_URL, DATABASE_URL and config)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Config file (defaults to ./shift.toml, then the user config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply all pending migrations as a new round
    Apply(DirArgs),

    /// Drop every table and replay all migrations
    Reset {
        #[command(flatten)]
        dir: DirArgs,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Show applied, pending and modified migrations
    Status {
        #[command(flatten)]
        dir: DirArgs,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Create a new empty migration file
    New {
        /// Migration name in lowercase snake_case (e.g. add_users)
        name: String,

        #[command(flatten)]
        dir: DirArgs,
    },

    /// Show version
    Version,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DirArgs {
    /// Migrations directory (defaults to the configured one)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,
}
