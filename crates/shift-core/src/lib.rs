//! shift-core - forward-only SQL migration engine
//!
//! This crate provides the engine behind the `shift` CLI:
//!
//! - **catalog**: migration discovery and content checksums
//! - **ledger**: the table recording applied migrations and their rounds
//! - **migrator**: transactional, all-or-nothing apply
//! - **reset**: drop everything and replay history
//! - **db**: SQLite and PostgreSQL backends
//!
//! ```ignore
//! use shift_core::{connect, ConnectOptions, DirectorySource, Migrator};
//!
//! let backend = connect("sqlite://app.db", &ConnectOptions::default()).await?;
//! let report = Migrator::new(backend)
//!     .apply(&DirectorySource::new("migrations"))
//!     .await?;
//! println!("applied {}", report.count());
//! ```

pub mod catalog;
pub mod checksum;
pub mod db;
pub mod error;
pub mod generate;
pub mod ledger;
pub mod migrator;
pub mod reset;

// Re-export commonly used types
pub use catalog::{DirectorySource, MigrationFile, MigrationSource, StaticSource};
pub use db::{connect, Backend, ConnectOptions, DatabaseUrl, Isolation, SqliteBackend};
pub use error::{Error, Result};
pub use ledger::{Ledger, LedgerEntry, LEDGER_TABLE};
pub use migrator::{ApplyReport, Migrator, StatusReport};
pub use reset::{Prompt, ResetOutcome, SearchPath};
