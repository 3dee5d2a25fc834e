//! The migration ledger.
//!
//! Applied migrations are recorded in a dedicated table, one row per
//! migration: name, checksum at apply time, the round it was applied in and
//! when. Every operation runs inside a caller supplied [`Transaction`].

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{SqlValue, Transaction};
use crate::error::{Error, Result};

/// Reserved name of the ledger table
pub const LEDGER_TABLE: &str = "_shift_migrations";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ─────────────────────────────────────────────────────────────────────────────
// Entity Types
// ─────────────────────────────────────────────────────────────────────────────

/// A recorded migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub name: String,
    pub checksum: String,
    pub round: u32,
    pub applied_at: DateTime<Utc>,
}

/// A migration about to be recorded; `applied_at` is filled in by the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub name: String,
    pub checksum: String,
    pub round: u32,
}

/// Round for the next batch: one past the last recorded round, or 1
pub fn next_round(entries: &[LedgerEntry]) -> Result<u32> {
    match entries.last() {
        None => Ok(1),
        Some(entry) => entry
            .round
            .checked_add(1)
            .ok_or(Error::RoundOverflow(entry.round)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ledger Operations
// ─────────────────────────────────────────────────────────────────────────────

/// Access to the ledger table
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(LEDGER_TABLE)
    }
}

impl Ledger {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table if it does not exist yet
    pub async fn ensure_exists(&self, tx: &mut dyn Transaction) -> Result<()> {
        let sql = tx.dialect().create_ledger_sql(&self.table);
        tx.execute(&sql, &[]).await?;
        Ok(())
    }

    /// Whether the ledger table exists, without creating it
    pub async fn exists(&self, tx: &mut dyn Transaction) -> Result<bool> {
        let dialect = tx.dialect();
        let rows = tx
            .query(
                &dialect.table_exists_sql(),
                &[dialect.table_exists_param(&self.table)],
            )
            .await?;
        match rows.first() {
            Some(row) => Ok(row.integer(0, "exists")? != 0),
            None => Ok(false),
        }
    }

    /// Lock the ledger table until the enclosing transaction ends.
    ///
    /// Concurrent appliers queue here and see each other's committed rows.
    pub async fn acquire_exclusive_lock(&self, tx: &mut dyn Transaction) -> Result<()> {
        if let Some(sql) = tx.dialect().lock_table_sql(&self.table) {
            tx.execute(&sql, &[]).await?;
        }
        Ok(())
    }

    /// All recorded migrations ordered by (round, name)
    pub async fn list_applied(&self, tx: &mut dyn Transaction) -> Result<Vec<LedgerEntry>> {
        let sql = tx.dialect().select_ledger_sql(&self.table);
        let rows = tx.query(&sql, &[]).await?;

        rows.iter()
            .map(|row| {
                let round = row.integer(2, "round")?;
                Ok(LedgerEntry {
                    name: row.text(0, "name")?,
                    checksum: row.text(1, "checksum")?,
                    round: u32::try_from(round).map_err(|_| Error::UnexpectedValue {
                        column: "round",
                        value: round.to_string(),
                    })?,
                    applied_at: parse_timestamp(&row.text(3, "applied_at")?)?,
                })
            })
            .collect()
    }

    /// Insert a ledger row. Fails if `name` is already recorded.
    pub async fn record(&self, tx: &mut dyn Transaction, entry: &NewLedgerEntry) -> Result<()> {
        let sql = tx.dialect().insert_ledger_sql(&self.table);
        tx.execute(
            &sql,
            &[
                SqlValue::Text(entry.name.clone()),
                SqlValue::Text(entry.checksum.clone()),
                SqlValue::Integer(i64::from(entry.round)),
            ],
        )
        .await?;
        Ok(())
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    // Fractional seconds can appear when rows were written by other tools
    let whole = value.split('.').next().unwrap_or(value);
    NaiveDateTime::parse_from_str(whole, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc)))
        .map_err(|_| Error::InvalidTimestamp(value.to_string()))
}
