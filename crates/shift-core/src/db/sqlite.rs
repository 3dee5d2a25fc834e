//! SQLite backend.

use async_trait::async_trait;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::{Backend, Dialect, Isolation, Row, SqlValue, Transaction};
use crate::error::Result;

/// SQLite database connection.
///
/// A single connection guarded by an async mutex; a transaction owns the
/// lock for its whole lifetime.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open (or create) a database file
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        debug!("opening sqlite database at {}", path.display());
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn begin(&self, isolation: Isolation) -> Result<Box<dyn Transaction>> {
        let conn = self.conn.clone().lock_owned().await;
        let begin = match isolation {
            // Takes the database write lock up front; a concurrent writer
            // waits here for up to the busy timeout.
            Isolation::Serializable => "BEGIN EXCLUSIVE",
            Isolation::ReadCommitted => "BEGIN DEFERRED",
        };
        conn.execute_batch(begin)?;
        Ok(Box::new(SqliteTransaction { conn, open: true }))
    }
}

struct SqliteTransaction {
    conn: OwnedMutexGuard<Connection>,
    open: bool,
}

#[async_trait]
impl Transaction for SqliteTransaction {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let affected = self
            .conn
            .execute(sql, params_from_iter(params.iter().map(to_value)))?;
        Ok(affected as u64)
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        Ok(query_rows(&self.conn, sql, params)?)
    }

    async fn execute_script(&mut self, script: &str) -> Result<()> {
        self.conn.execute_batch(script)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.conn.execute_batch("COMMIT")?;
        this.open = false;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.conn.execute_batch("ROLLBACK")?;
        this.open = false;
        Ok(())
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!("failed to roll back abandoned transaction: {e}");
            }
        }
    }
}

fn query_rows(conn: &Connection, sql: &str, params: &[SqlValue]) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let columns = stmt.column_count();
    let mut rows = stmt.query(params_from_iter(params.iter().map(to_value)))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns);
        for index in 0..columns {
            values.push(from_value_ref(row.get_ref(index)?));
        }
        out.push(Row::new(values));
    }
    Ok(out)
}

fn to_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(*v),
        SqlValue::Text(v) => Value::Text(v.clone()),
    }
}

fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Text(v.to_string()),
        ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => SqlValue::Text(hex::encode(v)),
    }
}
