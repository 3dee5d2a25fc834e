//! Database access for the migration engine.
//!
//! The engine only talks to the database through [`Backend`] and
//! [`Transaction`]. Two backends are provided:
//!
//! - **sqlite**: rusqlite, a single connection behind an async mutex
//! - **postgres**: sqlx connection pool (feature `postgres`)
//!
//! Engine specific SQL text lives in [`Dialect`].

pub mod dialect;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sqlite;

pub use dialect::{quote_ident, Dialect, Relation, RelationKind};
#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    ReadCommitted,
    Serializable,
}

/// A value bound to or read from a statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Text(String),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

/// One result row, columns in select order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row(Vec<SqlValue>);

impl Row {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SqlValue> {
        self.0.get(index)
    }

    /// Read a non-null text column
    pub fn text(&self, index: usize, column: &'static str) -> Result<String> {
        match self.get(index) {
            Some(SqlValue::Text(value)) => Ok(value.clone()),
            Some(SqlValue::Integer(value)) => Ok(value.to_string()),
            other => Err(Error::UnexpectedValue {
                column,
                value: format!("{other:?}"),
            }),
        }
    }

    /// Read a non-null integer column
    pub fn integer(&self, index: usize, column: &'static str) -> Result<i64> {
        match self.get(index) {
            Some(SqlValue::Integer(value)) => Ok(*value),
            Some(SqlValue::Text(value)) => value.trim().parse().map_err(|_| Error::UnexpectedValue {
                column,
                value: value.clone(),
            }),
            other => Err(Error::UnexpectedValue {
                column,
                value: format!("{other:?}"),
            }),
        }
    }
}

/// An open transaction.
///
/// Dropping a transaction without calling [`Transaction::commit`] rolls it back.
#[async_trait]
pub trait Transaction: Send {
    /// SQL dialect of the underlying connection
    fn dialect(&self) -> Dialect;

    /// Run a single statement, returning the number of affected rows
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Run a single query and collect every row
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Run a script of one or more statements, without parameters
    async fn execute_script(&mut self, script: &str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// A database the engine can open transactions against
#[async_trait]
pub trait Backend: Send + Sync {
    fn dialect(&self) -> Dialect;

    async fn begin(&self, isolation: Isolation) -> Result<Box<dyn Transaction>>;
}

/// Connection tuning shared by all backends
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// How long SQLite waits on a locked database before failing
    pub busy_timeout: Duration,
    /// PostgreSQL pool size
    pub max_connections: u32,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            max_connections: 1,
        }
    }
}

/// A parsed database URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUrl {
    SqliteMemory,
    SqliteFile(PathBuf),
    Postgres(String),
}

impl DatabaseUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::UnsupportedUrl(url.to_string()));
        }

        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(DatabaseUrl::Postgres(url.to_string()));
        }

        if let Some(rest) = url.strip_prefix("sqlite:") {
            let path = rest.strip_prefix("//").unwrap_or(rest);
            return match path {
                "" | ":memory:" => Ok(DatabaseUrl::SqliteMemory),
                path => Ok(DatabaseUrl::SqliteFile(PathBuf::from(path))),
            };
        }

        if url == ":memory:" {
            return Ok(DatabaseUrl::SqliteMemory);
        }

        if url.contains("://") {
            return Err(Error::UnsupportedUrl(url.to_string()));
        }

        Ok(DatabaseUrl::SqliteFile(PathBuf::from(url)))
    }
}

/// Open a backend for `url`
pub async fn connect(url: &str, options: &ConnectOptions) -> Result<Arc<dyn Backend>> {
    match DatabaseUrl::parse(url)? {
        DatabaseUrl::SqliteMemory => Ok(Arc::new(SqliteBackend::open_in_memory()?)),
        DatabaseUrl::SqliteFile(path) => {
            Ok(Arc::new(SqliteBackend::open(&path, options.busy_timeout)?))
        }
        #[cfg(feature = "postgres")]
        DatabaseUrl::Postgres(url) => Ok(Arc::new(
            PostgresBackend::connect(&url, options.max_connections).await?,
        )),
        #[cfg(not(feature = "postgres"))]
        DatabaseUrl::Postgres(url) => Err(Error::UnsupportedUrl(format!(
            "{url} (built without the postgres feature)"
        ))),
    }
}
