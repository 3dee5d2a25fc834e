//! PostgreSQL backend on top of an sqlx pool.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, Executor, PgPool, Postgres, Row as _, TypeInfo};
use tracing::debug;

use super::{Backend, Dialect, Isolation, Row, SqlValue, Transaction};
use crate::error::Result;

/// PostgreSQL connection pool
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        debug!("connecting to postgres (pool size {max_connections})");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn begin(&self, isolation: Isolation) -> Result<Box<dyn Transaction>> {
        let mut tx = self.pool.begin().await?;
        if isolation == Isolation::Serializable {
            // Must run before any other statement of the transaction.
            sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                .execute(&mut *tx)
                .await?;
        }
        Ok(Box::new(PostgresTransaction { tx }))
    }
}

struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    params: &[SqlValue],
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Integer(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

#[async_trait]
impl Transaction for PostgresTransaction {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let result = bind_all(sqlx::query(sql), params)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute_script(&mut self, script: &str) -> Result<()> {
        // No arguments, so this goes over the simple query protocol and
        // accepts several statements.
        Executor::execute(&mut *self.tx, script).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }
}

fn decode_row(row: &PgRow) -> Result<Row> {
    let mut values = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "INT2" => row
                .try_get::<Option<i16>, _>(index)?
                .map(|v| SqlValue::Integer(v.into())),
            "INT4" => row
                .try_get::<Option<i32>, _>(index)?
                .map(|v| SqlValue::Integer(v.into())),
            "INT8" => row.try_get::<Option<i64>, _>(index)?.map(SqlValue::Integer),
            "BOOL" => row
                .try_get::<Option<bool>, _>(index)?
                .map(|v| SqlValue::Integer(v.into())),
            _ => row.try_get::<Option<String>, _>(index)?.map(SqlValue::Text),
        };
        values.push(value.unwrap_or(SqlValue::Null));
    }
    Ok(Row::new(values))
}
