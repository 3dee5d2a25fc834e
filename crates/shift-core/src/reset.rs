//! Resetting a database.
//!
//! A reset drops every table visible through the active schema search path,
//! the ledger included, then replays the full catalog from round 1.

use tracing::{debug, info, warn};

use crate::catalog::MigrationSource;
use crate::db::{quote_ident, Isolation, Relation, Transaction};
use crate::error::Result;
use crate::migrator::{ApplyReport, Migrator};

const USER_PLACEHOLDER: &str = "$user";

/// Yes/no confirmation supplied by the caller
pub trait Prompt: Send + Sync {
    fn confirm(&self, message: &str) -> Result<bool>;
}

/// How a reset ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetOutcome {
    /// Confirmation was declined; nothing was touched
    Aborted,
    Completed {
        /// Relations dropped, as `schema.name`
        dropped: Vec<String>,
        report: ApplyReport,
    },
}

impl ResetOutcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self, ResetOutcome::Aborted)
    }
}

/// A parsed schema search path such as `"$user", public`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPath(Vec<String>);

impl SearchPath {
    /// Split a comma separated search path, honouring double quoted entries
    pub fn parse(raw: &str) -> Self {
        let mut entries = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '"' if quoted && chars.peek() == Some(&'"') => {
                    current.push('"');
                    chars.next();
                }
                '"' => quoted = !quoted,
                ',' if !quoted => entries.push(std::mem::take(&mut current)),
                c if c.is_whitespace() && !quoted => {}
                c => current.push(c),
            }
        }
        entries.push(current);

        Self(entries.into_iter().filter(|e| !e.is_empty()).collect())
    }

    pub fn entries(&self) -> &[String] {
        &self.0
    }

    /// Concrete schema names, with `$user` replaced by `current_user`.
    ///
    /// `$user` is skipped when there is no user; duplicates keep their first
    /// position.
    pub fn resolve(&self, current_user: Option<&str>) -> Vec<String> {
        let mut schemas: Vec<String> = Vec::new();
        for entry in &self.0 {
            let schema = if entry == USER_PLACEHOLDER {
                match current_user {
                    Some(user) => user.to_string(),
                    None => continue,
                }
            } else {
                entry.clone()
            };
            if !schemas.contains(&schema) {
                schemas.push(schema);
            }
        }
        schemas
    }
}

impl Migrator {
    /// Drop every table under the search path, then re-apply `source`.
    ///
    /// Asks `prompt` first unless `skip_confirmation` is set.
    pub async fn reset(
        &self,
        source: &dyn MigrationSource,
        prompt: &dyn Prompt,
        skip_confirmation: bool,
    ) -> Result<ResetOutcome> {
        if !skip_confirmation
            && !prompt.confirm("This drops every table in the database. Continue?")?
        {
            info!("reset aborted");
            return Ok(ResetOutcome::Aborted);
        }

        let dropped = self.drop_all().await?;
        info!("dropped {} relation(s)", dropped.len());

        let report = self.apply(source).await?;
        Ok(ResetOutcome::Completed {
            dropped: dropped.iter().map(ToString::to_string).collect(),
            report,
        })
    }

    /// Drop every table (and, on SQLite, view) under the active search path
    /// in one transaction
    pub async fn drop_all(&self) -> Result<Vec<Relation>> {
        let mut tx = self.backend().begin(Isolation::ReadCommitted).await?;
        match drop_all_in(tx.as_mut()).await {
            Ok(dropped) => {
                tx.commit().await?;
                Ok(dropped)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("rollback after failed drop also failed: {rollback_err}");
                }
                Err(e)
            }
        }
    }
}

async fn drop_all_in(tx: &mut dyn Transaction) -> Result<Vec<Relation>> {
    let dialect = tx.dialect();

    let raw_path = tx
        .query(dialect.search_path_sql(), &[])
        .await?
        .iter()
        .map(|row| row.text(0, "search_path"))
        .collect::<Result<Vec<_>>>()?;
    // SQLite lists one schema per row; quote them so the parse is lossless
    let raw_path = if raw_path.len() == 1 {
        raw_path[0].clone()
    } else {
        raw_path.iter().map(|s| quote_ident(s)).collect::<Vec<_>>().join(", ")
    };

    let current_user = match dialect.current_user_sql() {
        Some(sql) => match tx.query(sql, &[]).await?.first() {
            Some(row) => Some(row.text(0, "current_user")?),
            None => None,
        },
        None => None,
    };

    let schemas = SearchPath::parse(&raw_path).resolve(current_user.as_deref());
    debug!("resetting schemas {schemas:?}");

    let mut relations = Vec::new();
    for (sql, params) in dialect.list_relations_sql(&schemas) {
        for row in tx.query(&sql, &params).await? {
            relations.push(Relation::new(
                row.text(0, "schema")?,
                row.text(1, "name")?,
                &row.text(2, "kind")?,
            ));
        }
    }
    // Views first so no table drop trips over a dependent view
    relations.sort_by_key(|r| r.kind);

    if relations.is_empty() {
        return Ok(relations);
    }

    if let Some(sql) = dialect.before_drop_sql() {
        tx.execute_script(sql).await?;
    }
    for relation in &relations {
        tx.execute(&dialect.drop_relation_sql(relation), &[]).await?;
        info!("dropped {relation}");
    }
    Ok(relations)
}
