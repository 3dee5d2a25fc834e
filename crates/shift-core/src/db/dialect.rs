//! Engine specific SQL.

use std::fmt;

use super::SqlValue;

/// SQL dialect spoken by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

/// Kind of a droppable relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RelationKind {
    View,
    Table,
}

impl RelationKind {
    fn parse(kind: &str) -> Self {
        if kind.eq_ignore_ascii_case("view") {
            RelationKind::View
        } else {
            RelationKind::Table
        }
    }
}

/// A table or view living in a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub schema: String,
    pub name: String,
    pub kind: RelationKind,
}

impl Relation {
    pub fn new(schema: impl Into<String>, name: impl Into<String>, kind: &str) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            kind: RelationKind::parse(kind),
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Quote an identifier, doubling any embedded double quote
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

impl Dialect {
    /// Positional parameter marker, 1-based
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Postgres => format!("${index}"),
        }
    }

    pub fn create_ledger_sql(self, table: &str) -> String {
        let applied_at = match self {
            Dialect::Sqlite => "TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP",
            Dialect::Postgres => "TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP",
        };
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                name TEXT PRIMARY KEY,
                checksum TEXT NOT NULL,
                round INTEGER NOT NULL,
                applied_at {applied_at}
            )",
            quote_ident(table)
        )
    }

    /// Statement taking an exclusive lock on `table` until the transaction ends.
    ///
    /// SQLite already holds the database write lock from `BEGIN EXCLUSIVE`.
    pub fn lock_table_sql(self, table: &str) -> Option<String> {
        match self {
            Dialect::Sqlite => None,
            Dialect::Postgres => Some(format!(
                "LOCK TABLE {} IN ACCESS EXCLUSIVE MODE",
                quote_ident(table)
            )),
        }
    }

    /// Query returning a single integer, non-zero when `table` exists
    pub fn table_exists_sql(self) -> String {
        match self {
            Dialect::Sqlite => {
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1".to_string()
            }
            Dialect::Postgres => {
                "SELECT CASE WHEN to_regclass($1) IS NULL THEN 0 ELSE 1 END".to_string()
            }
        }
    }

    /// Parameter naming `table` for [`Dialect::table_exists_sql`]
    pub fn table_exists_param(self, table: &str) -> SqlValue {
        match self {
            Dialect::Sqlite => SqlValue::Text(table.to_string()),
            Dialect::Postgres => SqlValue::Text(quote_ident(table)),
        }
    }

    /// Ledger rows as (name, checksum, round, applied_at) with applied_at in
    /// UTC `YYYY-MM-DD HH:MM:SS`, ordered by round then name
    pub fn select_ledger_sql(self, table: &str) -> String {
        match self {
            Dialect::Sqlite => format!(
                "SELECT name, checksum, round, applied_at FROM {}
                 ORDER BY round ASC, name ASC",
                quote_ident(table)
            ),
            Dialect::Postgres => format!(
                "SELECT name, checksum, round,
                        to_char(applied_at AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS')
                 FROM {}
                 ORDER BY round ASC, name COLLATE \"C\" ASC",
                quote_ident(table)
            ),
        }
    }

    pub fn insert_ledger_sql(self, table: &str) -> String {
        format!(
            "INSERT INTO {} (name, checksum, round) VALUES ({}, {}, {})",
            quote_ident(table),
            self.placeholder(1),
            self.placeholder(2),
            self.placeholder(3)
        )
    }

    /// Query returning the active schema search path as one row per entry
    /// or a single comma separated row
    pub fn search_path_sql(self) -> &'static str {
        match self {
            Dialect::Sqlite => {
                "SELECT name FROM pragma_database_list WHERE name <> 'temp' ORDER BY seq"
            }
            Dialect::Postgres => "SELECT current_setting('search_path')",
        }
    }

    /// Query returning the connected user, if the engine has users
    pub fn current_user_sql(self) -> Option<&'static str> {
        match self {
            Dialect::Sqlite => None,
            Dialect::Postgres => Some("SELECT current_user::text"),
        }
    }

    /// Queries listing (schema, name, kind) for every droppable relation in
    /// `schemas`
    pub fn list_relations_sql(self, schemas: &[String]) -> Vec<(String, Vec<SqlValue>)> {
        match self {
            Dialect::Sqlite => schemas
                .iter()
                .map(|schema| {
                    let sql = format!(
                        "SELECT ?1, name, type FROM {}.sqlite_master
                         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
                         ORDER BY name",
                        quote_ident(schema)
                    );
                    (sql, vec![SqlValue::Text(schema.clone())])
                })
                .collect(),
            Dialect::Postgres => {
                if schemas.is_empty() {
                    return Vec::new();
                }
                let markers: Vec<String> =
                    (1..=schemas.len()).map(|i| self.placeholder(i)).collect();
                let sql = format!(
                    "SELECT schemaname::text, tablename::text, 'table'
                     FROM pg_catalog.pg_tables
                     WHERE schemaname IN ({})
                     ORDER BY schemaname, tablename",
                    markers.join(", ")
                );
                let params = schemas.iter().cloned().map(SqlValue::Text).collect();
                vec![(sql, params)]
            }
        }
    }

    /// Script run once before dropping relations
    pub fn before_drop_sql(self) -> Option<&'static str> {
        match self {
            Dialect::Sqlite => Some("PRAGMA defer_foreign_keys = ON"),
            Dialect::Postgres => None,
        }
    }

    pub fn drop_relation_sql(self, relation: &Relation) -> String {
        let keyword = match relation.kind {
            RelationKind::View => "VIEW",
            RelationKind::Table => "TABLE",
        };
        let cascade = match self {
            Dialect::Sqlite => "",
            Dialect::Postgres => " CASCADE",
        };
        format!(
            "DROP {keyword} IF EXISTS {}.{}{cascade}",
            quote_ident(&relation.schema),
            quote_ident(&relation.name)
        )
    }
}
