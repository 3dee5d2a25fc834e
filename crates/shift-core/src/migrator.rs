//! Applying migrations.
//!
//! [`Migrator::apply`] runs every pending migration of a catalog inside one
//! serializable transaction. Either the whole batch is recorded under a new
//! round, or nothing changes.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::{MigrationFile, MigrationSource};
use crate::checksum::checksum_bytes;
use crate::db::{Backend, Isolation, Transaction};
use crate::error::{Error, Result};
use crate::ledger::{next_round, Ledger, LedgerEntry, NewLedgerEntry};

/// Result of a successful apply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// Round shared by this batch, `None` when nothing was pending
    pub round: Option<u32>,
    /// Names applied, in application order
    pub applied: Vec<String>,
    /// Ledger entries with no matching migration in the catalog
    pub orphaned: Vec<String>,
}

impl ApplyReport {
    /// Number of migrations applied
    pub fn count(&self) -> usize {
        self.applied.len()
    }
}

/// Read-only comparison of catalog and ledger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub applied: Vec<LedgerEntry>,
    pub pending: Vec<String>,
    /// Applied migrations whose file content changed since
    pub mismatched: Vec<String>,
    pub orphaned: Vec<String>,
}

impl StatusReport {
    /// True when an apply would succeed without touching recorded history
    pub fn is_consistent(&self) -> bool {
        self.mismatched.is_empty()
    }
}

/// Migration engine bound to one database
pub struct Migrator {
    backend: Arc<dyn Backend>,
    ledger: Ledger,
}

impl Migrator {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            ledger: Ledger::default(),
        }
    }

    /// Use a ledger table other than the default
    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Apply every pending migration of `source` as one round.
    ///
    /// Fails without recording or running anything when an applied
    /// migration's checksum no longer matches, or when any script fails.
    pub async fn apply(&self, source: &dyn MigrationSource) -> Result<ApplyReport> {
        let files = source.list()?;
        debug!("catalog {} has {} migration(s)", source.describe(), files.len());

        self.ensure_ledger().await?;

        let mut tx = self.backend.begin(Isolation::Serializable).await?;
        match self.apply_in(tx.as_mut(), &files).await {
            Ok(report) => {
                tx.commit().await?;
                if let Some(round) = report.round {
                    info!("applied {} migration(s) in round {round}", report.count());
                }
                Ok(report)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("rollback after failed apply also failed: {rollback_err}");
                }
                Err(e)
            }
        }
    }

    /// Create the ledger in a transaction of its own.
    ///
    /// On Postgres the first catalog read fixes the serializable snapshot,
    /// which must happen only after the ledger lock is held.
    async fn ensure_ledger(&self) -> Result<()> {
        let mut tx = self.backend.begin(Isolation::ReadCommitted).await?;
        match self.ledger.ensure_exists(tx.as_mut()).await {
            Ok(()) => tx.commit().await,
            Err(e) => {
                tx.rollback().await?;
                // A concurrent applier may have created it first
                let mut tx = self.backend.begin(Isolation::ReadCommitted).await?;
                let exists = self.ledger.exists(tx.as_mut()).await?;
                tx.rollback().await?;
                if exists {
                    debug!("ledger created concurrently: {e}");
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn apply_in(
        &self,
        tx: &mut dyn Transaction,
        files: &[MigrationFile],
    ) -> Result<ApplyReport> {
        // Lock first; the ledger read below must see every committed batch
        self.ledger.acquire_exclusive_lock(tx).await?;
        let applied = self.ledger.list_applied(tx).await?;

        verify_checksums(files, &applied)?;

        let orphaned = orphaned_entries(files, &applied);
        for name in &orphaned {
            warn!("ledger entry {name} has no matching migration file");
        }

        let pending = pending_migrations(files, &applied);
        if pending.is_empty() {
            debug!("no pending migrations");
            return Ok(ApplyReport {
                round: None,
                applied: Vec::new(),
                orphaned,
            });
        }

        let round = next_round(&applied)?;
        debug!("applying {} migration(s) as round {round}", pending.len());

        let mut names = Vec::with_capacity(pending.len());
        for file in pending {
            let script = load_verified(file)?;
            tx.execute_script(&script)
                .await
                .map_err(|e| Error::execution(&file.name, e))?;
            self.ledger
                .record(
                    tx,
                    &NewLedgerEntry {
                        name: file.name.clone(),
                        checksum: file.checksum.clone(),
                        round,
                    },
                )
                .await?;
            info!("applied {}", file.name);
            names.push(file.name.clone());
        }

        Ok(ApplyReport {
            round: Some(round),
            applied: names,
            orphaned,
        })
    }

    /// Compare `source` with the ledger without changing anything
    pub async fn status(&self, source: &dyn MigrationSource) -> Result<StatusReport> {
        let files = source.list()?;
        let applied = self.list_applied().await?;

        let recorded: HashMap<&str, &str> = applied
            .iter()
            .map(|e| (e.name.as_str(), e.checksum.as_str()))
            .collect();
        let mismatched = files
            .iter()
            .filter(|f| recorded.get(f.name.as_str()).is_some_and(|sum| *sum != f.checksum))
            .map(|f| f.name.clone())
            .collect();

        Ok(StatusReport {
            pending: pending_migrations(&files, &applied)
                .into_iter()
                .map(|f| f.name.clone())
                .collect(),
            orphaned: orphaned_entries(&files, &applied),
            mismatched,
            applied,
        })
    }

    /// Ledger contents ordered by (round, name); empty when no ledger exists
    pub async fn list_applied(&self) -> Result<Vec<LedgerEntry>> {
        let mut tx = self.backend.begin(Isolation::ReadCommitted).await?;
        let applied = if self.ledger.exists(tx.as_mut()).await? {
            self.ledger.list_applied(tx.as_mut()).await?
        } else {
            Vec::new()
        };
        tx.rollback().await?;
        Ok(applied)
    }
}

/// Fail on the first applied migration whose content changed
fn verify_checksums(files: &[MigrationFile], applied: &[LedgerEntry]) -> Result<()> {
    let current: HashMap<&str, &str> = files
        .iter()
        .map(|f| (f.name.as_str(), f.checksum.as_str()))
        .collect();

    for entry in applied {
        if let Some(checksum) = current.get(entry.name.as_str()) {
            if *checksum != entry.checksum {
                return Err(Error::ChecksumMismatch {
                    name: entry.name.clone(),
                    recorded: entry.checksum.clone(),
                    current: checksum.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Script content, provided it still matches the checksum taken at listing
fn load_verified(file: &MigrationFile) -> Result<String> {
    let script = file.load()?;
    let current = checksum_bytes(script.as_bytes());
    if current != file.checksum {
        return Err(Error::ChecksumMismatch {
            name: file.name.clone(),
            recorded: file.checksum.clone(),
            current,
        });
    }
    Ok(script)
}

/// Catalog entries not yet in the ledger, in catalog order
fn pending_migrations<'a>(
    files: &'a [MigrationFile],
    applied: &[LedgerEntry],
) -> Vec<&'a MigrationFile> {
    let recorded: HashSet<&str> = applied.iter().map(|e| e.name.as_str()).collect();
    files
        .iter()
        .filter(|f| !recorded.contains(f.name.as_str()))
        .collect()
}

fn orphaned_entries(files: &[MigrationFile], applied: &[LedgerEntry]) -> Vec<String> {
    let known: HashSet<&str> = files.iter().map(|f| f.name.as_str()).collect();
    applied
        .iter()
        .filter(|e| !known.contains(e.name.as_str()))
        .map(|e| e.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DirectorySource, StaticSource};
    use crate::db::SqliteBackend;
    use std::fs;
    use tempfile::TempDir;

    fn migrator() -> Migrator {
        Migrator::new(Arc::new(SqliteBackend::open_in_memory().unwrap()))
    }

    fn write(dir: &TempDir, name: &str, content: &str) {
        fs::write(dir.path().join(name), content).unwrap();
    }

    async fn table_exists(migrator: &Migrator, table: &str) -> bool {
        let mut tx = migrator.backend().begin(Isolation::ReadCommitted).await.unwrap();
        let rows = tx
            .query(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                &[crate::db::SqlValue::from(table)],
            )
            .await
            .unwrap();
        rows[0].integer(0, "count").unwrap() == 1
    }

    #[tokio::test]
    async fn test_empty_catalog_applies_nothing() {
        let dir = TempDir::new().unwrap();
        let migrator = migrator();

        let report = migrator.apply(&DirectorySource::new(dir.path())).await.unwrap();
        assert_eq!(report.count(), 0);
        assert_eq!(report.round, None);
        assert!(migrator.list_applied().await.unwrap().is_empty());
        assert!(table_exists(&migrator, crate::LEDGER_TABLE).await);
    }

    #[tokio::test]
    async fn test_rounds_follow_batches() {
        let dir = TempDir::new().unwrap();
        write(&dir, "20230101000000_init.sql", "CREATE TABLE init (id INTEGER);");
        write(
            &dir,
            "20230102000000_add_users.sql",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT);",
        );
        let source = DirectorySource::new(dir.path());
        let migrator = migrator();

        let first = migrator.apply(&source).await.unwrap();
        assert_eq!(first.count(), 2);
        assert_eq!(first.round, Some(1));

        let applied = migrator.list_applied().await.unwrap();
        assert_eq!(applied.len(), 2);
        assert!(applied.iter().all(|e| e.round == 1));
        assert_eq!(applied[0].name, "20230101000000_init");
        assert_eq!(applied[1].name, "20230102000000_add_users");

        write(
            &dir,
            "20230103000000_add_index.sql",
            "CREATE INDEX idx_users_email ON users (email);",
        );
        let second = migrator.apply(&source).await.unwrap();
        assert_eq!(second.count(), 1);
        assert_eq!(second.round, Some(2));

        let names: Vec<_> = migrator
            .list_applied()
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.round))
            .collect();
        assert_eq!(
            names,
            vec![
                ("20230101000000_init".to_string(), 1),
                ("20230102000000_add_users".to_string(), 1),
                ("20230103000000_add_index".to_string(), 2),
            ]
        );

        let third = migrator.apply(&source).await.unwrap();
        assert_eq!(third.count(), 0);
        assert_eq!(migrator.list_applied().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_aborts_without_changes() {
        let dir = TempDir::new().unwrap();
        write(&dir, "20230101000000_init.sql", "CREATE TABLE init (id INTEGER);");
        let source = DirectorySource::new(dir.path());
        let migrator = migrator();
        migrator.apply(&source).await.unwrap();
        let before = migrator.list_applied().await.unwrap();

        write(&dir, "20230101000000_init.sql", "CREATE TABLE init (id BIGINT);");
        write(&dir, "20230102000000_more.sql", "CREATE TABLE more (id INTEGER);");

        let err = migrator.apply(&source).await.unwrap_err();
        assert!(err.is_integrity_violation());
        assert!(err.to_string().contains("20230101000000_init"));
        assert_eq!(migrator.list_applied().await.unwrap(), before);
        assert!(!table_exists(&migrator, "more").await);
    }

    #[tokio::test]
    async fn test_failing_script_records_nothing() {
        let source = StaticSource::new()
            .with("20230101000000_ok", "CREATE TABLE ok (id INTEGER);")
            .with("20230102000000_broken", "CREATE TABLE broken (;")
            .with("20230103000000_never", "CREATE TABLE never (id INTEGER);");
        let migrator = migrator();

        let err = migrator.apply(&source).await.unwrap_err();
        assert!(err.is_execution_failure());
        assert!(err.to_string().contains("20230102000000_broken"));
        assert!(migrator.list_applied().await.unwrap().is_empty());
        assert!(!table_exists(&migrator, "ok").await);
        assert!(!table_exists(&migrator, "never").await);
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_earlier_rounds() {
        let migrator = migrator();
        let base = StaticSource::new().with("20230101000000_init", "CREATE TABLE a (id INTEGER);");
        migrator.apply(&base).await.unwrap();

        let broken = base
            .clone()
            .with("20230102000000_b", "CREATE TABLE b (id INTEGER);")
            .with("20230103000000_c", "INSERT INTO missing VALUES (1);");
        assert!(migrator.apply(&broken).await.is_err());

        let applied = migrator.list_applied().await.unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].round, 1);

        let fixed = base.with("20230102000000_b", "CREATE TABLE b (id INTEGER);");
        let report = migrator.apply(&fixed).await.unwrap();
        assert_eq!(report.round, Some(2));
        assert_eq!(report.applied, vec!["20230102000000_b".to_string()]);
    }

    /// Rewrites a migration file right after the catalog has been listed
    struct RewritingSource {
        inner: DirectorySource,
        path: std::path::PathBuf,
        content: &'static str,
    }

    impl MigrationSource for RewritingSource {
        fn list(&self) -> Result<Vec<MigrationFile>> {
            let files = self.inner.list()?;
            fs::write(&self.path, self.content)?;
            Ok(files)
        }

        fn describe(&self) -> String {
            self.inner.describe()
        }
    }

    #[tokio::test]
    async fn test_file_changed_after_listing_is_not_recorded() {
        let dir = TempDir::new().unwrap();
        write(&dir, "20230101000000_init.sql", "CREATE TABLE init (id INTEGER);");
        let source = RewritingSource {
            inner: DirectorySource::new(dir.path()),
            path: dir.path().join("20230101000000_init.sql"),
            content: "CREATE TABLE swapped (id INTEGER);",
        };
        let migrator = migrator();

        let err = migrator.apply(&source).await.unwrap_err();
        assert!(err.is_integrity_violation());
        assert!(err.to_string().contains("20230101000000_init"));
        assert!(migrator.list_applied().await.unwrap().is_empty());
        assert!(!table_exists(&migrator, "init").await);
        assert!(!table_exists(&migrator, "swapped").await);
    }

    #[tokio::test]
    async fn test_missing_directory_fails_before_touching_database() {
        let dir = TempDir::new().unwrap();
        let migrator = migrator();

        let err = migrator
            .apply(&DirectorySource::new(dir.path().join("nope")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Catalog { .. }));
        assert!(!table_exists(&migrator, crate::LEDGER_TABLE).await);
    }

    #[tokio::test]
    async fn test_orphaned_entries_are_reported_not_fatal() {
        let migrator = migrator();
        let full = StaticSource::new()
            .with("20230101000000_a", "CREATE TABLE a (id INTEGER);")
            .with("20230102000000_b", "CREATE TABLE b (id INTEGER);");
        migrator.apply(&full).await.unwrap();

        let trimmed = StaticSource::new()
            .with("20230101000000_a", "CREATE TABLE a (id INTEGER);")
            .with("20230103000000_c", "CREATE TABLE c (id INTEGER);");
        let report = migrator.apply(&trimmed).await.unwrap();
        assert_eq!(report.applied, vec!["20230103000000_c".to_string()]);
        assert_eq!(report.orphaned, vec!["20230102000000_b".to_string()]);
    }

    #[tokio::test]
    async fn test_status_without_ledger() {
        let migrator = migrator();
        let source = StaticSource::new().with("20230101000000_a", "SELECT 1;");

        let status = migrator.status(&source).await.unwrap();
        assert!(status.applied.is_empty());
        assert_eq!(status.pending, vec!["20230101000000_a".to_string()]);
        assert!(status.is_consistent());
        assert!(!table_exists(&migrator, crate::LEDGER_TABLE).await);
    }

    #[tokio::test]
    async fn test_status_reports_drift() {
        let migrator = migrator();
        let original = StaticSource::new()
            .with("20230101000000_a", "CREATE TABLE a (id INTEGER);")
            .with("20230102000000_b", "CREATE TABLE b (id INTEGER);");
        migrator.apply(&original).await.unwrap();

        let drifted = StaticSource::new()
            .with("20230101000000_a", "CREATE TABLE a (id TEXT);")
            .with("20230103000000_c", "CREATE TABLE c (id INTEGER);");
        let status = migrator.status(&drifted).await.unwrap();
        assert_eq!(status.applied.len(), 2);
        assert_eq!(status.mismatched, vec!["20230101000000_a".to_string()]);
        assert_eq!(status.pending, vec!["20230103000000_c".to_string()]);
        assert_eq!(status.orphaned, vec!["20230102000000_b".to_string()]);
        assert!(!status.is_consistent());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_applies_are_serialized() {
        let db_dir = TempDir::new().unwrap();
        let db_path = db_dir.path().join("app.db");
        let source = Arc::new(
            StaticSource::new()
                .with("20230101000000_a", "CREATE TABLE a (id INTEGER);")
                .with("20230102000000_b", "CREATE TABLE b (id INTEGER);"),
        );

        let mut handles = Vec::new();
        for _ in 0..2 {
            let backend =
                SqliteBackend::open(&db_path, std::time::Duration::from_secs(10)).unwrap();
            let migrator = Migrator::new(Arc::new(backend));
            let source = source.clone();
            handles.push(tokio::spawn(async move {
                migrator.apply(source.as_ref()).await.map(|r| r.count())
            }));
        }

        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap().unwrap());
        }
        counts.sort();
        assert_eq!(counts, vec![0, 2]);

        let check = Migrator::new(Arc::new(
            SqliteBackend::open(&db_path, std::time::Duration::from_secs(1)).unwrap(),
        ));
        let applied = check.list_applied().await.unwrap();
        assert_eq!(applied.len(), 2);
        assert!(applied.iter().all(|e| e.round == 1));
    }

    #[cfg(feature = "postgres")]
    mod postgres {
        use super::*;
        use crate::db::postgres::testing::{backend_with_search_path, fresh_schema};

        async fn migrator_in(schema: &str) -> Migrator {
            fresh_schema(schema).await;
            Migrator::new(Arc::new(backend_with_search_path(schema).await))
        }

        #[tokio::test]
        #[ignore] // requires a running PostgreSQL
        async fn test_postgres_rounds_follow_byte_order() {
            let migrator = migrator_in("shift_test_rounds").await;
            let first = StaticSource::new()
                .with("20230101000000_a", "CREATE TABLE lower_a (id INTEGER);")
                .with("20230101000000_B", "CREATE TABLE upper_b (id INTEGER);");

            let report = migrator.apply(&first).await.unwrap();
            assert_eq!(report.round, Some(1));
            assert_eq!(
                report.applied,
                vec!["20230101000000_B".to_string(), "20230101000000_a".to_string()]
            );

            let second = first.with("20230102000000_c", "CREATE TABLE c (id INTEGER);");
            assert_eq!(migrator.apply(&second).await.unwrap().round, Some(2));

            let applied: Vec<_> = migrator
                .list_applied()
                .await
                .unwrap()
                .into_iter()
                .map(|e| (e.round, e.name))
                .collect();
            assert_eq!(
                applied,
                vec![
                    (1, "20230101000000_B".to_string()),
                    (1, "20230101000000_a".to_string()),
                    (2, "20230102000000_c".to_string()),
                ]
            );
        }

        #[tokio::test]
        #[ignore] // requires a running PostgreSQL
        async fn test_postgres_checksum_mismatch_aborts() {
            let migrator = migrator_in("shift_test_mismatch").await;
            let original = StaticSource::new().with("20230101000000_a", "CREATE TABLE a (id INTEGER);");
            migrator.apply(&original).await.unwrap();
            let before = migrator.list_applied().await.unwrap();

            let edited = StaticSource::new()
                .with("20230101000000_a", "CREATE TABLE a (id BIGINT);")
                .with("20230102000000_b", "CREATE TABLE b (id INTEGER);");
            let err = migrator.apply(&edited).await.unwrap_err();
            assert!(err.is_integrity_violation());
            assert_eq!(migrator.list_applied().await.unwrap(), before);

            let status = migrator.status(&edited).await.unwrap();
            assert_eq!(status.pending, vec!["20230102000000_b".to_string()]);
        }

        #[tokio::test]
        #[ignore] // requires a running PostgreSQL
        async fn test_postgres_failing_script_rolls_back_batch() {
            let migrator = migrator_in("shift_test_failure").await;
            let source = StaticSource::new()
                .with("20230101000000_ok", "CREATE TABLE ok (id INTEGER);")
                .with("20230102000000_broken", "CREATE TABLE broken (;");

            let err = migrator.apply(&source).await.unwrap_err();
            assert!(err.is_execution_failure());
            assert!(migrator.list_applied().await.unwrap().is_empty());

            let fixed = StaticSource::new().with("20230101000000_ok", "CREATE TABLE ok (id INTEGER);");
            assert_eq!(migrator.apply(&fixed).await.unwrap().count(), 1);
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        #[ignore] // requires a running PostgreSQL
        async fn test_postgres_concurrent_apply_sees_committed_batch() {
            let schema = "shift_test_concurrent";
            let base = StaticSource::new().with("20230101000000_init", "CREATE TABLE init (id INTEGER);");
            migrator_in(schema).await.apply(&base).await.unwrap();

            let source = Arc::new(
                base.with(
                    "20230102000000_a",
                    "SELECT pg_sleep(1); CREATE TABLE a (id INTEGER);",
                )
                .with("20230103000000_b", "CREATE TABLE b (id INTEGER);"),
            );

            let mut handles = Vec::new();
            for _ in 0..2 {
                let migrator = Migrator::new(Arc::new(backend_with_search_path(schema).await));
                let source = source.clone();
                handles.push(tokio::spawn(async move {
                    migrator.apply(source.as_ref()).await.map(|r| r.count())
                }));
            }

            let mut counts = Vec::new();
            for handle in handles {
                counts.push(handle.await.unwrap().unwrap());
            }
            counts.sort();
            assert_eq!(counts, vec![0, 2]);

            let check = Migrator::new(Arc::new(backend_with_search_path(schema).await));
            let rounds: Vec<u32> = check
                .list_applied()
                .await
                .unwrap()
                .iter()
                .map(|e| e.round)
                .collect();
            assert_eq!(rounds, vec![1, 2, 2]);
        }
    }
}
