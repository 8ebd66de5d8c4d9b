use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Instant;

use anyhow::Error as AnyError;
use sqlx::{Acquire, Sqlite, SqliteConnection};
use thiserror::Error;
use tracing::{error, info, warn};

use super::archive::{stage_archive, stage_archive_stream, ArchiveError};
use super::lines::{import_lines, LineImportError};
use super::registry::{ImportStrategy, ImporterRegistry};
use super::report::{file_sha256, ProgressReport};
use super::table::TableImportError;
use super::validator::{validate_bundle_dir, ValidationError};

#[derive(Debug, Error)]
pub enum FileImportError {
    #[error(transparent)]
    Lines(#[from] LineImportError),
    #[error(transparent)]
    WholeFile(AnyError),
    #[error("failed to hash imported file")]
    Digest(#[source] AnyError),
}

impl FileImportError {
    pub fn line(&self) -> Option<u64> {
        match self {
            FileImportError::Lines(err) => err.line(),
            FileImportError::WholeFile(err) => {
                err.downcast_ref::<TableImportError>().and_then(TableImportError::line)
            }
            FileImportError::Digest(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("failed to open archive {path}")]
    ArchiveOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to import {file}")]
    File {
        file: String,
        #[source]
        source: FileImportError,
    },
    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl ImportError {
    /// The bundle file the failure belongs to, if any.
    pub fn file(&self) -> Option<&str> {
        match self {
            ImportError::File { file, .. } => Some(file),
            _ => None,
        }
    }

    pub fn line(&self) -> Option<u64> {
        match self {
            ImportError::File { source, .. } => source.line(),
            _ => None,
        }
    }
}

/// Loads bundles described by an [`ImporterRegistry`], all files of a bundle
/// in one transaction.
#[derive(Debug)]
pub struct BundleImporter {
    registry: ImporterRegistry,
}

impl BundleImporter {
    pub fn new(registry: ImporterRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ImporterRegistry {
        &self.registry
    }

    /// Checks the bundle directory holds exactly the registered files.
    pub fn validate(&self, dir: &Path) -> Result<(), ValidationError> {
        validate_bundle_dir(dir, &self.registry.file_names())
    }

    /// Validates `dir`, then imports it. Nothing touches the database when
    /// validation fails.
    pub async fn import_from_directory<'c, A>(
        &self,
        db: A,
        dir: &Path,
    ) -> Result<ProgressReport, ImportError>
    where
        A: Acquire<'c, Database = Sqlite>,
    {
        self.validate(dir)?;
        self.import_all(db, dir).await
    }

    pub async fn import_from_zip_file<'c, A>(
        &self,
        db: A,
        zip_path: &Path,
    ) -> Result<ProgressReport, ImportError>
    where
        A: Acquire<'c, Database = Sqlite>,
    {
        let file = File::open(zip_path).map_err(|source| ImportError::ArchiveOpen {
            path: zip_path.display().to_string(),
            source,
        })?;
        stage_archive(file, |dir| async move {
            self.import_from_directory(db, &dir).await
        })
        .await
    }

    pub async fn import_from_zip_stream<'c, A, R>(
        &self,
        db: A,
        reader: R,
    ) -> Result<ProgressReport, ImportError>
    where
        A: Acquire<'c, Database = Sqlite>,
        R: Read,
    {
        stage_archive_stream(reader, |dir| async move {
            self.import_from_directory(db, &dir).await
        })
        .await
    }

    /// Imports every registered file from `dir` in registration order inside
    /// a single transaction: committed when all files load, rolled back as
    /// soon as one fails.
    pub async fn import_all<'c, A>(&self, db: A, dir: &Path) -> Result<ProgressReport, ImportError>
    where
        A: Acquire<'c, Database = Sqlite>,
    {
        let mut tx = db.begin().await?;
        info!(target: "bundle_import", event = "db_tx_begin", dir = %dir.display());

        match self.import_files(&mut tx, dir).await {
            Ok(report) => {
                tx.commit().await?;
                info!(
                    target: "bundle_import",
                    event = "db_tx_commit",
                    files = report.files.len(),
                    rows = report.total_rows()
                );
                Ok(report)
            }
            Err(err) => {
                if let Err(rb) = tx.rollback().await {
                    error!(target: "bundle_import", event = "db_tx_rollback_failed", error = %rb);
                } else {
                    warn!(target: "bundle_import", event = "db_tx_rollback", error = %err);
                }
                Err(err)
            }
        }
    }

    async fn import_files(
        &self,
        conn: &mut SqliteConnection,
        dir: &Path,
    ) -> Result<ProgressReport, ImportError> {
        let mut report = ProgressReport::default();
        for (file_name, strategy) in self.registry.iter() {
            let path = dir.join(file_name);
            let started = Instant::now();
            info!(
                target: "bundle_import",
                event = "import_file_start",
                file = file_name,
                strategy = strategy.kind()
            );

            let file_err = |source| ImportError::File {
                file: file_name.to_string(),
                source,
            };
            let rows = import_file(conn, strategy, &path).await.map_err(file_err)?;
            let sha256 = file_sha256(&path)
                .map_err(FileImportError::Digest)
                .map_err(file_err)?;

            info!(
                target: "bundle_import",
                event = "import_file_done",
                file = file_name,
                rows,
                duration_ms = started.elapsed().as_millis() as u64
            );
            report.record(file_name, rows, sha256);
        }
        Ok(report)
    }
}

async fn import_file(
    conn: &mut SqliteConnection,
    strategy: &ImportStrategy,
    path: &Path,
) -> Result<u64, FileImportError> {
    match strategy {
        ImportStrategy::WholeFile(importer) => importer
            .import_file(conn, path)
            .await
            .map_err(FileImportError::WholeFile),
        ImportStrategy::LineBased(handler) => Ok(import_lines(conn, handler.as_ref(), path).await?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::lines::SqlTemplateHandler;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use std::fs;
    use tempfile::TempDir;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE parents (id TEXT PRIMARY KEY)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE children (id TEXT PRIMARY KEY, parent_id TEXT NOT NULL REFERENCES parents(id))",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    fn importer() -> BundleImporter {
        let registry = ImporterRegistry::builder()
            .register("parents.csv", ImportStrategy::table())
            .register(
                "children.csv",
                ImportStrategy::line_based(SqlTemplateHandler::new(
                    "INSERT INTO children (id, parent_id) VALUES (?1, ?2)",
                )),
            )
            .build()
            .unwrap();
        BundleImporter::new(registry)
    }

    async fn count(pool: &SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn commits_all_files() {
        let pool = pool().await;
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("parents.csv"), "id\np1\np2\n").unwrap();
        fs::write(dir.path().join("children.csv"), "id,parent_id\nc1,p1\nc2,p2\n").unwrap();

        let report = importer()
            .import_from_directory(&pool, dir.path())
            .await
            .unwrap();
        assert_eq!(report.file_names(), vec!["parents.csv", "children.csv"]);
        assert_eq!(report.rows_for("parents.csv"), Some(2));
        assert_eq!(report.rows_for("children.csv"), Some(2));
        assert_eq!(count(&pool, "children").await, 2);
    }

    #[tokio::test]
    async fn failure_rolls_back_earlier_files() {
        let pool = pool().await;
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("parents.csv"), "id\np1\n").unwrap();
        fs::write(
            dir.path().join("children.csv"),
            "id,parent_id\nc1,p1\nc2,nope\n",
        )
        .unwrap();

        let err = importer()
            .import_from_directory(&pool, dir.path())
            .await
            .unwrap_err();
        assert_eq!(err.file(), Some("children.csv"));
        assert_eq!(err.line(), Some(3));
        assert_eq!(count(&pool, "parents").await, 0);
        assert_eq!(count(&pool, "children").await, 0);
    }

    #[tokio::test]
    async fn whole_file_failure_reports_line() {
        let pool = pool().await;
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("parents.csv"), "id\np1\np1\n").unwrap();
        fs::write(dir.path().join("children.csv"), "id,parent_id\n").unwrap();

        let err = importer()
            .import_from_directory(&pool, dir.path())
            .await
            .unwrap_err();
        assert_eq!(err.file(), Some("parents.csv"));
        assert_eq!(err.line(), Some(3));
        assert!(err.to_string().starts_with("failed to import parents.csv"));
    }

    #[tokio::test]
    async fn error_chain_names_each_cause_once() {
        let pool = pool().await;
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("parents.csv"), "id
p1
p1
").unwrap();
        fs::write(dir.path().join("children.csv"), "id,parent_id
").unwrap();

        let err = importer()
            .import_from_directory(&pool, dir.path())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "failed to import parents.csv");

        let chain = format!("{:#}", AnyError::from(err));
        assert!(
            chain.starts_with("failed to import parents.csv: line 3: insert into parents failed: "),
            "{chain}"
        );
        assert_eq!(chain.matches("UNIQUE").count(), 1, "{chain}");
        assert_eq!(chain.matches("line 3").count(), 1, "{chain}");
    }

    #[tokio::test]
    async fn validation_failure_leaves_database_untouched() {
        let pool = pool().await;
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("parents.csv"), "id\np1\n").unwrap();

        let err = importer()
            .import_from_directory(&pool, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ImportError::Validation(ValidationError::MissingFile(ref name)) if name == "children.csv"
        ));
        assert_eq!(count(&pool, "parents").await, 0);
    }

    #[tokio::test]
    async fn works_on_a_single_connection() {
        let pool = pool().await;
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("parents.csv"), "id\np1\n").unwrap();
        fs::write(dir.path().join("children.csv"), "id,parent_id\nc1,p1\n").unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let report = importer()
            .import_from_directory(&mut *conn, dir.path())
            .await
            .unwrap();
        drop(conn);
        assert_eq!(report.total_rows(), 2);
        assert_eq!(count(&pool, "children").await, 1);
    }
}
