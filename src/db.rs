use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, SqlitePool};
use tracing::{info, warn};

pub const APP_DIR_NAME: &str = "bundle-import";
pub const DB_FILE_NAME: &str = "bundle-import.sqlite3";

/// `<data dir>/bundle-import/bundle-import.sqlite3`, falling back to the
/// working directory when the platform has no data dir.
pub fn default_db_path() -> Result<PathBuf> {
    let base = match dirs::data_dir() {
        Some(dir) => dir,
        None => std::env::current_dir().context("determine current directory")?,
    };
    Ok(base.join(APP_DIR_NAME).join(DB_FILE_NAME))
}

/// Opens the target database. With `create` unset a missing file is an
/// error rather than a fresh empty database.
pub async fn open_pool(path: &Path, create: bool) -> Result<SqlitePool> {
    if create {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create database directory {}", parent.display()))?;
        }
    }

    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true)
        .log_statements(log::LevelFilter::Off);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .connect_with(opts)
        .await
        .with_context(|| format!("open database {}", path.display()))?;

    info!(target: "bundle_import", event = "db_path", path = %path.display());
    log_effective_pragmas(&pool).await;
    Ok(pool)
}

async fn log_effective_pragmas(pool: &SqlitePool) {
    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));
    let (journal_mode,): (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));
    let (fks,): (i64,) = sqlx::query_as("PRAGMA foreign_keys;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));
    let (busy,): (i64,) = sqlx::query_as("PRAGMA busy_timeout;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    info!(
        target: "bundle_import",
        event = "db_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %journal_mode,
        foreign_keys = fks,
        busy_timeout_ms = busy
    );

    if !journal_mode.eq_ignore_ascii_case("wal") {
        warn!(
            target: "bundle_import",
            event = "db_open_warning",
            msg = "journal_mode != WAL; running with reduced crash safety"
        );
    }
}
