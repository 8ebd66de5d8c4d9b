use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use futures::TryStreamExt;
use sqlx::{Column, Executor, Row, SqliteConnection, Statement};
use thiserror::Error;
use tracing::info;

use crate::import::quote_ident;

const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("table {0} does not exist")]
    UnknownTable(String),
    #[error("export query is empty")]
    EmptyQuery,
    #[error("failed to write {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write csv")]
    Csv(#[from] csv::Error),
    #[error("database error")]
    Database(#[from] sqlx::Error),
}

/// Writes `table` to `path` as comma-separated text: a header row of column
/// names, then one row per table row. NULL becomes an empty field.
///
/// `filter` is appended verbatim as a `WHERE` clause and must come from a
/// trusted caller. The file is written next to `path` and renamed into place
/// once complete.
pub async fn export_table(
    conn: &mut SqliteConnection,
    table: &str,
    filter: Option<&str>,
    path: &Path,
) -> Result<u64, ExportError> {
    let exists: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM pragma_table_info(?1) LIMIT 1")
            .bind(table)
            .fetch_optional(&mut *conn)
            .await?;
    if exists.is_none() {
        return Err(ExportError::UnknownTable(table.to_string()));
    }

    let mut sql = format!("SELECT * FROM {}", quote_ident(table));
    if let Some(filter) = filter.map(str::trim).filter(|f| !f.is_empty()) {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }

    let count = write_query(conn, &sql, path).await?;
    info!(
        target: "bundle_import",
        event = "table_exported",
        table,
        rows = count,
        path = %path.display()
    );
    Ok(count)
}

/// Like [`export_table`], but runs `sql` as given. The header comes from the
/// statement's result columns, so it is written even when no row matches.
pub async fn export_query(
    conn: &mut SqliteConnection,
    sql: &str,
    path: &Path,
) -> Result<u64, ExportError> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(ExportError::EmptyQuery);
    }
    let count = write_query(conn, sql, path).await?;
    info!(
        target: "bundle_import",
        event = "query_exported",
        rows = count,
        path = %path.display()
    );
    Ok(count)
}

async fn write_query(
    conn: &mut SqliteConnection,
    sql: &str,
    path: &Path,
) -> Result<u64, ExportError> {
    let statement = (&mut *conn).prepare(sql).await?;
    let columns: Vec<&str> = statement.columns().iter().map(|c| c.name()).collect();

    let tmp = tmp_path(path);
    let file = File::create(&tmp).map_err(|source| ExportError::Io {
        path: tmp.clone(),
        source,
    })?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(&columns)?;

    let mut count = 0_u64;
    {
        let mut rows = statement.query().fetch(&mut *conn);
        while let Some(row) = rows.try_next().await? {
            let mut record = Vec::with_capacity(columns.len());
            for idx in 0..row.len() {
                let value: Option<String> = row.try_get_unchecked(idx)?;
                record.push(value.unwrap_or_default());
            }
            writer.write_record(&record)?;
            count += 1;
        }
    }

    writer.flush().map_err(|source| ExportError::Io {
        path: tmp.clone(),
        source,
    })?;
    drop(writer);
    fs::rename(&tmp, path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(count)
}

fn tmp_path(final_path: &Path) -> PathBuf {
    let mut s = OsString::from(final_path.as_os_str());
    s.push(PARTIAL_SUFFIX);
    PathBuf::from(s)
}
