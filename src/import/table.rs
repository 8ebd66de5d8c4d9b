use std::path::Path;

use anyhow::Error as AnyError;
use futures::future::BoxFuture;
use futures::FutureExt;
use sqlx::SqliteConnection;
use thiserror::Error;

use super::quote_ident;
use super::records::{RecordError, RecordReader};

/// Loads a whole file in one call and reports how many rows it wrote.
pub trait WholeFileImporter: Send + Sync {
    fn import_file<'a>(
        &'a self,
        conn: &'a mut SqliteConnection,
        path: &'a Path,
    ) -> BoxFuture<'a, Result<u64, AnyError>>;
}

#[derive(Debug, Error)]
pub enum TableImportError {
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("{path} has no column header row")]
    MissingHeader { path: String },
    #[error("cannot derive a table name from {0}")]
    NoTableName(String),
    #[error("line {line}: found {actual} fields, expected {expected}")]
    MalformedRow {
        line: u64,
        expected: usize,
        actual: usize,
    },
    #[error("line {line}: insert into {table} failed")]
    Database {
        table: String,
        line: u64,
        #[source]
        source: sqlx::Error,
    },
}

impl TableImportError {
    pub fn line(&self) -> Option<u64> {
        match self {
            TableImportError::Record(RecordError::Parse { line, .. }) => Some(*line),
            TableImportError::MalformedRow { line, .. }
            | TableImportError::Database { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Table a file loads into: the file name without a trailing `.csv`
/// (any case).
pub fn table_name_for_file(file_name: &str) -> &str {
    let len = file_name.len();
    if len > 4
        && file_name.is_char_boundary(len - 4)
        && file_name[len - 4..].eq_ignore_ascii_case(".csv")
    {
        &file_name[..len - 4]
    } else {
        file_name
    }
}

/// Inserts every data row of a comma-separated file into `table`. The header
/// row names the target columns. Empty fields are stored as NULL.
pub async fn import_table(
    conn: &mut SqliteConnection,
    table: &str,
    path: &Path,
) -> Result<u64, TableImportError> {
    let mut reader = RecordReader::open(path)?;
    let columns = match reader.next_record()? {
        Some(header) if !header.is_blank() => header.fields,
        _ => {
            return Err(TableImportError::MissingHeader {
                path: path.display().to_string(),
            })
        }
    };
    let sql = insert_sql(table, &columns);

    let mut rows = 0_u64;
    while let Some(record) = reader.next_record()? {
        if record.is_blank() {
            continue;
        }
        if record.len() != columns.len() {
            return Err(TableImportError::MalformedRow {
                line: record.line,
                expected: columns.len(),
                actual: record.len(),
            });
        }
        let mut query = sqlx::query(&sql);
        for field in &record.fields {
            query = if field.is_empty() {
                query.bind(None::<String>)
            } else {
                query.bind(field.as_str())
            };
        }
        query
            .execute(&mut *conn)
            .await
            .map_err(|source| TableImportError::Database {
                table: table.to_string(),
                line: record.line,
                source,
            })?;
        rows += 1;
    }
    Ok(rows)
}

fn insert_sql(table: &str, columns: &[String]) -> String {
    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c.trim())).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        column_list.join(", "),
        placeholders.join(", ")
    )
}

/// The generic whole-file loader: one table per file, named after the file
/// unless overridden.
#[derive(Debug, Clone, Default)]
pub struct TableImporter {
    table: Option<String>,
}

impl TableImporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_table(table: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
        }
    }

    fn resolve_table<'a>(&'a self, path: &'a Path) -> Result<&'a str, TableImportError> {
        if let Some(table) = self.table.as_deref() {
            return Ok(table);
        }
        path.file_name()
            .and_then(|name| name.to_str())
            .map(table_name_for_file)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| TableImportError::NoTableName(path.display().to_string()))
    }
}

impl WholeFileImporter for TableImporter {
    fn import_file<'a>(
        &'a self,
        conn: &'a mut SqliteConnection,
        path: &'a Path,
    ) -> BoxFuture<'a, Result<u64, AnyError>> {
        async move {
            let table = self.resolve_table(path)?;
            Ok::<_, AnyError>(import_table(conn, table, path).await?)
        }
        .boxed()
    }
}
