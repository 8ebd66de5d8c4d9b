use std::path::Path;

use anyhow::Error as AnyError;
use futures::future::BoxFuture;
use futures::FutureExt;
use sqlx::SqliteConnection;
use thiserror::Error;
use tracing::debug;

use super::records::{RecordError, RecordReader};

/// Interprets and persists one data record of a line-based file.
///
/// Implementations see only the record's fields; the line engine attaches
/// the line number to anything they return.
pub trait LineHandler: Send + Sync {
    fn process_line<'a>(
        &'a self,
        conn: &'a mut SqliteConnection,
        fields: &'a [String],
    ) -> BoxFuture<'a, Result<(), AnyError>>;
}

/// A handler failure pinned to the line it happened on.
#[derive(Debug, Error)]
#[error("line {line}")]
pub struct LineError {
    pub line: u64,
    #[source]
    pub source: AnyError,
}

impl LineError {
    /// Wraps `err` for `line`, unless it already carries a line.
    pub fn wrap(line: u64, err: AnyError) -> Self {
        match err.downcast::<LineError>() {
            Ok(existing) => existing,
            Err(other) => LineError {
                line,
                source: other,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum LineImportError {
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("first row is empty (expected column names)")]
    EmptyHeader,
    #[error(
        "line {line}: this line has {actual} fields, but {expected} (the number of headings in the first line) were expected"
    )]
    FieldCountMismatch {
        line: u64,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    Line(#[from] LineError),
}

impl LineImportError {
    /// Line the failure is attributed to, when there is one.
    pub fn line(&self) -> Option<u64> {
        match self {
            LineImportError::Record(RecordError::Parse { line, .. }) => Some(*line),
            LineImportError::Record(RecordError::Open { .. }) => None,
            LineImportError::EmptyHeader => Some(1),
            LineImportError::FieldCountMismatch { line, .. } => Some(*line),
            LineImportError::Line(err) => Some(err.line),
        }
    }
}

/// Feeds every data record of `path` to `handler`, returning how many
/// records were processed. Blank lines are skipped and not counted.
pub async fn import_lines(
    conn: &mut SqliteConnection,
    handler: &dyn LineHandler,
    path: &Path,
) -> Result<u64, LineImportError> {
    let mut reader = RecordReader::open(path)?;

    let header = match reader.next_record()? {
        Some(record) if !record.is_blank() => record,
        _ => return Err(LineImportError::EmptyHeader),
    };
    let expected = header.len();

    let mut rows = 0_u64;
    while let Some(record) = reader.next_record()? {
        if record.is_blank() {
            debug!(
                target: "bundle_import",
                event = "blank_line_skipped",
                path = %path.display(),
                line = record.line
            );
            continue;
        }
        if record.len() != expected {
            return Err(LineImportError::FieldCountMismatch {
                line: record.line,
                expected,
                actual: record.len(),
            });
        }
        handler
            .process_line(conn, &record.fields)
            .await
            .map_err(|err| LineError::wrap(record.line, err))?;
        rows += 1;
    }

    Ok(rows)
}

/// Runs one SQL statement per record, binding fields positionally
/// (`?1`, `?2`, ...). Empty fields bind as NULL unless told otherwise.
#[derive(Debug, Clone)]
pub struct SqlTemplateHandler {
    sql: String,
    empty_as_null: bool,
}

impl SqlTemplateHandler {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            empty_as_null: true,
        }
    }

    pub fn keep_empty_strings(mut self) -> Self {
        self.empty_as_null = false;
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl LineHandler for SqlTemplateHandler {
    fn process_line<'a>(
        &'a self,
        conn: &'a mut SqliteConnection,
        fields: &'a [String],
    ) -> BoxFuture<'a, Result<(), AnyError>> {
        async move {
            let mut query = sqlx::query(&self.sql);
            for field in fields {
                query = if self.empty_as_null && field.is_empty() {
                    query.bind(None::<String>)
                } else {
                    query.bind(field.as_str())
                };
            }
            query.execute(&mut *conn).await?;
            Ok::<_, AnyError>(())
        }
        .boxed()
    }
}
