//! Datalake sink: persists fetched records into a tabular store.
//!
//! Backends are chosen once from the configured sink URL (see [`connect`]):
//!
//! | URL prefix | Backend |
//! |------------|---------|
//! | `memory://` | [`InMemoryCommitter`] |
//! | `sqlite:` | [`SqliteCommitter`] |
//! | `postgres://`, `postgresql://` | [`PostgresCommitter`] |

pub mod in_memory;
pub mod postgres;
pub mod sqlite;

pub use in_memory::InMemoryCommitter;
pub use postgres::PostgresCommitter;
pub use sqlite::SqliteCommitter;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use extractor_core::Record;

/// Column layout of every record table, in order.
pub const RECORD_COLUMNS: [&str; 9] = [
    "id",
    "thread_id",
    "label_ids",
    "snippet",
    "history_id",
    "internal_date",
    "payload",
    "size_estimate",
    "raw",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("table schema conflict: {0}")]
    SchemaConflict(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("write failed: {0}")]
    WriteFailed(String),
}

impl StorageError {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::SchemaConflict(_) => "schema_conflict",
            StorageError::Unavailable(_) => "storage_unavailable",
            StorageError::WriteFailed(_) => "storage_write_failed",
        }
    }
}

/// How a batch is applied to existing rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// Append every row; duplicates of existing ids are kept.
    #[default]
    InsertOnly,
    /// Replace existing rows with the same id, atomically.
    MergeUpsert,
}

impl CommitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitMode::InsertOnly => "insert_only",
            CommitMode::MergeUpsert => "merge_upsert",
        }
    }
}

impl fmt::Display for CommitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert_only" | "insert" | "append" => Ok(CommitMode::InsertOnly),
            "merge_upsert" | "merge" | "upsert" => Ok(CommitMode::MergeUpsert),
            other => Err(format!(
                "expected insert_only or merge_upsert (got '{other}')"
            )),
        }
    }
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub table: String,
    pub mode: CommitMode,
    /// Rows inserted by this commit.
    pub rows_written: usize,
    /// Existing rows removed by a merge.
    pub rows_replaced: usize,
}

/// Storage boundary used by the orchestrator.
#[async_trait]
pub trait StorageCommitter: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Creates the record table when absent. Idempotent.
    async fn ensure_schema(&self, table: &str) -> Result<(), StorageError>;

    /// Writes `records` to `table` as one atomic unit.
    async fn commit(
        &self,
        table: &str,
        records: Vec<Record>,
        mode: CommitMode,
    ) -> Result<CommitReport, StorageError>;
}

/// Validated `table` or `schema.table` name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    pub schema: Option<String>,
    pub table: String,
}

impl TableName {
    pub fn parse(name: &str) -> Result<Self, StorageError> {
        let (schema, table) = match name.split_once('.') {
            Some((schema, table)) => (Some(schema), table),
            None => (None, name),
        };
        for part in schema.iter().chain(std::iter::once(&table)) {
            if !is_identifier(part) {
                return Err(StorageError::WriteFailed(format!(
                    "invalid table name '{name}'"
                )));
            }
        }
        Ok(Self {
            schema: schema.map(str::to_string),
            table: table.to_string(),
        })
    }

    /// Double-quoted, schema-qualified form for SQL text.
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("\"{schema}\".\"{}\"", self.table),
            None => format!("\"{}\"", self.table),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.table),
            None => f.write_str(&self.table),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A record converted to the stored column types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRow {
    pub id: String,
    pub thread_id: String,
    pub label_ids: Vec<String>,
    pub snippet: Option<String>,
    pub history_id: Option<String>,
    pub internal_date: Option<DateTime<Utc>>,
    /// Structured payload serialized as JSON text.
    pub payload: Option<String>,
    pub size_estimate: Option<i64>,
    pub raw: Option<String>,
}

impl RecordRow {
    pub fn from_record(record: Record) -> Result<Self, StorageError> {
        let size_estimate = record
            .size_estimate
            .map(|size| {
                i64::try_from(size).map_err(|_| {
                    StorageError::WriteFailed(format!(
                        "record {}: size_estimate {size} does not fit a signed 64-bit column",
                        record.id
                    ))
                })
            })
            .transpose()?;
        let payload = record.payload_text();

        Ok(Self {
            id: record.id,
            thread_id: record.thread_id,
            label_ids: record.label_ids.into_iter().collect(),
            snippet: record.snippet,
            history_id: record.history_id,
            internal_date: record.internal_date,
            payload,
            size_estimate,
            raw: record.raw,
        })
    }
}

/// Converts a whole batch before any write, so a bad record rejects the batch.
/// For merges, a later duplicate id replaces the earlier one in place.
pub(crate) fn prepare_rows(
    records: Vec<Record>,
    mode: CommitMode,
) -> Result<Vec<RecordRow>, StorageError> {
    let rows = records
        .into_iter()
        .map(RecordRow::from_record)
        .collect::<Result<Vec<_>, _>>()?;

    if mode == CommitMode::InsertOnly {
        return Ok(rows);
    }

    let mut position: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    let mut deduped: Vec<RecordRow> = Vec::with_capacity(rows.len());
    for row in rows {
        match position.get(&row.id) {
            Some(&i) => deduped[i] = row,
            None => {
                position.insert(row.id.clone(), deduped.len());
                deduped.push(row);
            }
        }
    }
    Ok(deduped)
}

/// Maps sqlx failures onto [`StorageError`].
///
/// Connection-level problems are `Unavailable`; anything the database
/// rejected is `WriteFailed`.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::Database(db_err) => StorageError::WriteFailed(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            StorageError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StorageError::Unavailable(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::Io(e) => StorageError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => StorageError::Unavailable(format!("tls error in {operation}: {e}")),
        sqlx::Error::Protocol(e) => {
            StorageError::Unavailable(format!("protocol error in {operation}: {e}"))
        }
        sqlx::Error::Configuration(e) => {
            StorageError::Unavailable(format!("bad connection settings in {operation}: {e}"))
        }
        other => StorageError::WriteFailed(format!("sqlx error in {operation}: {other}")),
    }
}

/// Opens the backend named by `url`.
pub async fn connect(url: &str) -> Result<Arc<dyn StorageCommitter>, StorageError> {
    let url = url.trim();
    if url.starts_with("memory://") {
        tracing::info!("using in-memory sink");
        return Ok(Arc::new(InMemoryCommitter::new()));
    }
    if url.starts_with("sqlite:") {
        let committer = SqliteCommitter::connect(url).await?;
        tracing::info!("using sqlite sink");
        return Ok(Arc::new(committer));
    }
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let committer = PostgresCommitter::connect(url).await?;
        tracing::info!("using postgres sink");
        return Ok(Arc::new(committer));
    }
    Err(StorageError::Unavailable(format!(
        "unsupported sink url '{url}': expected memory://, sqlite: or postgres://"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_validated() {
        assert_eq!(TableName::parse("messages").unwrap().quoted(), "\"messages\"");
        let qualified = TableName::parse("lake.messages").unwrap();
        assert_eq!(qualified.schema.as_deref(), Some("lake"));
        assert_eq!(qualified.quoted(), "\"lake\".\"messages\"");
        assert_eq!(qualified.to_string(), "lake.messages");

        for bad in ["", "1abc", "drop table;", "a.b.c", "a-b", ".messages"] {
            assert!(
                matches!(TableName::parse(bad), Err(StorageError::WriteFailed(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn oversized_size_estimate_rejects_the_batch() {
        let records = vec![
            Record::new("ok", "t").with_size_estimate(10),
            Record::new("huge", "t").with_size_estimate(u64::MAX),
        ];
        let err = prepare_rows(records, CommitMode::InsertOnly).unwrap_err();
        assert!(matches!(err, StorageError::WriteFailed(msg) if msg.contains("huge")));
    }

    #[test]
    fn merge_keeps_last_duplicate_in_first_position() {
        let records = vec![
            Record::new("a", "t").with_snippet("first"),
            Record::new("b", "t"),
            Record::new("a", "t").with_snippet("second"),
        ];
        let rows = prepare_rows(records.clone(), CommitMode::MergeUpsert).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "a");
        assert_eq!(rows[0].snippet.as_deref(), Some("second"));

        assert_eq!(prepare_rows(records, CommitMode::InsertOnly).unwrap().len(), 3);
    }

    #[test]
    fn commit_mode_parses_config_values() {
        assert_eq!("insert_only".parse::<CommitMode>().unwrap(), CommitMode::InsertOnly);
        assert_eq!("MERGE_UPSERT".parse::<CommitMode>().unwrap(), CommitMode::MergeUpsert);
        assert!("overwrite".parse::<CommitMode>().is_err());
    }

    #[tokio::test]
    async fn unknown_sink_url_is_unavailable() {
        let err = connect("mysql://localhost/db").await.err().unwrap();
        assert_eq!(err.kind(), "storage_unavailable");
    }
}
