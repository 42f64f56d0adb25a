//! In-process sink for local runs and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use extractor_core::Record;

use super::{
    prepare_rows, CommitMode, CommitReport, RecordRow, StorageCommitter, StorageError, TableName,
    RECORD_COLUMNS,
};

#[derive(Debug, Default)]
struct MemTable {
    columns: Vec<String>,
    rows: Vec<RecordRow>,
}

/// Keeps typed rows per table in memory. Contents die with the process.
#[derive(Debug, Default)]
pub struct InMemoryCommitter {
    tables: RwLock<HashMap<String, MemTable>>,
    write_failure: Option<StorageError>,
}

impl InMemoryCommitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-existing table with its own column layout.
    pub fn with_existing_table(self, table: &str, columns: &[&str]) -> Self {
        let mut tables = self.tables.into_inner();
        tables.insert(
            table.to_string(),
            MemTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            },
        );
        Self {
            tables: RwLock::new(tables),
            write_failure: self.write_failure,
        }
    }

    /// Every commit fails with `error`.
    pub fn with_write_failure(mut self, error: StorageError) -> Self {
        self.write_failure = Some(error);
        self
    }

    pub async fn rows(&self, table: &str) -> Vec<RecordRow> {
        self.tables
            .read()
            .await
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub async fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map_or(0, |t| t.rows.len())
    }
}

#[async_trait]
impl StorageCommitter for InMemoryCommitter {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ensure_schema(&self, table: &str) -> Result<(), StorageError> {
        let name = TableName::parse(table)?;
        let mut tables = self.tables.write().await;
        let entry = tables.entry(name.to_string()).or_insert_with(|| MemTable {
            columns: RECORD_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        });
        if entry.columns != RECORD_COLUMNS {
            return Err(StorageError::SchemaConflict(format!(
                "table {name} has columns [{}]",
                entry.columns.join(", ")
            )));
        }
        Ok(())
    }

    async fn commit(
        &self,
        table: &str,
        records: Vec<Record>,
        mode: CommitMode,
    ) -> Result<CommitReport, StorageError> {
        let name = TableName::parse(table)?;
        let rows = prepare_rows(records, mode)?;
        if let Some(err) = &self.write_failure {
            return Err(err.clone());
        }

        let mut tables = self.tables.write().await;
        let target = tables.get_mut(&name.to_string()).ok_or_else(|| {
            StorageError::WriteFailed(format!("table {name} does not exist"))
        })?;

        let rows_replaced = match mode {
            CommitMode::InsertOnly => 0,
            CommitMode::MergeUpsert => {
                let before = target.rows.len();
                target
                    .rows
                    .retain(|existing| !rows.iter().any(|r| r.id == existing.id));
                before - target.rows.len()
            }
        };
        let rows_written = rows.len();
        target.rows.extend(rows);

        Ok(CommitReport {
            table: name.to_string(),
            mode,
            rows_written,
            rows_replaced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> Vec<Record> {
        vec![
            Record::new("a", "t1").with_labels(["INBOX"]),
            Record::new("b", "t1"),
            Record::new("c", "t2").with_size_estimate(42),
        ]
    }

    #[tokio::test]
    async fn ensure_schema_is_idempotent() {
        let sink = InMemoryCommitter::new();
        sink.ensure_schema("messages").await.unwrap();
        sink.ensure_schema("messages").await.unwrap();
        assert_eq!(sink.row_count("messages").await, 0);
    }

    #[tokio::test]
    async fn merge_twice_leaves_one_row_per_id() {
        let sink = InMemoryCommitter::new();
        sink.ensure_schema("messages").await.unwrap();

        let first = sink.commit("messages", batch(), CommitMode::MergeUpsert).await.unwrap();
        assert_eq!(first.rows_written, 3);
        assert_eq!(first.rows_replaced, 0);

        let second = sink.commit("messages", batch(), CommitMode::MergeUpsert).await.unwrap();
        assert_eq!(second.rows_replaced, 3);
        assert_eq!(sink.row_count("messages").await, 3);
    }

    #[tokio::test]
    async fn insert_only_keeps_duplicates() {
        let sink = InMemoryCommitter::new();
        sink.ensure_schema("messages").await.unwrap();

        let one = vec![Record::new("a", "t1")];
        sink.commit("messages", one.clone(), CommitMode::InsertOnly).await.unwrap();
        sink.commit("messages", one, CommitMode::InsertOnly).await.unwrap();

        let rows = sink.rows("messages").await;
        assert_eq!(rows.iter().filter(|r| r.id == "a").count(), 2);
    }

    #[tokio::test]
    async fn foreign_layout_is_a_schema_conflict() {
        let sink = InMemoryCommitter::new().with_existing_table("messages", &["id", "body"]);
        let err = sink.ensure_schema("messages").await.unwrap_err();
        assert_eq!(err.kind(), "schema_conflict");
    }

    #[tokio::test]
    async fn conversion_failure_writes_nothing() {
        let sink = InMemoryCommitter::new();
        sink.ensure_schema("messages").await.unwrap();

        let records = vec![
            Record::new("a", "t1"),
            Record::new("b", "t1").with_size_estimate(u64::MAX),
        ];
        let err = sink
            .commit("messages", records, CommitMode::InsertOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::WriteFailed(_)));
        assert_eq!(sink.row_count("messages").await, 0);
    }

    #[tokio::test]
    async fn commit_without_table_fails() {
        let sink = InMemoryCommitter::new();
        let err = sink
            .commit("messages", batch(), CommitMode::InsertOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::WriteFailed(_)));
    }
}
