//! File-backed SQLite sink.
//!
//! `label_ids` is stored as a JSON array in TEXT, `internal_date` as RFC 3339
//! TEXT. Only the `main` schema exists, so qualified names other than
//! `main.<table>` are rejected.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::instrument;

use extractor_core::Record;

use super::{
    map_sqlx_error, prepare_rows, CommitMode, CommitReport, RecordRow, StorageCommitter,
    StorageError, TableName, RECORD_COLUMNS,
};

const COLUMN_TYPES: [&str; 9] = [
    "TEXT", "TEXT", "TEXT", "TEXT", "TEXT", "TEXT", "TEXT", "INTEGER", "TEXT",
];

#[derive(Debug, Clone)]
pub struct SqliteCommitter {
    pool: SqlitePool,
}

impl SqliteCommitter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens `url`, creating the database file and its directory if needed.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        if url.contains(":memory:") || url.contains("mode=memory") {
            return Self::in_memory().await;
        }

        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| map_sqlx_error("connect", e))?
            .create_if_missing(true);

        if let Some(dir) = database_file(url).as_deref().and_then(Path::parent) {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await.map_err(|e| {
                    StorageError::Unavailable(format!(
                        "cannot create sink directory {}: {e}",
                        dir.display()
                    ))
                })?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Private in-memory database. A single long-lived connection keeps it alive.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| map_sqlx_error("connect", e))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    fn resolve(table: &str) -> Result<TableName, StorageError> {
        let name = TableName::parse(table)?;
        match name.schema.as_deref() {
            None | Some("main") => Ok(TableName {
                schema: None,
                table: name.table,
            }),
            Some(other) => Err(StorageError::WriteFailed(format!(
                "sqlite sink has no schema '{other}'"
            ))),
        }
    }

    async fn existing_columns(&self, name: &TableName) -> Result<Vec<(String, String)>, StorageError> {
        let rows = sqlx::query("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
            .bind(&name.table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;

        rows.iter()
            .map(|row| {
                let column: String = row.try_get("name")?;
                let ty: String = row.try_get("type")?;
                Ok((column, ty.to_ascii_uppercase()))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| map_sqlx_error("ensure_schema", e))
    }

    /// Reads every row of `table` back in insertion order.
    pub async fn load_rows(&self, table: &str) -> Result<Vec<RecordRow>, StorageError> {
        let name = Self::resolve(table)?;
        let rows = sqlx::query(&format!(
            "SELECT {} FROM {} ORDER BY rowid",
            RECORD_COLUMNS.join(", "),
            name.quoted()
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_rows", e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let labels: String = row
                .try_get("label_ids")
                .map_err(|e| map_sqlx_error("load_rows", e))?;
            let label_ids: Vec<String> = serde_json::from_str(&labels).map_err(|e| {
                StorageError::WriteFailed(format!("undecodable label_ids column: {e}"))
            })?;
            out.push(
                decode_row(&row, label_ids).map_err(|e| map_sqlx_error("load_rows", e))?,
            );
        }
        Ok(out)
    }
}

/// Filesystem path named by a `sqlite:` URL.
fn database_file(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

fn decode_row(row: &sqlx::sqlite::SqliteRow, label_ids: Vec<String>) -> Result<RecordRow, sqlx::Error> {
    Ok(RecordRow {
        id: row.try_get("id")?,
        thread_id: row.try_get("thread_id")?,
        label_ids,
        snippet: row.try_get("snippet")?,
        history_id: row.try_get("history_id")?,
        internal_date: row.try_get("internal_date")?,
        payload: row.try_get("payload")?,
        size_estimate: row.try_get("size_estimate")?,
        raw: row.try_get("raw")?,
    })
}

#[async_trait]
impl StorageCommitter for SqliteCommitter {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    #[instrument(skip(self), err)]
    async fn ensure_schema(&self, table: &str) -> Result<(), StorageError> {
        let name = Self::resolve(table)?;
        let existing = self.existing_columns(&name).await?;

        if existing.is_empty() {
            let columns = RECORD_COLUMNS
                .iter()
                .zip(COLUMN_TYPES)
                .map(|(column, ty)| match *column {
                    "id" | "thread_id" | "label_ids" => format!("{column} {ty} NOT NULL"),
                    _ => format!("{column} {ty}"),
                })
                .collect::<Vec<_>>()
                .join(", ");
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({columns})",
                name.quoted()
            ))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS \"{}_id_idx\" ON {} (id)",
                name.table,
                name.quoted()
            ))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;

            tracing::info!(table = %name, "created record table");
            return Ok(());
        }

        let expected = RECORD_COLUMNS.iter().zip(COLUMN_TYPES);
        let matches = existing.len() == RECORD_COLUMNS.len()
            && existing
                .iter()
                .zip(expected)
                .all(|((column, ty), (want_column, want_ty))| column == want_column && ty == want_ty);
        if !matches {
            let found = existing
                .iter()
                .map(|(column, ty)| format!("{column} {ty}"))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(StorageError::SchemaConflict(format!(
                "table {name} has columns [{found}]"
            )));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(table = %table, rows = records.len(), mode = %mode), err)]
    async fn commit(
        &self,
        table: &str,
        records: Vec<Record>,
        mode: CommitMode,
    ) -> Result<CommitReport, StorageError> {
        let name = Self::resolve(table)?;
        let rows = prepare_rows(records, mode)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        let mut rows_replaced = 0usize;
        if mode == CommitMode::MergeUpsert {
            let delete = format!("DELETE FROM {} WHERE id = ?1", name.quoted());
            for row in &rows {
                let result = sqlx::query(&delete)
                    .bind(&row.id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("commit", e))?;
                rows_replaced += result.rows_affected() as usize;
            }
        }

        let insert = format!(
            "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            name.quoted(),
            RECORD_COLUMNS.join(", ")
        );
        for row in &rows {
            let labels = serde_json::to_string(&row.label_ids).map_err(|e| {
                StorageError::WriteFailed(format!("record {}: cannot encode labels: {e}", row.id))
            })?;
            sqlx::query(&insert)
                .bind(&row.id)
                .bind(&row.thread_id)
                .bind(labels)
                .bind(&row.snippet)
                .bind(&row.history_id)
                .bind(row.internal_date)
                .bind(&row.payload)
                .bind(row.size_estimate)
                .bind(&row.raw)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("commit", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;

        tracing::info!(table = %name, rows_written = rows.len(), rows_replaced, "committed batch");
        Ok(CommitReport {
            table: name.to_string(),
            mode,
            rows_written: rows.len(),
            rows_replaced,
        })
    }
}
