//! Postgres-backed sink for a networked catalog.
//!
//! Rows land in `{schema}.{table}` with `label_ids TEXT[]` and
//! `internal_date TIMESTAMPTZ`. A schema named in the table is created on
//! demand. There is no primary key on `id`: insert-only commits append, and
//! merges delete matching ids before inserting, inside one transaction.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StorageError |
//! |------------|--------------|
//! | Database (any code) | `WriteFailed` |
//! | PoolClosed, PoolTimedOut, Io, Tls, Protocol, Configuration | `Unavailable` |
//! | Other | `WriteFailed` |

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::instrument;

use extractor_core::Record;

use super::{
    map_sqlx_error, prepare_rows, CommitMode, CommitReport, StorageCommitter, StorageError,
    TableName, RECORD_COLUMNS,
};

/// `information_schema.columns.data_type` for each of [`RECORD_COLUMNS`].
const COLUMN_TYPES: [&str; 9] = [
    "text",
    "text",
    "ARRAY",
    "text",
    "text",
    "timestamp with time zone",
    "text",
    "bigint",
    "text",
];

const CREATE_COLUMNS: &str = r#"
    id TEXT NOT NULL,
    thread_id TEXT NOT NULL,
    label_ids TEXT[] NOT NULL DEFAULT '{}',
    snippet TEXT,
    history_id TEXT,
    internal_date TIMESTAMPTZ,
    payload TEXT,
    size_estimate BIGINT,
    raw TEXT
"#;

#[derive(Debug, Clone)]
pub struct PostgresCommitter {
    pool: PgPool,
}

impl PostgresCommitter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    async fn existing_columns(&self, name: &TableName) -> Result<Vec<(String, String)>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT column_name::text AS column_name, data_type::text AS data_type
            FROM information_schema.columns
            WHERE table_schema = COALESCE($1, current_schema()) AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(name.schema.as_deref())
        .bind(&name.table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;

        rows.iter()
            .map(|row| Ok((row.try_get("column_name")?, row.try_get("data_type")?)))
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| map_sqlx_error("ensure_schema", e))
    }
}

/// Compares a live column listing against the record layout.
fn layout_conflict(name: &TableName, existing: &[(String, String)]) -> Option<StorageError> {
    let matches = existing.len() == RECORD_COLUMNS.len()
        && existing
            .iter()
            .zip(RECORD_COLUMNS.iter().zip(COLUMN_TYPES))
            .all(|((column, ty), (want_column, want_ty))| column == want_column && ty == want_ty);
    if matches {
        return None;
    }
    let found = existing
        .iter()
        .map(|(column, ty)| format!("{column} {ty}"))
        .collect::<Vec<_>>()
        .join(", ");
    Some(StorageError::SchemaConflict(format!(
        "table {name} has columns [{found}]"
    )))
}

#[async_trait]
impl StorageCommitter for PostgresCommitter {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self), err)]
    async fn ensure_schema(&self, table: &str) -> Result<(), StorageError> {
        let name = TableName::parse(table)?;
        let existing = self.existing_columns(&name).await?;
        if !existing.is_empty() {
            return match layout_conflict(&name, &existing) {
                Some(conflict) => Err(conflict),
                None => Ok(()),
            };
        }

        if let Some(schema) = &name.schema {
            sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS \"{schema}\""))
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({CREATE_COLUMNS})",
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
        Ok(())
    }

    #[instrument(skip_all, fields(table = %table, rows = records.len(), mode = %mode), err)]
    async fn commit(
        &self,
        table: &str,
        records: Vec<Record>,
        mode: CommitMode,
    ) -> Result<CommitReport, StorageError> {
        let name = TableName::parse(table)?;
        let rows = prepare_rows(records, mode)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        let mut rows_replaced = 0usize;
        if mode == CommitMode::MergeUpsert {
            let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
            let result = sqlx::query(&format!(
                "DELETE FROM {} WHERE id = ANY($1)",
                name.quoted()
            ))
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
            rows_replaced = result.rows_affected() as usize;
        }

        let insert = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            name.quoted(),
            RECORD_COLUMNS.join(", ")
        );
        for row in &rows {
            sqlx::query(&insert)
                .bind(&row.id)
                .bind(&row.thread_id)
                .bind(&row.label_ids)
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

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(types: &[&str]) -> Vec<(String, String)> {
        RECORD_COLUMNS
            .iter()
            .zip(types)
            .map(|(c, t)| (c.to_string(), t.to_string()))
            .collect()
    }

    #[test]
    fn exact_layout_has_no_conflict() {
        let name = TableName::parse("lake.messages").unwrap();
        assert!(layout_conflict(&name, &listing(&COLUMN_TYPES)).is_none());
    }

    #[test]
    fn retyped_or_missing_columns_conflict() {
        let name = TableName::parse("messages").unwrap();

        let mut retyped = COLUMN_TYPES;
        retyped[7] = "integer";
        assert!(layout_conflict(&name, &listing(&retyped)).is_some());

        let mut short = listing(&COLUMN_TYPES);
        short.pop();
        assert!(matches!(
            layout_conflict(&name, &short),
            Some(StorageError::SchemaConflict(_))
        ));
    }

    /// Runs only when `EXTRACTOR_TEST_POSTGRES_URL` points at a scratch database.
    #[tokio::test]
    async fn merge_round_trip_against_live_database() {
        let Ok(url) = std::env::var("EXTRACTOR_TEST_POSTGRES_URL") else {
            return;
        };
        let sink = PostgresCommitter::connect(&url).await.unwrap();
        let table = format!("extractor_test.messages_{}", std::process::id());
        sink.ensure_schema(&table).await.unwrap();
        sink.ensure_schema(&table).await.unwrap();

        let batch = vec![
            Record::new("a", "t").with_labels(["INBOX"]),
            Record::new("b", "t").with_size_estimate(7),
        ];
        sink.commit(&table, batch.clone(), CommitMode::MergeUpsert).await.unwrap();
        let again = sink.commit(&table, batch, CommitMode::MergeUpsert).await.unwrap();
        assert_eq!(again.rows_replaced, 2);

        let name = TableName::parse(&table).unwrap();
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", name.quoted()))
            .fetch_one(&sink.pool)
            .await
            .unwrap();
        assert_eq!(count, 2);

        sqlx::query(&format!("DROP TABLE {}", name.quoted()))
            .execute(&sink.pool)
            .await
            .unwrap();
    }
}
