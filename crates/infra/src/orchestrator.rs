//! Drives one extraction per task: fetch, then commit, recording progress.

use std::error::Error as _;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinError;
use tracing::instrument;

use extractor_core::{FetchSpec, Task, TaskId, TaskTransition};

use crate::fetcher::{FetchError, RetryingBatchFetcher};
use crate::sink::{CommitMode, StorageCommitter, StorageError};
use crate::source::RemoteRecordSource;
use crate::tasks::{RegistryError, TaskRegistry};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ExtractionError {
    /// Stable label stored in the task's `error` field.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionError::Fetch(err) => err.kind(),
            ExtractionError::Storage(err) => err.kind(),
            ExtractionError::Registry(_) => "task_registry",
        }
    }

    /// `kind: message`, suitable for API clients.
    pub fn describe(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }

    /// Debug form followed by every underlying cause.
    pub fn diagnostic(&self) -> String {
        let mut out = format!("{self:?}");
        let mut cause = self.source();
        while let Some(err) = cause {
            out.push_str("\ncaused by: ");
            out.push_str(&err.to_string());
            cause = err.source();
        }
        out
    }
}

/// Runs extractions as detached tokio tasks against one source and one sink.
///
/// The target table and commit mode are deployment settings; callers only
/// choose what to fetch.
#[derive(Clone)]
pub struct ExtractionOrchestrator {
    registry: TaskRegistry,
    fetcher: RetryingBatchFetcher,
    committer: Arc<dyn StorageCommitter>,
    table: String,
    mode: CommitMode,
}

impl ExtractionOrchestrator {
    pub fn new(
        registry: TaskRegistry,
        source: Arc<dyn RemoteRecordSource>,
        committer: Arc<dyn StorageCommitter>,
        table: impl Into<String>,
        mode: CommitMode,
    ) -> Self {
        Self {
            registry,
            fetcher: RetryingBatchFetcher::new(source),
            committer,
            table: table.into(),
            mode,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn mode(&self) -> CommitMode {
        self.mode
    }

    /// Registers a task and spawns its run. Returns before fetching begins.
    pub async fn start(&self, spec: FetchSpec) -> TaskId {
        let task_id = self.registry.create(&spec).await.id;

        let orchestrator = self.clone();
        tokio::spawn(async move {
            let runner = orchestrator.clone();
            match tokio::spawn(async move { runner.run(task_id, spec).await }).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    tracing::error!(task_id = %task_id, error = %err, "task bookkeeping failed");
                }
                Err(join_err) => orchestrator.record_abort(task_id, join_err).await,
            }
        });

        task_id
    }

    /// Fails a task whose run panicked or was cancelled.
    async fn record_abort(&self, task_id: TaskId, join_err: JoinError) {
        let reason = if join_err.is_panic() { "panicked" } else { "was cancelled" };
        tracing::error!(task_id = %task_id, error = %join_err, "extraction run {reason}");

        let failure = TaskTransition::Failure {
            error: format!("run_aborted: extraction run {reason}"),
            diagnostic: Some(join_err.to_string()),
        };
        if let Err(err) = self.registry.update(task_id, failure).await {
            tracing::error!(task_id = %task_id, error = %err, "could not record aborted run");
        }
    }

    /// Runs a registered task to a terminal state and returns its final
    /// snapshot. Extraction failures are recorded on the task, never returned.
    #[instrument(skip_all, fields(task_id = %task_id, table = %self.table, mode = %self.mode))]
    pub async fn run(&self, task_id: TaskId, spec: FetchSpec) -> Result<Task, RegistryError> {
        match self.execute(task_id, &spec).await {
            Ok(count) => {
                tracing::info!(records = count, "extraction completed");
                self.registry
                    .update(task_id, TaskTransition::CommitComplete { count })
                    .await
            }
            Err(err) => {
                let partial = match &err {
                    ExtractionError::Fetch(fetch) => fetch.partial_count(),
                    _ => 0,
                };
                tracing::error!(
                    kind = err.kind(),
                    error = %err,
                    discarded = partial,
                    "extraction failed"
                );
                self.registry
                    .update(
                        task_id,
                        TaskTransition::Failure {
                            error: err.describe(),
                            diagnostic: Some(err.diagnostic()),
                        },
                    )
                    .await
            }
        }
    }

    async fn execute(&self, task_id: TaskId, spec: &FetchSpec) -> Result<usize, ExtractionError> {
        self.registry
            .update(task_id, TaskTransition::FetchBegin)
            .await?;

        let records = self.fetcher.fetch(spec).await?;
        let count = records.len();
        self.registry
            .update(task_id, TaskTransition::FetchComplete { count })
            .await?;

        self.committer.ensure_schema(&self.table).await?;
        let report = self.committer.commit(&self.table, records, self.mode).await?;
        tracing::debug!(
            backend = self.committer.backend(),
            rows_written = report.rows_written,
            rows_replaced = report.rows_replaced,
            "batch committed"
        );

        Ok(count)
    }
}
