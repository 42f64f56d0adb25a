//! Batched retrieval with exponential backoff on transient failures.

mod retry;

pub use retry::RetryPolicy;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use extractor_core::{DomainError, FetchSpec, Record};

use crate::source::{RemoteRecordSource, SourceError};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid fetch spec: {0}")]
    InvalidSpec(#[from] DomainError),

    #[error("no records matched query '{query}'")]
    NoCandidates { query: String },

    /// Non-transient failure, or a failure while listing candidates.
    #[error("{0}")]
    Remote(#[source] SourceError),

    #[error(
        "batch {batch} failed after {attempts} attempts ({fetched_so_far} records fetched before it): {last_error}"
    )]
    Exhausted {
        batch: usize,
        attempts: u32,
        #[source]
        last_error: SourceError,
        fetched_so_far: usize,
    },
}

impl FetchError {
    /// Records retrieved before the failure. They are never committed.
    pub fn partial_count(&self) -> usize {
        match self {
            FetchError::Exhausted { fetched_so_far, .. } => *fetched_so_far,
            _ => 0,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::InvalidSpec(_) => "invalid_fetch_spec",
            FetchError::NoCandidates { .. } => "no_candidates",
            FetchError::Remote(err) => err.kind(),
            FetchError::Exhausted { .. } => "fetch_exhausted",
        }
    }
}

/// Lists candidates once, then fetches them in consecutive batches,
/// retrying a failing batch according to [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryingBatchFetcher {
    source: Arc<dyn RemoteRecordSource>,
}

impl RetryingBatchFetcher {
    pub fn new(source: Arc<dyn RemoteRecordSource>) -> Self {
        Self { source }
    }

    /// Every record for `spec`, in listing order, or the first unrecoverable
    /// error. Partial results are dropped on error.
    pub async fn fetch(&self, spec: &FetchSpec) -> Result<Vec<Record>, FetchError> {
        spec.validate()?;

        let mut ids = self
            .source
            .list_candidates(&spec.query, spec.max_results)
            .await
            .map_err(FetchError::Remote)?;
        ids.truncate(spec.max_results);

        if ids.is_empty() {
            return Err(FetchError::NoCandidates {
                query: spec.query.clone(),
            });
        }

        let policy = RetryPolicy::from_spec(spec);
        let metadata_fields = spec.requested_metadata_fields();
        let batch_total = ids.len().div_ceil(spec.batch_size);
        tracing::info!(
            candidates = ids.len(),
            batches = batch_total,
            batch_size = spec.batch_size,
            "fetching candidate records"
        );

        let mut records = Vec::with_capacity(ids.len());
        for (index, chunk) in ids.chunks(spec.batch_size).enumerate() {
            let batch = index + 1;
            let fetched = self
                .fetch_with_retry(chunk, spec, metadata_fields.as_deref(), policy, batch, records.len())
                .await?;
            tracing::debug!(batch, batch_total, records = fetched.len(), "batch fetched");
            records.extend(fetched);
        }

        Ok(records)
    }

    async fn fetch_with_retry(
        &self,
        chunk: &[String],
        spec: &FetchSpec,
        metadata_fields: Option<&[String]>,
        policy: RetryPolicy,
        batch: usize,
        fetched_so_far: usize,
    ) -> Result<Vec<Record>, FetchError> {
        let mut retries_done = 0u32;
        loop {
            match self
                .source
                .fetch_batch(chunk, spec.completeness, metadata_fields)
                .await
            {
                Ok(records) => return Ok(order_by_ids(chunk, records)),
                Err(err) if !err.is_transient() => return Err(FetchError::Remote(err)),
                Err(err) if policy.should_retry(retries_done) => {
                    retries_done += 1;
                    let delay = policy.delay_for_attempt(retries_done);
                    tracing::warn!(
                        batch,
                        attempt = retries_done,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "batch fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::error!(
                        batch,
                        attempts = retries_done + 1,
                        fetched_so_far,
                        error = %err,
                        "batch fetch retries exhausted"
                    );
                    return Err(FetchError::Exhausted {
                        batch,
                        attempts: retries_done + 1,
                        last_error: err,
                        fetched_so_far,
                    });
                }
            }
        }
    }
}

/// Puts a batch back in the order its ids were requested; unknown ids keep
/// their relative order at the end.
fn order_by_ids(chunk: &[String], mut records: Vec<Record>) -> Vec<Record> {
    let position: HashMap<&str, usize> = chunk
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    records.sort_by_key(|r| position.get(r.id.as_str()).copied().unwrap_or(usize::MAX));
    records
}
