use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use extractor_core::{Completeness, FetchSpec, Task, TaskId, TaskStatus};
use extractor_infra::config::FetchDefaults;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ExtractRequest {
    #[serde(default)]
    pub query: String,
    pub max_results: Option<usize>,
    #[serde(default)]
    pub fetch_config: FetchConfigRequest,
}

/// Per-request fetch tuning. Unset fields fall back to configured defaults.
#[derive(Debug, Default, Deserialize)]
pub struct FetchConfigRequest {
    pub messages_per_batch: Option<usize>,
    pub response_format: Option<String>,
    pub metadata_headers: Option<Vec<String>>,
    pub max_retry_attempts: Option<u32>,
    /// Seconds.
    pub initial_retry_delay: Option<f64>,
}

impl ExtractRequest {
    pub fn into_spec(self, defaults: &FetchDefaults) -> Result<FetchSpec, axum::response::Response> {
        let cfg = self.fetch_config;

        let completeness = match cfg.response_format.as_deref() {
            Some(raw) => raw
                .parse::<Completeness>()
                .map_err(|e| errors::validation_error(e.to_string()))?,
            None => Completeness::default(),
        };

        let initial_retry_delay = match cfg.initial_retry_delay {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .ok()
                .filter(|d| !d.is_zero())
                .ok_or_else(|| {
                    errors::validation_error(format!(
                        "initial_retry_delay must be a positive number of seconds (got {secs})"
                    ))
                })?,
            None => defaults.initial_retry_delay,
        };

        let mut spec = defaults
            .spec(self.query)
            .with_completeness(completeness)
            .with_retries(
                cfg.max_retry_attempts.unwrap_or(defaults.max_retry_attempts),
                initial_retry_delay,
            );
        if let Some(max_results) = self.max_results {
            spec = spec.with_max_results(max_results);
        }
        if let Some(batch_size) = cfg.messages_per_batch {
            spec = spec.with_batch_size(batch_size);
        }
        if let Some(headers) = cfg.metadata_headers {
            spec = spec.with_metadata_fields(headers);
        }

        spec.validate()
            .map_err(|e| errors::validation_error(e.to_string()))?;
        Ok(spec)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct TaskStartResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub message: &'static str,
}

impl TaskStartResponse {
    pub fn started(task_id: TaskId) -> Self {
        Self {
            task_id,
            status: TaskStatus::Started,
            message: "extraction task started",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    pub message_count: Option<usize>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl TaskStatusResponse {
    pub fn from_task(task: Task, expose_diagnostics: bool) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            progress: task.progress,
            message: task.message,
            message_count: task.result_count,
            error: task.error,
            started_at: task.created_at,
            completed_at: task.completed_at,
            diagnostic: task.diagnostic.filter(|_| expose_diagnostics),
        }
    }
}
