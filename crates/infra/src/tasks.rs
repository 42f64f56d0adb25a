//! Process-wide registry of extraction tasks.
//!
//! Tasks live only in memory: the registry starts empty, nothing is
//! persisted, and entries are never evicted.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use extractor_core::{FetchSpec, Task, TaskId, TaskTransition};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task {task_id}: {reason}")]
    InvalidTransition { task_id: TaskId, reason: String },
}

/// Shared handle; clones see the same tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<TaskId, Task>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh task in `Started` and returns its snapshot.
    pub async fn create(&self, spec: &FetchSpec) -> Task {
        let task = Task::new();
        self.tasks.write().await.insert(task.id, task.clone());
        tracing::info!(
            task_id = %task.id,
            query = %spec.query,
            max_results = spec.max_results,
            batch_size = spec.batch_size,
            "task created"
        );
        task
    }

    /// Applies `transition` atomically and returns the updated snapshot.
    pub async fn update(
        &self,
        task_id: TaskId,
        transition: TaskTransition,
    ) -> Result<Task, RegistryError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&task_id)
            .ok_or(RegistryError::TaskNotFound(task_id))?;

        task.apply(transition)
            .map_err(|e| RegistryError::InvalidTransition {
                task_id,
                reason: e.to_string(),
            })?;

        tracing::debug!(
            task_id = %task_id,
            status = %task.status,
            progress = task.progress,
            "task updated"
        );
        Ok(task.clone())
    }

    pub async fn get(&self, task_id: TaskId) -> Result<Task, RegistryError> {
        self.tasks
            .read()
            .await
            .get(&task_id)
            .cloned()
            .ok_or(RegistryError::TaskNotFound(task_id))
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}
