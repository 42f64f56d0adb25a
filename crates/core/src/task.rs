//! Extraction task lifecycle.
//!
//! ```text
//! Started ──FetchBegin──▶ Running ──FetchComplete──▶ Running ──CommitComplete──▶ Completed
//!    │                      │                          │
//!    └──────Failure─────────┴──────────Failure─────────┴──────────────────────▶ Failed
//! ```
//!
//! Every transition carries a fixed progress checkpoint. Completed and Failed
//! are terminal; a terminal task rejects any further transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::TaskId;

pub const PROGRESS_STARTED: u8 = 0;
pub const PROGRESS_FETCHING: u8 = 10;
pub const PROGRESS_COMMITTING: u8 = 50;
pub const PROGRESS_DONE: u8 = 100;

/// Task execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, work not yet begun
    Started,
    /// Fetching or committing
    Running,
    /// Records committed
    Completed,
    /// Fetch or commit failed
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Started => "started",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A phase change reported by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskTransition {
    FetchBegin,
    FetchComplete { count: usize },
    CommitComplete { count: usize },
    Failure {
        /// Operator-actionable summary: error kind plus upstream message.
        error: String,
        /// Full source chain, for operators only.
        diagnostic: Option<String>,
    },
}

impl TaskTransition {
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
            diagnostic: None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            TaskTransition::FetchBegin => "fetch_begin",
            TaskTransition::FetchComplete { .. } => "fetch_complete",
            TaskTransition::CommitComplete { .. } => "commit_complete",
            TaskTransition::Failure { .. } => "failure",
        }
    }
}

/// One tracked extraction run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    /// 0 to 100, never decreases.
    pub progress: u8,
    pub message: String,
    /// Set only when Completed.
    pub result_count: Option<usize>,
    /// Set only when Failed.
    pub error: Option<String>,
    /// Set only when Failed, and only if the failure carried one.
    pub diagnostic: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set once the task reaches a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a task in the `Started` state.
    pub fn new() -> Self {
        Self {
            id: TaskId::new(),
            status: TaskStatus::Started,
            progress: PROGRESS_STARTED,
            message: "task started".to_string(),
            result_count: None,
            error: None,
            diagnostic: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a transition, enforcing the state machine.
    ///
    /// On error the task is left untouched.
    pub fn apply(&mut self, transition: TaskTransition) -> DomainResult<()> {
        if self.is_terminal() {
            return Err(DomainError::invariant(format!(
                "task {} is {} and cannot take {}",
                self.id,
                self.status,
                transition.name()
            )));
        }

        let allowed = match &transition {
            TaskTransition::FetchBegin => self.status == TaskStatus::Started,
            TaskTransition::FetchComplete { .. } => self.status == TaskStatus::Running,
            TaskTransition::CommitComplete { .. } => {
                self.status == TaskStatus::Running && self.progress == PROGRESS_COMMITTING
            }
            TaskTransition::Failure { .. } => true,
        };
        if !allowed {
            return Err(DomainError::invariant(format!(
                "task {} cannot take {} while {}",
                self.id,
                transition.name(),
                self.status
            )));
        }

        let next_progress = match &transition {
            TaskTransition::FetchBegin => PROGRESS_FETCHING,
            TaskTransition::FetchComplete { .. } => PROGRESS_COMMITTING,
            TaskTransition::CommitComplete { .. } => PROGRESS_DONE,
            TaskTransition::Failure { .. } => self.progress,
        };
        if next_progress < self.progress {
            return Err(DomainError::invariant(format!(
                "task {} progress would regress from {} to {}",
                self.id, self.progress, next_progress
            )));
        }

        self.progress = next_progress;
        match transition {
            TaskTransition::FetchBegin => {
                self.status = TaskStatus::Running;
                self.message = "fetching from remote source".to_string();
            }
            TaskTransition::FetchComplete { count } => {
                self.status = TaskStatus::Running;
                self.message = format!("retrieved {count} records, committing");
            }
            TaskTransition::CommitComplete { count } => {
                self.status = TaskStatus::Completed;
                self.message = format!("committed {count} records");
                self.result_count = Some(count);
                self.completed_at = Some(Utc::now());
            }
            TaskTransition::Failure { error, diagnostic } => {
                self.status = TaskStatus::Failed;
                self.message = "extraction failed".to_string();
                self.error = Some(error);
                self.diagnostic = diagnostic;
                self.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_started_at_zero() {
        let task = Task::new();
        assert_eq!(task.status, TaskStatus::Started);
        assert_eq!(task.progress, 0);
        assert!(task.result_count.is_none());
        assert!(task.error.is_none());
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn successful_lifecycle_hits_every_checkpoint() {
        let mut task = Task::new();
        let mut seen = vec![task.progress];

        task.apply(TaskTransition::FetchBegin).unwrap();
        seen.push(task.progress);
        assert_eq!(task.message, "fetching from remote source");

        task.apply(TaskTransition::FetchComplete { count: 7 }).unwrap();
        seen.push(task.progress);
        assert_eq!(task.message, "retrieved 7 records, committing");

        task.apply(TaskTransition::CommitComplete { count: 7 }).unwrap();
        seen.push(task.progress);

        assert_eq!(seen, vec![0, 10, 50, 100]);
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result_count, Some(7));
        assert!(task.error.is_none());
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn failure_keeps_progress_and_records_error() {
        let mut task = Task::new();
        task.apply(TaskTransition::FetchBegin).unwrap();
        task.apply(TaskTransition::Failure {
            error: "remote_auth_invalid: token revoked".into(),
            diagnostic: Some("token revoked\ncaused by: 401".into()),
        })
        .unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.progress, 10);
        assert_eq!(task.error.as_deref(), Some("remote_auth_invalid: token revoked"));
        assert!(task.diagnostic.is_some());
        assert!(task.result_count.is_none());
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn failure_is_allowed_straight_from_started() {
        let mut task = Task::new();
        task.apply(TaskTransition::failure("boom")).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.progress, 0);
    }

    #[test]
    fn terminal_tasks_are_immutable() {
        let mut task = Task::new();
        task.apply(TaskTransition::FetchBegin).unwrap();
        task.apply(TaskTransition::FetchComplete { count: 1 }).unwrap();
        task.apply(TaskTransition::CommitComplete { count: 1 }).unwrap();
        let snapshot = task.clone();

        let err = task.apply(TaskTransition::failure("late")).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(task, snapshot);
    }

    #[test]
    fn phases_cannot_be_skipped() {
        let mut task = Task::new();
        assert!(task.apply(TaskTransition::FetchComplete { count: 1 }).is_err());
        assert!(task.apply(TaskTransition::CommitComplete { count: 1 }).is_err());
        assert_eq!(task.status, TaskStatus::Started);

        task.apply(TaskTransition::FetchBegin).unwrap();
        assert!(task.apply(TaskTransition::FetchBegin).is_err());

        // Commit needs the fetched checkpoint first.
        let err = task.apply(TaskTransition::CommitComplete { count: 1 }).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.progress, PROGRESS_FETCHING);
        assert!(task.result_count.is_none());
    }

    #[test]
    fn repeated_fetch_complete_keeps_progress() {
        let mut task = Task::new();
        task.apply(TaskTransition::FetchBegin).unwrap();
        task.apply(TaskTransition::FetchComplete { count: 2 }).unwrap();
        // A second FetchComplete stays at 50, which is not a regression.
        task.apply(TaskTransition::FetchComplete { count: 2 }).unwrap();
        assert_eq!(task.progress, 50);
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&TaskStatus::Completed).unwrap(), "\"completed\"");
    }
}
