use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::model::TaskExecution;
use crate::status::TaskStatus;
use crate::Result;

/// Repository interface for execution records
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Insert a new execution record
    async fn insert(&self, execution: TaskExecution) -> Result<TaskExecution>;

    /// Get an execution by ID
    async fn get(&self, id: Uuid) -> Result<Option<TaskExecution>>;

    /// All executions of a task, newest first
    async fn list_by_task(&self, task_id: &str) -> Result<Vec<TaskExecution>>;

    /// All executions currently in `status`
    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<TaskExecution>>;

    /// Record progress of a running execution. Returns the stored value.
    async fn update_progress(&self, id: Uuid, progress: f64) -> Result<f64>;

    /// Move a running execution to a terminal state.
    ///
    /// Fails with `Error::InvalidTransition` when the record is already
    /// terminal; terminal records are never rewritten.
    async fn update_terminal(
        &self,
        id: Uuid,
        status: TaskStatus,
        completed_at: DateTime<Utc>,
        progress: f64,
        detail: Option<String>,
    ) -> Result<TaskExecution>;
}
