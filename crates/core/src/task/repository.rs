//! Task repository trait
//!
//! Defines the interface for task storage operations.

use async_trait::async_trait;
use uuid::Uuid;

use super::model::{Task, TaskQuery};
use crate::status::TaskStatus;
use crate::Result;

/// Repository interface for tasks
///
/// Implementations must apply each write to a single task atomically;
/// `begin_execution` in particular is the admission gate for running a task
/// and must check and set the status in one step.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Create a new task
    async fn create(&self, task: Task) -> Result<Task>;

    /// Get a task by ID
    async fn get(&self, id: &str) -> Result<Option<Task>>;

    /// List tasks matching the query, newest first
    async fn list(&self, query: &TaskQuery) -> Result<Vec<Task>>;

    /// Update a task's configuration. Status and last execution are kept.
    async fn update(&self, task: Task) -> Result<Task>;

    /// Delete a task by ID
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Delete a task unless it is running, checked in the same step as the
    /// removal. Fails with `Error::Conflict` while running.
    async fn delete_if_idle(&self, id: &str) -> Result<bool>;

    /// Unconditionally set status and last execution id
    async fn upsert_status(
        &self,
        id: &str,
        status: TaskStatus,
        last_execution_id: Option<Uuid>,
    ) -> Result<Task>;

    /// Move the task to `Running` for `execution_id`.
    ///
    /// Fails with `Error::Conflict` if the task is already running. Returns
    /// the task as it was before the write.
    async fn begin_execution(&self, id: &str, execution_id: Uuid) -> Result<Task>;

    /// Apply a terminal status if `execution_id` is still the task's latest
    /// execution. Returns `false` when the execution was superseded.
    async fn complete_execution(
        &self,
        id: &str,
        execution_id: Uuid,
        status: TaskStatus,
    ) -> Result<bool>;

    /// Return a finished task to `Ready`.
    ///
    /// `Ready` tasks are returned unchanged; a running task fails with
    /// `Error::Conflict`.
    async fn reset_to_ready(&self, id: &str) -> Result<Task>;
}
