//! Task management on top of the execution coordinator

use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use dc_core::execution::TaskExecution;
use dc_core::task::{SyncMode, Task, TaskQuery};

use crate::coordinator::ExecutionCoordinator;
use crate::error::{ExecutorError, Result};

/// Fields for creating a task
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTask {
    /// Caller-assigned id; generated when absent
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub sync_mode: SyncMode,
    pub config: Option<serde_json::Value>,
    pub timeout_seconds: Option<u64>,
}

/// Partial update of a task's definition. `None` keeps the stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub sync_mode: Option<SyncMode>,
    pub config: Option<serde_json::Value>,
    pub timeout_seconds: Option<u64>,
}

/// Task CRUD plus the run controls exposed to clients
#[derive(Clone)]
pub struct CollectionTaskService {
    coordinator: ExecutionCoordinator,
}

impl CollectionTaskService {
    pub fn new(coordinator: ExecutionCoordinator) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &ExecutionCoordinator {
        &self.coordinator
    }

    /// Create a task. `Once` tasks start their single run right away.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create(&self, input: NewTask) -> Result<(Task, Option<TaskExecution>)> {
        validate_name(&input.name)?;
        validate_timeout(input.timeout_seconds)?;

        let mut task = match input.id {
            Some(id) if id.trim().is_empty() => {
                return Err(ExecutorError::InvalidInput("task id must not be blank".to_string()))
            }
            Some(id) => Task::with_id(id, input.name),
            None => Task::new(input.name),
        }
        .with_sync_mode(input.sync_mode);
        task.description = input.description;
        if let Some(config) = input.config {
            task.config = config;
        }
        task.timeout_seconds = input.timeout_seconds;

        let task = self.coordinator.tasks().create(task).await?;
        info!(task_id = %task.id, sync_mode = ?task.sync_mode, "Task created");

        if task.sync_mode != SyncMode::Once {
            return Ok((task, None));
        }

        let execution = self.coordinator.create_execution(&task).await?;
        self.coordinator
            .run_async(&task, execution.id, task.effective_timeout())
            .await?;
        let task = self.get(&task.id).await?;
        Ok((task, Some(execution)))
    }

    pub async fn update(&self, task_id: &str, update: TaskUpdate) -> Result<Task> {
        let mut task = self.get(task_id).await?;
        if let Some(name) = update.name {
            validate_name(&name)?;
            task.name = name;
        }
        if let Some(description) = update.description {
            task.description = Some(description);
        }
        if let Some(sync_mode) = update.sync_mode {
            task.sync_mode = sync_mode;
        }
        if let Some(config) = update.config {
            task.config = config;
        }
        if update.timeout_seconds.is_some() {
            validate_timeout(update.timeout_seconds)?;
            task.timeout_seconds = update.timeout_seconds;
        }
        Ok(self.coordinator.tasks().update(task).await?)
    }

    /// Delete a task. Refused while it is running; its history is kept.
    pub async fn delete(&self, task_id: &str) -> Result<()> {
        if !self.coordinator.tasks().delete_if_idle(task_id).await? {
            return Err(ExecutorError::TaskNotFound {
                task_id: task_id.to_string(),
            });
        }
        info!(task_id, "Task deleted");
        Ok(())
    }

    pub async fn get(&self, task_id: &str) -> Result<Task> {
        self.coordinator
            .tasks()
            .get(task_id)
            .await?
            .ok_or_else(|| ExecutorError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    pub async fn list(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        Ok(self.coordinator.tasks().list(query).await?)
    }

    /// Start a new execution of the task
    pub async fn start(&self, task_id: &str) -> Result<TaskExecution> {
        self.coordinator.start(task_id).await
    }

    pub async fn reset(&self, task_id: &str) -> Result<Task> {
        self.coordinator.reset_task(task_id).await
    }

    /// Execution history of a task, newest first
    pub async fn executions(&self, task_id: &str) -> Result<Vec<TaskExecution>> {
        self.get(task_id).await?;
        self.coordinator.list_executions(task_id).await
    }

    pub async fn execution(&self, execution_id: Uuid) -> Result<TaskExecution> {
        self.coordinator.get_execution(execution_id).await
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ExecutorError::InvalidInput("task name must not be blank".to_string()));
    }
    Ok(())
}

fn validate_timeout(timeout_seconds: Option<u64>) -> Result<()> {
    if timeout_seconds == Some(0) {
        return Err(ExecutorError::InvalidInput(
            "timeout must be at least one second".to_string(),
        ));
    }
    Ok(())
}
