//! Error types for job-runner

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for executor operations
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Errors that can occur while admitting or running executions
///
/// `Timeout` and `Worker` never reach the caller of `run_async`; they are
/// rendered into the detail of the terminal execution record.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Task not found
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    /// Execution not found
    #[error("Execution not found: {execution_id}")]
    ExecutionNotFound { execution_id: Uuid },

    /// The task already has a running execution
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Execution deadline passed before the worker reported
    #[error("Execution timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// The worker reported a failure
    #[error("Worker failed: {message}")]
    Worker { message: String },

    /// A store read or write failed
    #[error("Persistence error: {0}")]
    Persistence(#[source] dc_core::Error),

    /// Failed to start the worker
    #[error("Failed to launch job: {message}")]
    LaunchFailed {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Invalid caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutorError {
    /// Create a LaunchFailed error
    pub fn launch_failed(message: impl Into<String>) -> Self {
        Self::LaunchFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a LaunchFailed error with source
    pub fn launch_failed_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::LaunchFailed {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::TaskNotFound { .. } | Self::ExecutionNotFound { .. }
        )
    }
}

impl From<dc_core::Error> for ExecutorError {
    fn from(err: dc_core::Error) -> Self {
        match err {
            dc_core::Error::TaskNotFound(task_id) => Self::TaskNotFound { task_id },
            dc_core::Error::ExecutionNotFound(execution_id) => {
                Self::ExecutionNotFound { execution_id }
            }
            dc_core::Error::Conflict(message) => Self::Conflict { message },
            dc_core::Error::InvalidInput(message) => Self::InvalidInput(message),
            other => Self::Persistence(other),
        }
    }
}
