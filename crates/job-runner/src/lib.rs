//! Job Runner - execution engine for data-collection tasks
//!
//! This crate launches the external extraction/load worker for a task,
//! bounds it with a deadline, and records the outcome on both the execution
//! record and the owning task.

mod coordinator;
mod error;
mod job;
mod parser;
mod process;
mod retry;
mod runner;
mod service;

#[cfg(test)]
mod testing;

pub use coordinator::{ActiveExecution, CoordinatorConfig, ExecutionCoordinator};
pub use error::{ExecutorError, Result};
pub use job::{JobHandle, JobLauncher, JobResult, ProgressReporter};
pub use process::{CommandConfig, CommandHandle, CommandLauncher};
pub use retry::RetryPolicy;
pub use runner::{JobRunner, Outcome};
pub use service::{CollectionTaskService, NewTask, TaskUpdate};
