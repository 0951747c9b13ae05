//! Task execution records
//!
//! One record per run attempt of a task. Records are owned by the execution
//! coordinator while running and become immutable history once terminal.

mod file_store;
mod model;
mod repository;

pub use file_store::FileExecutionStore;
pub use model::TaskExecution;
pub use repository::ExecutionRepository;
