//! Core library for the data-collection execution engine
//!
//! This crate contains the domain model and the storage seams:
//! - Tasks and their shared status vocabulary
//! - Task executions (one record per run attempt)
//! - Repository traits with JSON-file backed implementations

pub mod error;
pub mod execution;
pub mod status;
pub mod task;

pub use error::Error;
pub use status::TaskStatus;
pub type Result<T> = std::result::Result<T, Error>;
