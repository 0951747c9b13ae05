//! Task model definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::TaskStatus;

/// Timeout applied when a task does not configure one.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 3600;

/// How often a task is meant to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMode {
    /// Single run, triggered when the task is created
    Once,
    /// Repeated runs; the task returns to `Ready` between them
    Scheduled,
}

impl Default for SyncMode {
    fn default() -> Self {
        Self::Once
    }
}

/// A configured data-collection task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub sync_mode: SyncMode,
    /// Worker configuration, handed to the job verbatim
    #[serde(default)]
    pub config: serde_json::Value,
    pub timeout_seconds: Option<u64>,
    pub status: TaskStatus,
    pub last_execution_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task with a generated id
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), name)
    }

    /// Create a new task with a caller-assigned id
    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            sync_mode: SyncMode::default(),
            config: serde_json::Value::Object(Default::default()),
            timeout_seconds: None,
            status: TaskStatus::default(),
            last_execution_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the sync mode
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    /// Set the worker configuration
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Set the timeout in seconds
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Timeout to enforce for the next execution; never zero
    pub fn effective_timeout(&self) -> u64 {
        self.timeout_seconds
            .filter(|seconds| *seconds > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS)
    }

    pub fn is_running(&self) -> bool {
        self.status.is_active()
    }
}

/// Filters for listing tasks
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
    /// Case-insensitive substring match on the name
    pub name: Option<String>,
    /// Zero-based page index; ignored unless `size` is set
    pub page: Option<usize>,
    pub size: Option<usize>,
}

impl TaskQuery {
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if !task.name.to_lowercase().contains(&name.to_lowercase()) {
                return false;
            }
        }
        true
    }

    /// Offset and limit, when pagination was requested
    pub fn window(&self) -> Option<(usize, usize)> {
        match (self.page, self.size) {
            (Some(page), Some(size)) => Some((page.saturating_mul(size), size)),
            (None, Some(size)) => Some((0, size)),
            _ => None,
        }
    }
}
