//! Execution record model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::TaskStatus;
use crate::task::Task;
use crate::{Error, Result};

/// A persistent execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: Uuid,
    /// Owning task; a reference only, never an ownership edge
    pub task_id: String,
    /// Task name at the time the execution started
    pub task_name: String,
    pub status: TaskStatus,
    /// Fraction complete in `[0.0, 1.0]`
    pub progress: f64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    /// Worker error or timeout note for terminal records
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TaskExecution {
    /// Build a fresh `Running` execution for `task`
    pub fn start(task: &Task) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            status: TaskStatus::Running,
            progress: 0.0,
            started_at: now,
            completed_at: None,
            duration_ms: None,
            detail: None,
            created_at: now,
        }
    }

    /// Record reported progress. Ignored once terminal; never moves backwards.
    pub fn record_progress(&mut self, progress: f64) -> bool {
        if self.is_terminal() || !progress.is_finite() {
            return false;
        }
        let progress = progress.clamp(0.0, 1.0);
        if progress <= self.progress {
            return false;
        }
        self.progress = progress;
        true
    }

    /// Move to a terminal state, freezing progress at `progress`.
    pub fn finish(
        &mut self,
        status: TaskStatus,
        completed_at: DateTime<Utc>,
        progress: f64,
        detail: Option<String>,
    ) -> Result<()> {
        if !self.status.can_finish_as(status) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.completed_at = Some(completed_at);
        if progress.is_finite() {
            self.progress = progress.clamp(self.progress, 1.0);
        }
        self.detail = detail;
        self.calculate_duration();
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    fn calculate_duration(&mut self) {
        if let Some(ended) = self.completed_at {
            let duration = ended.signed_duration_since(self.started_at);
            self.duration_ms = Some(duration.num_milliseconds().max(0) as u64);
        }
    }
}
