//! Job Runner - runs one job under a hard deadline
//!
//! The deadline bounds how long we *wait*, not how long the worker lives.
//! On expiry the runner asks the job to stop and reports `Timeout` right
//! away; a worker that ignores the request may keep running, and anything it
//! reports afterwards is never observed.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout, timeout_at, Instant};
use tracing::{info, instrument, warn};

use dc_core::task::Task;
use dc_core::TaskStatus;

use crate::error::ExecutorError;
use crate::job::{JobLauncher, JobResult, ProgressReporter};

/// How long a cancellation request may take before we stop waiting on it
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Terminal outcome of one job run
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success { summary: Option<String> },
    Failed { error: String },
    Timeout { seconds: u64 },
}

impl Outcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Success { .. } => TaskStatus::Success,
            Self::Failed { .. } => TaskStatus::Failed,
            Self::Timeout { .. } => TaskStatus::Timeout,
        }
    }

    /// Text stored on the execution record
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Success { summary } => summary.clone(),
            Self::Failed { error } => Some(
                ExecutorError::Worker {
                    message: error.clone(),
                }
                .to_string(),
            ),
            Self::Timeout { seconds } => Some(format!(
                "{}; cancellation was requested but the worker may still be running",
                ExecutorError::Timeout { seconds: *seconds }
            )),
        }
    }
}

/// Runs jobs through a launcher, racing each against its deadline
pub struct JobRunner {
    launcher: Arc<dyn JobLauncher>,
    cancel_grace: Duration,
}

impl JobRunner {
    pub fn new(launcher: Arc<dyn JobLauncher>) -> Self {
        Self {
            launcher,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Launch the task's job and wait for whichever comes first: the job's
    /// result or `timeout_seconds`. A zero timeout means the task's own.
    #[instrument(skip_all, fields(task_id = %task.id))]
    pub async fn run(&self, task: &Task, timeout_seconds: u64, progress: ProgressReporter) -> Outcome {
        let seconds = if timeout_seconds == 0 {
            task.effective_timeout()
        } else {
            timeout_seconds
        };
        let deadline = Instant::now() + Duration::from_secs(seconds);

        let launched = timeout_at(deadline, self.launcher.launch(task, progress)).await;
        let mut handle = match launched {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                warn!(error = %e, "Job failed to launch");
                return Outcome::Failed {
                    error: e.to_string(),
                };
            }
            Err(_) => {
                warn!(timeout_seconds = seconds, "Deadline passed while launching job");
                return Outcome::Timeout { seconds };
            }
        };

        info!(job = %handle.describe(), timeout_seconds = seconds, "Job launched");

        let waited = timeout_at(deadline, handle.wait()).await;
        match waited {
            Ok(Ok(JobResult::Succeeded { summary })) => {
                info!(job = %handle.describe(), "Job succeeded");
                Outcome::Success { summary }
            }
            Ok(Ok(JobResult::Failed { error })) => {
                warn!(job = %handle.describe(), error = %error, "Job reported failure");
                Outcome::Failed { error }
            }
            Ok(Err(e)) => {
                warn!(job = %handle.describe(), error = %e, "Lost track of job");
                Outcome::Failed {
                    error: e.to_string(),
                }
            }
            Err(_) => {
                warn!(
                    job = %handle.describe(),
                    timeout_seconds = seconds,
                    "Job exceeded its deadline, requesting cancellation"
                );
                match timeout(self.cancel_grace, handle.cancel()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "Cancellation request failed"),
                    Err(_) => warn!("Cancellation request did not return in time"),
                }
                Outcome::Timeout { seconds }
            }
        }
    }
}
