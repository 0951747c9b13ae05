//! The external job capability
//!
//! The worker that actually moves data is a black box. The engine only
//! needs to launch it, learn its result, and ask it to stop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use dc_core::task::Task;

use crate::error::Result;

/// How often the default `JobHandle::wait` polls for an outcome
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Result reported by a worker that ran to completion
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    Succeeded { summary: Option<String> },
    Failed { error: String },
}

/// Forward-only progress channel handed to a launched job
///
/// Values are clamped to `[0.0, 1.0]`; reports lower than the current value
/// are dropped.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<f64>>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, watch::Receiver<f64>) {
        let (tx, rx) = watch::channel(0.0);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Report progress. Returns whether the value moved forward.
    pub fn report(&self, progress: f64) -> bool {
        if !progress.is_finite() {
            return false;
        }
        let progress = progress.clamp(0.0, 1.0);
        self.tx.send_if_modified(|current| {
            if progress > *current {
                *current = progress;
                true
            } else {
                false
            }
        })
    }

    pub fn current(&self) -> f64 {
        *self.tx.borrow()
    }
}

/// A launched job
#[async_trait]
pub trait JobHandle: Send {
    /// Identity of the job for logs (pid, remote job id, ...)
    fn describe(&self) -> String;

    /// Check for a result without blocking; `None` while still running
    async fn poll_outcome(&mut self) -> Result<Option<JobResult>>;

    /// Wait until the job reports a result
    async fn wait(&mut self) -> Result<JobResult> {
        loop {
            if let Some(result) = self.poll_outcome().await? {
                return Ok(result);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Ask the job to stop. Best effort: the job may keep running.
    async fn cancel(&mut self) -> Result<()>;
}

/// Starts the external worker for a task
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn launch(&self, task: &Task, progress: ProgressReporter) -> Result<Box<dyn JobHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_never_moves_backwards() {
        let (reporter, rx) = ProgressReporter::channel();

        assert!(reporter.report(0.4));
        assert!(!reporter.report(0.1));
        assert!(!reporter.report(f64::INFINITY));
        assert!(reporter.report(3.0));

        assert_eq!(reporter.current(), 1.0);
        assert_eq!(*rx.borrow(), 1.0);
    }

    struct Countdown {
        polls_left: u32,
    }

    #[async_trait]
    impl JobHandle for Countdown {
        fn describe(&self) -> String {
            "countdown".to_string()
        }

        async fn poll_outcome(&mut self) -> Result<Option<JobResult>> {
            if self.polls_left == 0 {
                return Ok(Some(JobResult::Succeeded { summary: None }));
            }
            self.polls_left -= 1;
            Ok(None)
        }

        async fn cancel(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_wait_polls_until_result() {
        let mut handle = Countdown { polls_left: 2 };
        let result = handle.wait().await.unwrap();
        assert_eq!(result, JobResult::Succeeded { summary: None });
    }
}
