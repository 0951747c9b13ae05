//! Scripted job launcher used by the unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use dc_core::task::Task;

use crate::error::{ExecutorError, Result};
use crate::job::{JobHandle, JobLauncher, JobResult, ProgressReporter};

/// What a scripted job does once launched
#[derive(Debug, Clone)]
pub enum Script {
    /// Report each progress value, then finish with `result` after `after`
    Finish {
        after: Duration,
        progress: Vec<f64>,
        result: JobResult,
    },
    /// Never report anything
    Hang,
    /// Refuse to launch
    LaunchError(String),
}

impl Script {
    pub fn succeed_after(after: Duration) -> Self {
        Self::Finish {
            after,
            progress: vec![],
            result: JobResult::Succeeded { summary: None },
        }
    }

    pub fn succeed_with_progress(after: Duration, progress: Vec<f64>) -> Self {
        Self::Finish {
            after,
            progress,
            result: JobResult::Succeeded { summary: None },
        }
    }

    pub fn fail_after(after: Duration, error: &str) -> Self {
        Self::Finish {
            after,
            progress: vec![],
            result: JobResult::Failed {
                error: error.to_string(),
            },
        }
    }
}

pub struct ScriptedLauncher {
    script: Script,
    stuck_cancel: bool,
    launches: AtomicUsize,
    cancels: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            stuck_cancel: false,
            launches: AtomicUsize::new(0),
            cancels: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make `cancel` never return
    pub fn with_stuck_cancel(mut self) -> Self {
        self.stuck_cancel = true;
        self
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobLauncher for ScriptedLauncher {
    async fn launch(&self, _task: &Task, progress: ProgressReporter) -> Result<Box<dyn JobHandle>> {
        let (tx, rx) = oneshot::channel();
        let worker = match self.script.clone() {
            Script::LaunchError(message) => return Err(ExecutorError::launch_failed(message)),
            Script::Hang => tokio::spawn(async move {
                let _progress = progress;
                let _tx = tx;
                std::future::pending::<()>().await;
            }),
            Script::Finish {
                after,
                progress: steps,
                result,
            } => tokio::spawn(async move {
                let step = after / (steps.len() as u32 + 1);
                for value in steps {
                    tokio::time::sleep(step).await;
                    progress.report(value);
                }
                tokio::time::sleep(step).await;
                let _ = tx.send(result);
            }),
        };

        let number = self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedHandle {
            number,
            rx,
            worker,
            stuck_cancel: self.stuck_cancel,
            cancels: Arc::clone(&self.cancels),
        }))
    }
}

struct ScriptedHandle {
    number: usize,
    rx: oneshot::Receiver<JobResult>,
    worker: JoinHandle<()>,
    stuck_cancel: bool,
    cancels: Arc<AtomicUsize>,
}

#[async_trait]
impl JobHandle for ScriptedHandle {
    fn describe(&self) -> String {
        format!("scripted job #{}", self.number)
    }

    async fn poll_outcome(&mut self) -> Result<Option<JobResult>> {
        match self.rx.try_recv() {
            Ok(result) => Ok(Some(result)),
            Err(oneshot::error::TryRecvError::Empty) => Ok(None),
            Err(oneshot::error::TryRecvError::Closed) => {
                Err(ExecutorError::launch_failed("scripted job vanished"))
            }
        }
    }

    async fn wait(&mut self) -> Result<JobResult> {
        (&mut self.rx)
            .await
            .map_err(|_| ExecutorError::launch_failed("scripted job vanished"))
    }

    async fn cancel(&mut self) -> Result<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if self.stuck_cancel {
            std::future::pending::<()>().await;
        }
        self.worker.abort();
        Ok(())
    }
}
