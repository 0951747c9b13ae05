//! Worker process management
//!
//! The default worker is DataX: the task's JSON config is written to a job
//! file and the configured program is run with that file as its last
//! argument.
//!
//! On unix the worker leads its own process group and cancellation signals
//! the whole group, so helpers it forks (DataX starts a JVM) die with it.
//! Anything that leaves the group (`setsid`, daemonizing) is out of reach;
//! cancellation stays best effort.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use dc_core::task::Task;

use crate::error::{ExecutorError, Result};
use crate::job::{JobHandle, JobLauncher, JobResult, ProgressReporter};
use crate::parser::parse_progress;

/// Number of trailing stderr lines kept for failure details
const STDERR_TAIL_LINES: usize = 20;

/// Configuration for the worker process
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// Program to run
    pub program: String,
    /// Arguments placed before the job file path
    pub args: Vec<String>,
    /// Additional environment variables
    pub env: Vec<(String, String)>,
    /// Working directory for the worker
    pub working_dir: Option<PathBuf>,
    /// Where job files are written
    pub job_dir: PathBuf,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["datax/bin/datax.py".to_string()],
            env: vec![],
            working_dir: None,
            job_dir: std::env::temp_dir().join("dc-jobs"),
        }
    }
}

/// Launches the worker as a child process
pub struct CommandLauncher {
    config: CommandConfig,
}

impl CommandLauncher {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }

    async fn write_job_file(&self, task: &Task) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.config.job_dir).await?;
        let path = self.config.job_dir.join(format!("{}.json", Uuid::new_v4()));
        let content = serde_json::to_vec_pretty(&task.config)
            .map_err(|e| ExecutorError::launch_failed(format!("Invalid task config: {}", e)))?;
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }
}

#[async_trait]
impl JobLauncher for CommandLauncher {
    async fn launch(&self, task: &Task, progress: ProgressReporter) -> Result<Box<dyn JobHandle>> {
        let job_file = self.write_job_file(task).await?;

        info!(
            task_id = %task.id,
            "Spawning {} with job file {}",
            self.config.program,
            job_file.display()
        );

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg(&job_file)
            .env("DC_TASK_ID", &task.id)
            .env("DC_TASK_NAME", &task.name)
            .env("DC_TASK_CONFIG_PATH", &job_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = tokio::fs::remove_file(&job_file).await;
                return Err(ExecutorError::launch_failed_with_source(
                    format!("Failed to spawn {}: {}", self.config.program, e),
                    e,
                ));
            }
        };

        let handle = CommandHandle::start(child, job_file, progress)?;
        Ok(Box::new(handle))
    }
}

/// Handle for a running worker process and its output readers
pub struct CommandHandle {
    child: Child,
    pid: Option<u32>,
    stdout_handle: Option<JoinHandle<()>>,
    stderr_handle: Option<JoinHandle<()>>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    job_file: PathBuf,
}

impl CommandHandle {
    fn start(mut child: Child, job_file: PathBuf, progress: ProgressReporter) -> Result<Self> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutorError::launch_failed("Failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecutorError::launch_failed("Failed to capture stderr"))?;
        let pid = child.id();

        let stdout_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("stdout: {}", line);
                if let Some(value) = parse_progress(&line) {
                    progress.report(value);
                }
            }
        });

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let tail = Arc::clone(&stderr_tail);
        let stderr_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("stderr: {}", line);
                let mut tail = tail.lock().await;
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        });

        Ok(Self {
            child,
            pid,
            stdout_handle: Some(stdout_handle),
            stderr_handle: Some(stderr_handle),
            stderr_tail,
            job_file,
        })
    }

    /// Drain the output readers and turn the exit status into a result
    async fn finish(&mut self, status: ExitStatus) -> JobResult {
        if let Some(handle) = self.stdout_handle.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.stderr_handle.take() {
            let _ = handle.await;
        }

        if status.success() {
            return JobResult::Succeeded { summary: None };
        }

        let tail = self.stderr_tail.lock().await;
        let code = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let mut error = format!("worker exited with {}", code);
        if !tail.is_empty() {
            error.push_str(": ");
            error.push_str(&tail.iter().cloned().collect::<Vec<_>>().join("\n"));
        }
        JobResult::Failed { error }
    }
}

#[async_trait]
impl JobHandle for CommandHandle {
    fn describe(&self) -> String {
        match self.pid {
            Some(pid) => format!("pid {}", pid),
            None => "exited process".to_string(),
        }
    }

    async fn poll_outcome(&mut self) -> Result<Option<JobResult>> {
        match self.child.try_wait()? {
            Some(status) => Ok(Some(self.finish(status).await)),
            None => Ok(None),
        }
    }

    async fn wait(&mut self) -> Result<JobResult> {
        let status = self.child.wait().await?;
        Ok(self.finish(status).await)
    }

    async fn cancel(&mut self) -> Result<()> {
        warn!("Killing worker {}", self.describe());
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            if let Err(e) = kill_process_group(pid) {
                debug!("Failed to signal process group {}: {}", pid, e);
            }
        }
        self.child.start_kill()?;
        if let Some(handle) = self.stdout_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.stderr_handle.take() {
            handle.abort();
        }
        Ok(())
    }
}

/// SIGKILL every process in the group led by `pid`
#[cfg(unix)]
fn kill_process_group(pid: u32) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    // A negative pid addresses the process group
    let ret = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

impl Drop for CommandHandle {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.job_file) {
            debug!("Failed to remove job file {}: {}", self.job_file.display(), e);
        }
    }
}
