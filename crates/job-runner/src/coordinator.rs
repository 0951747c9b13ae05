//! Execution coordinator - owns the lifecycle of task executions
//!
//! Admission goes through the task store's atomic `begin_execution`, so at
//! most one execution per task is ever `Running`. Runs are detached tokio
//! tasks; their outcome is written back to the execution record and the
//! task, and callers observe it by reading the stores.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

use dc_core::execution::{ExecutionRepository, TaskExecution};
use dc_core::task::{SyncMode, Task, TaskRepository};
use dc_core::TaskStatus;

use crate::error::{ExecutorError, Result};
use crate::job::{JobLauncher, ProgressReporter};
use crate::retry::RetryPolicy;
use crate::runner::{JobRunner, Outcome, DEFAULT_CANCEL_GRACE};

/// Detail recorded on executions found running without a live runner
const INTERRUPTED_DETAIL: &str = "execution was interrupted before reaching a terminal state";

/// Configuration for the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Backoff for store writes that must not be lost
    pub retry: RetryPolicy,
    /// Upper bound on waiting for a timed-out job to acknowledge cancellation
    pub cancel_grace: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }
}

/// An execution admitted by this coordinator that has not finished yet
#[derive(Debug, Clone)]
pub struct ActiveExecution {
    pub execution_id: Uuid,
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    /// Set once `run_async` has claimed the execution
    pub driving: bool,
}

/// Coordinates creation, running and finalization of task executions
#[derive(Clone)]
pub struct ExecutionCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    config: CoordinatorConfig,
    tasks: Arc<dyn TaskRepository>,
    executions: Arc<dyn ExecutionRepository>,
    runner: JobRunner,
    /// Executions admitted here, keyed by execution id
    active: RwLock<HashMap<Uuid, ActiveExecution>>,
}

impl ExecutionCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        tasks: Arc<dyn TaskRepository>,
        executions: Arc<dyn ExecutionRepository>,
        launcher: Arc<dyn JobLauncher>,
    ) -> Self {
        let runner = JobRunner::new(launcher).with_cancel_grace(config.cancel_grace);
        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                tasks,
                executions,
                runner,
                active: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn tasks(&self) -> &Arc<dyn TaskRepository> {
        &self.inner.tasks
    }

    pub fn executions(&self) -> &Arc<dyn ExecutionRepository> {
        &self.inner.executions
    }

    /// Create a `Running` execution for `task` and mark the task running.
    ///
    /// Fails with `Conflict` if the task already has a running execution;
    /// in that case no execution record is written.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn create_execution(&self, task: &Task) -> Result<TaskExecution> {
        let current = self
            .inner
            .tasks
            .get(&task.id)
            .await?
            .ok_or_else(|| ExecutorError::TaskNotFound {
                task_id: task.id.clone(),
            })?;

        let execution = TaskExecution::start(&current);
        let execution_id = execution.id;

        // Registered before admission so a concurrent repair never mistakes
        // this execution for a stale one.
        self.inner.active.write().await.insert(
            execution_id,
            ActiveExecution {
                execution_id,
                task_id: current.id.clone(),
                started_at: execution.started_at,
                driving: false,
            },
        );

        let previous = match self.admit(&current.id, execution_id).await {
            Ok(previous) => previous,
            Err(e) => {
                self.inner.active.write().await.remove(&execution_id);
                return Err(e);
            }
        };

        let policy = &self.inner.config.retry;
        let inserted = policy
            .run("insert execution record", || {
                self.inner.executions.insert(execution.clone())
            })
            .await;

        match inserted {
            Ok(stored) => {
                info!(execution_id = %execution_id, "Execution created");
                Ok(stored)
            }
            Err(e) => {
                error!(execution_id = %execution_id, error = %e, "Failed to insert execution record, releasing task");
                let restored = policy
                    .run("restore task status", || {
                        self.inner.tasks.upsert_status(
                            &current.id,
                            previous.status,
                            previous.last_execution_id,
                        )
                    })
                    .await;
                if let Err(restore_err) = restored {
                    error!(error = %restore_err, "Failed to restore task status after aborted admission");
                }
                self.inner.active.write().await.remove(&execution_id);
                Err(ExecutorError::Persistence(e))
            }
        }
    }

    /// Run the task's job in the background under `timeout_seconds`.
    ///
    /// A zero timeout means the task's own timeout. Returns once the run is
    /// scheduled; the outcome is written to the execution record and the
    /// task, and nothing is reported back to the caller.
    ///
    /// Only executions admitted by `create_execution` on this coordinator can
    /// be run, and each one only once.
    pub async fn run_async(&self, task: &Task, execution_id: Uuid, timeout_seconds: u64) -> Result<()> {
        self.claim(task, execution_id).await?;

        let coordinator = self.clone();
        let task = task.clone();
        let span = tracing::info_span!("execution", execution_id = %execution_id, task_id = %task.id);

        tokio::spawn(
            async move {
                coordinator.drive(task, execution_id, timeout_seconds).await;
            }
            .instrument(span),
        );

        debug!(execution_id = %execution_id, "Execution scheduled");
        Ok(())
    }

    /// Mark an admitted execution as driven, exactly once
    async fn claim(&self, task: &Task, execution_id: Uuid) -> Result<()> {
        let mut active = self.inner.active.write().await;
        let entry = active
            .get_mut(&execution_id)
            .ok_or_else(|| ExecutorError::Conflict {
                message: format!(
                    "Execution {} is not awaiting a run on this coordinator",
                    execution_id
                ),
            })?;

        if entry.task_id != task.id {
            return Err(ExecutorError::InvalidInput(format!(
                "Execution {} belongs to task {}, not {}",
                execution_id, entry.task_id, task.id
            )));
        }
        if entry.driving {
            return Err(ExecutorError::Conflict {
                message: format!("Execution {} is already running", execution_id),
            });
        }
        entry.driving = true;
        Ok(())
    }

    /// Create an execution for the task and run it with the task's timeout
    pub async fn start(&self, task_id: &str) -> Result<TaskExecution> {
        let task = self
            .inner
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| ExecutorError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        let execution = self.create_execution(&task).await?;
        self.run_async(&task, execution.id, task.effective_timeout())
            .await?;
        Ok(execution)
    }

    /// Return a finished, re-runnable task to `Ready`
    pub async fn reset_task(&self, task_id: &str) -> Result<Task> {
        let task = self
            .inner
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| ExecutorError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        if task.sync_mode == SyncMode::Once {
            return Err(ExecutorError::InvalidInput(format!(
                "Task {} runs once and keeps its final status",
                task_id
            )));
        }

        Ok(self.inner.tasks.reset_to_ready(task_id).await?)
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Result<TaskExecution> {
        self.inner
            .executions
            .get(execution_id)
            .await?
            .ok_or(ExecutorError::ExecutionNotFound { execution_id })
    }

    pub async fn list_executions(&self, task_id: &str) -> Result<Vec<TaskExecution>> {
        Ok(self.inner.executions.list_by_task(task_id).await?)
    }

    /// Executions admitted by this coordinator that have not finished
    pub async fn active_executions(&self) -> Vec<ActiveExecution> {
        let active = self.inner.active.read().await;
        let mut list: Vec<ActiveExecution> = active.values().cloned().collect();
        list.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        list
    }

    /// Fail every `Running` execution this coordinator is not driving.
    ///
    /// Meant for startup, after a crash left records behind.
    pub async fn recover_orphans(&self) -> Result<usize> {
        let running = self.inner.executions.find_by_status(TaskStatus::Running).await?;
        let active: HashSet<Uuid> = self.inner.active.read().await.keys().copied().collect();

        let mut recovered = 0;
        for execution in running.into_iter().filter(|e| !active.contains(&e.id)) {
            warn!(
                execution_id = %execution.id,
                task_id = %execution.task_id,
                "Recovering orphaned execution"
            );

            match self
                .inner
                .executions
                .update_terminal(
                    execution.id,
                    TaskStatus::Failed,
                    Utc::now(),
                    execution.progress,
                    Some(INTERRUPTED_DETAIL.to_string()),
                )
                .await
            {
                Ok(_) => {}
                Err(dc_core::Error::InvalidTransition { .. }) => continue,
                Err(e) => return Err(e.into()),
            }

            match self
                .inner
                .tasks
                .complete_execution(&execution.task_id, execution.id, TaskStatus::Failed)
                .await
            {
                Ok(_) => {}
                Err(dc_core::Error::TaskNotFound(_)) => {
                    debug!(task_id = %execution.task_id, "Owning task no longer exists");
                }
                Err(e) => return Err(e.into()),
            }
            recovered += 1;
        }

        if recovered > 0 {
            info!(recovered, "Recovered orphaned executions");
        }
        Ok(recovered)
    }

    /// Admission gate, with one repair attempt for a stale `Running` task
    async fn admit(&self, task_id: &str, execution_id: Uuid) -> Result<Task> {
        let policy = &self.inner.config.retry;
        let first = policy
            .run("admit execution", || {
                self.inner.tasks.begin_execution(task_id, execution_id)
            })
            .await;

        match first {
            Ok(previous) => Ok(previous),
            Err(dc_core::Error::Conflict(message)) => {
                if !self.repair_stale_admission(task_id).await? {
                    return Err(ExecutorError::Conflict { message });
                }
                Ok(self
                    .inner
                    .tasks
                    .begin_execution(task_id, execution_id)
                    .await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// A task stays `Running` if the status write after its execution
    /// finished was lost. Repair it from the execution record.
    ///
    /// Returns whether admission should be retried.
    async fn repair_stale_admission(&self, task_id: &str) -> Result<bool> {
        let task = self
            .inner
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| ExecutorError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        if !task.is_running() {
            return Ok(true);
        }

        let Some(last_id) = task.last_execution_id else {
            warn!(task_id, "Task is RUNNING without an execution, marking FAILED");
            self.inner
                .tasks
                .upsert_status(task_id, TaskStatus::Failed, None)
                .await?;
            return Ok(true);
        };

        if self.inner.active.read().await.contains_key(&last_id) {
            return Ok(false);
        }

        let status = match self.inner.executions.get(last_id).await? {
            Some(execution) if execution.is_active() => return Ok(false),
            Some(execution) => execution.status,
            None => TaskStatus::Failed,
        };

        warn!(
            task_id,
            execution_id = %last_id,
            status = %status,
            "Repairing stale RUNNING task status"
        );
        self.inner
            .tasks
            .complete_execution(task_id, last_id, status)
            .await?;
        Ok(true)
    }

    /// Body of the background unit of work
    async fn drive(&self, task: Task, execution_id: Uuid, timeout_seconds: u64) {
        match self.inner.executions.get(execution_id).await {
            Ok(Some(execution)) if execution.is_active() => {}
            Ok(Some(execution)) => {
                warn!(status = %execution.status, "Execution already finished, not running");
                self.release(&task.id, execution_id, Some(execution.status))
                    .await;
                return;
            }
            Ok(None) => {
                error!("Execution record not found, not running");
                self.release(&task.id, execution_id, Some(TaskStatus::Failed))
                    .await;
                return;
            }
            Err(e) => {
                // Run anyway; finalization retries the store
                warn!(error = %e, "Could not read execution record before running");
            }
        }

        info!(timeout_seconds, "Execution running");

        let (reporter, mut progress_rx) = ProgressReporter::channel();
        let run = self.inner.runner.run(&task, timeout_seconds, reporter);
        tokio::pin!(run);

        let outcome = loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                changed = progress_rx.changed() => {
                    if changed.is_err() {
                        break (&mut run).await;
                    }
                    let progress = *progress_rx.borrow_and_update();
                    if let Err(e) = self.inner.executions.update_progress(execution_id, progress).await {
                        warn!(error = %e, progress, "Failed to record progress");
                    }
                }
            }
        };

        let progress = *progress_rx.borrow();
        self.finalize(&task.id, execution_id, outcome, progress).await;
    }

    /// Persist the terminal status on the execution, then on the task.
    ///
    /// The execution record must not stay `Running`: if the outcome cannot
    /// be written, a plain FAILED is attempted instead.
    async fn finalize(&self, task_id: &str, execution_id: Uuid, outcome: Outcome, progress: f64) {
        let policy = &self.inner.config.retry;
        let status = outcome.status();
        let detail = outcome.detail();
        let completed_at = Utc::now();

        let recorded = policy
            .run("record terminal status", || {
                self.inner.executions.update_terminal(
                    execution_id,
                    status,
                    completed_at,
                    progress,
                    detail.clone(),
                )
            })
            .await;

        let final_status = match recorded {
            Ok(execution) => {
                info!(
                    status = %status,
                    progress,
                    duration_ms = execution.duration_ms.unwrap_or(0),
                    "Execution finished"
                );
                Some(status)
            }
            Err(dc_core::Error::InvalidTransition { from, .. }) => {
                warn!(current = %from, discarded = %status, "Execution already terminal, discarding outcome");
                None
            }
            Err(e) => {
                error!(error = %e, status = %status, "Failed to record outcome, marking execution FAILED");
                let reason = format!("failed to record {} outcome: {}", status, e);
                let fallback = policy
                    .run("record fallback failure", || {
                        self.inner.executions.update_terminal(
                            execution_id,
                            TaskStatus::Failed,
                            Utc::now(),
                            progress,
                            Some(reason.clone()),
                        )
                    })
                    .await;
                match fallback {
                    Ok(_) => Some(TaskStatus::Failed),
                    Err(e) => {
                        error!(error = %e, "Execution left RUNNING; it will be recovered on restart");
                        None
                    }
                }
            }
        };

        self.release(task_id, execution_id, final_status).await;
    }

    /// Propagate a terminal status to the task and drop the execution from
    /// the active set
    async fn release(&self, task_id: &str, execution_id: Uuid, status: Option<TaskStatus>) {
        if let Some(status) = status {
            let propagated = self
                .inner
                .config
                .retry
                .run("propagate task status", || {
                    self.inner
                        .tasks
                        .complete_execution(task_id, execution_id, status)
                })
                .await;
            match propagated {
                Ok(true) => {}
                Ok(false) => debug!("Task already moved on to a newer execution"),
                Err(e) => error!(
                    error = %e,
                    "Failed to propagate status to task; it is repaired on next admission"
                ),
            }
        }

        self.inner.active.write().await.remove(&execution_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Script, ScriptedLauncher};
    use async_trait::async_trait;
    use dc_core::execution::FileExecutionStore;
    use dc_core::task::FileTaskStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct Harness {
        coordinator: ExecutionCoordinator,
        launcher: Arc<ScriptedLauncher>,
        tasks: Arc<FileTaskStore>,
        executions: Arc<FileExecutionStore>,
        _temp: TempDir,
    }

    fn test_config() -> CoordinatorConfig {
        CoordinatorConfig {
            retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)),
            cancel_grace: Duration::from_millis(200),
        }
    }

    async fn harness(script: Script) -> Harness {
        let temp = TempDir::new().unwrap();
        let tasks = Arc::new(FileTaskStore::new(temp.path().join("tasks.json")).await.unwrap());
        let executions = Arc::new(FileExecutionStore::new(temp.path()).await.unwrap());
        let launcher = Arc::new(ScriptedLauncher::new(script));
        let coordinator = ExecutionCoordinator::new(
            test_config(),
            tasks.clone(),
            executions.clone(),
            launcher.clone(),
        );
        Harness {
            coordinator,
            launcher,
            tasks,
            executions,
            _temp: temp,
        }
    }

    /// Wait until the execution is terminal and its task status is settled
    async fn wait_for_terminal(coordinator: &ExecutionCoordinator, id: Uuid) -> TaskExecution {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            let execution = coordinator.get_execution(id).await.unwrap();
            let released = coordinator
                .active_executions()
                .await
                .iter()
                .all(|active| active.execution_id != id);
            if execution.is_terminal() && released {
                return execution;
            }
            assert!(std::time::Instant::now() < deadline, "execution never finished");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Finalization drops the active entry after the terminal write
    async fn wait_until_idle(coordinator: &ExecutionCoordinator) {
        for _ in 0..200 {
            if coordinator.active_executions().await.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("executions still active");
    }

    fn assert_completed_iff_terminal(execution: &TaskExecution) {
        assert_eq!(execution.completed_at.is_some(), execution.is_terminal());
    }

    #[tokio::test]
    async fn test_once_task_succeeds_with_default_timeout() {
        let h = harness(Script::succeed_with_progress(
            Duration::from_millis(300),
            vec![0.3, 0.6],
        ))
        .await;
        let task = h.tasks.create(Task::with_id("t1", "orders")).await.unwrap();
        assert_eq!(task.effective_timeout(), 3600);

        let execution = h.coordinator.create_execution(&task).await.unwrap();
        assert_eq!(execution.status, TaskStatus::Running);
        assert_eq!(execution.progress, 0.0);
        assert_completed_iff_terminal(&execution);

        let running = h.tasks.get("t1").await.unwrap().unwrap();
        assert_eq!(running.status, TaskStatus::Running);
        assert_eq!(running.last_execution_id, Some(execution.id));

        h.coordinator
            .run_async(&task, execution.id, task.effective_timeout())
            .await
            .unwrap();
        let done = wait_for_terminal(&h.coordinator, execution.id).await;

        assert_eq!(done.status, TaskStatus::Success);
        assert_eq!(done.progress, 0.6);
        assert_completed_iff_terminal(&done);
        let elapsed = done.completed_at.unwrap() - done.started_at;
        assert!(elapsed < chrono::Duration::seconds(3600));

        let task = h.tasks.get("t1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        wait_until_idle(&h.coordinator).await;
    }

    #[tokio::test]
    async fn test_silent_worker_times_out() {
        let h = harness(Script::Hang).await;
        let task = h
            .tasks
            .create(Task::with_id("t2", "slow").with_timeout(1))
            .await
            .unwrap();

        let execution = h.coordinator.start("t2").await.unwrap();
        let done = wait_for_terminal(&h.coordinator, execution.id).await;

        assert_eq!(done.status, TaskStatus::Timeout);
        assert_completed_iff_terminal(&done);
        let elapsed = done.completed_at.unwrap() - done.started_at;
        assert!(elapsed >= chrono::Duration::milliseconds(1000));
        assert!(elapsed < chrono::Duration::milliseconds(3000));
        assert!(done.detail.unwrap().contains("timed out"));

        let task = h.tasks.get(&task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Timeout);
        assert_eq!(h.launcher.cancels(), 1);
    }

    #[tokio::test]
    async fn test_worker_failure_recorded_with_detail() {
        let h = harness(Script::fail_after(Duration::from_millis(20), "jdbc: access denied")).await;
        h.tasks.create(Task::with_id("t1", "orders")).await.unwrap();

        let execution = h.coordinator.start("t1").await.unwrap();
        let done = wait_for_terminal(&h.coordinator, execution.id).await;

        assert_eq!(done.status, TaskStatus::Failed);
        assert!(done.detail.unwrap().contains("jdbc: access denied"));
        let task = h.tasks.get("t1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_second_create_conflicts_without_new_record() {
        let h = harness(Script::Hang).await;
        let task = h.tasks.create(Task::with_id("t1", "orders")).await.unwrap();

        let first = h.coordinator.create_execution(&task).await.unwrap();
        let err = h.coordinator.create_execution(&task).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Conflict { .. }));

        let records = h.executions.list_by_task("t1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, first.id);
        assert_eq!(h.coordinator.active_executions().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_single_winner() {
        let h = harness(Script::Hang).await;
        let task = h.tasks.create(Task::with_id("t3", "race")).await.unwrap();

        let attempts = (0..2).map(|_| {
            let coordinator = h.coordinator.clone();
            let task = task.clone();
            tokio::spawn(async move { coordinator.create_execution(&task).await })
        });
        let results: Vec<_> = futures::future::join_all(attempts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let wins = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(ExecutorError::Conflict { .. })))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(conflicts, 1);

        let running = h.executions.find_by_status(TaskStatus::Running).await.unwrap();
        assert_eq!(running.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let h = harness(Script::Hang).await;
        let ghost = Task::with_id("missing", "ghost");

        let err = h.coordinator.create_execution(&ghost).await.unwrap_err();
        assert!(err.is_not_found());
        let err = h.coordinator.start("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(h.coordinator.active_executions().await.is_empty());
    }

    #[tokio::test]
    async fn test_zero_timeout_runs_with_task_timeout() {
        let h = harness(Script::succeed_after(Duration::from_millis(20))).await;
        let task = h.tasks.create(Task::with_id("t1", "a")).await.unwrap();

        let execution = h.coordinator.create_execution(&task).await.unwrap();
        h.coordinator.run_async(&task, execution.id, 0).await.unwrap();

        let done = wait_for_terminal(&h.coordinator, execution.id).await;
        assert_eq!(done.status, TaskStatus::Success);
        wait_until_idle(&h.coordinator).await;

        let next = h.coordinator.start("t1").await.unwrap();
        assert_ne!(next.id, execution.id);
    }

    #[tokio::test]
    async fn test_execution_is_run_at_most_once() {
        let h = harness(Script::succeed_after(Duration::from_millis(200))).await;
        let task = h.tasks.create(Task::with_id("t1", "a")).await.unwrap();
        let execution = h.coordinator.create_execution(&task).await.unwrap();

        h.coordinator.run_async(&task, execution.id, 5).await.unwrap();
        let err = h
            .coordinator
            .run_async(&task, execution.id, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Conflict { .. }));

        wait_for_terminal(&h.coordinator, execution.id).await;
        assert_eq!(h.launcher.launches(), 1);

        // Finished executions cannot be run again either
        let err = h
            .coordinator
            .run_async(&task, execution.id, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Conflict { .. }));
        assert_eq!(h.launcher.launches(), 1);
    }

    #[tokio::test]
    async fn test_run_async_requires_matching_admission() {
        let h = harness(Script::Hang).await;
        let task = h.tasks.create(Task::with_id("t1", "a")).await.unwrap();
        let other = h.tasks.create(Task::with_id("t2", "b")).await.unwrap();

        let err = h
            .coordinator
            .run_async(&task, Uuid::new_v4(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Conflict { .. }));

        let execution = h.coordinator.create_execution(&task).await.unwrap();
        let err = h
            .coordinator
            .run_async(&other, execution.id, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidInput(_)));

        // The rejected call did not consume the admission
        h.coordinator.run_async(&task, execution.id, 5).await.unwrap();
        for _ in 0..100 {
            if h.launcher.launches() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.launcher.launches(), 1);
    }

    #[tokio::test]
    async fn test_already_finished_record_is_released() {
        let h = harness(Script::succeed_after(Duration::from_millis(20))).await;
        let task = h.tasks.create(Task::with_id("t1", "a")).await.unwrap();
        let execution = h.coordinator.create_execution(&task).await.unwrap();
        h.executions
            .update_terminal(execution.id, TaskStatus::Failed, Utc::now(), 0.0, None)
            .await
            .unwrap();

        h.coordinator.run_async(&task, execution.id, 5).await.unwrap();

        wait_until_idle(&h.coordinator).await;
        assert_eq!(h.launcher.launches(), 0);
        let task = h.tasks.get("t1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        h.coordinator.start("t1").await.unwrap();
    }

    #[tokio::test]
    async fn test_rerun_after_terminal() {
        let h = harness(Script::succeed_after(Duration::from_millis(20))).await;
        h.tasks.create(Task::with_id("t1", "orders")).await.unwrap();

        let first = h.coordinator.start("t1").await.unwrap();
        wait_for_terminal(&h.coordinator, first.id).await;

        let second = h.coordinator.start("t1").await.unwrap();
        assert_ne!(first.id, second.id);
        wait_for_terminal(&h.coordinator, second.id).await;

        let first = h.coordinator.get_execution(first.id).await.unwrap();
        assert_eq!(first.status, TaskStatus::Success);
        assert_eq!(h.coordinator.list_executions("t1").await.unwrap().len(), 2);
        assert_eq!(h.launcher.launches(), 2);
    }

    #[tokio::test]
    async fn test_recover_orphans_fails_stale_running_records() {
        let h = harness(Script::Hang).await;
        let task = h.tasks.create(Task::with_id("t1", "orders")).await.unwrap();

        // Left behind by a previous process
        let orphan = TaskExecution::start(&task);
        h.tasks.begin_execution("t1", orphan.id).await.unwrap();
        h.executions.insert(orphan.clone()).await.unwrap();

        assert_eq!(h.coordinator.recover_orphans().await.unwrap(), 1);

        let orphan = h.coordinator.get_execution(orphan.id).await.unwrap();
        assert_eq!(orphan.status, TaskStatus::Failed);
        assert_completed_iff_terminal(&orphan);
        let task = h.tasks.get("t1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);

        assert_eq!(h.coordinator.recover_orphans().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_running_task_is_repaired_on_admission() {
        let h = harness(Script::succeed_after(Duration::from_millis(10))).await;
        let task = h.tasks.create(Task::with_id("t1", "orders")).await.unwrap();

        // Execution finished but the task status write was lost
        let finished = TaskExecution::start(&task);
        h.tasks.begin_execution("t1", finished.id).await.unwrap();
        h.executions.insert(finished.clone()).await.unwrap();
        h.executions
            .update_terminal(finished.id, TaskStatus::Success, Utc::now(), 1.0, None)
            .await
            .unwrap();

        let next = h.coordinator.create_execution(&task).await.unwrap();
        let task = h.tasks.get("t1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.last_execution_id, Some(next.id));
    }

    #[tokio::test]
    async fn test_reset_only_for_scheduled_tasks() {
        let h = harness(Script::fail_after(Duration::from_millis(10), "boom")).await;
        h.tasks.create(Task::with_id("once", "a")).await.unwrap();
        h.tasks
            .create(Task::with_id("sched", "b").with_sync_mode(SyncMode::Scheduled))
            .await
            .unwrap();

        for id in ["once", "sched"] {
            let execution = h.coordinator.start(id).await.unwrap();
            wait_for_terminal(&h.coordinator, execution.id).await;
        }

        let err = h.coordinator.reset_task("once").await.unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidInput(_)));

        let task = h.coordinator.reset_task("sched").await.unwrap();
        assert_eq!(task.status, TaskStatus::Ready);
    }

    /// Execution store whose terminal writes fail a fixed number of times
    struct FlakyExecutions {
        inner: Arc<FileExecutionStore>,
        terminal_failures: AtomicU32,
    }

    #[async_trait]
    impl ExecutionRepository for FlakyExecutions {
        async fn insert(&self, execution: TaskExecution) -> dc_core::Result<TaskExecution> {
            self.inner.insert(execution).await
        }

        async fn get(&self, id: Uuid) -> dc_core::Result<Option<TaskExecution>> {
            self.inner.get(id).await
        }

        async fn list_by_task(&self, task_id: &str) -> dc_core::Result<Vec<TaskExecution>> {
            self.inner.list_by_task(task_id).await
        }

        async fn find_by_status(&self, status: TaskStatus) -> dc_core::Result<Vec<TaskExecution>> {
            self.inner.find_by_status(status).await
        }

        async fn update_progress(&self, id: Uuid, progress: f64) -> dc_core::Result<f64> {
            self.inner.update_progress(id, progress).await
        }

        async fn update_terminal(
            &self,
            id: Uuid,
            status: TaskStatus,
            completed_at: DateTime<Utc>,
            progress: f64,
            detail: Option<String>,
        ) -> dc_core::Result<TaskExecution> {
            let left = self.terminal_failures.load(Ordering::SeqCst);
            if left > 0 {
                self.terminal_failures.store(left - 1, Ordering::SeqCst);
                return Err(dc_core::Error::Storage("database unavailable".into()));
            }
            self.inner
                .update_terminal(id, status, completed_at, progress, detail)
                .await
        }
    }

    async fn flaky_harness(terminal_failures: u32) -> (ExecutionCoordinator, Arc<FileTaskStore>, TempDir) {
        let temp = TempDir::new().unwrap();
        let tasks = Arc::new(FileTaskStore::new(temp.path().join("tasks.json")).await.unwrap());
        let executions = Arc::new(FlakyExecutions {
            inner: Arc::new(FileExecutionStore::new(temp.path()).await.unwrap()),
            terminal_failures: AtomicU32::new(terminal_failures),
        });
        let coordinator = ExecutionCoordinator::new(
            test_config(),
            tasks.clone(),
            executions,
            Arc::new(ScriptedLauncher::new(Script::succeed_after(Duration::from_millis(10)))),
        );
        (coordinator, tasks, temp)
    }

    #[tokio::test]
    async fn test_transient_terminal_write_is_retried() {
        let (coordinator, tasks, _temp) = flaky_harness(2).await;
        tasks.create(Task::with_id("t1", "orders")).await.unwrap();

        let execution = coordinator.start("t1").await.unwrap();
        let done = wait_for_terminal(&coordinator, execution.id).await;

        assert_eq!(done.status, TaskStatus::Success);
        assert_eq!(tasks.get("t1").await.unwrap().unwrap().status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn test_exhausted_outcome_write_falls_back_to_failed() {
        // Three failures exhaust the outcome write; the fallback succeeds
        let (coordinator, tasks, _temp) = flaky_harness(3).await;
        tasks.create(Task::with_id("t1", "orders")).await.unwrap();

        let execution = coordinator.start("t1").await.unwrap();
        let done = wait_for_terminal(&coordinator, execution.id).await;

        assert_eq!(done.status, TaskStatus::Failed);
        assert!(done.detail.unwrap().contains("failed to record SUCCESS outcome"));
        assert_eq!(tasks.get("t1").await.unwrap().unwrap().status, TaskStatus::Failed);
    }
}
