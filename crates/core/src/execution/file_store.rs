//! File-based execution record storage
//!
//! One JSON document per execution, cached in memory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::model::TaskExecution;
use super::repository::ExecutionRepository;
use crate::status::TaskStatus;
use crate::{Error, Result};

/// Execution records stored as one JSON document per execution
///
/// Layout: `<data_dir>/executions/<execution_id>.json`. Task ids are caller
/// supplied, so they never become path components.
pub struct FileExecutionStore {
    base_dir: PathBuf,
    cache: RwLock<HashMap<Uuid, TaskExecution>>,
}

impl FileExecutionStore {
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = data_dir.as_ref().join("executions");
        let mut cache = HashMap::new();

        if base_dir.exists() {
            let mut entries = tokio::fs::read_dir(&base_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }

                let content = match tokio::fs::read_to_string(&path).await {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("Failed to read execution {}: {}", path.display(), e);
                        continue;
                    }
                };
                match serde_json::from_str::<TaskExecution>(&content) {
                    Ok(execution) => {
                        cache.insert(execution.id, execution);
                    }
                    Err(e) => {
                        warn!("Failed to parse execution {}: {}", path.display(), e);
                        continue;
                    }
                }
            }
        }

        debug!(count = cache.len(), "Loaded execution records");
        Ok(Self {
            base_dir,
            cache: RwLock::new(cache),
        })
    }

    fn execution_path(&self, id: Uuid) -> PathBuf {
        self.base_dir.join(format!("{}.json", id))
    }

    async fn save(&self, execution: &TaskExecution) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let path = self.execution_path(execution.id);
        let content = serde_json::to_string_pretty(execution)?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!("Saved execution record: {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl ExecutionRepository for FileExecutionStore {
    async fn insert(&self, execution: TaskExecution) -> Result<TaskExecution> {
        let mut cache = self.cache.write().await;
        if cache.contains_key(&execution.id) {
            return Err(Error::Conflict(format!(
                "Execution {} already exists",
                execution.id
            )));
        }
        self.save(&execution).await?;
        cache.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn get(&self, id: Uuid) -> Result<Option<TaskExecution>> {
        let cache = self.cache.read().await;
        Ok(cache.get(&id).cloned())
    }

    async fn list_by_task(&self, task_id: &str) -> Result<Vec<TaskExecution>> {
        let cache = self.cache.read().await;
        let mut executions: Vec<TaskExecution> = cache
            .values()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(executions)
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<TaskExecution>> {
        let cache = self.cache.read().await;
        let mut executions: Vec<TaskExecution> = cache
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(executions)
    }

    async fn update_progress(&self, id: Uuid, progress: f64) -> Result<f64> {
        let mut cache = self.cache.write().await;
        let current = cache.get(&id).ok_or(Error::ExecutionNotFound(id))?;

        let mut execution = current.clone();
        if !execution.record_progress(progress) {
            return Ok(execution.progress);
        }
        self.save(&execution).await?;
        let stored = execution.progress;
        cache.insert(id, execution);
        Ok(stored)
    }

    async fn update_terminal(
        &self,
        id: Uuid,
        status: TaskStatus,
        completed_at: DateTime<Utc>,
        progress: f64,
        detail: Option<String>,
    ) -> Result<TaskExecution> {
        let mut cache = self.cache.write().await;
        let current = cache.get(&id).ok_or(Error::ExecutionNotFound(id))?;

        let mut execution = current.clone();
        execution.finish(status, completed_at, progress, detail)?;
        self.save(&execution).await?;
        cache.insert(id, execution.clone());
        Ok(execution)
    }
}
