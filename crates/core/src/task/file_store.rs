//! File-based task storage implementation
//!
//! Stores tasks as JSON in a file on disk.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::model::{Task, TaskQuery};
use super::repository::TaskRepository;
use crate::status::TaskStatus;
use crate::{Error, Result};

/// File-based task store using JSON
///
/// Every write holds the cache lock until the file is flushed, so writes to
/// the same task are linearized and never observed half-applied.
pub struct FileTaskStore {
    /// Path to the JSON file
    path: PathBuf,
    /// In-memory cache of tasks
    cache: RwLock<HashMap<String, Task>>,
}

impl FileTaskStore {
    /// Create a new FileTaskStore
    ///
    /// If the file doesn't exist, it will be created on first write.
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cache = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            let tasks: Vec<Task> = serde_json::from_str(&content)?;
            tasks.into_iter().map(|t| (t.id.clone(), t)).collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    /// Persist a snapshot of the cache to disk
    async fn persist(&self, cache: &HashMap<String, Task>) -> Result<()> {
        let tasks: Vec<&Task> = cache.values().collect();
        let content = serde_json::to_string_pretty(&tasks)?;

        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Apply `f` to one task and persist; the cache is restored if the write fails.
    async fn modify<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Task) -> Result<T>,
    ) -> Result<(Task, T)> {
        let mut cache = self.cache.write().await;
        let previous = cache
            .get(id)
            .cloned()
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;

        let mut task = previous.clone();
        let value = f(&mut task)?;
        task.updated_at = Utc::now();
        cache.insert(id.to_string(), task.clone());

        if let Err(e) = self.persist(&cache).await {
            cache.insert(id.to_string(), previous);
            return Err(e);
        }
        Ok((task, value))
    }
}

#[async_trait]
impl TaskRepository for FileTaskStore {
    async fn create(&self, task: Task) -> Result<Task> {
        let mut cache = self.cache.write().await;
        if cache.contains_key(&task.id) {
            return Err(Error::Conflict(format!(
                "Task with ID {} already exists",
                task.id
            )));
        }
        cache.insert(task.id.clone(), task.clone());
        if let Err(e) = self.persist(&cache).await {
            cache.remove(&task.id);
            return Err(e);
        }
        Ok(task)
    }

    async fn get(&self, id: &str) -> Result<Option<Task>> {
        let cache = self.cache.read().await;
        Ok(cache.get(id).cloned())
    }

    async fn list(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        let cache = self.cache.read().await;
        let mut tasks: Vec<Task> = cache
            .values()
            .filter(|t| query.matches(t))
            .cloned()
            .collect();
        // Sort by created_at descending (newest first)
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(match query.window() {
            Some((offset, limit)) => tasks.into_iter().skip(offset).take(limit).collect(),
            None => tasks,
        })
    }

    async fn update(&self, task: Task) -> Result<Task> {
        let id = task.id.clone();
        let (updated, _) = self
            .modify(&id, move |stored| {
                stored.name = task.name;
                stored.description = task.description;
                stored.sync_mode = task.sync_mode;
                stored.config = task.config;
                stored.timeout_seconds = task.timeout_seconds;
                Ok(())
            })
            .await?;
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut cache = self.cache.write().await;
        let Some(removed) = cache.remove(id) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&cache).await {
            cache.insert(id.to_string(), removed);
            return Err(e);
        }
        Ok(true)
    }

    async fn delete_if_idle(&self, id: &str) -> Result<bool> {
        let mut cache = self.cache.write().await;
        match cache.get(id) {
            None => return Ok(false),
            Some(task) if task.is_running() => {
                return Err(Error::Conflict(format!(
                    "Task {} is running and cannot be deleted",
                    id
                )));
            }
            Some(_) => {}
        }
        let Some(removed) = cache.remove(id) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&cache).await {
            cache.insert(id.to_string(), removed);
            return Err(e);
        }
        Ok(true)
    }

    async fn upsert_status(
        &self,
        id: &str,
        status: TaskStatus,
        last_execution_id: Option<Uuid>,
    ) -> Result<Task> {
        let (task, _) = self
            .modify(id, |task| {
                task.status = status;
                task.last_execution_id = last_execution_id;
                Ok(())
            })
            .await?;
        debug!(task_id = %id, status = %status, "Task status written");
        Ok(task)
    }

    async fn begin_execution(&self, id: &str, execution_id: Uuid) -> Result<Task> {
        let (_, previous) = self
            .modify(id, |task| {
                if task.status.is_active() {
                    return Err(Error::Conflict(format!(
                        "Task {} already has a running execution {}",
                        task.id,
                        task.last_execution_id
                            .map(|id| id.to_string())
                            .unwrap_or_else(|| "(unknown)".to_string())
                    )));
                }
                let previous = task.clone();
                task.status = TaskStatus::Running;
                task.last_execution_id = Some(execution_id);
                Ok(previous)
            })
            .await?;
        debug!(task_id = %id, execution_id = %execution_id, "Task admitted to RUNNING");
        Ok(previous)
    }

    async fn complete_execution(
        &self,
        id: &str,
        execution_id: Uuid,
        status: TaskStatus,
    ) -> Result<bool> {
        if !TaskStatus::Running.can_transition_to(status) {
            return Err(Error::InvalidTransition {
                from: TaskStatus::Running,
                to: status,
            });
        }

        {
            let cache = self.cache.read().await;
            let task = cache
                .get(id)
                .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
            if task.last_execution_id != Some(execution_id) {
                return Ok(false);
            }
        }

        let (_, applied) = self
            .modify(id, |task| {
                // Re-checked under the write lock
                if task.last_execution_id != Some(execution_id) {
                    return Ok(false);
                }
                task.status = status;
                Ok(true)
            })
            .await?;
        Ok(applied)
    }

    async fn reset_to_ready(&self, id: &str) -> Result<Task> {
        let (task, _) = self
            .modify(id, |task| {
                if task.status.is_active() {
                    return Err(Error::Conflict(format!(
                        "Task {} is running and cannot be reset",
                        task.id
                    )));
                }
                task.status = TaskStatus::Ready;
                Ok(())
            })
            .await?;
        Ok(task)
    }
}
