//! Application state

use std::path::Path;
use std::sync::Arc;

use dc_core::execution::FileExecutionStore;
use dc_core::task::FileTaskStore;
use job_runner::{
    CollectionTaskService, CommandLauncher, CoordinatorConfig, ExecutionCoordinator, JobLauncher,
};

use crate::config::ServerConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    service: CollectionTaskService,
}

impl AppState {
    /// Open the stores under the data directory and wire the worker process
    pub async fn new(config: &ServerConfig) -> dc_core::Result<Self> {
        let launcher = Arc::new(CommandLauncher::new(config.worker.clone()));
        Self::with_launcher(&config.data_dir, config.coordinator.clone(), launcher).await
    }

    pub async fn with_launcher(
        data_dir: &Path,
        coordinator_config: CoordinatorConfig,
        launcher: Arc<dyn JobLauncher>,
    ) -> dc_core::Result<Self> {
        let tasks = Arc::new(FileTaskStore::new(data_dir.join("tasks.json")).await?);
        let executions = Arc::new(FileExecutionStore::new(data_dir).await?);
        let coordinator = ExecutionCoordinator::new(coordinator_config, tasks, executions, launcher);

        Ok(Self {
            inner: Arc::new(AppStateInner {
                service: CollectionTaskService::new(coordinator),
            }),
        })
    }

    pub fn service(&self) -> &CollectionTaskService {
        &self.inner.service
    }

    pub fn coordinator(&self) -> &ExecutionCoordinator {
        self.inner.service.coordinator()
    }
}
