//! Server configuration from the environment

use std::path::PathBuf;

use job_runner::{CommandConfig, CoordinatorConfig};

const DEFAULT_PORT: u16 = 8081;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub port: u16,
    pub worker: CommandConfig,
    pub coordinator: CoordinatorConfig,
}

impl ServerConfig {
    /// Read `DC_*` variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let data_dir = var("DC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".dc-data"));

        let port = match var("DC_PORT") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!("Invalid DC_PORT {:?}, using {}", raw, DEFAULT_PORT);
                DEFAULT_PORT
            }),
            None => DEFAULT_PORT,
        };

        let mut worker = CommandConfig {
            job_dir: data_dir.join("jobs"),
            ..CommandConfig::default()
        };
        if let Some(program) = var("DC_WORKER_PROGRAM") {
            worker.program = program;
        }
        if let Some(args) = var("DC_WORKER_ARGS") {
            worker.args = args.split_whitespace().map(str::to_string).collect();
        }
        worker.working_dir = var("DC_WORKER_DIR").map(PathBuf::from);

        Self {
            data_dir,
            port,
            worker,
            coordinator: CoordinatorConfig::default(),
        }
    }
}
