//! Execution API endpoints
//!
//! Read-only polling surface; executions are started through `/api/tasks`.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use dc_core::execution::TaskExecution;
use dc_core::TaskStatus;
use job_runner::ActiveExecution;

use crate::state::AppState;

use super::{route_error, RouteError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    pub id: Uuid,
    pub task_id: String,
    pub task_name: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_ms: Option<u64>,
    pub detail: Option<String>,
}

impl From<TaskExecution> for ExecutionResponse {
    fn from(execution: TaskExecution) -> Self {
        Self {
            id: execution.id,
            task_id: execution.task_id,
            task_name: execution.task_name,
            status: execution.status,
            progress: execution.progress,
            started_at: execution.started_at.to_rfc3339(),
            completed_at: execution.completed_at.map(|t| t.to_rfc3339()),
            duration_ms: execution.duration_ms,
            detail: execution.detail,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveExecutionResponse {
    pub execution_id: Uuid,
    pub task_id: String,
    pub started_at: String,
}

impl From<ActiveExecution> for ActiveExecutionResponse {
    fn from(active: ActiveExecution) -> Self {
        Self {
            execution_id: active.execution_id,
            task_id: active.task_id,
            started_at: active.started_at.to_rfc3339(),
        }
    }
}

/// GET /api/executions/active - Executions this server is running
async fn list_active(State(state): State<AppState>) -> Json<Vec<ActiveExecutionResponse>> {
    let active = state.coordinator().active_executions().await;
    Json(active.into_iter().map(ActiveExecutionResponse::from).collect())
}

/// GET /api/executions/{id} - Fetch one execution
async fn get_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<ExecutionResponse>, RouteError> {
    let execution = state
        .service()
        .execution(execution_id)
        .await
        .map_err(route_error)?;
    Ok(Json(ExecutionResponse::from(execution)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/executions/active", get(list_active))
        .route("/api/executions/{id}", get(get_execution))
}
