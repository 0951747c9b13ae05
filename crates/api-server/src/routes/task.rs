//! Task API endpoints
//!
//! CRUD over collection tasks plus the run controls (start, reset, history).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dc_core::task::{SyncMode, Task, TaskQuery};
use dc_core::TaskStatus;
use job_runner::{NewTask, TaskUpdate};

use crate::state::AppState;

use super::execution::ExecutionResponse;
use super::{bad_request, route_error, RouteError};

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sync_mode: Option<SyncMode>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sync_mode: Option<SyncMode>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub size: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub sync_mode: SyncMode,
    pub config: serde_json::Value,
    pub timeout_seconds: u64,
    pub status: TaskStatus,
    pub last_execution_id: Option<Uuid>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            timeout_seconds: task.effective_timeout(),
            id: task.id,
            name: task.name,
            description: task.description,
            sync_mode: task.sync_mode,
            config: task.config,
            status: task.status,
            last_execution_id: task.last_execution_id,
            created_at: task.created_at.to_rfc3339(),
            updated_at: task.updated_at.to_rfc3339(),
        }
    }
}

impl From<CreateTaskRequest> for NewTask {
    fn from(req: CreateTaskRequest) -> Self {
        Self {
            id: req.id,
            name: req.name,
            description: req.description,
            sync_mode: req.sync_mode.unwrap_or_default(),
            config: req.config,
            timeout_seconds: req.timeout_seconds,
        }
    }
}

impl From<UpdateTaskRequest> for TaskUpdate {
    fn from(req: UpdateTaskRequest) -> Self {
        Self {
            name: req.name,
            description: req.description,
            sync_mode: req.sync_mode,
            config: req.config,
            timeout_seconds: req.timeout_seconds,
        }
    }
}

impl ListTasksQuery {
    fn into_query(self) -> Result<TaskQuery, RouteError> {
        let status = self
            .status
            .map(|raw| raw.parse::<TaskStatus>())
            .transpose()
            .map_err(|e| bad_request(e.to_string()))?;
        Ok(TaskQuery {
            status,
            name: self.name,
            page: self.page,
            size: self.size,
        })
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/tasks - List tasks
async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<TaskResponse>>, RouteError> {
    let query = query.into_query()?;
    let tasks = state.service().list(&query).await.map_err(route_error)?;
    Ok(Json(tasks.into_iter().map(TaskResponse::from).collect()))
}

/// POST /api/tasks - Create a task; ONCE tasks start running immediately
async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskResponse>), RouteError> {
    let (task, _) = state
        .service()
        .create(req.into())
        .await
        .map_err(route_error)?;
    Ok((StatusCode::CREATED, Json(TaskResponse::from(task))))
}

/// GET /api/tasks/{id} - Get a task
async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, RouteError> {
    let task = state.service().get(&id).await.map_err(route_error)?;
    Ok(Json(TaskResponse::from(task)))
}

/// PUT /api/tasks/{id} - Update a task's definition
async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<Json<TaskResponse>, RouteError> {
    let task = state
        .service()
        .update(&id, req.into())
        .await
        .map_err(route_error)?;
    Ok(Json(TaskResponse::from(task)))
}

/// DELETE /api/tasks/{id} - Delete a task
async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, RouteError> {
    state.service().delete(&id).await.map_err(route_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/tasks/{id}/executions - Start a new execution
async fn start_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ExecutionResponse>), RouteError> {
    let execution = state.service().start(&id).await.map_err(route_error)?;
    Ok((StatusCode::ACCEPTED, Json(ExecutionResponse::from(execution))))
}

/// GET /api/tasks/{id}/executions - Execution history, newest first
async fn list_task_executions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ExecutionResponse>>, RouteError> {
    let executions = state.service().executions(&id).await.map_err(route_error)?;
    Ok(Json(
        executions.into_iter().map(ExecutionResponse::from).collect(),
    ))
}

/// POST /api/tasks/{id}/reset - Return a finished scheduled task to READY
async fn reset_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, RouteError> {
    let task = state.service().reset(&id).await.map_err(route_error)?;
    Ok(Json(TaskResponse::from(task)))
}

// ============================================================================
// Router
// ============================================================================

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route(
            "/api/tasks/{id}/executions",
            get(list_task_executions).post(start_task),
        )
        .route("/api/tasks/{id}/reset", post(reset_task))
}
