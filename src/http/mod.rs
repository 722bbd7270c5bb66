//! HTTP front end (spec.md §6, SPEC_FULL.md §6). Routes exactly as the
//! spec's EXTERNAL INTERFACES table: `/health`, `/api/v1/models`,
//! `/api/v1/pull`, `/api/v1/chat`, `/api/v1/task/{task_id}`. Built the
//! way `AmirTlinov-context-finder-mcp`'s `http_api.rs`/`lib.rs` build
//! their Command API: a small `axum::Router` over a cloneable `AppState`,
//! explicit status codes, JSON bodies, no implicit panics in handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::cs::CoordinationStore;
use crate::orchestrator::{Orchestrator, Task};
use crate::runtime::ModelRuntimeClient;
use crate::task_store::TaskStore;
use crate::telemetry::GpuProbe;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CoordinationStore>,
    pub runtime: Arc<dyn ModelRuntimeClient>,
    pub probe: Arc<dyn GpuProbe>,
    pub config: Arc<Config>,
    pub tasks: Arc<TaskStore>,
    pub shutdown: CancellationToken,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/models", get(list_models))
        .route("/api/v1/pull", post(pull_model))
        .route("/api/v1/chat", post(submit_chat))
        .route("/api/v1/task/:task_id", get(task_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(HealthResponse { status: "ok", reason: None })),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse { status: "fail", reason: Some(format!("coordination_store_unreachable: {e}")) }),
        ),
    }
}

async fn list_models(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let models = state.runtime.list().await?;
    Ok(Json(models.into_iter().map(|m| m.name).collect()))
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PullRequest {
    model_name: String,
}

#[derive(Debug, Serialize)]
struct PullResponse {
    status: &'static str,
    message: String,
}

async fn pull_model(State(state): State<AppState>, Json(req): Json<PullRequest>) -> Result<Json<PullResponse>, ApiError> {
    state.runtime.pull(&req.model_name).await?;
    Ok(Json(PullResponse {
        status: "success",
        message: format!("Pulling model '{}' has started.", req.model_name),
    }))
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ChatRequest {
    query: String,
    model_name: String,
    channel_id: String,
}

#[derive(Debug, Serialize)]
struct ChatQueuedResponse {
    status: &'static str,
    task_id: String,
    channel_id: String,
}

async fn submit_chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Result<Json<ChatQueuedResponse>, ApiError> {
    if req.model_name.trim().is_empty() || req.query.trim().is_empty() {
        return Err(ApiError::from(crate::error::DispatchError::MalformedRequest(
            "query and model_name must be non-empty".to_string(),
        )));
    }

    let task_id = Uuid::new_v4().to_string();
    state.tasks.submit(&task_id);

    let task = Task {
        task_id: task_id.clone(),
        model_name: req.model_name,
        query: req.query,
        channel_id: req.channel_id.clone(),
        gpu_index: state.config.gpu_index,
        attempt: 0,
    };

    tokio::spawn(async move {
        let orchestrator = Orchestrator::new(&*state.store, &*state.runtime, &*state.probe, &state.config);
        orchestrator.run_task(task, &state.shutdown, &state.tasks).await;
    });

    Ok(Json(ChatQueuedResponse { status: "queued", task_id, channel_id: req.channel_id }))
}

#[derive(Debug, Serialize)]
struct TaskStatusResponse {
    task_id: String,
    status: crate::task_store::TaskStatus,
    result: Option<String>,
}

async fn task_status(State(state): State<AppState>, Path(task_id): Path<String>) -> Result<Json<TaskStatusResponse>, ApiError> {
    match state.tasks.get(&task_id) {
        Some(record) => Ok(Json(TaskStatusResponse {
            task_id: record.task_id,
            status: record.status,
            result: record.result,
        })),
        None => Err(ApiError::NotFound(task_id)),
    }
}

/// Wraps `DispatchError` (and an unknown-task-id case) as an HTTP response,
/// mapping each `ErrorKind` to a status code — mirroring
/// `context-finder-mcp::http_api::build_response`'s explicit status-code
/// construction rather than a blanket 500.
enum ApiError {
    Dispatch(crate::error::DispatchError),
    NotFound(String),
}

impl From<crate::error::DispatchError> for ApiError {
    fn from(e: crate::error::DispatchError) -> Self {
        ApiError::Dispatch(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::NotFound(task_id) => (StatusCode::NOT_FOUND, format!("unknown task_id: {task_id}")),
            ApiError::Dispatch(e) => {
                let status = match e.kind() {
                    crate::error::ErrorKind::Permanent => StatusCode::BAD_REQUEST,
                    crate::error::ErrorKind::Transient | crate::error::ErrorKind::Capacity => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    crate::error::ErrorKind::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.user_message())
            }
        };
        (status, Json(serde_json::json!({ "status": "error", "message": message }))).into_response()
    }
}
