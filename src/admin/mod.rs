//! Administrative HTTP endpoints.
//!
//! - `POST /api/ce/refresh_worker_count` — re-read `workerCount`
//! - `POST /api/ce/submit` — enqueue a task
//! - `GET /api/ce/activity/{uuid}` — outcome of a task that left the queue

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, QueueError};
use crate::queue::{MemoryQueue, TaskSubmit};
use crate::task::Component;
use crate::worker::EnabledWorkerController;

/// Shared state for admin routes.
#[derive(Clone)]
pub struct AdminState {
    pub workers: Arc<EnabledWorkerController>,
    pub queue: Arc<MemoryQueue>,
}

/// Body of a submit request.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub task_type: String,
    #[serde(default)]
    pub component: Option<Component>,
    #[serde(default)]
    pub characteristics: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    task_uuid: Uuid,
}

/// POST /api/ce/refresh_worker_count
///
/// Re-reads `workerCount` right away. Responds with an empty body.
async fn refresh_worker_count(State(state): State<AdminState>) -> StatusCode {
    let count = state.workers.refresh();
    tracing::debug!(workers = count, "Worker count refreshed");
    StatusCode::NO_CONTENT
}

/// POST /api/ce/submit
async fn submit(State(state): State<AdminState>, Json(request): Json<SubmitRequest>) -> Response {
    let mut submit = TaskSubmit::new(request.task_type);
    submit.component = request.component;
    submit.characteristics = request.characteristics;

    match state.queue.submit(submit) {
        Ok(task) => (
            StatusCode::CREATED,
            Json(SubmitResponse {
                task_uuid: task.uuid(),
            }),
        )
            .into_response(),
        Err(e) => {
            let status = match e {
                Error::Queue(QueueError::SubmitPaused) => StatusCode::SERVICE_UNAVAILABLE,
                Error::Init(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            tracing::warn!("Task submission rejected: {}", e);
            (status, Json(serde_json::json!({"error": e.to_string()}))).into_response()
        }
    }
}

/// GET /api/ce/activity/{uuid}
///
/// 404 while the task is still queued or unknown.
async fn activity(State(state): State<AdminState>, Path(uuid): Path<Uuid>) -> Response {
    match state.queue.activity(uuid) {
        Some(activity) => Json(activity).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("No activity for task {uuid}")})),
        )
            .into_response(),
    }
}

/// Build the admin routes. Other methods on the same paths get
/// `405 Method Not Allowed`.
pub fn admin_routes(state: AdminState) -> Router {
    Router::new()
        .route("/api/ce/refresh_worker_count", post(refresh_worker_count))
        .route("/api/ce/submit", post(submit))
        .route("/api/ce/activity/{uuid}", get(activity))
        .with_state(state)
}
