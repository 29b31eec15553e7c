//! Task endpoints: submit, approve, status.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use super::routes::AppState;
use super::types::{CreateTaskRequest, CreateTaskResponse, MessageResponse, TaskStatusResponse};
use crate::task::TaskId;

/// Submit a task; planning starts in the background.
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> (StatusCode, Json<CreateTaskResponse>) {
    let task_id = state.engine.submit(&req.prompt).await;
    (StatusCode::ACCEPTED, Json(CreateTaskResponse { task_id }))
}

/// Approve a planned task; execution starts in the background.
pub async fn approve_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
) -> Result<(StatusCode, Json<MessageResponse>), (StatusCode, String)> {
    if !state.engine.approve(id).await {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Task {} does not exist or is not awaiting approval", id),
        ));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "Task approved and execution has started".to_string(),
        }),
    ))
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
) -> Result<Json<TaskStatusResponse>, (StatusCode, String)> {
    state
        .engine
        .get_status(id)
        .await
        .map(|record| Json(record.into()))
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Task {} not found", id)))
}
