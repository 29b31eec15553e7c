//! Tool server status endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use super::routes::AppState;
use crate::engine::ToolStatus;

/// Configured tool servers and whether any live task is connected to them.
pub async fn tool_status(State(state): State<Arc<AppState>>) -> Json<Vec<ToolStatus>> {
    Json(state.engine.tool_status())
}
