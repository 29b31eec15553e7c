//! HTTP API for the task composer.
//!
//! ## Endpoints
//!
//! - `POST /v1/tasks` - Submit a new task (planning starts in the background)
//! - `POST /v1/tasks/{id}/approve` - Approve a planned task and start execution
//! - `GET /v1/tasks/{id}` - Get task status, plan and result
//! - `GET /v1/tools/status` - Configured tool servers and their connection state
//! - `GET /health` - Health check

mod routes;
mod tasks;
mod tools;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
