//! HTTP route handlers and server wiring.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::types::HealthResponse;
use super::{tasks, tools};
use crate::config::Config;
use crate::engine::TaskEngine;

/// Shared application state.
pub struct AppState {
    pub engine: TaskEngine,
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/tasks", post(tasks::create_task))
        .route("/v1/tasks/:id", get(tasks::get_task))
        .route("/v1/tasks/:id/approve", post(tasks::approve_task))
        .route("/v1/tools/status", get(tools::tool_status))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server; returns after a shutdown signal once the engine has stopped.
pub async fn serve(config: &Config, engine: TaskEngine) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        engine: engine.clone(),
    });
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown().await;
    Ok(())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_tasks: state.engine.active_tasks(),
    })
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping task engine...");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::extract::Path;
    use axum::http::StatusCode;

    use super::*;
    use crate::api::types::CreateTaskRequest;
    use crate::executor::testing::MockExecutor;
    use crate::mcp::testing::FakeConnector;
    use crate::mcp::ToolDescriptor;
    use crate::orchestrator::{OrchestratorFactory, OrchestratorRegistry};
    use crate::task::{InMemoryTaskStore, TaskId, TaskStatus, TaskStore};

    fn state() -> Arc<AppState> {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let factory = OrchestratorFactory {
            store: Arc::clone(&store),
            executor: Arc::new(MockExecutor::with_plan("1. only step")),
            connector: Arc::new(FakeConnector::default()),
            descriptors: Arc::new(vec![ToolDescriptor::local_process("fs", "npx", Vec::new())]),
            log_dir: None,
        };
        let registry = Arc::new(OrchestratorRegistry::new(factory));
        Arc::new(AppState {
            engine: TaskEngine::new(store, registry),
        })
    }

    async fn wait_for_status(state: &Arc<AppState>, id: TaskId, status: TaskStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let Json(task) = tasks::get_task(State(state.clone()), Path(id)).await.unwrap();
                if task.status == status {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task did not reach expected status in time");
    }

    #[tokio::test]
    async fn task_lifecycle_over_handlers() {
        let state = state();

        let (code, Json(created)) = tasks::create_task(
            State(state.clone()),
            Json(CreateTaskRequest {
                prompt: "fetch it".to_string(),
            }),
        )
        .await;
        assert_eq!(code, StatusCode::ACCEPTED);

        wait_for_status(&state, created.task_id, TaskStatus::AwaitingApproval).await;
        let (code, _) = tasks::approve_task(State(state.clone()), Path(created.task_id))
            .await
            .expect("approval should be accepted");
        assert_eq!(code, StatusCode::ACCEPTED);

        wait_for_status(&state, created.task_id, TaskStatus::Completed).await;
        let Json(task) = tasks::get_task(State(state.clone()), Path(created.task_id))
            .await
            .unwrap();
        assert_eq!(task.result.as_deref(), Some("done"));

        state.engine.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_task_is_404_and_unapprovable() {
        let state = state();
        let id = TaskId::new();

        let err = tasks::get_task(State(state.clone()), Path(id)).await.unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);

        let err = tasks::approve_task(State(state.clone()), Path(id)).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_and_tool_status() {
        let state = state();
        let Json(health) = health(State(state.clone())).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.active_tasks, 0);

        let Json(tools) = tools::tool_status(State(state.clone())).await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].id, "fs");
        assert_eq!(tools[0].kind, "local_stdio");
        assert!(tools[0].enabled);
        assert!(!tools[0].connected);
    }

    #[test]
    fn router_builds() {
        let _ = router(state());
    }
}
