//! task-composer - HTTP Server Entry Point
//!
//! Loads the tool registry, wires the task engine and serves the task API.

use std::sync::Arc;

use task_composer::{
    api,
    config::Config,
    engine::TaskEngine,
    executor::OpenRouterExecutor,
    llm::OpenRouterClient,
    mcp::{McpConnector, ToolRegistryConfig},
    orchestrator::{OrchestratorFactory, OrchestratorRegistry},
    task::{InMemoryTaskStore, TaskStore},
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "task_composer=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: model={}, tool_registry={}",
        config.executor.model,
        config.tool_registry_path.display()
    );

    let registry_config = ToolRegistryConfig::load(&config.tool_registry_path).await?;
    let enabled = registry_config
        .tool_registry
        .iter()
        .filter(|d| d.enabled)
        .count();
    info!(
        "{} tool server(s) configured, {} enabled",
        registry_config.tool_registry.len(),
        enabled
    );

    let client = Arc::new(OpenRouterClient::new(
        config.executor.api_key.clone(),
        config.executor.api_url.clone(),
    ));
    let executor = Arc::new(OpenRouterExecutor::new(
        client,
        config.executor.model.clone(),
        config.executor.max_iterations,
    ));

    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let factory = OrchestratorFactory {
        store: Arc::clone(&store),
        executor,
        connector: Arc::new(McpConnector),
        descriptors: Arc::new(registry_config.tool_registry),
        log_dir: config.task_log_dir.clone(),
    };
    let engine = TaskEngine::new(store, Arc::new(OrchestratorRegistry::new(factory)));

    api::serve(&config, engine).await?;

    Ok(())
}
