//! Configuration management for the task composer.
//!
//! Configuration can be set via environment variables:
//! - `OPENROUTER_API_KEY` - Required. API key for the planning/execution model.
//! - `DEFAULT_MODEL` - Optional. Model identifier. Defaults to `openai/gpt-4o-mini`.
//! - `LLM_API_URL` - Optional. OpenAI-compatible chat completions endpoint.
//! - `MAX_ITERATIONS` - Optional. Tool-call rounds per planning/step call. Defaults to `10`.
//! - `TOOL_REGISTRY_PATH` - Optional. Tool registry YAML. Defaults to `./tool_registry.yaml`.
//! - `TASK_LOG_DIR` - Optional. Directory for per-task log files. Disabled when unset.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `8000`.

use std::path::PathBuf;
use thiserror::Error;

/// Default chat completions endpoint.
pub const DEFAULT_LLM_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Settings for the LLM-backed agent executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// API key for the chat completions endpoint
    pub api_key: String,

    /// Model identifier (OpenRouter format)
    pub model: String,

    /// Chat completions URL
    pub api_url: String,

    /// Maximum tool-call rounds for a single planning or step call
    pub max_iterations: usize,
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Path to the tool registry YAML file
    pub tool_registry_path: PathBuf,

    /// Directory for per-task log files (None disables file logging)
    pub task_log_dir: Option<PathBuf>,

    /// Agent executor settings
    pub executor: ExecutorConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENROUTER_API_KEY` is not set,
    /// and `ConfigError::InvalidValue` for unparsable numeric values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        let model =
            std::env::var("DEFAULT_MODEL").unwrap_or_else(|_| "openai/gpt-4o-mini".to_string());

        let api_url =
            std::env::var("LLM_API_URL").unwrap_or_else(|_| DEFAULT_LLM_API_URL.to_string());

        let max_iterations = parse_var("MAX_ITERATIONS", "10")?;

        let tool_registry_path = std::env::var("TOOL_REGISTRY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("tool_registry.yaml"));

        let task_log_dir = std::env::var("TASK_LOG_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_var("PORT", "8000")?;

        Ok(Self {
            host,
            port,
            tool_registry_path,
            task_log_dir,
            executor: ExecutorConfig {
                api_key,
                model,
                api_url,
                max_iterations,
            },
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, model: String, tool_registry_path: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            tool_registry_path,
            task_log_dir: None,
            executor: ExecutorConfig {
                api_key,
                model,
                api_url: DEFAULT_LLM_API_URL.to_string(),
                max_iterations: 10,
            },
        }
    }
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}
