//! Tool registry configuration.
//!
//! The registry is a YAML file with a top-level `tool_registry` list:
//!
//! ```yaml
//! tool_registry:
//!   - id: filesystem
//!     type: local_stdio
//!     enabled: true
//!     config:
//!       command: npx
//!       args: ["-y", "@modelcontextprotocol/server-filesystem", "./sample_data"]
//!   - id: fetch
//!     type: remote_http
//!     enabled: true
//!     config:
//!       base_url: http://127.0.0.1:4011/mcp
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Request timeout used when a descriptor does not set one.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Problems with a single descriptor. These never abort a batch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("Server type '{0}' is not supported")]
    UnsupportedType(String),

    #[error("'{parameter}' not configured for tool server '{tool_id}'")]
    MissingParameter {
        tool_id: String,
        parameter: &'static str,
    },

    #[error("Invalid base_url '{url}' for tool server '{tool_id}': {reason}")]
    InvalidUrl {
        tool_id: String,
        url: String,
        reason: String,
    },
}

/// Connection kinds understood by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolServerKind {
    /// Spawned subprocess speaking MCP over stdio
    LocalProcess,
    /// Remote MCP server reached over HTTP
    RemoteNetwork,
}

impl ToolServerKind {
    /// Parse the `type` field of a descriptor.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "local_stdio" | "local_process" | "stdio" => Some(Self::LocalProcess),
            "remote_http" | "remote_network" | "http" => Some(Self::RemoteNetwork),
            _ => None,
        }
    }
}

/// Kind-specific connection parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolServerParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// One entry of the tool registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    #[serde(default = "default_tool_id")]
    pub id: String,
    /// Raw `type` string; resolved with [`ToolServerKind::parse`]
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub enabled: bool,
    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub config: ToolServerParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_session_timeout_seconds: Option<f64>,
}

fn default_tool_id() -> String {
    "N/A".to_string()
}

/// Resolved, validated connection target for an enabled descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEndpoint {
    LocalProcess {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    RemoteNetwork {
        url: Url,
    },
}

impl ToolDescriptor {
    /// Create an enabled local-process descriptor.
    pub fn local_process(id: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            id: id.into(),
            kind: "local_stdio".to_string(),
            enabled: true,
            name: None,
            config: ToolServerParams {
                command: Some(command.into()),
                args,
                ..Default::default()
            },
            client_session_timeout_seconds: None,
        }
    }

    /// Create an enabled remote-network descriptor.
    pub fn remote_network(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "remote_http".to_string(),
            enabled: true,
            name: None,
            config: ToolServerParams {
                base_url: Some(base_url.into()),
                ..Default::default()
            },
            client_session_timeout_seconds: None,
        }
    }

    pub fn server_kind(&self) -> Option<ToolServerKind> {
        ToolServerKind::parse(&self.kind)
    }

    /// Validate the descriptor and produce its connection target.
    pub fn endpoint(&self) -> Result<ToolEndpoint, DescriptorError> {
        match self.server_kind() {
            Some(ToolServerKind::LocalProcess) => {
                let command = self
                    .config
                    .command
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| DescriptorError::MissingParameter {
                        tool_id: self.id.clone(),
                        parameter: "command",
                    })?;
                Ok(ToolEndpoint::LocalProcess {
                    command: command.to_string(),
                    args: self.config.args.clone(),
                    env: self.config.env.clone(),
                })
            }
            Some(ToolServerKind::RemoteNetwork) => {
                let raw = self
                    .config
                    .base_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| DescriptorError::MissingParameter {
                        tool_id: self.id.clone(),
                        parameter: "base_url",
                    })?;
                let url = Url::parse(raw).map_err(|e| DescriptorError::InvalidUrl {
                    tool_id: self.id.clone(),
                    url: raw.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(ToolEndpoint::RemoteNetwork { url })
            }
            None => Err(DescriptorError::UnsupportedType(self.kind.clone())),
        }
    }

    /// Per-request timeout for this server's session.
    pub fn session_timeout(&self) -> Duration {
        self.client_session_timeout_seconds
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(DEFAULT_SESSION_TIMEOUT)
    }
}

/// Top-level layout of the registry file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolRegistryConfig {
    #[serde(default)]
    pub tool_registry: Vec<ToolDescriptor>,
}

impl ToolRegistryConfig {
    /// Parse registry YAML. An empty document yields an empty registry.
    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Option<Self> = serde_yaml::from_str(content)?;
        Ok(config.unwrap_or_default())
    }

    /// Load the registry from disk. A missing file yields an empty registry.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(
                "Tool registry not found at {}; no tool servers will be started",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::from_yaml_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        tracing::info!(
            "Loaded {} tool server descriptor(s) from {}",
            config.tool_registry.len(),
            path.display()
        );
        Ok(config)
    }
}
