//! MCP (Model Context Protocol) tool server connections.
//!
//! - `config`: tool registry descriptors loaded from YAML
//! - `transport`: stdio and HTTP JSON-RPC transports
//! - `connection`: an initialized session with cached tool list
//! - `manager`: per-task start/stop of every enabled server

mod config;
mod connection;
mod manager;
mod transport;
mod types;

pub use config::{
    DescriptorError, ToolDescriptor, ToolEndpoint, ToolRegistryConfig, ToolServerKind,
    ToolServerParams, DEFAULT_SESSION_TIMEOUT,
};
pub use connection::ToolConnection;
pub use manager::{Connector, LiveConnections, McpConnector, ToolConnectionManager};
pub use transport::{HttpTransport, McpTransport, StdioTransport};
pub use types::*;
