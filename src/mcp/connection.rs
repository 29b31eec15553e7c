//! A live, initialized session with one tool server.

use serde_json::{json, Value};

use super::transport::McpTransport;
use super::types::{InitializeParams, InitializeResult, McpCallToolResponse, McpError, McpToolDescriptor, McpToolsResponse};

/// Handle to a started tool server: its transport plus the tools it advertised.
pub struct ToolConnection {
    id: String,
    name: Option<String>,
    transport: Box<dyn McpTransport>,
    tools: Vec<McpToolDescriptor>,
}

impl std::fmt::Debug for ToolConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolConnection")
            .field("id", &self.id)
            .field("connected", &self.transport.is_connected())
            .field("tools", &self.tools.len())
            .finish()
    }
}

impl ToolConnection {
    /// Wrap an already initialized transport.
    pub fn new(
        id: impl Into<String>,
        name: Option<String>,
        transport: Box<dyn McpTransport>,
        tools: Vec<McpToolDescriptor>,
    ) -> Self {
        Self {
            id: id.into(),
            name,
            transport,
            tools,
        }
    }

    /// Run the MCP handshake and cache the advertised tools.
    ///
    /// The transport is closed if any step fails.
    pub async fn open(
        id: impl Into<String>,
        name: Option<String>,
        transport: Box<dyn McpTransport>,
    ) -> Result<Self, McpError> {
        let id = id.into();
        match handshake(transport.as_ref()).await {
            Ok((info, tools)) => {
                tracing::info!(
                    tool_id = %id,
                    server = info.server_info.as_ref().map(|s| s.name.as_str()).unwrap_or("unknown"),
                    protocol = %info.protocol_version,
                    "Tool server connected with {} tool(s)",
                    tools.len()
                );
                Ok(Self::new(id, name, transport, tools))
            }
            Err(e) => {
                if let Err(close_err) = transport.close().await {
                    tracing::debug!(tool_id = %id, "Close after failed handshake: {}", close_err);
                }
                Err(e)
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Tools advertised by the server at connect time.
    pub fn tools(&self) -> &[McpToolDescriptor] {
        &self.tools
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Invoke a tool and return its joined text output.
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<String, McpError> {
        let result = self
            .transport
            .request("tools/call", Some(json!({ "name": tool_name, "arguments": arguments })))
            .await?;
        let response: McpCallToolResponse = serde_json::from_value(result)?;
        if response.is_error {
            return Err(McpError::ToolFailed(response.text()));
        }
        Ok(response.text())
    }

    pub async fn close(&self) -> Result<(), McpError> {
        self.transport.close().await
    }
}

async fn handshake(
    transport: &dyn McpTransport,
) -> Result<(InitializeResult, Vec<McpToolDescriptor>), McpError> {
    let params = serde_json::to_value(InitializeParams::default())?;
    let info: InitializeResult =
        serde_json::from_value(transport.request("initialize", Some(params)).await?)?;
    transport.notify("notifications/initialized", None).await?;

    let tools: McpToolsResponse =
        serde_json::from_value(transport.request("tools/list", Some(json!({}))).await?)?;
    Ok((info, tools.tools))
}


#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::testing::FakeTransport;
    use super::*;

    #[tokio::test]
    async fn open_runs_handshake_and_caches_tools() {
        let closed = Arc::new(Mutex::new(Vec::new()));
        let transport = FakeTransport::new("fs", closed.clone());
        let calls = transport.calls.clone();

        let connection = ToolConnection::open("fs", None, Box::new(transport))
            .await
            .expect("handshake should succeed");

        assert_eq!(connection.id(), "fs");
        assert!(connection.has_tool("fs_tool"));
        assert!(connection.is_connected());
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["initialize", "notifications/initialized", "tools/list"]
        );
        assert!(closed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_handshake_closes_transport() {
        let closed = Arc::new(Mutex::new(Vec::new()));
        let mut transport = FakeTransport::new("broken", closed.clone());
        transport.responses.remove("tools/list");

        let result = ToolConnection::open("broken", None, Box::new(transport)).await;
        assert!(matches!(result, Err(McpError::Rpc { .. })));
        assert_eq!(*closed.lock().unwrap(), vec!["broken"]);
    }

    #[tokio::test]
    async fn call_tool_maps_is_error() {
        let closed = Arc::new(Mutex::new(Vec::new()));
        let mut transport = FakeTransport::new("fs", closed);
        transport.responses.insert(
            "tools/call".to_string(),
            json!({ "content": [{ "type": "text", "text": "no such file" }], "isError": true }),
        );
        let connection = ToolConnection::open("fs", None, Box::new(transport)).await.unwrap();

        match connection.call_tool("read_file", json!({ "path": "x" })).await {
            Err(McpError::ToolFailed(message)) => assert_eq!(message, "no such file"),
            other => panic!("expected tool failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn call_tool_returns_text() {
        let closed = Arc::new(Mutex::new(Vec::new()));
        let connection = ToolConnection::open("fs", None, Box::new(FakeTransport::new("fs", closed)))
            .await
            .unwrap();
        assert_eq!(connection.call_tool("fs_tool", json!({})).await.unwrap(), "fs ok");
    }
}
