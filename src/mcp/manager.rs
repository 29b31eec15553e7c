//! Tool connection manager: starts and stops the tool servers of one task.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use super::config::{ToolDescriptor, ToolEndpoint};
use super::connection::ToolConnection;
use super::transport::{HttpTransport, McpTransport, StdioTransport};
use super::types::McpError;

/// Connections currently started by a manager, readable without locking the manager.
pub type LiveConnections = Arc<RwLock<Vec<Arc<ToolConnection>>>>;

/// Opens a connection for a validated descriptor.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        descriptor: &ToolDescriptor,
        endpoint: ToolEndpoint,
    ) -> Result<ToolConnection, McpError>;
}

/// Connector speaking MCP over stdio subprocesses and HTTP.
#[derive(Debug, Default, Clone, Copy)]
pub struct McpConnector;

#[async_trait]
impl Connector for McpConnector {
    async fn connect(
        &self,
        descriptor: &ToolDescriptor,
        endpoint: ToolEndpoint,
    ) -> Result<ToolConnection, McpError> {
        let timeout = descriptor.session_timeout();
        let transport: Box<dyn McpTransport> = match endpoint {
            ToolEndpoint::LocalProcess { command, args, env } => {
                Box::new(StdioTransport::spawn(&command, &args, &env, timeout).await?)
            }
            ToolEndpoint::RemoteNetwork { url } => Box::new(HttpTransport::connect(url, timeout)?),
        };
        ToolConnection::open(descriptor.id.clone(), descriptor.name.clone(), transport).await
    }
}

/// Owns the connections started for one task.
pub struct ToolConnectionManager {
    connector: Arc<dyn Connector>,
    started: LiveConnections,
    initialized: bool,
}

impl ToolConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            started: Arc::new(RwLock::new(Vec::new())),
            initialized: false,
        }
    }

    /// Shared view of the started connections (for status reporting).
    pub fn live_handle(&self) -> LiveConnections {
        Arc::clone(&self.started)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Currently started connections, in start order.
    pub fn active(&self) -> Vec<Arc<ToolConnection>> {
        self.started
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start every enabled descriptor in declaration order.
    ///
    /// Descriptors that are disabled, invalid or fail to connect are skipped with
    /// a warning. Calling this again before [`shutdown_all`](Self::shutdown_all)
    /// returns the already started connections.
    pub async fn start_all(&mut self, descriptors: &[ToolDescriptor]) -> Vec<Arc<ToolConnection>> {
        if self.initialized {
            return self.active();
        }

        let mut started = Vec::new();
        for descriptor in descriptors {
            if !descriptor.enabled {
                tracing::debug!(tool_id = %descriptor.id, "Tool server disabled, skipping");
                continue;
            }

            let endpoint = match descriptor.endpoint() {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    tracing::warn!(tool_id = %descriptor.id, "Skipping tool server: {}", e);
                    continue;
                }
            };

            match self.connector.connect(descriptor, endpoint).await {
                Ok(connection) => {
                    let connection = Arc::new(connection);
                    // Publish immediately so a later failure still tears this one down.
                    self.started
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(Arc::clone(&connection));
                    started.push(connection);
                }
                Err(e) => {
                    tracing::warn!(tool_id = %descriptor.id, "Failed to start tool server: {}", e);
                }
            }
        }

        self.initialized = true;
        tracing::info!("Started {} tool server(s)", started.len());
        started
    }

    /// Close every started connection in reverse start order.
    ///
    /// Close failures are logged and the remaining connections are still closed.
    pub async fn shutdown_all(&mut self) {
        let started = std::mem::take(&mut *self.started.write().unwrap_or_else(PoisonError::into_inner));
        self.initialized = false;

        if started.is_empty() {
            return;
        }

        for connection in started.iter().rev() {
            match connection.close().await {
                Ok(()) => tracing::debug!(tool_id = %connection.id(), "Tool server stopped"),
                Err(e) => {
                    tracing::warn!(tool_id = %connection.id(), "Error stopping tool server: {}", e)
                }
            }
        }
        tracing::info!("Stopped {} tool server(s)", started.len());
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeConnector;
    use super::*;

    fn descriptors() -> Vec<ToolDescriptor> {
        let mut disabled = ToolDescriptor::local_process("disabled", "npx", Vec::new());
        disabled.enabled = false;
        let mut unsupported = ToolDescriptor::local_process("weird", "npx", Vec::new());
        unsupported.kind = "carrier_pigeon".to_string();
        vec![
            ToolDescriptor::local_process("a", "npx", Vec::new()),
            disabled,
            ToolDescriptor::remote_network("b", "http://127.0.0.1:4011/mcp"),
            unsupported,
            ToolDescriptor::remote_network("no_url", ""),
            ToolDescriptor::local_process("c", "uvx", Vec::new()),
        ]
    }

    #[tokio::test]
    async fn starts_enabled_in_order_and_stops_in_reverse() {
        let connector = Arc::new(FakeConnector::default());
        let mut manager = ToolConnectionManager::new(connector.clone());

        let started = manager.start_all(&descriptors()).await;
        let ids: Vec<_> = started.iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(manager.is_initialized());

        manager.shutdown_all().await;
        assert_eq!(*connector.closed.lock().unwrap(), vec!["c", "b", "a"]);
        assert!(!manager.is_initialized());
        assert!(manager.active().is_empty());
    }

    #[tokio::test]
    async fn connect_failure_is_skipped() {
        let connector = Arc::new(FakeConnector {
            fail_connect: ["b".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let mut manager = ToolConnectionManager::new(connector.clone());

        let started = manager.start_all(&descriptors()).await;
        let ids: Vec<_> = started.iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn close_failure_does_not_stop_teardown() {
        let connector = Arc::new(FakeConnector {
            fail_close: ["c".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let mut manager = ToolConnectionManager::new(connector.clone());
        manager.start_all(&descriptors()).await;

        manager.shutdown_all().await;
        assert_eq!(*connector.closed.lock().unwrap(), vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn no_enabled_descriptors_means_no_connections() {
        let connector = Arc::new(FakeConnector::default());
        let mut manager = ToolConnectionManager::new(connector.clone());
        let mut only = ToolDescriptor::local_process("a", "npx", Vec::new());
        only.enabled = false;

        assert!(manager.start_all(&[only]).await.is_empty());
        manager.shutdown_all().await;
        assert!(connector.connected.lock().unwrap().is_empty());
        assert!(connector.closed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_all_is_idempotent_until_shutdown() {
        let connector = Arc::new(FakeConnector::default());
        let mut manager = ToolConnectionManager::new(connector.clone());
        let descriptors = descriptors();

        manager.start_all(&descriptors).await;
        let again = manager.start_all(&descriptors).await;
        assert_eq!(again.len(), 3);
        assert_eq!(connector.connected.lock().unwrap().len(), 3);

        manager.shutdown_all().await;
        manager.start_all(&descriptors).await;
        assert_eq!(connector.connected.lock().unwrap().len(), 6);
        assert_eq!(connector.open_count(), 3);
    }

    #[tokio::test]
    async fn live_handle_tracks_started_connections() {
        let connector = Arc::new(FakeConnector::default());
        let mut manager = ToolConnectionManager::new(connector);
        let live = manager.live_handle();

        manager.start_all(&descriptors()).await;
        assert_eq!(live.read().unwrap().len(), 3);
        manager.shutdown_all().await;
        assert!(live.read().unwrap().is_empty());
    }
}
