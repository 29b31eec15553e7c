//! JSON-RPC transports for MCP tool servers.
//!
//! - [`StdioTransport`]: newline-delimited JSON-RPC over a child process's stdin/stdout
//! - [`HttpTransport`]: JSON-RPC POSTed to a remote endpoint (streamable HTTP)

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use url::Url;

use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpError};

/// Header carrying the server-assigned session for streamable HTTP.
const SESSION_HEADER: &str = "mcp-session-id";

/// How long a stdio server gets to exit after its stdin is closed.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// A bidirectional JSON-RPC channel to one tool server.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for its result.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError>;

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError>;

    /// Release the underlying process or session.
    async fn close(&self) -> Result<(), McpError>;

    fn is_connected(&self) -> bool;
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Transport backed by a spawned subprocess.
pub struct StdioTransport {
    command: String,
    request_id: AtomicU64,
    child: Mutex<Option<Child>>,
    /// Taken on close; the writer task then drops the child's stdin.
    stdin_tx: std::sync::Mutex<Option<mpsc::Sender<String>>>,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
    timeout: Duration,
}

impl StdioTransport {
    /// Spawn the process and start the stdin writer / stdout reader tasks.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, McpError> {
        tracing::info!("Spawning MCP process: {} {:?}", command, args);

        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| McpError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::InvalidResponse("child stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::InvalidResponse("child stdout not captured".to_string()))?;

        let connected = Arc::new(AtomicBool::new(true));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(32);
        let writer_connected = Arc::clone(&connected);
        tokio::spawn(async move {
            while let Some(msg) = stdin_rx.recv().await {
                let written = async {
                    stdin.write_all(msg.as_bytes()).await?;
                    stdin.flush().await
                }
                .await;
                if let Err(e) = written {
                    tracing::error!("Failed to write to MCP stdin: {}", e);
                    writer_connected.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });

        let reader_pending = Arc::clone(&pending);
        let reader_connected = Arc::clone(&connected);
        let reader_command = command.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match parse_response_line(&line).and_then(|r| Some((r.id?, r))) {
                    Some((id, response)) => {
                        if let Some(sender) = reader_pending.lock().await.remove(&id) {
                            let _ = sender.send(response);
                        }
                    }
                    None => tracing::trace!("MCP stdout (not a response): {}", line),
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
            // Dropping the senders wakes every waiter with a closed channel.
            reader_pending.lock().await.clear();
            tracing::debug!("MCP stdout reader for '{}' finished", reader_command);
        });

        if let Some(stderr) = child.stderr.take() {
            let stderr_command = command.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(command = %stderr_command, "MCP stderr: {}", line);
                }
            });
        }

        Ok(Self {
            command: command.to_string(),
            request_id: AtomicU64::new(1),
            child: Mutex::new(Some(child)),
            stdin_tx: std::sync::Mutex::new(Some(stdin_tx)),
            pending,
            connected,
            timeout,
        })
    }

    async fn send_line(&self, line: String) -> Result<(), McpError> {
        let sender = self
            .stdin_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(McpError::NotConnected)?;
        sender.send(line).await.map_err(|_| McpError::NotConnected)
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }

        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let mut line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.send_line(line).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) => Err(McpError::NotConnected),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpError::Timeout(method.to_string()))
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        let mut line = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        line.push('\n');
        self.send_line(line).await
    }

    async fn close(&self) -> Result<(), McpError> {
        self.connected.store(false, Ordering::SeqCst);
        self.stdin_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        let waited = tokio::time::timeout(CLOSE_GRACE, child.wait()).await;
        match waited {
            Ok(Ok(status)) => {
                tracing::debug!("MCP process '{}' exited: {}", self.command, status);
            }
            Ok(Err(e)) => {
                tracing::warn!("Waiting for MCP process '{}' failed: {}", self.command, e);
                child.kill().await?;
            }
            Err(_) => {
                tracing::debug!("MCP process '{}' ignored stdin close, killing", self.command);
                child.kill().await?;
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Transport for a remote MCP endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
    request_id: AtomicU64,
    session_id: std::sync::Mutex<Option<String>>,
    connected: AtomicBool,
}

impl HttpTransport {
    pub fn connect(url: Url, timeout: Duration) -> Result<Self, McpError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            request_id: AtomicU64::new(1),
            session_id: std::sync::Mutex::new(None),
            connected: AtomicBool::new(true),
        })
    }

    fn session(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn post(&self, body: &impl serde::Serialize) -> Result<reqwest::Response, McpError> {
        let mut request = self
            .client
            .post(self.url.clone())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .json(body);
        if let Some(session) = self.session() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                McpError::Timeout(self.url.to_string())
            } else {
                McpError::Http(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(McpError::Status(response.status()));
        }

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self
                .session_id
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(session.to_string());
        }
        Ok(response)
    }
}

/// Extract the response for `id` from a body that is either plain JSON or an SSE stream.
/// The JSON-RPC response carried by `line`, if any. Server-initiated requests
/// and notifications have a `method` and are never responses, even with an id.
fn parse_response_line(line: &str) -> Option<JsonRpcResponse> {
    let value: Value = serde_json::from_str(line).ok()?;
    if value.get("method").is_some() {
        return None;
    }
    serde_json::from_value(value).ok()
}

fn parse_http_response(body: &str, is_event_stream: bool, id: u64) -> Result<JsonRpcResponse, McpError> {
    if !is_event_stream {
        return Ok(serde_json::from_str(body)?);
    }
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| parse_response_line(data.trim()))
        .find(|response| response.id == Some(id))
        .ok_or_else(|| McpError::InvalidResponse(format!("no response for request {} in event stream", id)))
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let response = self.post(&JsonRpcRequest::new(id, method, params)).await?;

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let body = response.text().await?;

        parse_http_response(&body, is_event_stream, id)?.into_result()
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        self.post(&JsonRpcNotification::new(method, params)).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), McpError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(session) = self.session() else {
            return Ok(());
        };
        let response = self
            .client
            .delete(self.url.clone())
            .header(SESSION_HEADER, session)
            .send()
            .await?;
        // Servers without explicit session termination answer 405.
        if !response.status().is_success() && response.status() != reqwest::StatusCode::METHOD_NOT_ALLOWED {
            return Err(McpError::Status(response.status()));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
