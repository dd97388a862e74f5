//! Model Context Protocol client
//!
//! Speaks JSON-RPC 2.0 to a tool server, either over a child process's
//! stdin/stdout (one message per line) or over HTTP POST.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use crate::core::config::{ServerConfig, ToolConfig};
use crate::core::{Result, SwitchboardError, ToolDefinition};
use crate::tools::provider::{
    clean_server_name, is_valid_tool_name, namespaced, ToolInvocation, ToolProvider,
};

const PROTOCOL_VERSION: &str = "2024-11-05";
const SESSION_HEADER: &str = "mcp-session-id";
const INTERNAL_ERROR: i64 = -32603;
const WRITE_CHANNEL_SIZE: usize = 256;

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<Value>>>>>;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl<'a> JsonRpcRequest<'a> {
    fn call(id: i64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        }
    }

    fn notification(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

impl JsonRpcResponse {
    fn into_result(self) -> Result<Value> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error.into()),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

impl From<JsonRpcError> for SwitchboardError {
    fn from(error: JsonRpcError) -> Self {
        if error.code == INTERNAL_ERROR {
            SwitchboardError::ProviderServer {
                status: 500,
                message: error.message,
            }
        } else {
            SwitchboardError::tool(format!("MCP error {}: {}", error.code, error.message))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<McpTool>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolResult {
    #[serde(default)]
    content: Option<Vec<ContentItem>>,
    #[serde(default)]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentItem {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Decode a `tools/call` result into the value handed back to the model
///
/// Text items are joined by newlines and parsed as JSON when possible.
fn decode_call_result(result: CallToolResult) -> Result<Value> {
    let text = result
        .content
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| match item {
            ContentItem::Text { text } => Some(text),
            ContentItem::Other => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    if result.is_error {
        return Err(SwitchboardError::tool(if text.is_empty() {
            "Tool reported an error".to_string()
        } else {
            text
        }));
    }

    if text.is_empty() {
        return Err(SwitchboardError::tool("Invalid response format from server"));
    }

    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

/// Ensure a tool schema is an object schema with a properties map
fn normalize_schema(schema: Option<Value>) -> Value {
    let mut schema = match schema {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    schema.entry("type").or_insert_with(|| json!("object"));
    schema.entry("properties").or_insert_with(|| json!({}));
    Value::Object(schema)
}

/// Find the reply to `id` in a `text/event-stream` body
fn parse_sse_reply(body: &str, id: i64) -> Result<JsonRpcResponse> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<JsonRpcResponse>(data.trim()).ok())
        .find(|reply| reply.id.as_ref().and_then(Value::as_i64) == Some(id))
        .ok_or_else(|| SwitchboardError::tool("No JSON-RPC reply in event stream"))
}

// ---------------------------------------------------------------------------
// Transports
// ---------------------------------------------------------------------------

enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
}

impl Transport {
    async fn request(&self, method: &str, params: Option<Value>, timeout: Duration) -> Result<Value> {
        match self {
            Transport::Stdio(t) => t.request(method, params, timeout).await,
            Transport::Http(t) => t.request(method, params, timeout).await,
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        match self {
            Transport::Stdio(t) => t.notify(method, params).await,
            Transport::Http(t) => t.notify(method, params).await,
        }
    }

    fn is_alive(&self) -> bool {
        match self {
            Transport::Stdio(t) => t.alive.load(Ordering::SeqCst),
            Transport::Http(_) => true,
        }
    }

    async fn close(&self) {
        if let Transport::Stdio(t) = self {
            t.close().await;
        }
    }
}

struct StdioTransport {
    server: String,
    write_tx: mpsc::Sender<String>,
    pending: PendingMap,
    next_id: AtomicI64,
    alive: Arc<AtomicBool>,
    child: tokio::sync::Mutex<Option<Child>>,
}

impl StdioTransport {
    fn spawn(server: &str, command: &str, config: &ServerConfig) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            SwitchboardError::tool(format!("Failed to spawn '{}' for {}: {}", command, server, e))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SwitchboardError::tool("Failed to get child stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SwitchboardError::tool("Failed to get child stdout"))?;

        let alive = Arc::new(AtomicBool::new(true));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let (write_tx, mut write_rx) = mpsc::channel::<String>(WRITE_CHANNEL_SIZE);
        let alive_writer = Arc::clone(&alive);
        let writer_server = server.to_string();
        tokio::spawn(async move {
            while let Some(line) = write_rx.recv().await {
                if !alive_writer.load(Ordering::SeqCst) {
                    break;
                }
                let written = match stdin.write_all(line.as_bytes()).await {
                    Ok(()) => stdin.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    tracing::warn!(server = %writer_server, "MCP stdio write error: {}", e);
                    alive_writer.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });

        let pending_reader = Arc::clone(&pending);
        let alive_reader = Arc::clone(&alive);
        let reader_server = server.to_string();
        let mut reader = BufReader::new(stdout);
        tokio::spawn(async move {
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                            Ok(reply) if reply.method.is_some() => {
                                tracing::trace!(server = %reader_server, "Ignoring server message: {}", trimmed);
                            }
                            Ok(reply) => {
                                let Some(id) = reply.id.as_ref().and_then(Value::as_i64) else {
                                    continue;
                                };
                                if let Some(tx) = lock(&pending_reader).remove(&id) {
                                    let _ = tx.send(reply.into_result());
                                }
                            }
                            Err(e) => {
                                tracing::debug!(server = %reader_server, "Unparseable MCP line: {} - {}", e, trimmed);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(server = %reader_server, "MCP stdio read error: {}", e);
                        break;
                    }
                }
            }

            alive_reader.store(false, Ordering::SeqCst);
            lock(&pending_reader).clear();
        });

        if let Some(stderr) = child.stderr.take() {
            let stderr_server = server.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %stderr_server, "{}", line);
                }
            });
        }

        Ok(Self {
            server: server.to_string(),
            write_tx,
            pending,
            next_id: AtomicI64::new(1),
            alive,
            child: tokio::sync::Mutex::new(Some(child)),
        })
    }

    fn closed(&self) -> SwitchboardError {
        SwitchboardError::ConnectionClosed(self.server.clone())
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(self.closed());
        }
        let line = format!(
            "{}\n",
            serde_json::to_string(&JsonRpcRequest::notification(method, params))?
        );
        self.write_tx.send(line).await.map_err(|_| self.closed())
    }

    async fn request(&self, method: &str, params: Option<Value>, timeout: Duration) -> Result<Value> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(self.closed());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = format!(
            "{}\n",
            serde_json::to_string(&JsonRpcRequest::call(id, method, params))?
        );

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        if self.write_tx.send(line).await.is_err() {
            lock(&self.pending).remove(&id);
            return Err(self.closed());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self.closed()),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(SwitchboardError::ToolTimeout(format!(
                    "{} on {} after {:?}",
                    method, self.server, timeout
                )))
            }
        }
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        lock(&self.pending).clear();
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(server = %self.server, "Failed to kill MCP server: {}", e);
            }
        }
    }
}

struct HttpTransport {
    server: String,
    client: Client,
    endpoint: String,
    next_id: AtomicI64,
    session: Mutex<Option<String>>,
}

impl HttpTransport {
    fn new(server: &str, endpoint: &str) -> Result<Self> {
        Ok(Self {
            server: server.to_string(),
            client: Client::builder().build()?,
            endpoint: endpoint.to_string(),
            next_id: AtomicI64::new(1),
            session: Mutex::new(None),
        })
    }

    async fn post(&self, body: &JsonRpcRequest<'_>, timeout: Duration) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);

        let session = lock(&self.session).clone();
        if let Some(session) = session {
            builder = builder.header(SESSION_HEADER, session);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                SwitchboardError::ToolTimeout(format!(
                    "{} on {} after {:?}",
                    body.method, self.server, timeout
                ))
            } else {
                SwitchboardError::from(e)
            }
        })?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *lock(&self.session) = Some(session.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SwitchboardError::ProviderServer {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let body = JsonRpcRequest::notification(method, params);
        self.post(&body, Duration::from_secs(30)).await.map(|_| ())
    }

    async fn request(&self, method: &str, params: Option<Value>, timeout: Duration) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = JsonRpcRequest::call(id, method, params);
        let response = self.post(&body, timeout).await?;

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/event-stream"));
        let text = response.text().await?;

        let reply = if is_event_stream {
            parse_sse_reply(&text, id)?
        } else {
            serde_json::from_str::<JsonRpcResponse>(&text)?
        };
        reply.into_result()
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A connected MCP tool server
pub struct McpClient {
    name: String,
    transport: Transport,
    settings: ToolConfig,
    connected: AtomicBool,
}

impl McpClient {
    /// Connect to a configured server and complete the initialize handshake
    pub async fn connect(name: &str, server: &ServerConfig, settings: &ToolConfig) -> Result<Self> {
        let clean = clean_server_name(name);
        let transport = match (&server.url, &server.command) {
            (Some(url), _) => Transport::Http(HttpTransport::new(&clean, url)?),
            (None, Some(command)) => Transport::Stdio(StdioTransport::spawn(&clean, command, server)?),
            (None, None) => {
                return Err(SwitchboardError::config(format!(
                    "Server '{}' needs either a command or a url",
                    name
                )))
            }
        };

        let client = Self {
            name: clean,
            transport,
            settings: settings.clone(),
            connected: AtomicBool::new(false),
        };

        if let Err(e) = client.initialize().await {
            client.transport.close().await;
            return Err(e);
        }
        client.connected.store(true, Ordering::SeqCst);
        tracing::info!(server = %client.name, "MCP server connected");
        Ok(client)
    }

    async fn initialize(&self) -> Result<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        self.transport
            .request("initialize", Some(params), self.timeout(false))
            .await?;
        self.transport
            .notify("notifications/initialized", None)
            .await
    }

    fn timeout(&self, extended: bool) -> Duration {
        Duration::from_secs(if extended {
            self.settings.extended_timeout_secs
        } else {
            self.settings.timeout_secs
        })
    }

    /// Whether the server is still reachable
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.transport.is_alive()
    }

    /// Close the connection, stopping a child process if there is one
    pub async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.transport.close().await;
        tracing::info!(server = %self.name, "MCP server disconnected");
    }

    async fn call_once(&self, invocation: &ToolInvocation, timeout: Duration) -> Result<Value> {
        let params = json!({
            "name": invocation.tool_name,
            "arguments": invocation.arguments,
        });
        let result = self
            .transport
            .request("tools/call", Some(params), timeout)
            .await?;
        decode_call_result(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl ToolProvider for McpClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page: ListToolsResult = serde_json::from_value(
                self.transport
                    .request("tools/list", params, self.timeout(false))
                    .await?,
            )?;

            for tool in page.tools {
                let name = namespaced(&self.name, &tool.name);
                if !is_valid_tool_name(&name) {
                    tracing::warn!(server = %self.name, tool = %tool.name, "Skipping tool with unusable name");
                    continue;
                }
                tools.push(ToolDefinition::new(
                    name,
                    tool.description.unwrap_or_default(),
                    normalize_schema(tool.input_schema),
                ));
            }

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(tools)
    }

    async fn invoke(&self, invocation: &ToolInvocation, extended_timeout: bool) -> Result<Value> {
        let timeout = self.timeout(extended_timeout);
        tracing::debug!(
            server = %self.name,
            tool = %invocation.tool_name,
            ?timeout,
            "Calling tool"
        );

        let mut attempt = 0;
        loop {
            match self.call_once(invocation, timeout).await {
                Err(e) if e.is_transient() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        server = %self.name,
                        tool = %invocation.tool_name,
                        "Transient tool error (attempt {}/{}): {}",
                        attempt,
                        self.settings.max_retries,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(self.settings.retry_delay_ms)).await;
                }
                result => return result,
            }
        }
    }

    async fn close(&self) {
        self.disconnect().await;
    }
}
