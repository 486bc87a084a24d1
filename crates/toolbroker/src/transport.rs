//! # Transport Adapters
//!
//! One adapter per wire mechanism. An adapter knows how to probe an endpoint
//! for reachability and to open a [`Channel`]; the channel carries JSON-RPC
//! envelopes and is opaque to everything above this layer.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::codec::{self, RpcNotification, RpcRequest, RpcResponse};
use crate::types::{ConnectionParams, Result, ToolDescriptor, TransportKind};
use crate::BrokerError;

/// Bounded wait for a reachability probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Bounded wait for a tool listing
pub const LIST_TOOLS_TIMEOUT: Duration = Duration::from_secs(10);
/// Bounded wait for a tool invocation
pub const INVOKE_TIMEOUT: Duration = Duration::from_secs(30);

/// A transport adapter bound to one remote endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// Lightweight reachability check. Never fails; returns false on any
    /// problem.
    async fn probe(&self) -> bool;

    /// Establish the underlying session and return a live channel.
    async fn open(&self) -> Result<Box<dyn Channel>>;
}

/// A live, transport-specific session handle
#[async_trait]
pub trait Channel: Send + Sync {
    /// Send one request and wait for its response envelope
    async fn request(&self, req: RpcRequest) -> Result<RpcResponse>;

    /// Send a notification (no response expected)
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Release all resources. Idempotent: closing twice must not fail.
    async fn close(&self) -> Result<()>;

    /// Whether the channel still holds a live session
    fn is_open(&self) -> bool;
}

/// Build the adapter for a declared transport.
///
/// The stdio transport requires `connection_params.command`; that is the only
/// construction-time failure.
pub fn create(
    kind: TransportKind,
    url: &str,
    params: &ConnectionParams,
) -> Result<Arc<dyn Transport>> {
    match kind {
        TransportKind::Jsonrpc => Ok(Arc::new(JsonRpcTransport::new(url, &params.headers)?)),
        TransportKind::Sse => Ok(Arc::new(SseTransport::new(url, &params.headers)?)),
        TransportKind::Stdio => {
            let command = params.command.clone().ok_or_else(|| {
                BrokerError::Validation(
                    "stdio transport requires a 'command' parameter".to_string(),
                )
            })?;
            Ok(Arc::new(StdioTransport {
                command,
                args: params.args.clone(),
                env: params.env.clone(),
                cwd: params.cwd.clone(),
            }))
        }
    }
}

/// Query the remote for its currently offered tools (10s bound).
pub async fn list_tools(channel: &dyn Channel) -> Result<Vec<ToolDescriptor>> {
    let req = codec::build_request("tools/list", Value::Object(Default::default()), None);
    let response = tokio::time::timeout(LIST_TOOLS_TIMEOUT, channel.request(req))
        .await
        .map_err(|_| BrokerError::Timeout("tools/list".to_string()))??;

    let result = expect_result(response)?;
    let listing: ToolsListResult = serde_json::from_value(result)
        .map_err(|e| BrokerError::Protocol(format!("Malformed tools/list result: {e}")))?;
    Ok(listing.tools)
}

/// Execute one tool call (30s bound). Returns the result payload with a
/// `{"output": ...}` wrapper removed when the remote used one.
pub async fn invoke(channel: &dyn Channel, tool_name: &str, input: Value) -> Result<Value> {
    let params = serde_json::json!({
        "name": tool_name,
        "arguments": input,
    });
    let req = codec::build_request("tools/call", params, None);
    let response = tokio::time::timeout(INVOKE_TIMEOUT, channel.request(req))
        .await
        .map_err(|_| BrokerError::Timeout(format!("tools/call '{tool_name}'")))??;

    expect_result(response).map(codec::unwrap_output)
}

/// Capability handshake run by the session-holding transports after open
async fn initialize_session(channel: &dyn Channel, url: &str) -> Result<()> {
    let params = serde_json::json!({
        "protocolVersion": "2024-11-05",
        "capabilities": { "tools": {} },
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    });

    let req = codec::build_request("initialize", params, None);
    let response = tokio::time::timeout(LIST_TOOLS_TIMEOUT, channel.request(req))
        .await
        .map_err(|_| BrokerError::Timeout(format!("initialize handshake with {url}")))??;
    expect_result(response)?;

    channel.notify("notifications/initialized", None).await?;
    Ok(())
}

/// Whether a response envelope answers the request carrying `expected_id`.
/// Error envelopes may carry a null id when the server could not parse the
/// request; success envelopes must echo the id exactly.
fn correlates(response: &RpcResponse, expected_id: &str) -> bool {
    if response.id.as_str() == Some(expected_id) {
        return true;
    }
    response.id.is_null() && response.error.is_some()
}

fn expect_result(response: RpcResponse) -> Result<Value> {
    if let Some(error) = response.error {
        return Err(BrokerError::Remote {
            code: error.code,
            message: error.message,
            data: error.data,
        });
    }
    response.result.ok_or_else(|| {
        BrokerError::Protocol("Response carries neither 'result' nor 'error'".to_string())
    })
}

#[derive(Debug, Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
}

fn http_client(headers: &std::collections::HashMap<String, String>) -> Result<reqwest::Client> {
    let mut header_map = reqwest::header::HeaderMap::new();
    for (name, value) in headers {
        let name: reqwest::header::HeaderName = name
            .parse()
            .map_err(|_| BrokerError::Validation(format!("Invalid header name '{name}'")))?;
        let value = value
            .parse()
            .map_err(|_| BrokerError::Validation(format!("Invalid header value for '{name}'")))?;
        header_map.insert(name, value);
    }

    reqwest::Client::builder()
        .default_headers(header_map)
        .build()
        .map_err(|e| BrokerError::Transport(format!("Failed to build HTTP client: {e}")))
}

// ---------------------------------------------------------------------------
// Request/response JSON-RPC over HTTP
// ---------------------------------------------------------------------------

/// Adapter for plain request/response JSON-RPC servers
pub struct JsonRpcTransport {
    url: String,
    client: reqwest::Client,
}

impl JsonRpcTransport {
    pub fn new(url: &str, headers: &std::collections::HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            url: url.to_string(),
            client: http_client(headers)?,
        })
    }
}

#[async_trait]
impl Transport for JsonRpcTransport {
    async fn probe(&self) -> bool {
        let ping = codec::build_request("ping", Value::Object(Default::default()), None);
        let send = self.client.post(&self.url).json(&ping).send();

        let response = match tokio::time::timeout(PROBE_TIMEOUT, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                debug!(url = %self.url, error = %e, "Probe request failed");
                return false;
            }
            Err(_) => {
                debug!(url = %self.url, "Probe timed out");
                return false;
            }
        };

        if response.status().as_u16() >= 400 {
            debug!(url = %self.url, status = %response.status(), "Probe got HTTP error");
            return false;
        }

        // Any JSON body counts as reachable, even a JSON-RPC error: the
        // endpoint speaks the protocol well enough to answer.
        match response.text().await {
            Ok(body) => serde_json::from_str::<Value>(&body).is_ok(),
            Err(_) => false,
        }
    }

    async fn open(&self) -> Result<Box<dyn Channel>> {
        // Request/response needs no session; connectivity was verified by
        // the probe.
        Ok(Box::new(JsonRpcChannel {
            url: self.url.clone(),
            client: self.client.clone(),
        }))
    }
}

/// Stateless channel: every request is an independent HTTP POST validated
/// through the fallback codec
pub struct JsonRpcChannel {
    url: String,
    client: reqwest::Client,
}

#[async_trait]
impl Channel for JsonRpcChannel {
    async fn request(&self, req: RpcRequest) -> Result<RpcResponse> {
        debug!(url = %self.url, method = %req.method, id = %req.id, "Sending jsonrpc request");

        let response = self
            .client
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| BrokerError::Transport(format!("HTTP error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BrokerError::Transport(format!("HTTP {status} from server")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| BrokerError::Transport(format!("Failed to read response body: {e}")))?;

        // The codec enforces envelope shape and the id echo; a remote error
        // is rebuilt into the envelope so callers see one uniform shape.
        match codec::parse_envelope(&body, Some(&req.id)) {
            Ok(result) => Ok(RpcResponse {
                jsonrpc: "2.0".to_string(),
                id: Value::String(req.id),
                result: Some(result),
                error: None,
            }),
            Err(BrokerError::Remote { code, message, data }) => Ok(RpcResponse {
                jsonrpc: "2.0".to_string(),
                id: Value::String(req.id),
                result: None,
                error: Some(crate::codec::RpcError { code, message, data }),
            }),
            Err(other) => Err(other),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = RpcNotification::new(method, params);
        self.client
            .post(&self.url)
            .json(&notification)
            .send()
            .await
            .map_err(|e| BrokerError::Transport(format!("HTTP error: {e}")))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Nothing held open
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Streamable HTTP with SSE responses
// ---------------------------------------------------------------------------

/// Adapter for streaming servers: requests go out as HTTP POSTs, responses
/// may come back as `text/event-stream`
pub struct SseTransport {
    url: String,
    client: reqwest::Client,
}

impl SseTransport {
    pub fn new(url: &str, headers: &std::collections::HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            url: url.to_string(),
            client: http_client(headers)?,
        })
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn probe(&self) -> bool {
        let ping = codec::build_request("ping", Value::Object(Default::default()), None);
        let send = self
            .client
            .post(&self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(&ping)
            .send();

        match tokio::time::timeout(PROBE_TIMEOUT, send).await {
            Ok(Ok(response)) => response.status().as_u16() < 400,
            Ok(Err(e)) => {
                debug!(url = %self.url, error = %e, "Probe request failed");
                false
            }
            Err(_) => {
                debug!(url = %self.url, "Probe timed out");
                false
            }
        }
    }

    async fn open(&self) -> Result<Box<dyn Channel>> {
        let channel = SseChannel {
            url: self.url.clone(),
            client: self.client.clone(),
            open: AtomicBool::new(true),
        };
        initialize_session(&channel, &self.url).await?;
        Ok(Box::new(channel))
    }
}

/// Session-initialized channel over streamable HTTP
pub struct SseChannel {
    url: String,
    client: reqwest::Client,
    open: AtomicBool,
}

impl SseChannel {
    /// Scan an event stream for the first `data:` line holding the JSON-RPC
    /// response that answers `expected_id`. Stale or interleaved events for
    /// other requests are skipped.
    async fn read_sse_response(
        &self,
        response: reqwest::Response,
        expected_id: &str,
    ) -> Result<RpcResponse> {
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| BrokerError::Transport(format!("Stream error: {e}")))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            for line in buffer.lines() {
                if let Some(data) = line.strip_prefix("data: ") {
                    if let Ok(parsed) = serde_json::from_str::<RpcResponse>(data) {
                        if correlates(&parsed, expected_id) {
                            return Ok(parsed);
                        }
                        debug!(got = %parsed.id, "Skipping uncorrelated sse event");
                    }
                }
            }

            // Keep only the trailing incomplete line
            if let Some(last_newline) = buffer.rfind('\n') {
                buffer = buffer[last_newline + 1..].to_string();
            }
        }

        Err(BrokerError::Protocol(
            "SSE stream ended without a response".to_string(),
        ))
    }
}

#[async_trait]
impl Channel for SseChannel {
    async fn request(&self, req: RpcRequest) -> Result<RpcResponse> {
        debug!(url = %self.url, method = %req.method, id = %req.id, "Sending sse request");

        let response = self
            .client
            .post(&self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(&req)
            .send()
            .await
            .map_err(|e| BrokerError::Transport(format!("HTTP error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BrokerError::Transport(format!("HTTP {status} from server")));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if content_type.contains("text/event-stream") {
            self.read_sse_response(response, &req.id).await
        } else {
            let body = response.text().await.map_err(|e| {
                BrokerError::Transport(format!("Failed to read response body: {e}"))
            })?;
            let parsed: RpcResponse = serde_json::from_str(&body)
                .map_err(|e| BrokerError::Protocol(format!("Invalid JSON response: {e}")))?;
            if !correlates(&parsed, &req.id) {
                return Err(BrokerError::IdMismatch {
                    expected: req.id,
                    got: parsed.id.to_string(),
                });
            }
            Ok(parsed)
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = RpcNotification::new(method, params);
        let response = self
            .client
            .post(&self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(&notification)
            .send()
            .await
            .map_err(|e| BrokerError::Transport(format!("HTTP error: {e}")))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Notification returned non-success status");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Local process over stdin/stdout
// ---------------------------------------------------------------------------

/// Adapter for local tool servers spoken to over a spawned process's pipes
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: std::collections::HashMap<String, String>,
    cwd: Option<String>,
}

#[async_trait]
impl Transport for StdioTransport {
    async fn probe(&self) -> bool {
        // Spawning just to check reachability is too heavy; resolving the
        // command is the lightweight equivalent.
        which::which(&self.command).is_ok()
    }

    async fn open(&self) -> Result<Box<dyn Channel>> {
        let channel = StdioChannel::spawn(&self.command, &self.args, &self.env, self.cwd.as_deref())
            .await?;
        if let Err(e) = initialize_session(&channel, &self.command).await {
            let _ = channel.close().await;
            return Err(e);
        }
        Ok(Box::new(channel))
    }
}

/// Channel over a spawned child's stdin/stdout, line-delimited JSON
pub struct StdioChannel {
    child: tokio::sync::Mutex<Option<Child>>,
    stdin_tx: mpsc::Sender<String>,
    response_rx: tokio::sync::Mutex<mpsc::Receiver<RpcResponse>>,
    open: AtomicBool,
}

impl StdioChannel {
    async fn spawn(
        command: &str,
        args: &[String],
        env: &std::collections::HashMap<String, String>,
        cwd: Option<&str>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .envs(env)
            .kill_on_drop(true);

        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| BrokerError::Connection(format!("Failed to spawn {command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BrokerError::Connection("Failed to get child stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BrokerError::Connection("Failed to get child stdout".to_string()))?;

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(32);
        let (response_tx, response_rx) = mpsc::channel::<RpcResponse>(32);

        // Writer task: one JSON message per line
        let mut writer = stdin;
        tokio::spawn(async move {
            while let Some(msg) = stdin_rx.recv().await {
                if let Err(e) = writer.write_all(msg.as_bytes()).await {
                    error!("Failed to write to child stdin: {e}");
                    break;
                }
                if let Err(e) = writer.write_all(b"\n").await {
                    error!("Failed to write newline: {e}");
                    break;
                }
                if let Err(e) = writer.flush().await {
                    error!("Failed to flush child stdin: {e}");
                    break;
                }
            }
        });

        // Reader task: parse stdout lines into response envelopes
        let mut reader = BufReader::new(stdout).lines();
        tokio::spawn(async move {
            while let Ok(Some(line)) = reader.next_line().await {
                match serde_json::from_str::<RpcResponse>(&line) {
                    Ok(response) => {
                        if response_tx.send(response).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => debug!("Non-JSON line from child: {line}"),
                }
            }
        });

        Ok(Self {
            child: tokio::sync::Mutex::new(Some(child)),
            stdin_tx,
            response_rx: tokio::sync::Mutex::new(response_rx),
            open: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl Channel for StdioChannel {
    async fn request(&self, req: RpcRequest) -> Result<RpcResponse> {
        let expected_id = req.id.clone();
        let json = serde_json::to_string(&req)?;
        debug!(method = %req.method, id = %expected_id, "Sending stdio request");

        self.stdin_tx
            .send(json)
            .await
            .map_err(|e| BrokerError::Transport(format!("Send failed: {e}")))?;

        // Correlate by id; unrelated messages (notifications, stale replies)
        // are skipped. The caller bounds the total wait.
        let mut rx = self.response_rx.lock().await;
        loop {
            match rx.recv().await {
                Some(response) => {
                    if correlates(&response, &expected_id) {
                        return Ok(response);
                    }
                    debug!(got = %response.id, "Skipping uncorrelated stdio message");
                }
                None => {
                    return Err(BrokerError::Transport(
                        "Child process closed its stdout".to_string(),
                    ))
                }
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = RpcNotification::new(method, params);
        let json = serde_json::to_string(&notification)?;
        self.stdin_tx
            .send(json)
            .await
            .map_err(|e| BrokerError::Transport(format!("Send failed: {e}")))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport/channel pair used by the connection and manager
    //! tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Scripted transport: reachability, open failures, served tools, and
    /// per-tool responses are all configurable; probe/open/invoke counts are
    /// recorded.
    pub(crate) struct MockTransport {
        pub reachable: AtomicBool,
        pub open_fails: AtomicBool,
        pub tools: Mutex<Vec<ToolDescriptor>>,
        pub responses: Mutex<HashMap<String, Value>>,
        pub remote_errors: Mutex<HashMap<String, (i64, String, Option<Value>)>>,
        pub probes: AtomicUsize,
        pub opens: AtomicUsize,
        pub invokes: Arc<AtomicUsize>,
        pub closes: Arc<AtomicUsize>,
    }

    impl MockTransport {
        pub(crate) fn new(tools: Vec<ToolDescriptor>) -> Arc<Self> {
            Arc::new(Self {
                reachable: AtomicBool::new(true),
                open_fails: AtomicBool::new(false),
                tools: Mutex::new(tools),
                responses: Mutex::new(HashMap::new()),
                remote_errors: Mutex::new(HashMap::new()),
                probes: AtomicUsize::new(0),
                opens: AtomicUsize::new(0),
                invokes: Arc::new(AtomicUsize::new(0)),
                closes: Arc::new(AtomicUsize::new(0)),
            })
        }

        pub(crate) fn serving(tool_names: &[&str]) -> Arc<Self> {
            let tools = tool_names
                .iter()
                .map(|name| ToolDescriptor {
                    name: (*name).to_string(),
                    description: format!("mock tool {name}"),
                    input_schema: None,
                })
                .collect();
            Self::new(tools)
        }

        pub(crate) fn unreachable_endpoint() -> Arc<Self> {
            let mock = Self::new(Vec::new());
            mock.reachable.store(false, Ordering::SeqCst);
            mock
        }

        pub(crate) fn respond(&self, tool: &str, value: Value) {
            self.responses.lock().unwrap().insert(tool.to_string(), value);
        }

        pub(crate) fn fail_with(&self, tool: &str, code: i64, message: &str, data: Option<Value>) {
            self.remote_errors
                .lock()
                .unwrap()
                .insert(tool.to_string(), (code, message.to_string(), data));
        }

        pub(crate) fn probe_count(&self) -> usize {
            self.probes.load(Ordering::SeqCst)
        }

        pub(crate) fn invoke_count(&self) -> usize {
            self.invokes.load(Ordering::SeqCst)
        }

        pub(crate) fn close_count(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn probe(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.reachable.load(Ordering::SeqCst)
        }

        async fn open(&self) -> Result<Box<dyn Channel>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.open_fails.load(Ordering::SeqCst) {
                return Err(BrokerError::Connection("mock open failure".to_string()));
            }
            Ok(Box::new(MockChannel {
                tools: self.tools.lock().unwrap().clone(),
                responses: self.responses.lock().unwrap().clone(),
                remote_errors: self.remote_errors.lock().unwrap().clone(),
                invokes: Arc::clone(&self.invokes),
                closes: Arc::clone(&self.closes),
                open: AtomicBool::new(true),
            }))
        }
    }

    pub(crate) struct MockChannel {
        tools: Vec<ToolDescriptor>,
        responses: HashMap<String, Value>,
        remote_errors: HashMap<String, (i64, String, Option<Value>)>,
        invokes: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        open: AtomicBool,
    }

    #[async_trait]
    impl Channel for MockChannel {
        async fn request(&self, req: RpcRequest) -> Result<RpcResponse> {
            let result = match req.method.as_str() {
                "initialize" => serde_json::json!({ "protocolVersion": "2024-11-05" }),
                "tools/list" => serde_json::json!({ "tools": self.tools }),
                "tools/call" => {
                    self.invokes.fetch_add(1, Ordering::SeqCst);
                    let name = req.params["name"].as_str().unwrap_or_default().to_string();
                    if let Some((code, message, data)) = self.remote_errors.get(&name) {
                        return Ok(RpcResponse {
                            jsonrpc: "2.0".to_string(),
                            id: Value::String(req.id),
                            result: None,
                            error: Some(crate::codec::RpcError {
                                code: *code,
                                message: message.clone(),
                                data: data.clone(),
                            }),
                        });
                    }
                    self.responses
                        .get(&name)
                        .cloned()
                        .unwrap_or_else(|| serde_json::json!({ "echo": req.params["arguments"] }))
                }
                other => {
                    return Err(BrokerError::Protocol(format!("unexpected method {other}")))
                }
            };

            Ok(RpcResponse {
                jsonrpc: "2.0".to_string(),
                id: Value::String(req.id),
                result: Some(result),
                error: None,
            })
        }

        async fn notify(&self, _method: &str, _params: Option<Value>) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.open.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }
}
