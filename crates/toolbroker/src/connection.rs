//! # Server Connection
//!
//! Wraps one transport adapter bound to one remote server: connection state,
//! the cached tool list, and reconnect-on-demand.

use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::transport::{self, Channel, Transport};
use crate::types::{
    ConnectionParams, ConnectionState, ExecuteOutcome, Result, ToolDescriptor, TransportKind,
};
use crate::BrokerError;

/// One managed remote endpoint and its live channel, if any
pub struct ServerConnection {
    server_id: String,
    url: String,
    description: String,
    transport_kind: TransportKind,
    params: ConnectionParams,
    transport: Arc<dyn Transport>,
    state: RwLock<ConnectionState>,
    channel: RwLock<Option<Arc<dyn Channel>>>,
    tools: RwLock<Vec<ToolDescriptor>>,
    // At most one connect attempt in flight per server
    connect_guard: Mutex<()>,
}

impl ServerConnection {
    /// Wrap a transport adapter for one server. The connection starts
    /// `Disconnected`; call [`connect`](Self::connect) to bring it up.
    pub fn new(
        server_id: impl Into<String>,
        url: impl Into<String>,
        description: impl Into<String>,
        transport_kind: TransportKind,
        params: ConnectionParams,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            url: url.into(),
            description: description.into(),
            transport_kind,
            params,
            transport,
            state: RwLock::new(ConnectionState::Disconnected),
            channel: RwLock::new(None),
            tools: RwLock::new(Vec::new()),
            connect_guard: Mutex::new(()),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport_kind
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Current lifecycle state
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Tools reported on the last successful connect; may be stale between
    /// connects
    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools.read().await.clone()
    }

    /// Establish the channel: probe, open, then refresh the tool cache.
    ///
    /// Idempotent while `Active` — returns immediately without re-probing.
    /// On any failure the channel is closed and the state is reset to
    /// `Disconnected`.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.connect_guard.lock().await;

        if *self.state.read().await == ConnectionState::Active {
            debug!(server_id = %self.server_id, "Already connected");
            return Ok(());
        }

        *self.state.write().await = ConnectionState::Connecting;

        if !self.transport.probe().await {
            *self.state.write().await = ConnectionState::Disconnected;
            return Err(BrokerError::Connection(format!(
                "Server '{}' at {} is unreachable",
                self.server_id, self.url
            )));
        }

        let channel: Arc<dyn Channel> = match self.transport.open().await {
            Ok(channel) => Arc::from(channel),
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        match transport::list_tools(channel.as_ref()).await {
            Ok(tools) => {
                info!(
                    server_id = %self.server_id,
                    tool_count = tools.len(),
                    "Server connected"
                );
                *self.tools.write().await = tools;
                *self.channel.write().await = Some(channel);
                *self.state.write().await = ConnectionState::Active;
                Ok(())
            }
            Err(e) => {
                if let Err(close_err) = channel.close().await {
                    warn!(server_id = %self.server_id, error = %close_err, "Close after failed connect");
                }
                *self.state.write().await = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Execute one tool call, auto-connecting first if needed.
    ///
    /// Never returns an error to the caller: every failure is folded into
    /// the uniform [`ExecuteOutcome`] shape.
    pub async fn execute(&self, tool_name: &str, input: serde_json::Value) -> ExecuteOutcome {
        if self.state().await != ConnectionState::Active {
            debug!(server_id = %self.server_id, "Connection not active, connecting on demand");
            if let Err(e) = self.connect().await {
                return ExecuteOutcome::error_for(
                    tool_name,
                    format!("Failed to connect to server '{}': {e}", self.server_id),
                );
            }
        }

        let channel = match self.channel.read().await.clone() {
            Some(channel) => channel,
            None => {
                // Disconnected between the state check and here
                return ExecuteOutcome::error_for(
                    tool_name,
                    format!("No open channel for server '{}'", self.server_id),
                );
            }
        };

        match transport::invoke(channel.as_ref(), tool_name, input).await {
            Ok(result) => ExecuteOutcome::success(tool_name, result),
            Err(BrokerError::Remote { code, message, data }) => {
                warn!(server_id = %self.server_id, tool = %tool_name, code, "Remote tool error");
                ExecuteOutcome::remote_error(
                    tool_name,
                    format!("Tool returned an error: {message}"),
                    code,
                    data,
                )
            }
            Err(e) => {
                warn!(server_id = %self.server_id, tool = %tool_name, error = %e, "Tool call failed");
                ExecuteOutcome::error_for(tool_name, format!("Error calling tool: {e}"))
            }
        }
    }

    /// Tear down the channel. Safe to call from any state, any number of
    /// times.
    pub async fn disconnect(&self) {
        let channel = self.channel.write().await.take();
        if let Some(channel) = channel {
            if let Err(e) = channel.close().await {
                warn!(server_id = %self.server_id, error = %e, "Error closing channel");
            }
            info!(server_id = %self.server_id, "Server disconnected");
        }
        *self.state.write().await = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockTransport;
    use serde_json::json;

    fn connection(transport: Arc<MockTransport>) -> ServerConnection {
        ServerConnection::new(
            "weather",
            "http://localhost:8500",
            "Weather forecasts",
            TransportKind::Jsonrpc,
            ConnectionParams::default(),
            transport,
        )
    }

    #[tokio::test]
    async fn connect_populates_tool_cache_and_activates() {
        let mock = MockTransport::serving(&["forecast"]);
        let conn = connection(mock.clone());

        assert_eq!(conn.state().await, ConnectionState::Disconnected);
        conn.connect().await.unwrap();
        assert_eq!(conn.state().await, ConnectionState::Active);

        let tools = conn.tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "forecast");
    }

    #[tokio::test]
    async fn connect_is_idempotent_while_active() {
        let mock = MockTransport::serving(&["forecast"]);
        let conn = connection(mock.clone());

        conn.connect().await.unwrap();
        conn.connect().await.unwrap();

        // Second connect returned early without re-probing
        assert_eq!(mock.probe_count(), 1);
    }

    #[tokio::test]
    async fn failed_probe_leaves_connection_disconnected() {
        let mock = MockTransport::unreachable_endpoint();
        let conn = connection(mock.clone());

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, BrokerError::Connection(_)));
        assert_eq!(conn.state().await, ConnectionState::Disconnected);
        assert!(conn.tools().await.is_empty());
    }

    #[tokio::test]
    async fn failed_open_resets_state() {
        let mock = MockTransport::serving(&["forecast"]);
        mock.open_fails
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let conn = connection(mock.clone());

        assert!(conn.connect().await.is_err());
        assert_eq!(conn.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn execute_connects_on_demand() {
        let mock = MockTransport::serving(&["forecast"]);
        mock.respond("forecast", json!({ "output": { "temp": 21 } }));
        let conn = connection(mock.clone());

        // No explicit connect: first execute brings the channel up lazily
        let outcome = conn.execute("forecast", json!({ "city": "nyc" })).await;
        assert_eq!(
            outcome,
            ExecuteOutcome::success("forecast", json!({ "temp": 21 }))
        );
        assert_eq!(conn.state().await, ConnectionState::Active);
        assert_eq!(mock.probe_count(), 1);
    }

    #[tokio::test]
    async fn execute_returns_structured_error_when_connect_fails() {
        let mock = MockTransport::unreachable_endpoint();
        let conn = connection(mock.clone());

        let outcome = conn.execute("forecast", json!({})).await;
        match outcome {
            ExecuteOutcome::Error { tool_id, message, .. } => {
                assert_eq!(tool_id.as_deref(), Some("forecast"));
                assert!(message.contains("Failed to connect"));
            }
            other => panic!("expected error outcome, got {other:?}"),
        }
        assert_eq!(mock.invoke_count(), 0);
    }

    #[tokio::test]
    async fn execute_wraps_remote_errors_with_code_and_details() {
        let mock = MockTransport::serving(&["forecast"]);
        mock.fail_with(
            "forecast",
            crate::codec::INVALID_PARAMS,
            "unknown city",
            Some(json!({ "field": "city" })),
        );
        let conn = connection(mock.clone());

        let outcome = conn.execute("forecast", json!({ "city": "??" })).await;
        match outcome {
            ExecuteOutcome::Error { code, details, .. } => {
                assert_eq!(code, Some(-32602));
                assert_eq!(details, Some(json!({ "field": "city" })));
            }
            other => panic!("expected error outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_twice_is_a_no_op() {
        let mock = MockTransport::serving(&["forecast"]);
        let conn = connection(mock.clone());
        conn.connect().await.unwrap();

        conn.disconnect().await;
        assert_eq!(conn.state().await, ConnectionState::Disconnected);

        conn.disconnect().await;
        assert_eq!(conn.state().await, ConnectionState::Disconnected);
        assert_eq!(mock.close_count(), 1);
    }

    #[tokio::test]
    async fn disconnect_before_connect_is_safe() {
        let mock = MockTransport::serving(&[]);
        let conn = connection(mock.clone());
        conn.disconnect().await;
        assert_eq!(conn.state().await, ConnectionState::Disconnected);
        assert_eq!(mock.close_count(), 0);
    }

    #[tokio::test]
    async fn reconnect_after_disconnect_refreshes_tools() {
        let mock = MockTransport::serving(&["forecast"]);
        let conn = connection(mock.clone());
        conn.connect().await.unwrap();
        conn.disconnect().await;

        mock.tools.lock().unwrap().push(ToolDescriptor {
            name: "alerts".to_string(),
            description: String::new(),
            input_schema: None,
        });

        conn.connect().await.unwrap();
        assert_eq!(conn.tools().await.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_executes_trigger_a_single_connect() {
        let mock = MockTransport::serving(&["forecast"]);
        let conn = Arc::new(connection(mock.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let conn = Arc::clone(&conn);
            handles.push(tokio::spawn(async move {
                conn.execute("forecast", json!({})).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_success());
        }

        assert_eq!(mock.probe_count(), 1);
    }
}
