//! # Broker Types
//!
//! Shared data model for the connection manager, transports, and callers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Result type for broker operations
pub type Result<T> = std::result::Result<T, crate::BrokerError>;

/// Wire mechanism used to reach a remote tool server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Request/response JSON-RPC 2.0 over HTTP
    Jsonrpc,
    /// Streamable HTTP with Server-Sent Events responses
    Sse,
    /// Local process communication via stdin/stdout
    Stdio,
}

impl TransportKind {
    /// Whether this transport dials a network endpoint
    pub fn is_network(&self) -> bool {
        matches!(self, TransportKind::Jsonrpc | TransportKind::Sse)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Jsonrpc => write!(f, "jsonrpc"),
            TransportKind::Sse => write!(f, "sse"),
            TransportKind::Stdio => write!(f, "stdio"),
        }
    }
}

/// Lifecycle state of the underlying channel, independent of registry
/// membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No live channel
    Disconnected,
    /// A connect attempt is in flight
    Connecting,
    /// Channel established, tool cache populated
    Active,
}

/// Transport-specific connection options.
///
/// Unknown options are kept in `extra` so they survive a persistence round
/// trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// HTTP headers for network transports
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Command to spawn for the stdio transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments for the spawned command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Environment variables for the spawned command
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Working directory for the spawned command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// Any other transport-specific options
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ConnectionParams {
    /// Params for a stdio server
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: Some(command.into()),
            args,
            ..Default::default()
        }
    }

    /// Params carrying HTTP headers
    pub fn with_headers(headers: HashMap<String, String>) -> Self {
        Self {
            headers,
            ..Default::default()
        }
    }
}

/// A tool exposed by a remote server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, unique within its owning server
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// JSON Schema for input parameters
    #[serde(
        rename = "inputSchema",
        alias = "input_schema",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub input_schema: Option<serde_json::Value>,
}

impl ToolDescriptor {
    /// Placeholder descriptor for a routed tool whose cache entry is missing
    /// (server not yet reconnected).
    pub fn stub(name: impl Into<String>, server_id: &str) -> Self {
        Self {
            name: name.into(),
            description: format!("Tool on server {server_id}"),
            input_schema: None,
        }
    }
}

/// Uniform result shape returned to the external caller, regardless of
/// transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecuteOutcome {
    /// The tool ran and produced a result
    Success {
        tool_id: String,
        result: serde_json::Value,
    },
    /// The call failed somewhere between routing and the remote tool
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_id: Option<String>,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
}

impl ExecuteOutcome {
    /// Successful invocation
    pub fn success(tool_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self::Success {
            tool_id: tool_id.into(),
            result,
        }
    }

    /// Error without a tool attribution
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            tool_id: None,
            message: message.into(),
            code: None,
            details: None,
        }
    }

    /// Error attributed to a specific tool
    pub fn error_for(tool_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            tool_id: Some(tool_id.into()),
            message: message.into(),
            code: None,
            details: None,
        }
    }

    /// Error carrying a remote error code and payload
    pub fn remote_error(
        tool_id: impl Into<String>,
        message: impl Into<String>,
        code: i64,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self::Error {
            tool_id: Some(tool_id.into()),
            message: message.into(),
            code: Some(code),
            details,
        }
    }

    /// Whether the outcome is a success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Receipt for a successful registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredServer {
    pub server_id: String,
    pub url: String,
    pub transport: TransportKind,
    /// Number of tools the server reported on connect
    pub tool_count: usize,
}

/// One row of `list_servers` output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSummary {
    pub server_id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub transport: TransportKind,
    pub state: ConnectionState,
    pub tool_count: usize,
}

/// One row of `list_tools` output: a tool descriptor joined with its owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedTool {
    #[serde(flatten)]
    pub tool: ToolDescriptor,
    pub server_id: String,
    pub transport: TransportKind,
}

/// Receipt for a removed server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovedServer {
    pub server_id: String,
    pub url: String,
    pub transport: TransportKind,
    /// Routing entries pruned along with the server
    pub removed_tools: Vec<String>,
}

/// Receipt for a removed routing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovedTool {
    pub tool_id: String,
    pub server_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transport_kind_wire_names() {
        assert_eq!(serde_json::to_string(&TransportKind::Jsonrpc).unwrap(), "\"jsonrpc\"");
        assert_eq!(serde_json::to_string(&TransportKind::Sse).unwrap(), "\"sse\"");
        assert_eq!(serde_json::to_string(&TransportKind::Stdio).unwrap(), "\"stdio\"");

        let kind: TransportKind = serde_json::from_str("\"stdio\"").unwrap();
        assert_eq!(kind, TransportKind::Stdio);
        assert_eq!(kind.to_string(), "stdio");
    }

    #[test]
    fn success_outcome_shape() {
        let outcome = ExecuteOutcome::success("forecast", json!({ "temp": 21 }));
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["tool_id"], "forecast");
        assert_eq!(value["result"]["temp"], 21);
    }

    #[test]
    fn error_outcome_omits_empty_fields() {
        let outcome = ExecuteOutcome::error("boom");
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], "boom");
        assert!(value.get("tool_id").is_none());
        assert!(value.get("code").is_none());
        assert!(value.get("details").is_none());
    }

    #[test]
    fn remote_error_outcome_carries_code_and_details() {
        let outcome =
            ExecuteOutcome::remote_error("forecast", "bad params", -32602, Some(json!("city")));
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["code"], -32602);
        assert_eq!(value["details"], "city");
        assert!(!outcome.is_success());
    }

    #[test]
    fn tool_descriptor_accepts_both_schema_spellings() {
        let camel: ToolDescriptor =
            serde_json::from_value(json!({ "name": "a", "inputSchema": { "type": "object" } }))
                .unwrap();
        let snake: ToolDescriptor =
            serde_json::from_value(json!({ "name": "a", "input_schema": { "type": "object" } }))
                .unwrap();
        assert_eq!(camel.input_schema, snake.input_schema);

        let out = serde_json::to_value(&camel).unwrap();
        assert!(out.get("inputSchema").is_some());
    }

    #[test]
    fn connection_params_round_trip_keeps_extras() {
        let params: ConnectionParams = serde_json::from_value(json!({
            "headers": { "Authorization": "Bearer x" },
            "retry_budget": 3
        }))
        .unwrap();
        assert_eq!(params.headers["Authorization"], "Bearer x");
        assert_eq!(params.extra["retry_budget"], 3);

        let back = serde_json::to_value(&params).unwrap();
        assert_eq!(back["retry_budget"], 3);
    }
}
