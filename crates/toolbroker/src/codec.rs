//! # Fallback RPC Codec
//!
//! Minimal JSON-RPC 2.0 envelope builder and validator used by the
//! request/response transport. The streaming and stdio transports reuse the
//! same envelope types but parse them as typed messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::Result;
use crate::BrokerError;

/// Reserved error codes from the JSON-RPC 2.0 spec
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// JSON-RPC request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    pub params: Value,
}

/// JSON-RPC response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC notification (no id, no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// Build a JSON-RPC 2.0 request, generating a `<uuid>-<unix_seconds>` id
/// when none is given.
pub fn build_request(method: &str, params: Value, id: Option<String>) -> RpcRequest {
    let id = id.unwrap_or_else(|| {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        format!("{}-{}", uuid::Uuid::new_v4(), seconds)
    });

    RpcRequest {
        jsonrpc: "2.0".to_string(),
        id,
        method: method.to_string(),
        params,
    }
}

/// Parse and validate a raw JSON-RPC response, returning the raw `result`
/// value.
///
/// Fails with `Parse` on invalid syntax, `Protocol` when the envelope lacks
/// the `"jsonrpc": "2.0"` marker or both `result` and `error`, and
/// `IdMismatch` when `expected_id` does not match. A remote error payload is
/// re-surfaced as `BrokerError::Remote`.
pub fn parse_envelope(raw: &str, expected_id: Option<&str>) -> Result<Value> {
    let response: Value = serde_json::from_str(raw)
        .map_err(|e| BrokerError::Parse(format!("Invalid JSON response: {e}")))?;

    let envelope = response
        .as_object()
        .ok_or_else(|| BrokerError::Protocol("Response is not a JSON object".to_string()))?;

    if envelope.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(BrokerError::Protocol(
            "Missing 'jsonrpc': '2.0' version marker".to_string(),
        ));
    }

    if let Some(expected) = expected_id {
        let got = envelope.get("id").cloned().unwrap_or(Value::Null);
        // A server that failed to parse the request cannot echo its id, so
        // only error responses may carry a null id
        let null_error = got == Value::Null && envelope.get("error").is_some();
        if !null_error && got.as_str() != Some(expected) {
            return Err(BrokerError::IdMismatch {
                expected: expected.to_string(),
                got: got.to_string(),
            });
        }
    }

    if let Some(error) = envelope.get("error") {
        let error: RpcError = serde_json::from_value(error.clone()).map_err(|_| {
            BrokerError::Protocol("Malformed 'error' object in response".to_string())
        })?;
        return Err(BrokerError::Remote {
            code: error.code,
            message: error.message,
            data: error.data,
        });
    }

    match envelope.get("result") {
        Some(result) => Ok(result.clone()),
        None => Err(BrokerError::Protocol(
            "Response carries neither 'result' nor 'error'".to_string(),
        )),
    }
}

/// Parse a raw JSON-RPC response down to its payload: the `result` field's
/// `output` sub-field when present, else the raw `result`.
pub fn parse_response(raw: &str, expected_id: Option<&str>) -> Result<Value> {
    parse_envelope(raw, expected_id).map(unwrap_output)
}

/// Unwrap a `{"output": ...}` result wrapper if the remote used one.
pub fn unwrap_output(result: Value) -> Value {
    match result {
        Value::Object(ref map) if map.contains_key("output") => {
            result.get("output").cloned().unwrap_or(result)
        }
        other => other,
    }
}
