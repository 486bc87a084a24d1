//! # toolbroker
//!
//! A connection-and-tool broker for remote tool servers.
//!
//! ## Overview
//!
//! The broker maintains a registry of remote tool-providing servers reachable
//! over multiple transports, exposes their tools under stable identifiers,
//! and executes tool invocations against the owning server while hiding
//! transport differences behind one uniform call contract. This crate
//! provides:
//!
//! - Server registration with a connectivity probe (no partial registration)
//! - A tool-id to server-id routing table with automatic pruning
//! - Lazy, on-demand reconnection with at-most-one connect attempt in flight
//! - A durable JSON registry that survives process restarts
//!
//! ## Transport Types
//!
//! - **Jsonrpc**: plain request/response JSON-RPC 2.0 over HTTP
//! - **Sse**: streamable HTTP with Server-Sent Events responses
//! - **Stdio**: local process communication via stdin/stdout
//!
//! ## Example
//!
//! ```no_run
//! use toolbroker::{ConnectionManager, ConnectionParams, TransportKind};
//!
//! # async fn run() -> toolbroker::Result<()> {
//! let manager = ConnectionManager::new();
//! manager
//!     .register(
//!         "weather",
//!         "http://localhost:8500",
//!         "Weather forecasts",
//!         TransportKind::Jsonrpc,
//!         ConnectionParams::default(),
//!     )
//!     .await?;
//!
//! let outcome = manager
//!     .execute("forecast", serde_json::json!({ "city": "nyc" }))
//!     .await;
//! assert!(outcome.is_success());
//!
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod manager;
pub mod registry;
pub mod transport;
pub mod types;

pub use codec::{build_request, parse_response, RpcError, RpcRequest, RpcResponse};
pub use connection::ServerConnection;
pub use manager::ConnectionManager;
pub use registry::{PersistedServer, RegistrySnapshot};
pub use transport::{Channel, JsonRpcTransport, SseTransport, StdioTransport, Transport};
pub use types::{
    ConnectionParams, ConnectionState, ExecuteOutcome, RegisteredServer, RemovedServer,
    RemovedTool, Result, RoutedTool, ServerSummary, ToolDescriptor, TransportKind,
};

use thiserror::Error;

/// Broker errors
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Invalid registration: {0}")]
    Validation(String),

    #[error("Server '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Server '{0}' is not registered")]
    UnknownServer(String),

    #[error("Tool '{0}' is not registered with any server")]
    UnknownTool(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout waiting for server: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Response id mismatch: expected '{expected}', got '{got}'")]
    IdMismatch { expected: String, got: String },

    #[error("Remote error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
