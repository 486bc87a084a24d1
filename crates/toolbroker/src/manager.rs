//! # Connection Manager
//!
//! Owns the set of server connections and the tool-id to server-id routing
//! table, and exposes the register/list/execute/remove surface.

use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::connection::ServerConnection;
use crate::registry::{self, PersistedServer, RegistrySnapshot};
use crate::transport;
use crate::types::{
    ConnectionParams, ExecuteOutcome, RegisteredServer, RemovedServer, RemovedTool, Result,
    RoutedTool, ServerSummary, ToolDescriptor, TransportKind,
};
use crate::BrokerError;

/// Manages every registered server connection and routes tool calls to the
/// owning server.
///
/// One instance is owned by the hosting application and passed by handle to
/// callers; there is no process-wide singleton.
pub struct ConnectionManager {
    /// Server connections in registration order
    servers: RwLock<IndexMap<String, Arc<ServerConnection>>>,
    /// tool_id -> server_id, in routing-entry insertion order
    routes: RwLock<IndexMap<String, String>>,
    /// Where to persist the registry, if anywhere
    registry_path: RwLock<Option<PathBuf>>,
}

impl ConnectionManager {
    /// Create an empty manager with persistence disabled
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(IndexMap::new()),
            routes: RwLock::new(IndexMap::new()),
            registry_path: RwLock::new(None),
        }
    }

    /// Create a manager that persists its registry to `path`
    pub fn with_registry_path(path: impl Into<PathBuf>) -> Self {
        Self {
            servers: RwLock::new(IndexMap::new()),
            routes: RwLock::new(IndexMap::new()),
            registry_path: RwLock::new(Some(path.into())),
        }
    }

    /// Create a manager that persists its registry to the platform default
    /// location ([`registry::default_path`]). Persistence stays disabled when
    /// the platform exposes no config directory.
    pub fn with_default_registry_path() -> Self {
        Self {
            servers: RwLock::new(IndexMap::new()),
            routes: RwLock::new(IndexMap::new()),
            registry_path: RwLock::new(registry::default_path()),
        }
    }

    /// Where the registry is persisted, if anywhere
    pub async fn registry_path(&self) -> Option<PathBuf> {
        self.registry_path.read().await.clone()
    }

    /// Set (or change) the registry persistence path
    pub async fn set_registry_path(&self, path: impl Into<PathBuf>) {
        *self.registry_path.write().await = Some(path.into());
    }

    /// Register a new server after a successful connectivity check.
    ///
    /// Validation failures and a failed connect leave the registry unchanged:
    /// the server is only added once `connect()` succeeded, and every tool it
    /// reported is routed to it (last registration wins on name collisions).
    pub async fn register(
        &self,
        server_id: &str,
        url: &str,
        description: &str,
        transport: TransportKind,
        params: ConnectionParams,
    ) -> Result<RegisteredServer> {
        validate_registration(url, transport, &params)?;

        if self.servers.read().await.contains_key(server_id) {
            return Err(BrokerError::AlreadyRegistered(server_id.to_string()));
        }

        let adapter = transport::create(transport, url, &params)?;
        let connection = Arc::new(ServerConnection::new(
            server_id,
            url,
            description,
            transport,
            params,
            adapter,
        ));

        connection.connect().await.map_err(|e| {
            BrokerError::Connection(format!(
                "Couldn't reach the server at {url} - is it running? ({e})"
            ))
        })?;

        let tools = connection.tools().await;
        {
            let mut servers = self.servers.write().await;
            // Re-check under the write lock: a concurrent registration of
            // the same id wins.
            if servers.contains_key(server_id) {
                drop(servers);
                connection.disconnect().await;
                return Err(BrokerError::AlreadyRegistered(server_id.to_string()));
            }
            servers.insert(server_id.to_string(), Arc::clone(&connection));

            let mut routes = self.routes.write().await;
            for tool in &tools {
                routes.insert(tool.name.clone(), server_id.to_string());
            }
        }

        info!(server_id, url, %transport, tool_count = tools.len(), "Server registered");
        self.persist().await;

        Ok(RegisteredServer {
            server_id: server_id.to_string(),
            url: url.to_string(),
            transport,
            tool_count: tools.len(),
        })
    }

    /// Summaries of every registered server, in registration order
    pub async fn list_servers(&self) -> Vec<ServerSummary> {
        let servers = self.servers.read().await;
        let mut summaries = Vec::with_capacity(servers.len());
        for (server_id, connection) in servers.iter() {
            summaries.push(ServerSummary {
                server_id: server_id.clone(),
                url: connection.url().to_string(),
                description: connection.description().to_string(),
                transport: connection.transport_kind(),
                state: connection.state().await,
                tool_count: connection.tools().await.len(),
            });
        }
        summaries
    }

    /// Every routed tool joined with its owning server, in routing order.
    ///
    /// Entries whose server has disappeared are silently skipped; a route
    /// whose descriptor is missing from the server's cache (not reconnected
    /// yet) gets a stub descriptor.
    pub async fn list_tools(&self) -> Vec<RoutedTool> {
        let servers = self.servers.read().await;
        let routes = self.routes.read().await;

        let mut tools = Vec::with_capacity(routes.len());
        for (tool_id, server_id) in routes.iter() {
            let Some(connection) = servers.get(server_id) else {
                continue;
            };

            let tool = connection
                .tools()
                .await
                .into_iter()
                .find(|t| &t.name == tool_id)
                .unwrap_or_else(|| ToolDescriptor::stub(tool_id, server_id));

            tools.push(RoutedTool {
                tool,
                server_id: server_id.clone(),
                transport: connection.transport_kind(),
            });
        }
        tools
    }

    /// Execute a tool on its owning server.
    ///
    /// Routing misses never contact any server; transport failures come back
    /// as structured error outcomes, not errors.
    pub async fn execute(&self, tool_id: &str, input: serde_json::Value) -> ExecuteOutcome {
        let server_id = match self.routes.read().await.get(tool_id) {
            Some(server_id) => server_id.clone(),
            None => {
                return ExecuteOutcome::error(
                    BrokerError::UnknownTool(tool_id.to_string()).to_string(),
                )
            }
        };

        // Defensive: a removed server should have had its routes pruned
        let connection = match self.servers.read().await.get(&server_id) {
            Some(connection) => Arc::clone(connection),
            None => {
                warn!(tool_id, server_id, "Dangling route");
                return ExecuteOutcome::error(format!(
                    "Server '{server_id}' for tool '{tool_id}' is not registered"
                ));
            }
        };

        // No registry lock is held across the call itself
        connection.execute(tool_id, input).await
    }

    /// Route a tool to a server by hand, without asking the server whether it
    /// offers it. Last registration wins.
    pub async fn route_tool(&self, tool_id: &str, server_id: &str) -> Result<()> {
        if !self.servers.read().await.contains_key(server_id) {
            return Err(BrokerError::UnknownServer(server_id.to_string()));
        }
        self.routes
            .write()
            .await
            .insert(tool_id.to_string(), server_id.to_string());
        self.persist().await;
        Ok(())
    }

    /// Disconnect and remove a server, pruning every route that pointed at
    /// it. Reports the pruned tool ids.
    pub async fn remove_server(&self, server_id: &str) -> Result<RemovedServer> {
        let connection = {
            let mut servers = self.servers.write().await;
            servers
                .shift_remove(server_id)
                .ok_or_else(|| BrokerError::UnknownServer(server_id.to_string()))?
        };

        connection.disconnect().await;

        let removed_tools = {
            let mut routes = self.routes.write().await;
            let removed: Vec<String> = routes
                .iter()
                .filter(|(_, owner)| owner.as_str() == server_id)
                .map(|(tool_id, _)| tool_id.clone())
                .collect();
            routes.retain(|_, owner| owner.as_str() != server_id);
            removed
        };

        info!(server_id, removed = removed_tools.len(), "Server removed");
        self.persist().await;

        Ok(RemovedServer {
            server_id: server_id.to_string(),
            url: connection.url().to_string(),
            transport: connection.transport_kind(),
            removed_tools,
        })
    }

    /// Remove a single routing entry; the server and its other tools remain.
    pub async fn remove_tool(&self, tool_id: &str) -> Result<RemovedTool> {
        let server_id = self
            .routes
            .write()
            .await
            .shift_remove(tool_id)
            .ok_or_else(|| BrokerError::UnknownTool(tool_id.to_string()))?;

        info!(tool_id, server_id, "Tool route removed");
        self.persist().await;

        Ok(RemovedTool {
            tool_id: tool_id.to_string(),
            server_id,
        })
    }

    /// Disconnect every server connection. Failures are logged, never
    /// propagated, and teardown continues past them. Safe to call multiple
    /// times.
    pub async fn shutdown(&self) {
        let connections: Vec<Arc<ServerConnection>> =
            self.servers.read().await.values().cloned().collect();

        info!(count = connections.len(), "Shutting down server connections");
        for connection in connections {
            connection.disconnect().await;
        }
    }

    /// Build a persistable snapshot of the current registry
    pub async fn snapshot(&self) -> RegistrySnapshot {
        let servers = self.servers.read().await;
        let routes = self.routes.read().await;

        let mut snapshot = RegistrySnapshot::default();
        for (server_id, connection) in servers.iter() {
            snapshot.servers.insert(
                server_id.clone(),
                PersistedServer {
                    url: connection.url().to_string(),
                    transport: connection.transport_kind(),
                    connection_params: connection.params().clone(),
                    description: connection.description().to_string(),
                },
            );
        }
        for (tool_id, server_id) in routes.iter() {
            snapshot
                .tool_routes
                .insert(tool_id.clone(), server_id.clone());
        }
        snapshot
    }

    /// Persist the registry to the configured path, if one is set
    pub async fn save_registry(&self) -> Result<()> {
        let Some(path) = self.registry_path.read().await.clone() else {
            return Err(BrokerError::Persistence(
                "No registry path configured".to_string(),
            ));
        };
        registry::save(&self.snapshot().await, &path).await
    }

    /// Load a registry snapshot, replacing the in-memory server set and
    /// routing table.
    ///
    /// Rehydrated servers come back `Disconnected`; reconnection happens
    /// lazily on first use, never here. Returns the number of servers
    /// loaded. Entries whose transport can no longer be built (for example a
    /// stdio record without a command) are skipped with a warning.
    pub async fn load_registry(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let snapshot = registry::load(path).await?;
        *self.registry_path.write().await = Some(path.to_path_buf());

        let mut servers = IndexMap::new();
        for (server_id, record) in &snapshot.servers {
            let adapter =
                match transport::create(record.transport, &record.url, &record.connection_params) {
                    Ok(adapter) => adapter,
                    Err(e) => {
                        warn!(server_id, error = %e, "Skipping unloadable registry entry");
                        continue;
                    }
                };
            servers.insert(
                server_id.clone(),
                Arc::new(ServerConnection::new(
                    server_id.clone(),
                    record.url.clone(),
                    record.description.clone(),
                    record.transport,
                    record.connection_params.clone(),
                    adapter,
                )),
            );
        }

        let loaded = servers.len();
        *self.servers.write().await = servers;
        *self.routes.write().await = snapshot.tool_routes.clone();

        info!(
            servers = loaded,
            routes = snapshot.tool_routes.len(),
            path = %path.display(),
            "Registry loaded"
        );
        Ok(loaded)
    }

    /// Best-effort persistence after a successful mutation: the in-memory
    /// change already happened, so a save failure is only logged.
    async fn persist(&self) {
        if self.registry_path.read().await.is_none() {
            return;
        }
        if let Err(e) = self.save_registry().await {
            warn!(error = %e, "Failed to persist registry");
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_registration(
    url: &str,
    transport: TransportKind,
    params: &ConnectionParams,
) -> Result<()> {
    if transport.is_network() && !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(BrokerError::Validation(format!(
            "URL '{url}' must start with http:// or https:// for the {transport} transport"
        )));
    }
    if transport == TransportKind::Stdio && params.command.as_deref().unwrap_or("").is_empty() {
        return Err(BrokerError::Validation(
            "stdio transport requires a 'command' parameter".to_string(),
        ));
    }
    Ok(())
}
