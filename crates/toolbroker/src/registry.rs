//! # Registry Persistence
//!
//! Serializes the server set and tool routing table to a JSON file so a
//! restarted process can pick up where it left off. Connection state and
//! cached tool lists are runtime-only and never written.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::types::{ConnectionParams, Result, TransportKind};
use crate::BrokerError;

/// The persisted unit: declarative server records plus the routing table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Server records by id, in registration order
    #[serde(default)]
    pub servers: IndexMap<String, PersistedServer>,
    /// tool_id -> server_id
    #[serde(default, rename = "tool_mappings")]
    pub tool_routes: IndexMap<String, String>,
}

/// The connection-state-free representation of one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedServer {
    pub url: String,
    #[serde(rename = "transport_type")]
    pub transport: TransportKind,
    #[serde(default)]
    pub connection_params: ConnectionParams,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Default registry location under the platform config directory
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("toolbroker").join("registry.json"))
}

/// Load a snapshot from `path`.
///
/// A missing file is a normal first run and yields an empty snapshot; an
/// unreadable or corrupt file is a `Persistence` error.
pub async fn load(path: &Path) -> Result<RegistrySnapshot> {
    if !path.exists() {
        debug!(path = %path.display(), "No registry file, starting empty");
        return Ok(RegistrySnapshot::default());
    }

    let content = fs::read_to_string(path)
        .await
        .map_err(|e| BrokerError::Persistence(format!("Failed to read registry: {e}")))?;

    serde_json::from_str(&content)
        .map_err(|e| BrokerError::Persistence(format!("Corrupt registry file: {e}")))
}

/// Write a snapshot to `path`, fully overwriting any previous content.
///
/// The write is not atomic: a crash mid-write can leave a truncated file.
/// Callers treat save failures as non-fatal.
pub async fn save(snapshot: &RegistrySnapshot, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(snapshot)
        .map_err(|e| BrokerError::Persistence(format!("Failed to encode registry: {e}")))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| BrokerError::Persistence(format!("Failed to create {}: {e}", parent.display())))?;
    }

    fs::write(path, content)
        .await
        .map_err(|e| BrokerError::Persistence(format!("Failed to write registry: {e}")))?;

    info!(
        servers = snapshot.servers.len(),
        routes = snapshot.tool_routes.len(),
        path = %path.display(),
        "Registry saved"
    );
    Ok(())
}
