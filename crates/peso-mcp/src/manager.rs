//! Connection manager: owns every live server connection and routes tool
//! calls by qualified name or capability.
//!
//! The registry is injected at construction; the manager never reaches for
//! global state. Failures stay local — a server that will not connect is
//! logged and skipped, and a failed call on one connection never disturbs
//! another.

use crate::connection::Connection;
use crate::error::McpError;
use crate::registry::{Registry, ServerSpec};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

/// Qualified `<server>_<tool>` name used in flat tool catalogues.
pub fn qualify(server: &str, tool: &str) -> String {
    format!("{server}_{tool}")
}

/// One entry of the flat tool catalogue handed to the orchestration layer.
#[derive(Debug, Clone, Serialize)]
pub struct QualifiedTool {
    /// Qualified `<server>_<tool>` name.
    pub name: String,
    pub server: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Aggregate snapshot of the manager's connections.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub total_servers: usize,
    pub connected_servers: usize,
    /// Tools on Connected servers only.
    pub total_tools: usize,
    pub servers_by_capability: BTreeMap<String, Vec<String>>,
    pub server_details: BTreeMap<String, ServerStats>,
}

/// Per-server slice of [`ConnectionStats`].
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub state: String,
    pub tools: usize,
    pub resources: usize,
    pub capabilities: Vec<String>,
    pub connected_at: DateTime<Utc>,
}

/// Owns the set of connections for one agent session.
pub struct Manager {
    registry: Registry,
    connections: HashMap<String, Connection>,
    workdir: PathBuf,
}

impl Manager {
    /// Manager spawning servers in the current working directory.
    pub fn new(registry: Registry) -> Self {
        let workdir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::with_workdir(registry, workdir)
    }

    /// Manager spawning servers in an explicit working directory.
    pub fn with_workdir(registry: Registry, workdir: PathBuf) -> Self {
        Self {
            registry,
            connections: HashMap::new(),
            workdir,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The connection for `name`, if one exists (in any state).
    pub fn connection(&self, name: &str) -> Option<&Connection> {
        self.connections.get(name)
    }

    /// Names of Connected servers, sorted.
    pub fn connected_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .connections
            .values()
            .filter(|conn| conn.is_connected())
            .map(|conn| conn.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Connect every available auto-connect spec in registry priority
    /// order, returning per-server outcomes in attempt order.
    pub async fn auto_connect_servers(&mut self) -> Vec<(String, bool)> {
        let specs = self.registry.auto_connect_list();
        tracing::info!("Auto-connecting {} MCP servers", specs.len());
        let mut outcomes = Vec::with_capacity(specs.len());
        for spec in specs {
            let name = spec.name.clone();
            let ok = match self.connect_spec(spec).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Auto-connect of '{name}' failed: {e}");
                    false
                }
            };
            outcomes.push((name, ok));
        }
        let connected = outcomes.iter().filter(|(_, ok)| *ok).count();
        tracing::info!("{connected}/{} MCP servers connected", outcomes.len());
        outcomes
    }

    /// On-demand connect by registry name.
    pub async fn connect_server_by_name(&mut self, name: &str) -> Result<(), McpError> {
        let Some(spec) = self.registry.get(name) else {
            return Err(McpError::ServerUnavailable {
                name: name.to_string(),
            });
        };
        if !self.registry.is_available(&spec) {
            tracing::warn!(
                "Server '{name}' is missing required environment: {:?}",
                spec.required_env_keys
            );
            return Err(McpError::ServerUnavailable {
                name: name.to_string(),
            });
        }
        self.connect_spec(spec).await
    }

    /// Connect every available, not-yet-connected spec advertising
    /// `capability`.
    pub async fn connect_servers_with_capability(
        &mut self,
        capability: &str,
    ) -> Vec<(String, bool)> {
        let specs = self.registry.by_capability(capability);
        let mut outcomes = Vec::with_capacity(specs.len());
        for spec in specs {
            if self
                .connections
                .get(&spec.name)
                .is_some_and(|conn| conn.is_connected())
            {
                continue;
            }
            let name = spec.name.clone();
            let ok = match self.connect_spec(spec).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("On-demand connect of '{name}' failed: {e}");
                    false
                }
            };
            outcomes.push((name, ok));
        }
        outcomes
    }

    async fn connect_spec(&mut self, spec: Arc<ServerSpec>) -> Result<(), McpError> {
        if let Some(existing) = self.connections.get(&spec.name) {
            if existing.is_connected() {
                tracing::debug!("Server '{}' is already connected", spec.name);
                return Ok(());
            }
            // A failed or disconnected entry is torn down and replaced.
            if let Some(old) = self.connections.remove(&spec.name) {
                old.disconnect().await;
            }
        }
        let env = self.registry.resolve_env(&spec);
        let timeout = self.registry.timeout_for(&spec);
        let conn = Connection::connect(Arc::clone(&spec), env, &self.workdir, timeout).await?;
        self.connections.insert(spec.name.clone(), conn);
        Ok(())
    }

    /// Route a `<server>_<tool>` qualified name to its owning connection.
    ///
    /// Server names may themselves contain underscores, so the split is
    /// prefix-plus-separator against the Connected server set: a server
    /// that owns the remaining tool name wins outright, then the longest
    /// matching name.
    pub async fn call_tool_by_function_name(
        &self,
        qualified: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let mut candidates: Vec<(&Connection, &str)> = Vec::new();
        for (name, conn) in &self.connections {
            if !conn.is_connected() {
                continue;
            }
            if let Some(rest) = qualified.strip_prefix(name.as_str()) {
                if let Some(tool) = rest.strip_prefix('_') {
                    if !tool.is_empty() {
                        candidates.push((conn, tool));
                    }
                }
            }
        }
        candidates.sort_by(|a, b| {
            b.0.name()
                .len()
                .cmp(&a.0.name().len())
                .then_with(|| a.0.name().cmp(b.0.name()))
        });
        let chosen = candidates
            .iter()
            .find(|(conn, tool)| conn.has_tool(tool))
            .or_else(|| candidates.first());
        let Some((conn, tool)) = chosen else {
            return Err(McpError::NoRoute {
                qualified: qualified.to_string(),
            });
        };
        tracing::debug!("Routing '{qualified}' to server '{}'", conn.name());
        conn.call_tool(tool, arguments).await
    }

    /// Capability-routed call: connect on demand if nothing Connected
    /// advertises `capability`, then send the call to the highest-priority
    /// capable server that owns the tool.
    pub async fn call_tool_smart(
        &mut self,
        capability: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        if self.connected_with_capability(capability).is_empty() {
            tracing::info!("No connected server offers '{capability}'; connecting on demand");
            self.connect_servers_with_capability(capability).await;
        }
        let targets = self.connected_with_capability(capability);
        if targets.is_empty() {
            return Err(McpError::NoCapability {
                capability: capability.to_string(),
            });
        }
        let owner = targets.iter().find(|name| {
            self.connections
                .get(name.as_str())
                .is_some_and(|conn| conn.has_tool(tool))
        });
        let Some(owner) = owner else {
            return Err(McpError::ToolNotFound {
                tool: tool.to_string(),
                capability: capability.to_string(),
            });
        };
        let Some(conn) = self.connections.get(owner.as_str()) else {
            return Err(McpError::NotConnected {
                server: owner.clone(),
            });
        };
        tracing::debug!(
            "Routing '{tool}' via capability '{capability}' to '{}'",
            conn.name()
        );
        conn.call_tool(tool, arguments).await
    }

    /// Connected servers advertising `capability`, descending priority
    /// with name tiebreak.
    fn connected_with_capability(&self, capability: &str) -> Vec<String> {
        let mut conns: Vec<&Connection> = self
            .connections
            .values()
            .filter(|conn| conn.is_connected() && conn.spec().capabilities.contains(capability))
            .collect();
        conns.sort_by(|a, b| {
            b.spec()
                .priority
                .cmp(&a.spec().priority)
                .then_with(|| a.name().cmp(b.name()))
        });
        conns
            .into_iter()
            .map(|conn| conn.name().to_string())
            .collect()
    }

    /// Server name → tool names, Connected servers only.
    pub fn get_available_tools(&self) -> BTreeMap<String, Vec<String>> {
        self.connections
            .values()
            .filter(|conn| conn.is_connected())
            .map(|conn| {
                (
                    conn.name().to_string(),
                    conn.tools().keys().cloned().collect(),
                )
            })
            .collect()
    }

    /// Flat catalogue of qualified tools across Connected servers, for the
    /// orchestration layer to hand to its model.
    pub fn tool_catalog(&self) -> Vec<QualifiedTool> {
        let mut conns: Vec<&Connection> = self
            .connections
            .values()
            .filter(|conn| conn.is_connected())
            .collect();
        conns.sort_by(|a, b| a.name().cmp(b.name()));
        let mut catalog = Vec::new();
        for conn in conns {
            for tool in conn.tools().values() {
                catalog.push(QualifiedTool {
                    name: qualify(conn.name(), &tool.name),
                    server: conn.name().to_string(),
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                });
            }
        }
        catalog
    }

    /// Aggregate counts and per-server detail for observability.
    pub fn get_connection_stats(&self) -> ConnectionStats {
        let mut stats = ConnectionStats {
            total_servers: self.connections.len(),
            connected_servers: 0,
            total_tools: 0,
            servers_by_capability: BTreeMap::new(),
            server_details: BTreeMap::new(),
        };
        for conn in self.connections.values() {
            if conn.is_connected() {
                stats.connected_servers += 1;
                stats.total_tools += conn.tools().len();
                for capability in &conn.spec().capabilities {
                    stats
                        .servers_by_capability
                        .entry(capability.clone())
                        .or_default()
                        .push(conn.name().to_string());
                }
            }
            stats.server_details.insert(
                conn.name().to_string(),
                ServerStats {
                    state: conn.state().to_string(),
                    tools: conn.tools().len(),
                    resources: conn.resources().len(),
                    capabilities: conn.spec().capabilities.iter().cloned().collect(),
                    connected_at: conn.connected_at(),
                },
            );
        }
        for servers in stats.servers_by_capability.values_mut() {
            servers.sort();
        }
        stats
    }

    /// Disconnect everything and clear the connection set. Safe to call
    /// with zero connections.
    pub async fn disconnect_all(&mut self) {
        if self.connections.is_empty() {
            return;
        }
        tracing::info!("Disconnecting {} MCP servers", self.connections.len());
        for (_, conn) in self.connections.drain() {
            conn.disconnect().await;
        }
    }

    /// Disconnect one server; false when no connection existed.
    pub async fn disconnect_server(&mut self, name: &str) -> bool {
        match self.connections.remove(name) {
            Some(conn) => {
                conn.disconnect().await;
                true
            }
            None => false,
        }
    }
}
