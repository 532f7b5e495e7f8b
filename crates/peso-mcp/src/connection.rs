//! A live connection to one MCP server process.
//!
//! `connect` drives the full sequence — docker handling, spawn, handshake,
//! discovery — and only hands back a `Connection` once the server is fully
//! `Connected`. After that, `call_tool` and `read_resource` are the only
//! wire operations; a failure is either per-call (JSON-RPC error, timeout)
//! or fatal (transport dead), and only the latter moves the state to
//! `Failed`.

use crate::docker;
use crate::error::McpError;
use crate::protocol::{
    self, InitializeResult, McpRequest, ReadResourceResult, ResourceDescriptor, ResourcesListResult,
    ServerInfo, ToolDescriptor, ToolsListResult,
};
use crate::registry::ServerSpec;
use crate::transport::StdioTransport;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

/// Protocol lifecycle of a connection. Intermediate states exist only
/// while `connect` runs; a constructed `Connection` is `Connected` until a
/// fatal failure or `disconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Spawning = 1,
    HandshakeSent = 2,
    InitializedSent = 3,
    DiscoveringTools = 4,
    DiscoveringResources = 5,
    Connected = 6,
    Failed = 7,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Spawning,
            2 => ConnectionState::HandshakeSent,
            3 => ConnectionState::InitializedSent,
            4 => ConnectionState::DiscoveringTools,
            5 => ConnectionState::DiscoveringResources,
            6 => ConnectionState::Connected,
            _ => ConnectionState::Failed,
        }
    }

    /// Lowercase label for logs and stats.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Spawning => "spawning",
            ConnectionState::HandshakeSent => "handshake_sent",
            ConnectionState::InitializedSent => "initialized_sent",
            ConnectionState::DiscoveringTools => "discovering_tools",
            ConnectionState::DiscoveringResources => "discovering_resources",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One server process, its discovered surface, and its protocol state.
pub struct Connection {
    spec: Arc<ServerSpec>,
    transport: StdioTransport,
    state: AtomicU8,
    tools: BTreeMap<String, ToolDescriptor>,
    resources: BTreeMap<String, ResourceDescriptor>,
    server_info: Option<ServerInfo>,
    connected_at: DateTime<Utc>,
}

impl Connection {
    /// Launch the server and take it all the way to `Connected`. On any
    /// failure the child is killed and the error returned; no partially
    /// initialized `Connection` ever escapes.
    pub async fn connect(
        spec: Arc<ServerSpec>,
        env: HashMap<String, String>,
        workdir: &Path,
        timeout: Duration,
    ) -> Result<Self, McpError> {
        tracing::info!("Connecting to MCP server '{}'", spec.name);
        let mut state = ConnectionState::Disconnected;
        advance(&spec.name, &mut state, ConnectionState::Spawning);

        let plan = docker::plan_launch(&spec.command, spec.docker.as_ref());
        if let Some(container) = &plan.restart_container {
            docker::remove_container(container, timeout).await?;
        }

        let transport = StdioTransport::spawn(&spec.name, &plan.argv, &env, workdir, timeout)?;

        match Self::handshake_and_discover(&spec, &transport, &mut state).await {
            Ok((server_info, tools, resources)) => {
                advance(&spec.name, &mut state, ConnectionState::Connected);
                tracing::info!(
                    "MCP server '{}' connected ({} tools, {} resources)",
                    spec.name,
                    tools.len(),
                    resources.len()
                );
                Ok(Self {
                    spec,
                    transport,
                    state: AtomicU8::new(ConnectionState::Connected as u8),
                    tools,
                    resources,
                    server_info,
                    connected_at: Utc::now(),
                })
            }
            Err(e) => {
                tracing::warn!("Connect to '{}' failed in state {state}: {e}", spec.name);
                transport.kill().await;
                Err(e)
            }
        }
    }

    async fn handshake_and_discover(
        spec: &ServerSpec,
        transport: &StdioTransport,
        state: &mut ConnectionState,
    ) -> Result<
        (
            Option<ServerInfo>,
            BTreeMap<String, ToolDescriptor>,
            BTreeMap<String, ResourceDescriptor>,
        ),
        McpError,
    > {
        advance(&spec.name, state, ConnectionState::HandshakeSent);
        let req = McpRequest::Initialize;
        let resp = transport.request(req.method(), req.params()).await?;
        let init: InitializeResult = protocol::expect_result(&spec.name, req.method(), resp)?;
        if let Some(info) = &init.server_info {
            tracing::debug!(
                "Server '{}' is {} {} (protocol {})",
                spec.name,
                info.name,
                info.version.as_deref().unwrap_or("?"),
                init.protocol_version
            );
        }

        // The flush ack on this notification is the gate between handshake
        // and discovery; once it returns, the child has the bytes.
        advance(&spec.name, state, ConnectionState::InitializedSent);
        transport.notify(protocol::INITIALIZED_METHOD, None).await?;

        advance(&spec.name, state, ConnectionState::DiscoveringTools);
        let tools = Self::discover_tools(spec, transport).await?;

        advance(&spec.name, state, ConnectionState::DiscoveringResources);
        let resources = Self::discover_resources(spec, transport).await?;

        Ok((init.server_info, tools, resources))
    }

    /// `tools/list`. A server that declines (error envelope) or answers
    /// without a result simply has no tools; transport and timeout
    /// failures propagate and fail the connect.
    async fn discover_tools(
        spec: &ServerSpec,
        transport: &StdioTransport,
    ) -> Result<BTreeMap<String, ToolDescriptor>, McpError> {
        let req = McpRequest::ListTools;
        let resp = transport.request(req.method(), req.params()).await?;
        if let Some(err) = &resp.error {
            tracing::debug!(
                "Server '{}' declined tools/list (code {}): {}",
                spec.name,
                err.code,
                err.message
            );
            return Ok(BTreeMap::new());
        }
        let Some(result) = resp.result else {
            return Ok(BTreeMap::new());
        };
        let list: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Malformed tools/list result: {e}")))?;
        let mut tools = BTreeMap::new();
        for tool in list.tools {
            tracing::debug!("Discovered tool '{}' on '{}'", tool.name, spec.name);
            tools.insert(tool.name.clone(), tool);
        }
        Ok(tools)
    }

    /// `resources/list`, with the same tolerance as tool discovery.
    async fn discover_resources(
        spec: &ServerSpec,
        transport: &StdioTransport,
    ) -> Result<BTreeMap<String, ResourceDescriptor>, McpError> {
        let req = McpRequest::ListResources;
        let resp = transport.request(req.method(), req.params()).await?;
        if let Some(err) = &resp.error {
            tracing::debug!(
                "Server '{}' declined resources/list (code {}): {}",
                spec.name,
                err.code,
                err.message
            );
            return Ok(BTreeMap::new());
        }
        let Some(result) = resp.result else {
            return Ok(BTreeMap::new());
        };
        let list: ResourcesListResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Malformed resources/list result: {e}")))?;
        Ok(list
            .resources
            .into_iter()
            .map(|res| (res.uri.clone(), res))
            .collect())
    }

    /// Call a discovered tool. Unknown names are rejected locally, before
    /// anything touches the wire. A JSON-RPC error envelope is surfaced as
    /// a typed failure while the connection stays usable.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected {
                server: self.name().to_string(),
            });
        }
        if !self.tools.contains_key(tool) {
            return Err(McpError::UnknownTool {
                server: self.name().to_string(),
                tool: tool.to_string(),
            });
        }

        let req = McpRequest::CallTool {
            name: tool.to_string(),
            arguments,
        };
        let resp = match self.transport.request(req.method(), req.params()).await {
            Ok(resp) => resp,
            Err(e) => {
                self.note_failure(&e).await;
                return Err(e);
            }
        };
        if let Some(err) = resp.error {
            return Err(McpError::JsonRpc {
                server: self.name().to_string(),
                code: err.code,
                message: err.message,
            });
        }
        resp.result.ok_or_else(|| {
            McpError::Protocol("tools/call response has neither result nor error".to_string())
        })
    }

    /// Read a resource, returning its first text content (empty when the
    /// server sends none). The uri is not required to have been listed;
    /// servers may serve templated uris beyond their advertised set.
    pub async fn read_resource(&self, uri: &str) -> Result<String, McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected {
                server: self.name().to_string(),
            });
        }

        let req = McpRequest::ReadResource {
            uri: uri.to_string(),
        };
        let resp = match self.transport.request(req.method(), req.params()).await {
            Ok(resp) => resp,
            Err(e) => {
                self.note_failure(&e).await;
                return Err(e);
            }
        };
        let result: ReadResourceResult = protocol::expect_result(self.name(), req.method(), resp)?;
        Ok(result
            .contents
            .into_iter()
            .find_map(|content| content.text)
            .unwrap_or_default())
    }

    /// Mark the connection failed and kill the child when an error means
    /// the transport is gone.
    async fn note_failure(&self, err: &McpError) {
        if err.is_fatal() {
            tracing::warn!("Transport to '{}' is dead: {err}", self.name());
            self.set_state(ConnectionState::Failed);
            self.transport.kill().await;
        }
    }

    /// Graceful teardown: close stdin, wait briefly, kill on expiry.
    pub async fn disconnect(&self) {
        tracing::info!("Disconnecting MCP server '{}'", self.name());
        self.set_state(ConnectionState::Disconnected);
        self.transport.shutdown().await;
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    /// Discovered tools, name-keyed.
    pub fn tools(&self) -> &BTreeMap<String, ToolDescriptor> {
        &self.tools
    }

    /// Discovered resources, uri-keyed.
    pub fn resources(&self) -> &BTreeMap<String, ResourceDescriptor> {
        &self.resources
    }

    pub fn has_tool(&self, tool: &str) -> bool {
        self.tools.contains_key(tool)
    }

    /// Identity reported by the server during the handshake, if any.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }
}

fn advance(server: &str, state: &mut ConnectionState, next: ConnectionState) {
    tracing::debug!("'{server}' {state} -> {next}");
    *state = next;
}
