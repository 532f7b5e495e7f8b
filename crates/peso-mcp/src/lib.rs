//! MCP (Model Context Protocol) client library for peso.
//!
//! Supports stdio-based MCP servers that communicate via newline-delimited
//! JSON-RPC 2.0 messages. A declarative registry describes each server,
//! a connection drives the spawn/handshake/discovery lifecycle for one
//! child process, and a manager owns the live connection set and routes
//! tool calls by qualified name or capability.

pub mod config;
pub mod connection;
mod docker;
pub mod env;
pub mod error;
pub mod jsonrpc;
pub mod manager;
pub mod protocol;
pub mod registry;
mod transport;

pub use config::{DockerConfig, ServerEntry, Settings, default_config_path};
pub use connection::{Connection, ConnectionState};
pub use env::{EnvProvider, SystemEnv};
pub use error::McpError;
pub use manager::{ConnectionStats, Manager, QualifiedTool, ServerStats};
pub use protocol::{ResourceDescriptor, ServerInfo, ToolDescriptor};
pub use registry::{Registry, ServerSpec};
