//! Declarative server-registry configuration.
//!
//! The registry file is TOML: a `[settings]` table plus one
//! `[servers.<name>]` table per server. Parsing is tolerant per entry — a
//! malformed server definition is skipped with a warning so one bad block
//! never takes down the whole registry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable overriding the registry file location.
pub const CONFIG_PATH_ENV: &str = "PESO_MCP_CONFIG";

/// Default registry file location, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config/mcp_servers.toml";

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_priority() -> i32 {
    1
}

fn default_auto_connect() -> bool {
    true
}

/// Registry-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Wall-clock bound for each handshake step, discovery call, and tool
    /// call, in milliseconds. Overridable per server via `timeout_ms`.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// One server definition as written in the registry file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    #[serde(default)]
    pub description: String,
    /// Full argv: program followed by its arguments.
    pub command: Vec<String>,
    /// Environment template: values are literals or whole-value `${VAR}` /
    /// `$VAR` placeholders resolved at connect time.
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_auto_connect")]
    pub auto_connect: bool,
    /// Per-server override of `settings.request_timeout_ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_config: Option<DockerConfig>,
}

/// Container handling for docker-backed servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    pub container_name: String,
    /// Replacement argv used when the container is recreated in interactive
    /// mode. Empty means: rewrite the server's own command.
    #[serde(default)]
    pub interactive_restart_command: Vec<String>,
    #[serde(default)]
    pub restart_on_connect: bool,
}

/// Raw file shape. Server bodies stay as TOML values so each one can be
/// decoded (and rejected) individually.
#[derive(Debug, Default, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    settings: Option<Settings>,
    #[serde(default)]
    servers: toml::Table,
}

/// A parsed registry document: the usable entries plus the names that were
/// skipped as malformed.
#[derive(Debug, Default)]
pub struct ParsedRegistry {
    pub settings: Option<Settings>,
    pub entries: Vec<(String, ServerEntry)>,
    pub skipped: Vec<String>,
}

/// Parse a registry document. Fails only when the document as a whole is
/// not valid TOML; individual bad entries are skipped and reported.
pub fn parse_registry(text: &str) -> Result<ParsedRegistry, toml::de::Error> {
    let file: RegistryFile = toml::from_str(text)?;
    let mut parsed = ParsedRegistry {
        settings: file.settings,
        ..ParsedRegistry::default()
    };
    for (name, value) in file.servers {
        match value.try_into::<ServerEntry>() {
            Ok(entry) if entry.command.is_empty() => {
                tracing::warn!("Server '{name}' has an empty command; skipping");
                parsed.skipped.push(name);
            }
            Ok(entry) => parsed.entries.push((name, entry)),
            Err(e) => {
                tracing::warn!("Skipping malformed server entry '{name}': {e}");
                parsed.skipped.push(name);
            }
        }
    }
    Ok(parsed)
}

/// Registry file location: `PESO_MCP_CONFIG` when set, else
/// `config/mcp_servers.toml`.
pub fn default_config_path() -> PathBuf {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

/// Contents written when no registry file exists. Kept as literal TOML so
/// the generated file carries its own documentation.
pub const DEFAULT_CONFIG: &str = r#"# MCP server registry.
#
# Each [servers.<name>] entry describes how to launch one tool-provider
# process over stdio. Environment values may be literals or whole-value
# ${VAR} placeholders resolved at connect time; every placeholder's
# variable must be set and non-empty for the server to count as available.

[settings]
# Wall-clock bound for each handshake step, discovery call, and tool call.
request_timeout_ms = 10000

[servers.tavily_search]
description = "Web search and research via Tavily"
command = ["npx", "-y", "@modelcontextprotocol/server-tavily"]
capabilities = ["web_search", "news_search", "real_time_data"]
priority = 10
auto_connect = true

[servers.tavily_search.environment]
TAVILY_API_KEY = "${TAVILY_API_KEY}"

# Docker-backed servers are recreated in interactive mode before each
# connect, because a detached container cannot be driven over stdio:
#
# [servers.knowledge_base]
# description = "Project knowledge base"
# command = ["docker", "run", "-d", "--name", "kb-server", "kb-image"]
# capabilities = ["knowledge_base"]
# priority = 5
#
# [servers.knowledge_base.docker_config]
# container_name = "kb-server"
# interactive_restart_command = ["docker", "run", "-i", "--rm", "--name", "kb-server", "kb-image"]
# restart_on_connect = true
"#;

/// Write the default registry file, creating parent directories.
pub fn write_default_config(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, DEFAULT_CONFIG)
}
