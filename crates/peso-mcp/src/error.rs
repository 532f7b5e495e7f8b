//! Error types for MCP operations.

use thiserror::Error;

/// Errors from MCP registry, connection, and routing operations.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn MCP server '{name}': {source}")]
    SpawnFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("MCP server '{server}' is not connected")]
    NotConnected { server: String },

    #[error("Server '{name}' is not available (unknown name or missing required environment)")]
    ServerUnavailable { name: String },

    #[error("Tool '{tool}' is not provided by server '{server}'")]
    UnknownTool { server: String, tool: String },

    #[error("No connected server matches qualified tool name '{qualified}'")]
    NoRoute { qualified: String },

    #[error("No available server advertises capability '{capability}'")]
    NoCapability { capability: String },

    #[error("Tool '{tool}' not found on any connected server with capability '{capability}'")]
    ToolNotFound { tool: String, capability: String },

    #[error("JSON-RPC error from '{server}' (code {code}): {message}")]
    JsonRpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("Transport to '{server}' failed: {reason}")]
    Transport { server: String, reason: String },

    #[error("Operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// True for failures that mean the underlying transport is dead and the
    /// connection must be torn down and re-established. Timeouts and
    /// JSON-RPC error envelopes are per-call failures and are not fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            McpError::SpawnFailed { .. } | McpError::Transport { .. } | McpError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_fatal() {
        let err = McpError::Transport {
            server: "search".to_string(),
            reason: "stdout closed".to_string(),
        };
        assert!(err.is_fatal());

        let err = McpError::SpawnFailed {
            name: "npx".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn call_level_failures_are_not_fatal() {
        let err = McpError::Timeout {
            operation: "tools/call".to_string(),
            timeout_ms: 10_000,
        };
        assert!(!err.is_fatal());

        let err = McpError::JsonRpc {
            server: "search".to_string(),
            code: -32602,
            message: "Invalid params".to_string(),
        };
        assert!(!err.is_fatal());

        let err = McpError::UnknownTool {
            server: "search".to_string(),
            tool: "fly".to_string(),
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn display_includes_context() {
        let err = McpError::JsonRpc {
            server: "kb".to_string(),
            code: -32601,
            message: "Method not found".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("kb"));
        assert!(msg.contains("-32601"));
        assert!(msg.contains("Method not found"));
    }
}
