//! Typed MCP protocol layer: the request catalogue, handshake payloads,
//! and discovery results.
//!
//! Each RPC method the client can issue is a variant of [`McpRequest`];
//! result payloads are decoded into typed structs so malformed server
//! output fails with a protocol error instead of a silent missing field.

use crate::error::McpError;
use crate::jsonrpc::Response;
use serde::Deserialize;
use serde_json::{Value, json};

/// MCP protocol revision this client speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name advertised in the `initialize` handshake.
pub const CLIENT_NAME: &str = "peso";

/// Method name of the post-handshake notification.
pub const INITIALIZED_METHOD: &str = "notifications/initialized";

/// Every request this client can issue.
#[derive(Debug, Clone)]
pub enum McpRequest {
    Initialize,
    ListTools,
    ListResources,
    CallTool { name: String, arguments: Value },
    ReadResource { uri: String },
}

impl McpRequest {
    /// Wire method name.
    pub fn method(&self) -> &'static str {
        match self {
            McpRequest::Initialize => "initialize",
            McpRequest::ListTools => "tools/list",
            McpRequest::ListResources => "resources/list",
            McpRequest::CallTool { .. } => "tools/call",
            McpRequest::ReadResource { .. } => "resources/read",
        }
    }

    /// Parameter object, if the method takes one.
    pub fn params(&self) -> Option<Value> {
        match self {
            McpRequest::Initialize => Some(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {},
                    "resources": {},
                },
                "clientInfo": {
                    "name": CLIENT_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                },
            })),
            McpRequest::ListTools | McpRequest::ListResources => None,
            McpRequest::CallTool { name, arguments } => Some(json!({
                "name": name,
                "arguments": arguments,
            })),
            McpRequest::ReadResource { uri } => Some(json!({ "uri": uri })),
        }
    }
}

/// A tool advertised by a server via `tools/list`.
///
/// The input schema is opaque structured data passed through to callers
/// that build tool catalogues; this crate never interprets it.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema", rename = "inputSchema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// A resource advertised by a server via `resources/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_mime_type", rename = "mimeType")]
    pub mime_type: String,
}

fn default_mime_type() -> String {
    "text/plain".to_string()
}

/// Result payload of `initialize`.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(default, rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default, rename = "serverInfo")]
    pub server_info: Option<ServerInfo>,
    #[serde(default)]
    pub capabilities: Value,
}

/// Identity a server reports about itself during the handshake.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Result payload of `tools/list`.
#[derive(Debug, Default, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

/// Result payload of `resources/list`.
#[derive(Debug, Default, Deserialize)]
pub struct ResourcesListResult {
    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
}

/// Result payload of `resources/read`.
#[derive(Debug, Default, Deserialize)]
pub struct ReadResourceResult {
    #[serde(default)]
    pub contents: Vec<ResourceContent>,
}

/// One content item inside a `resources/read` result.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceContent {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
}

/// Unwrap a response envelope into its typed result.
///
/// A JSON-RPC error envelope becomes [`McpError::JsonRpc`]; a response with
/// neither result nor error, or a result that does not match `T`, becomes
/// [`McpError::Protocol`].
pub fn expect_result<T>(server: &str, method: &str, response: Response) -> Result<T, McpError>
where
    T: for<'de> Deserialize<'de>,
{
    if let Some(err) = response.error {
        return Err(McpError::JsonRpc {
            server: server.to_string(),
            code: err.code,
            message: err.message,
        });
    }
    let result = response.result.ok_or_else(|| {
        McpError::Protocol(format!("'{method}' response has neither result nor error"))
    })?;
    serde_json::from_value(result)
        .map_err(|e| McpError::Protocol(format!("Malformed '{method}' result: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_params_carry_identity() {
        let params = McpRequest::Initialize.params().unwrap();
        assert_eq!(params["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(params["clientInfo"]["name"], CLIENT_NAME);
        assert!(params["capabilities"]["tools"].is_object());
        assert!(params["capabilities"]["resources"].is_object());
    }

    #[test]
    fn list_requests_take_no_params() {
        assert!(McpRequest::ListTools.params().is_none());
        assert!(McpRequest::ListResources.params().is_none());
        assert_eq!(McpRequest::ListTools.method(), "tools/list");
        assert_eq!(McpRequest::ListResources.method(), "resources/list");
    }

    #[test]
    fn call_tool_params_wrap_name_and_arguments() {
        let req = McpRequest::CallTool {
            name: "search".to_string(),
            arguments: json!({"query": "inflation"}),
        };
        assert_eq!(req.method(), "tools/call");
        let params = req.params().unwrap();
        assert_eq!(params["name"], "search");
        assert_eq!(params["arguments"]["query"], "inflation");
    }

    #[test]
    fn read_resource_params_wrap_uri() {
        let req = McpRequest::ReadResource {
            uri: "memory://recent".to_string(),
        };
        assert_eq!(req.method(), "resources/read");
        assert_eq!(req.params().unwrap()["uri"], "memory://recent");
    }

    #[test]
    fn deserialize_tool_descriptor() {
        let json = r#"{
            "name": "search",
            "description": "Web search",
            "inputSchema": {
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }
        }"#;
        let tool: ToolDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(tool.name, "search");
        assert_eq!(tool.description, "Web search");
        assert_eq!(tool.input_schema["required"][0], "query");
    }

    #[test]
    fn tool_descriptor_defaults() {
        let tool: ToolDescriptor = serde_json::from_str(r#"{"name": "ping"}"#).unwrap();
        assert!(tool.description.is_empty());
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn deserialize_resource_descriptor() {
        let json = r#"{
            "uri": "memory://recent",
            "name": "Recent memory",
            "mimeType": "application/json"
        }"#;
        let res: ResourceDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(res.uri, "memory://recent");
        assert_eq!(res.mime_type, "application/json");
    }

    #[test]
    fn resource_descriptor_mime_defaults_to_text() {
        let res: ResourceDescriptor = serde_json::from_str(r#"{"uri": "db://x"}"#).unwrap();
        assert_eq!(res.mime_type, "text/plain");
    }

    #[test]
    fn deserialize_initialize_result() {
        let json = r#"{
            "protocolVersion": "2024-11-05",
            "serverInfo": {"name": "tavily", "version": "0.2.0"},
            "capabilities": {"tools": {}}
        }"#;
        let init: InitializeResult = serde_json::from_str(json).unwrap();
        assert_eq!(init.protocol_version, "2024-11-05");
        assert_eq!(init.server_info.unwrap().name, "tavily");
    }

    #[test]
    fn expect_result_decodes_typed_payload() {
        let resp = crate::jsonrpc::Response {
            id: Some(1),
            result: Some(json!({"tools": [{"name": "a"}, {"name": "b"}]})),
            error: None,
        };
        let list: ToolsListResult = expect_result("srv", "tools/list", resp).unwrap();
        assert_eq!(list.tools.len(), 2);
    }

    #[test]
    fn expect_result_surfaces_error_envelope() {
        let resp = crate::jsonrpc::Response {
            id: Some(1),
            result: None,
            error: Some(crate::jsonrpc::RpcError {
                code: -32600,
                message: "Invalid Request".to_string(),
                data: None,
            }),
        };
        let err = expect_result::<ToolsListResult>("srv", "tools/list", resp).unwrap_err();
        match err {
            McpError::JsonRpc { server, code, .. } => {
                assert_eq!(server, "srv");
                assert_eq!(code, -32600);
            }
            other => panic!("Expected JsonRpc, got {other:?}"),
        }
    }

    #[test]
    fn expect_result_rejects_empty_envelope() {
        let resp = crate::jsonrpc::Response {
            id: Some(1),
            result: None,
            error: None,
        };
        let err = expect_result::<ToolsListResult>("srv", "tools/list", resp).unwrap_err();
        assert!(matches!(err, McpError::Protocol(_)));
    }

    #[test]
    fn expect_result_rejects_malformed_payload() {
        let resp = crate::jsonrpc::Response {
            id: Some(1),
            result: Some(json!({"tools": "not-an-array"})),
            error: None,
        };
        let err = expect_result::<ToolsListResult>("srv", "tools/list", resp).unwrap_err();
        assert!(matches!(err, McpError::Protocol(_)));
    }
}
