//! JSON-RPC 2.0 envelopes and line framing for the stdio transport.
//!
//! Messages are newline-delimited: one JSON object per line. Servers
//! launched via npx or docker routinely print banners or progress text on
//! stdout before (and between) protocol frames, so decoding classifies
//! every line instead of assuming it is a frame.

use serde::{Deserialize, Serialize};

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    /// Create a request. Method names are the fixed MCP catalogue, hence
    /// `&'static str`.
    pub fn new(id: u64, method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    /// Create a notification.
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// The error object of a failed response.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// One line of child stdout, classified.
#[derive(Debug)]
pub enum Frame {
    /// Blank line.
    Empty,
    /// Text that is not a JSON-RPC message.
    Noise,
    /// A server-initiated notification or request; we never answer these,
    /// but they are valid protocol output and carry a method name.
    Notice(String),
    /// A response that can be correlated against an outstanding request.
    Message(Response),
}

/// Classify one raw line from a server's stdout.
///
/// An object carrying `method` is a server-initiated message; an object
/// carrying `id` plus `result` or `error` is a correlatable response.
/// Everything else, including valid JSON of the wrong shape, is noise.
pub fn decode_line(line: &str) -> Frame {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Frame::Empty;
    }
    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => return Frame::Noise,
    };
    let Some(obj) = value.as_object() else {
        return Frame::Noise;
    };
    if let Some(method) = obj.get("method").and_then(|m| m.as_str()) {
        return Frame::Notice(method.to_string());
    }
    if obj.contains_key("id") && (obj.contains_key("result") || obj.contains_key("error")) {
        return match serde_json::from_value::<Response>(value) {
            Ok(resp) => Frame::Message(resp),
            Err(_) => Frame::Noise,
        };
    }
    Frame::Noise
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_request_with_params() {
        let req = Request::new(
            1,
            "tools/call",
            Some(serde_json::json!({"name": "search", "arguments": {}})),
        );
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 1);
        assert_eq!(json["method"], "tools/call");
        assert!(json["params"].is_object());
    }

    #[test]
    fn serialize_request_without_params() {
        let req = Request::new(2, "tools/list", None);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["id"], 2);
        assert!(json.get("params").is_none());
    }

    #[test]
    fn serialize_notification_has_no_id() {
        let notif = Notification::new("notifications/initialized", None);
        let json = serde_json::to_value(&notif).unwrap();
        assert_eq!(json["method"], "notifications/initialized");
        assert!(json.get("id").is_none());
        assert!(json.get("params").is_none());
    }

    #[test]
    fn decode_response_with_result() {
        let frame = decode_line(r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#);
        match frame {
            Frame::Message(resp) => {
                assert_eq!(resp.id, Some(1));
                assert!(resp.result.is_some());
                assert!(resp.error.is_none());
            }
            other => panic!("Expected Message, got {other:?}"),
        }
    }

    #[test]
    fn decode_response_with_error() {
        let frame =
            decode_line(r#"{"jsonrpc":"2.0","id":7,"error":{"code":-32601,"message":"Method not found"}}"#);
        match frame {
            Frame::Message(resp) => {
                let err = resp.error.unwrap();
                assert_eq!(err.code, -32601);
                assert_eq!(err.message, "Method not found");
                assert!(err.data.is_none());
            }
            other => panic!("Expected Message, got {other:?}"),
        }
    }

    #[test]
    fn decode_blank_line() {
        assert!(matches!(decode_line("   "), Frame::Empty));
        assert!(matches!(decode_line(""), Frame::Empty));
    }

    #[test]
    fn decode_banner_text_as_noise() {
        assert!(matches!(decode_line("Starting server v1.2.3..."), Frame::Noise));
        assert!(matches!(decode_line("[INFO] listening"), Frame::Noise));
    }

    #[test]
    fn decode_wrong_shape_json_as_noise() {
        // Valid JSON that is not a JSON-RPC message.
        assert!(matches!(decode_line(r#"{"level":"info","msg":"up"}"#), Frame::Noise));
        assert!(matches!(decode_line(r#"[1,2,3]"#), Frame::Noise));
        assert!(matches!(decode_line(r#""just a string""#), Frame::Noise));
        // An id with neither result nor error is not a response.
        assert!(matches!(decode_line(r#"{"jsonrpc":"2.0","id":3}"#), Frame::Noise));
    }

    #[test]
    fn decode_server_notification_as_notice() {
        let frame = decode_line(r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#);
        match frame {
            Frame::Notice(method) => assert_eq!(method, "notifications/progress"),
            other => panic!("Expected Notice, got {other:?}"),
        }
    }

    #[test]
    fn decode_server_request_as_notice() {
        // A server-to-client request carries both id and method; it must not
        // be mistaken for a response to one of our calls.
        let frame = decode_line(r#"{"jsonrpc":"2.0","id":1,"method":"sampling/createMessage","params":{}}"#);
        assert!(matches!(frame, Frame::Notice(_)));
    }

    #[test]
    fn decode_response_with_error_data() {
        let frame = decode_line(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"Invalid","data":"extra info"}}"#,
        );
        match frame {
            Frame::Message(resp) => {
                assert_eq!(resp.error.unwrap().data.unwrap(), "extra info");
            }
            other => panic!("Expected Message, got {other:?}"),
        }
    }
}
