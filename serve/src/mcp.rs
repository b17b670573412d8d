//! MCP protocol types: JSON-RPC 2.0 envelope plus the initialize/tools
//! payloads for the `onemcp.run` tool surface.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// MCP protocol version this server speaks.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

pub const SERVER_NAME: &str = "onemcp";
pub const RUN_TOOL: &str = "onemcp.run";

/// Incoming JSON-RPC message. Notifications carry no `id`.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Outgoing JSON-RPC response or notification.
#[derive(Debug, Clone, Serialize)]
pub struct RpcMessage {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcMessage {
    pub fn result(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: None,
            params: None,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
        }
    }
}

/// `initialize` result payload.
pub fn initialize_result() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

/// `tools/list` result payload: one tool, `onemcp.run`.
pub fn tools_list_result() -> Value {
    json!({
        "tools": [{
            "name": RUN_TOOL,
            "description": "Run a natural-language prompt against the configured API handbook \
and stream the execution back as progress events plus a final summary.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "prompt": { "type": "string" },
                    "options": { "type": "object" }
                },
                "required": ["prompt"]
            }
        }]
    })
}

/// `tools/call` arguments for `onemcp.run`.
#[derive(Debug, Clone, Deserialize)]
pub struct RunArgs {
    pub prompt: String,
    #[serde(default)]
    pub options: RunToolOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunToolOptions {
    /// Overall request timeout; cancels the run when exceeded.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Successful `tools/call` result: one text content block.
pub fn call_result_text(text: &str) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": false
    })
}

/// Failed `tools/call` result: the structured error envelope as text.
/// Stack traces stay in server logs; the caller sees code, message, and
/// (when known) the failing step.
pub fn call_result_error(envelope: &Value) -> Value {
    json!({
        "content": [{ "type": "text", "text": envelope.to_string() }],
        "isError": true
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: requests with and without ids parse; `params` defaults.
    #[test]
    fn parses_requests() {
        let req: RpcRequest = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        )
        .unwrap();
        assert_eq!(req.method, "initialize");
        assert_eq!(req.id, Some(json!(1)));

        let note: RpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .unwrap();
        assert!(note.id.is_none());
        assert!(note.params.is_null());
    }

    /// **Scenario**: responses serialize without null fields.
    #[test]
    fn responses_omit_empty_fields() {
        let v = serde_json::to_value(RpcMessage::result(Some(json!(1)), json!({"ok": true})))
            .unwrap();
        assert!(v.get("error").is_none());
        assert!(v.get("method").is_none());
        assert_eq!(v["result"]["ok"], true);
    }

    /// **Scenario**: the tool list advertises onemcp.run with a prompt arg.
    #[test]
    fn tool_surface() {
        let v = tools_list_result();
        assert_eq!(v["tools"][0]["name"], "onemcp.run");
        assert_eq!(
            v["tools"][0]["inputSchema"]["required"][0],
            "prompt"
        );
    }
}
