//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types and MCP protocol structures.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// JSON-RPC version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision sent in the `initialize` handshake.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
///
/// `result` and `error` are not checked for mutual exclusion; callers look at
/// `error` first.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(alias = "protocol_version")]
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default)]
    pub result: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
    /// Present only on server-initiated requests, which are not responses.
    #[serde(default)]
    pub method: Option<String>,
}

impl JsonRpcResponse {
    /// A line that deserialized into this shape is only a response if it has
    /// the right version tag and is not a server-to-client request.
    pub fn is_well_formed(&self) -> bool {
        self.jsonrpc == JSONRPC_VERSION && self.method.is_none()
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// A tool exposed by a provider process, as returned by `tools/list`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema", alias = "input_schema")]
    pub input_schema: serde_json::Map<String, serde_json::Value>,
}

impl Tool {
    /// Build a tool from one `tools/list` entry.
    ///
    /// Returns `None` for entries that are not objects or have no usable
    /// `name`. A missing `description` or non-object schema is tolerated.
    pub fn from_entry(entry: &serde_json::Value) -> Option<Self> {
        let obj = entry.as_object()?;
        let name = obj.get("name").and_then(|v| v.as_str()).unwrap_or_default();
        if name.is_empty() {
            return None;
        }

        let description = obj
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let input_schema = obj
            .get("inputSchema")
            .or_else(|| obj.get("input_schema"))
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        Some(Self {
            name: name.to_string(),
            description,
            input_schema,
        })
    }

    /// Names listed under the schema's `required` key, if any.
    pub fn required_params(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Identity the client announces during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// `params` of the `initialize` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: serde_json::Value,
    pub client_info: ClientInfo,
}

impl InitializeParams {
    /// Handshake payload declaring support for `roots` change notifications.
    pub fn new(client_info: ClientInfo) -> Self {
        Self {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({
                "roots": { "listChanged": true }
            }),
            client_info,
        }
    }
}

// ─── Server Configuration ────────────────────────────────────────────────────

/// How the bridge talks to a configured server. Only `stdio` can be started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Sse,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Sse => write!(f, "sse"),
        }
    }
}

/// One entry of the `mcp_servers` list.
///
/// A server is launched either from a single executable `path` or from a
/// `command` plus `args` (e.g. `npx @browsermcp/mcp@latest`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: TransportKind,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl ServerConfig {
    /// Config for a command-plus-arguments server.
    pub fn command(name: &str, command: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind: TransportKind::Stdio,
            path: None,
            command: Some(command.to_string()),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            cwd: None,
            enabled: true,
            description: None,
        }
    }

    /// Config for a single-executable server.
    pub fn path(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: TransportKind::Stdio,
            path: Some(path.to_string()),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            enabled: true,
            description: None,
        }
    }
}

// ─── Standard MCP Error Codes ────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest::new(3, "tools/list", None);
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#);
    }

    #[test]
    fn test_json_rpc_request_with_params() {
        let params = serde_json::json!({"name": "echo", "arguments": {"text": "hi"}});
        let req = JsonRpcRequest::new(42, "tools/call", Some(params));
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"id\":42"));
        assert!(json.contains("\"method\":\"tools/call\""));
        assert!(json.contains("\"arguments\":{\"text\":\"hi\"}"));
    }

    #[test]
    fn test_initialize_params_shape() {
        let params = InitializeParams::new(ClientInfo {
            name: "host".into(),
            version: "1.2.3".into(),
        });
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["protocolVersion"], "2024-11-05");
        assert_eq!(value["capabilities"]["roots"]["listChanged"], true);
        assert_eq!(value["clientInfo"]["name"], "host");
        assert_eq!(value["clientInfo"]["version"], "1.2.3");
    }

    #[test]
    fn test_response_deserialization() {
        let json = r#"{"jsonrpc": "2.0", "id": 1, "result": {"tools": []}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.id, 1);
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
        assert!(resp.is_well_formed());
    }

    #[test]
    fn test_response_accepts_protocol_version_alias() {
        let json = r#"{"protocol_version":"2.0","id":7,"result":{}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.id, 7);
        assert!(resp.is_well_formed());
    }

    #[test]
    fn test_error_response() {
        let json = r#"{
            "jsonrpc": "2.0",
            "id": 2,
            "error": {"code": -32601, "message": "Method not found"}
        }"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::METHOD_NOT_FOUND);
        assert_eq!(err.message, "Method not found");
        assert!(err.data.is_none());
    }

    #[test]
    fn test_server_request_is_not_a_response() {
        let json = r#"{"jsonrpc":"2.0","id":0,"method":"roots/list"}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert!(!resp.is_well_formed());
    }

    #[test]
    fn test_tool_from_entry_full() {
        let entry = serde_json::json!({
            "name": "read_file",
            "description": "Read a file",
            "inputSchema": {"type": "object", "required": ["path"]}
        });
        let tool = Tool::from_entry(&entry).unwrap();
        assert_eq!(tool.name, "read_file");
        assert_eq!(tool.description, "Read a file");
        assert_eq!(tool.required_params(), vec!["path"]);
    }

    #[test]
    fn test_tool_from_entry_tolerates_missing_fields() {
        let tool = Tool::from_entry(&serde_json::json!({"name": "ping"})).unwrap();
        assert_eq!(tool.description, "");
        assert!(tool.input_schema.is_empty());
    }

    #[test]
    fn test_tool_from_entry_discards_nameless() {
        assert!(Tool::from_entry(&serde_json::json!({"description": "x"})).is_none());
        assert!(Tool::from_entry(&serde_json::json!({"name": ""})).is_none());
        assert!(Tool::from_entry(&serde_json::json!("not an object")).is_none());
    }

    #[test]
    fn test_server_config_defaults() {
        let yaml = "name: fs\ncommand: npx\nargs: [\"-y\", \"server-fs\"]\n";
        let cfg: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.kind, TransportKind::Stdio);
        assert!(cfg.enabled);
        assert_eq!(cfg.args.len(), 2);
        assert!(cfg.path.is_none());
    }
}
