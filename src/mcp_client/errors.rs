//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
///
/// The client never retries on its own; every variant carries enough context
/// (server, method, raw message) for the caller to decide.
#[derive(Debug, Error)]
pub enum McpError {
    /// The server process could not be created.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// Session creation was cancelled before the process was spawned.
    #[error("server '{name}' start cancelled before spawn")]
    Cancelled {
        name: String,
    },

    /// The initialization handshake failed. The process has been killed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed {
        name: String,
        reason: String,
    },

    /// The output stream did not yield a usable response.
    #[error("protocol error from server '{server}' during {method}: {reason}")]
    ProtocolError {
        server: String,
        method: String,
        reason: String,
    },

    /// I/O failure on one of the process pipes.
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// The server answered `tools/list` or `tools/call` with a JSON-RPC error.
    #[error("{method} error [{code}]: {message}")]
    ToolError {
        method: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A successful `tools/call` result had no recognizable output shape.
    #[error("unrecognized content from tool '{tool}': {reason}")]
    ContentFormatError {
        tool: String,
        reason: String,
    },

    /// No response arrived before the per-call deadline.
    #[error("{method} on server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// The server process exited while the session was in use.
    #[error("server '{name}' exited: {status}")]
    ProcessExited {
        name: String,
        status: String,
    },

    /// The session is not in the `Ready` state.
    #[error("server '{name}' is not ready (state: {state})")]
    NotReady {
        name: String,
        state: String,
    },

    /// No running server with this name.
    #[error("server '{name}' is not running")]
    UnknownServer {
        name: String,
    },

    /// No running server exposes this tool.
    #[error("tool '{name}' not found in any running server")]
    UnknownTool {
        name: String,
    },

    /// A server with this name is already running.
    #[error("server '{name}' is already running")]
    AlreadyRunning {
        name: String,
    },

    /// Configuration error (unreadable file, invalid server entry).
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl McpError {
    /// Whether the failure happened before a process was running.
    pub fn is_spawn_error(&self) -> bool {
        matches!(self, McpError::SpawnFailed { .. } | McpError::Cancelled { .. })
    }

    /// Whether the session may still be usable after this error.
    ///
    /// Protocol, tool, content and timeout failures leave the process alive;
    /// spawn, handshake and exit failures do not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            McpError::ProtocolError { .. }
                | McpError::ToolError { .. }
                | McpError::ContentFormatError { .. }
                | McpError::Timeout { .. }
        )
    }
}
