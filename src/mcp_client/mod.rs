//! MCP Client: JSON-RPC over stdio transport for tool-provider processes.
//!
//! This module handles:
//! - Spawning provider processes and supervising their exit
//! - Line-delimited JSON-RPC 2.0 over the process's stdin/stdout, tolerating
//!   non-protocol output on stdout
//! - Draining stderr into the log for the lifetime of the process
//! - The `initialize` handshake, tool discovery and tool invocation
//! - Running several servers side by side and routing tool calls

pub mod codec;
pub mod content;
pub mod diagnostics;
pub mod errors;
pub mod lifecycle;
pub mod process;
pub mod registry;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use content::SUCCESS_SENTINEL;
pub use errors::McpError;
pub use lifecycle::{McpSession, SessionOptions, SessionState};
pub use process::{CancelHandle, CancelSignal, LaunchSpec, OsSpawner, ProcessSpawner};
pub use registry::ServerRegistry;
pub use transport::TransportSettings;
pub use types::{ClientInfo, ServerConfig, Tool, TransportKind};
