//! Drive an external MCP tool-provider process as if it were a local library.
//!
//! The provider is spawned as a child process and spoken to with
//! line-delimited JSON-RPC 2.0 over its stdin/stdout:
//!
//! ```no_run
//! use mcp_stdio_bridge::mcp_client::{CancelSignal, McpSession, ServerConfig, SessionOptions};
//!
//! # async fn run() -> Result<(), mcp_stdio_bridge::mcp_client::McpError> {
//! let config = ServerConfig::command("browser", "npx", &["@browsermcp/mcp@latest"]);
//! let session = McpSession::connect(&config, SessionOptions::default(), &CancelSignal::never()).await?;
//!
//! for tool in session.list_tools().await? {
//!     println!("{}: {}", tool.name, tool.description);
//! }
//! let output = session
//!     .call_tool("browser_navigate", serde_json::json!({"url": "https://example.com"}))
//!     .await?;
//! println!("{output}");
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod mcp_client;
