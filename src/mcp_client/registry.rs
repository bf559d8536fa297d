//! Server registry: runs several provider processes side by side.
//!
//! Provides:
//! - Start/stop/restart of servers by name
//! - Tool discovery at start time, cached per server
//! - Routing of a tool call to the server that exposes the tool

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use super::errors::McpError;
use super::lifecycle::{McpSession, SessionOptions};
use super::process::CancelSignal;
use super::types::{ServerConfig, Tool, TransportKind};

/// Pause between stopping and starting a server on restart.
const RESTART_PAUSE: Duration = Duration::from_millis(500);

/// A running server with the tools it reported at start.
#[derive(Debug, Clone)]
pub struct ServerInstance {
    pub config: ServerConfig,
    pub session: Arc<McpSession>,
    pub tools: Vec<Tool>,
}

// ─── ServerRegistry ──────────────────────────────────────────────────────────

/// Running servers keyed by configured name.
pub struct ServerRegistry {
    servers: RwLock<HashMap<String, ServerInstance>>,
    options: SessionOptions,
}

impl ServerRegistry {
    /// Create an empty registry; every session is started with `options`.
    pub fn new(options: SessionOptions) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            options,
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Start a server and cache its tools. Returns the tool count.
    ///
    /// The session is closed again if tool discovery fails or `cancel` fires
    /// after the handshake.
    pub async fn start_server(
        &self,
        config: &ServerConfig,
        cancel: &CancelSignal,
    ) -> Result<usize, McpError> {
        if cancel.is_cancelled() {
            return Err(McpError::Cancelled {
                name: config.name.clone(),
            });
        }
        if self.servers.read().await.contains_key(&config.name) {
            return Err(McpError::AlreadyRunning {
                name: config.name.clone(),
            });
        }
        if config.kind != TransportKind::Stdio {
            return Err(McpError::ConfigError {
                reason: format!(
                    "only stdio servers are supported (server {} uses {})",
                    config.name, config.kind
                ),
            });
        }

        tracing::info!(server = %config.name, "starting MCP server");
        let session = McpSession::connect(config, self.options.clone(), cancel).await?;

        if cancel.is_cancelled() {
            close_quietly(&session).await;
            return Err(McpError::Cancelled {
                name: config.name.clone(),
            });
        }

        let tools = match session.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                close_quietly(&session).await;
                return Err(e);
            }
        };

        let mut servers = self.servers.write().await;
        if servers.contains_key(&config.name) {
            drop(servers);
            close_quietly(&session).await;
            return Err(McpError::AlreadyRunning {
                name: config.name.clone(),
            });
        }

        tracing::info!(server = %config.name, tools = tools.len(), "server started");
        for tool in &tools {
            tracing::debug!(server = %config.name, tool = %tool.name, description = %tool.description, "tool available");
        }

        let count = tools.len();
        servers.insert(
            config.name.clone(),
            ServerInstance {
                config: config.clone(),
                session: Arc::new(session),
                tools,
            },
        );
        Ok(count)
    }

    /// Start every enabled server. Failures are collected, not fatal.
    pub async fn start_enabled(
        &self,
        configs: &[ServerConfig],
        cancel: &CancelSignal,
    ) -> Vec<(String, McpError)> {
        let mut errors = Vec::new();
        for config in configs.iter().filter(|c| c.enabled) {
            if let Err(e) = self.start_server(config, cancel).await {
                tracing::warn!(server = %config.name, error = %e, "server failed to start");
                errors.push((config.name.clone(), e));
            }
        }
        errors
    }

    /// Stop a running server.
    pub async fn stop_server(&self, name: &str) -> Result<(), McpError> {
        let instance = self
            .servers
            .write()
            .await
            .remove(name)
            .ok_or_else(|| McpError::UnknownServer {
                name: name.to_string(),
            })?;

        tracing::info!(server = name, "stopping MCP server");
        close_quietly(&instance.session).await;
        Ok(())
    }

    /// Stop a server and start it again with its original config.
    pub async fn restart_server(&self, name: &str) -> Result<usize, McpError> {
        let instance = self
            .servers
            .write()
            .await
            .remove(name)
            .ok_or_else(|| McpError::UnknownServer {
                name: name.to_string(),
            })?;

        tracing::info!(server = name, "restarting MCP server");
        close_quietly(&instance.session).await;
        tokio::time::sleep(RESTART_PAUSE).await;

        self.start_server(&instance.config, &CancelSignal::never())
            .await
    }

    /// Re-run `tools/list` for a server and replace its cached tools.
    pub async fn refresh_tools(&self, name: &str) -> Result<usize, McpError> {
        let session = self.session(name).await.ok_or_else(|| McpError::UnknownServer {
            name: name.to_string(),
        })?;
        let tools = session.list_tools().await?;
        let count = tools.len();

        if let Some(instance) = self.servers.write().await.get_mut(name) {
            instance.tools = tools;
        }
        Ok(count)
    }

    /// Stop every running server.
    pub async fn stop_all(&self) {
        let drained: Vec<(String, ServerInstance)> = self.servers.write().await.drain().collect();
        for (name, instance) in drained {
            tracing::info!(server = %name, "stopping MCP server");
            close_quietly(&instance.session).await;
        }
    }

    // ─── Tool Execution ──────────────────────────────────────────────────

    /// Execute a tool on whichever running server exposes it.
    pub async fn execute_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<String, McpError> {
        let (server, session) = {
            let servers = self.servers.read().await;
            let server = owner_of(&servers, tool).ok_or_else(|| McpError::UnknownTool {
                name: tool.to_string(),
            })?;
            (server.clone(), servers[&server].session.clone())
        };

        tracing::info!(server = %server, tool, "executing tool");
        session.call_tool(tool, arguments).await
    }

    /// Execute a tool on a specific server.
    pub async fn execute_tool_on(
        &self,
        server: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<String, McpError> {
        let session = self.session(server).await.ok_or_else(|| McpError::UnknownServer {
            name: server.to_string(),
        })?;
        session.call_tool(tool, arguments).await
    }

    // ─── Status ──────────────────────────────────────────────────────────

    /// Session for a running server.
    pub async fn session(&self, name: &str) -> Option<Arc<McpSession>> {
        self.servers.read().await.get(name).map(|i| i.session.clone())
    }

    /// All `(server, tool)` pairs, ordered by server name.
    pub async fn all_tools(&self) -> Vec<(String, Tool)> {
        let servers = self.servers.read().await;
        let mut names: Vec<&String> = servers.keys().collect();
        names.sort();
        let pairs: Vec<(String, Tool)> = names
            .into_iter()
            .flat_map(|name| {
                servers[name]
                    .tools
                    .iter()
                    .map(move |t| (name.clone(), t.clone()))
            })
            .collect();
        pairs
    }

    /// Server exposing `tool`, preferring the first in name order.
    pub async fn server_for_tool(&self, tool: &str) -> Option<String> {
        owner_of(&*self.servers.read().await, tool)
    }

    /// Number of running servers.
    pub async fn server_count(&self) -> usize {
        self.servers.read().await.len()
    }

    /// Total tools across running servers.
    pub async fn tool_count(&self) -> usize {
        self.servers.read().await.values().map(|i| i.tools.len()).sum()
    }

    /// Names of running servers, sorted.
    pub async fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool count for one server (0 if not running).
    pub async fn server_tool_count(&self, name: &str) -> usize {
        self.servers
            .read()
            .await
            .get(name)
            .map(|i| i.tools.len())
            .unwrap_or(0)
    }
}

fn owner_of(servers: &HashMap<String, ServerInstance>, tool: &str) -> Option<String> {
    let mut owners: Vec<&String> = servers
        .iter()
        .filter(|(_, i)| i.tools.iter().any(|t| t.name == tool))
        .map(|(name, _)| name)
        .collect();
    owners.sort();
    owners.first().map(|s| s.to_string())
}

async fn close_quietly(session: &McpSession) {
    if let Err(e) = session.close().await {
        tracing::warn!(server = session.name(), error = %e, "error closing server session");
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
