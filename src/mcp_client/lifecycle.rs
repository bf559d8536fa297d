//! Session lifecycle for one provider process.
//!
//! `Created → Spawning → Handshaking → Ready → Closed`, with `Failed`
//! reachable from `Spawning` and `Handshaking` (and from `Ready` when the
//! process dies under us). A session is only handed to the caller once the
//! `initialize` handshake succeeded; any handshake failure kills the process
//! first.

use std::sync::Mutex;

use tokio::task::JoinHandle;

use super::content::extract_tool_output;
use super::diagnostics::{spawn_stderr_drain, StderrTail};
use super::errors::McpError;
use super::process::{spawn_process, CancelSignal, LaunchSpec, OsSpawner, ProcessHandle, ProcessSpawner};
use super::transport::{extract_result, StdioTransport, TransportSettings};
use super::types::{ClientInfo, InitializeParams, JsonRpcResponse, ServerConfig, Tool};

// ─── State ───────────────────────────────────────────────────────────────────

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Spawning,
    Handshaking,
    Ready,
    Closed,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Created => "created",
            SessionState::Spawning => "spawning",
            SessionState::Handshaking => "handshaking",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Knobs for starting a session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Identity announced in the handshake.
    pub client_info: ClientInfo,
    /// Read-loop bounds for every request, handshake included.
    pub transport: TransportSettings,
    /// Forward the server's stderr at `info` instead of `debug`.
    pub verbose: bool,
}

// ─── McpSession ──────────────────────────────────────────────────────────────

/// A ready connection to one provider process.
///
/// All methods take `&self`; share it behind an `Arc` to call from several
/// tasks. Requests are serialized by the transport.
pub struct McpSession {
    name: String,
    state: Mutex<SessionState>,
    transport: StdioTransport,
    process: ProcessHandle,
    stderr_task: Mutex<Option<JoinHandle<()>>>,
    stderr_tail: StderrTail,
    server_info: serde_json::Map<String, serde_json::Value>,
}

impl McpSession {
    /// Start a session for a configured server with the OS spawner.
    pub async fn connect(
        config: &ServerConfig,
        options: SessionOptions,
        cancel: &CancelSignal,
    ) -> Result<Self, McpError> {
        Self::connect_with(config, options, &OsSpawner, cancel).await
    }

    /// Start a session for a configured server with a custom spawner.
    pub async fn connect_with(
        config: &ServerConfig,
        options: SessionOptions,
        spawner: &dyn ProcessSpawner,
        cancel: &CancelSignal,
    ) -> Result<Self, McpError> {
        let spec = LaunchSpec::from_config(config)?;
        Self::start(&config.name, &spec, options, spawner, cancel).await
    }

    /// Spawn the process, start the stderr drain, and run the handshake.
    pub async fn start(
        name: &str,
        spec: &LaunchSpec,
        options: SessionOptions,
        spawner: &dyn ProcessSpawner,
        cancel: &CancelSignal,
    ) -> Result<Self, McpError> {
        log_transition(name, SessionState::Created, SessionState::Spawning);
        let spawned = match spawn_process(name, spec, spawner, cancel) {
            Ok(p) => p,
            Err(e) => {
                log_transition(name, SessionState::Spawning, SessionState::Failed);
                return Err(e);
            }
        };

        let (stderr_task, stderr_tail) = spawn_stderr_drain(name, spawned.stderr, options.verbose);
        let transport = StdioTransport::new(name, spawned.stdin, spawned.stdout, options.transport)
            .with_exit_watch(spawned.handle.exit_watch());

        let mut session = Self {
            name: name.to_string(),
            state: Mutex::new(SessionState::Handshaking),
            transport,
            process: spawned.handle,
            stderr_task: Mutex::new(Some(stderr_task)),
            stderr_tail,
            server_info: serde_json::Map::new(),
        };
        log_transition(name, SessionState::Spawning, SessionState::Handshaking);

        let handshake = tokio::select! {
            res = session.initialize(&options.client_info) => res,
            _ = cancel.cancelled() => Err(McpError::Cancelled { name: name.to_string() }),
        };

        match handshake {
            Ok(result) => {
                session.server_info = result;
                session.set_state(SessionState::Ready);
                tracing::info!(
                    server = name,
                    pid = ?session.process.pid(),
                    server_name = session.server_name().unwrap_or("unknown"),
                    "server initialized"
                );
                Ok(session)
            }
            Err(e) => {
                session.set_state(SessionState::Failed);
                if let Err(kill_err) = session.close_inner().await {
                    tracing::warn!(server = name, error = %kill_err, "failed to kill server after handshake failure");
                }
                session.set_state(SessionState::Failed);

                let err = match e {
                    McpError::Cancelled { .. } | McpError::InitFailed { .. } => e,
                    other => McpError::InitFailed {
                        name: name.to_string(),
                        reason: other.to_string(),
                    },
                };
                let err = with_stderr_context(err, &session.stderr_tail);
                tracing::warn!(server = name, error = %err, "server handshake failed");
                Err(err)
            }
        }
    }

    /// Perform the MCP initialization handshake.
    async fn initialize(
        &self,
        client_info: &ClientInfo,
    ) -> Result<serde_json::Map<String, serde_json::Value>, McpError> {
        let params = serde_json::to_value(InitializeParams::new(client_info.clone())).map_err(|e| {
            McpError::InitFailed {
                name: self.name.clone(),
                reason: format!("failed to serialize initialize params: {e}"),
            }
        })?;

        let response = self.transport.request("initialize", Some(params)).await?;
        if let Some(err) = response.error {
            return Err(McpError::InitFailed {
                name: self.name.clone(),
                reason: format!("initialize error [{}]: {}", err.code, err.message),
            });
        }

        self.transport
            .notify("notifications/initialized", None)
            .await?;

        Ok(response.result.unwrap_or_default())
    }

    // ─── Ready-state operations ──────────────────────────────────────────

    /// List the tools the server exposes. Entries without a name are dropped.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        let response = self.exchange("tools/list", None).await?;
        let result = extract_result(response, "tools/list")?;

        let entries = result
            .get("tools")
            .and_then(|t| t.as_array())
            .ok_or_else(|| McpError::ProtocolError {
                server: self.name.clone(),
                method: "tools/list".into(),
                reason: "invalid tools response format".into(),
            })?;

        let tools: Vec<Tool> = entries.iter().filter_map(Tool::from_entry).collect();
        tracing::debug!(
            server = %self.name,
            listed = entries.len(),
            kept = tools.len(),
            "tools listed"
        );
        Ok(tools)
    }

    /// Invoke a tool and return its textual output.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<String, McpError> {
        let arguments = if arguments.is_null() {
            serde_json::json!({})
        } else {
            arguments
        };
        let params = serde_json::json!({
            "name": tool,
            "arguments": arguments,
        });

        let response = self.exchange("tools/call", Some(params)).await?;
        let result = extract_result(response, "tools/call")?;
        extract_tool_output(tool, &result)
    }

    async fn exchange(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        self.ensure_ready()?;
        let res = self.transport.request(method, params).await;
        if let Err(McpError::ProcessExited { .. }) = &res {
            self.set_state(SessionState::Failed);
        }
        res
    }

    fn ensure_ready(&self) -> Result<(), McpError> {
        let state = self.state();
        if state != SessionState::Ready {
            return Err(McpError::NotReady {
                name: self.name.clone(),
                state: state.to_string(),
            });
        }
        if let Some(status) = self.process.exit_status() {
            self.set_state(SessionState::Failed);
            return Err(McpError::ProcessExited {
                name: self.name.clone(),
                status,
            });
        }
        Ok(())
    }

    // ─── Shutdown ────────────────────────────────────────────────────────

    /// Close stdin, stdout and stderr, then kill the process.
    ///
    /// Stream close failures are ignored; only the kill error is returned.
    /// Calling it again, or on a failed session, is harmless. A request in
    /// flight at the time fails with `ProcessExited`.
    pub async fn close(&self) -> Result<(), McpError> {
        if self.state() == SessionState::Closed {
            return Ok(());
        }
        let res = self.close_inner().await;
        self.set_state(SessionState::Closed);
        tracing::info!(server = %self.name, "server session closed");
        res
    }

    async fn close_inner(&self) -> Result<(), McpError> {
        let streams_closed = self.transport.try_close();

        let drain = match self.stderr_task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = drain {
            task.abort();
        }

        let killed = self.process.kill().await.map_err(|e| McpError::TransportError {
            server: self.name.clone(),
            reason: format!("failed to kill server process: {e}"),
        });

        if !streams_closed {
            self.transport.close().await;
        }
        killed
    }

    // ─── Status ──────────────────────────────────────────────────────────

    /// Server name from the configuration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        match self.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, next: SessionState) {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Closed is terminal; a request failing after close must not reopen it.
        if *guard != next && *guard != SessionState::Closed {
            log_transition(&self.name, *guard, next);
            *guard = next;
        }
    }

    /// Whether the server process is still running.
    pub fn is_alive(&self) -> bool {
        self.process.is_alive()
    }

    /// OS process id of the server.
    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Raw `initialize` result (capabilities, serverInfo, ...).
    pub fn server_info(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.server_info
    }

    /// `serverInfo.name` reported during the handshake.
    pub fn server_name(&self) -> Option<&str> {
        self.server_info
            .get("serverInfo")
            .and_then(|i| i.get("name"))
            .and_then(|n| n.as_str())
    }

    /// `serverInfo.version` reported during the handshake.
    pub fn server_version(&self) -> Option<&str> {
        self.server_info
            .get("serverInfo")
            .and_then(|i| i.get("version"))
            .and_then(|n| n.as_str())
    }

    /// Id the next request will use.
    pub fn next_request_id(&self) -> u64 {
        self.transport.peek_next_id()
    }

    /// Most recent stderr lines from the server.
    pub fn stderr_lines(&self) -> Vec<String> {
        self.stderr_tail.lines()
    }
}

impl std::fmt::Debug for McpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpSession")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("pid", &self.process.pid())
            .finish()
    }
}

fn log_transition(name: &str, from: SessionState, to: SessionState) {
    tracing::debug!(server = name, from = %from, to = %to, "session state change");
}

/// Append captured stderr to a handshake failure.
fn with_stderr_context(err: McpError, tail: &StderrTail) -> McpError {
    match err {
        McpError::InitFailed { name, reason } => McpError::InitFailed {
            name,
            reason: format!("{reason}{}", tail.error_suffix()),
        },
        other => other,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
