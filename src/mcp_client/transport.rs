//! JSON-RPC over stdio transport.
//!
//! Every request goes through one critical section: write the request line,
//! then read lines until the matching response arrives. At most one request
//! is in flight per server, which keeps the stream unambiguous without a
//! separate reader task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use super::codec::{decode_line, encode_line, write_line, DecodedLine};
use super::errors::McpError;
use super::types::{JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default number of non-protocol lines tolerated while waiting for a response.
pub const DEFAULT_MAX_NOISE_LINES: usize = 100;

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for the exit watcher after stdout hits EOF.
const EXIT_GRACE: Duration = Duration::from_millis(200);

// ─── Settings ────────────────────────────────────────────────────────────────

/// Read-loop bounds for a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    /// Skipped non-empty lines after which a request fails.
    pub max_noise_lines: usize,
    /// Wall-clock deadline for one request, write included.
    pub request_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_noise_lines: DEFAULT_MAX_NOISE_LINES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

// ─── Transport ───────────────────────────────────────────────────────────────

struct Pipes<W, R> {
    writer: Option<W>,
    reader: Option<BufReader<R>>,
}

/// Bi-directional JSON-RPC transport over a child process's stdio.
pub struct StdioTransport<W = ChildStdin, R = ChildStdout> {
    server_name: String,
    next_id: AtomicU64,
    pipes: Mutex<Pipes<W, R>>,
    exit_rx: Option<watch::Receiver<Option<String>>>,
    settings: TransportSettings,
}

impl<W, R> StdioTransport<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncRead + Unpin + Send,
{
    /// Create a transport over the given writer (child stdin) and reader
    /// (child stdout). Request ids start at 1.
    pub fn new(server_name: &str, writer: W, reader: R, settings: TransportSettings) -> Self {
        Self {
            server_name: server_name.to_string(),
            next_id: AtomicU64::new(1),
            pipes: Mutex::new(Pipes {
                writer: Some(writer),
                reader: Some(BufReader::new(reader)),
            }),
            exit_rx: None,
            settings,
        }
    }

    /// Attach the process exit watch so blocked reads wake on child exit.
    pub fn with_exit_watch(mut self, exit_rx: watch::Receiver<Option<String>>) -> Self {
        self.exit_rx = Some(exit_rx);
        self
    }

    /// Read-loop bounds in effect.
    pub fn settings(&self) -> TransportSettings {
        self.settings
    }

    /// Id the next request will carry.
    pub fn peek_next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Send a JSON-RPC request and wait for the matching response.
    ///
    /// The id is drawn inside the critical section, so ids hit the wire in
    /// increasing order. Lines that are blank, not JSON-RPC, or responses to
    /// a different id are skipped; after `max_noise_lines` skipped lines the
    /// request fails with `ProtocolError`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let mut pipes = self.pipes.lock().await;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);

        let line = encode_line(&req).map_err(|e| self.transport_error(format!(
            "failed to serialize request: {e}"
        )))?;

        let Pipes {
            writer: Some(writer),
            reader: Some(reader),
        } = &mut *pipes
        else {
            return Err(self.transport_error("transport is closed".into()));
        };

        let deadline = Instant::now() + self.settings.request_timeout;
        let exchange = async {
            tracing::trace!(server = %self.server_name, method, id, line = line.trim_end(), "→");
            write_line(writer, &line)
                .await
                .map_err(|e| self.transport_error(format!("failed to write to stdin: {e}")))?;
            self.read_response(reader, id, method).await
        };

        match tokio::time::timeout_at(deadline, exchange).await {
            Ok(res) => res,
            Err(_) => {
                tracing::warn!(server = %self.server_name, method, id, "request timed out");
                Err(McpError::Timeout {
                    server: self.server_name.clone(),
                    method: method.to_string(),
                    timeout_ms: self.settings.request_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let mut notification = serde_json::json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": method,
        });
        if let Some(params) = params {
            notification["params"] = params;
        }

        let line = encode_line(&notification).map_err(|e| {
            self.transport_error(format!("failed to serialize notification: {e}"))
        })?;

        let mut pipes = self.pipes.lock().await;
        let Some(writer) = pipes.writer.as_mut() else {
            return Err(self.transport_error("transport is closed".into()));
        };
        tracing::trace!(server = %self.server_name, method, line = line.trim_end(), "→");
        write_line(writer, &line)
            .await
            .map_err(|e| self.transport_error(format!("failed to write notification: {e}")))
    }

    /// Drop both pipes if no request holds them. Returns whether they were
    /// closed; a busy transport is left for [`Self::close`] to finish.
    pub fn try_close(&self) -> bool {
        match self.pipes.try_lock() {
            Ok(mut pipes) => {
                pipes.writer.take();
                pipes.reader.take();
                true
            }
            Err(_) => false,
        }
    }

    /// Drop stdin first (the child sees EOF), then stdout.
    pub async fn close(&self) {
        let mut pipes = self.pipes.lock().await;
        pipes.writer.take();
        pipes.reader.take();
    }

    async fn read_response(
        &self,
        reader: &mut BufReader<R>,
        id: u64,
        method: &str,
    ) -> Result<JsonRpcResponse, McpError> {
        let mut line_buf = Vec::new();
        let mut skipped = 0usize;

        loop {
            line_buf.clear();
            let bytes_read = self.read_line_or_exit(reader, &mut line_buf).await?;
            if bytes_read == 0 {
                return Err(self.stdout_closed().await);
            }

            match decode_line(&line_buf) {
                DecodedLine::Blank => continue,
                DecodedLine::Response(resp) if resp.id == id => {
                    tracing::trace!(server = %self.server_name, method, id, line = %String::from_utf8_lossy(&line_buf).trim(), "←");
                    return Ok(resp);
                }
                DecodedLine::Response(resp) => {
                    tracing::warn!(
                        server = %self.server_name,
                        method,
                        expected = id,
                        got = resp.id,
                        "discarding response with unexpected id"
                    );
                    skipped += 1;
                }
                DecodedLine::Noise(text) => {
                    tracing::debug!(server = %self.server_name, line = %text, "skipping non-protocol line");
                    skipped += 1;
                }
            }

            if skipped >= self.settings.max_noise_lines {
                return Err(McpError::ProtocolError {
                    server: self.server_name.clone(),
                    method: method.to_string(),
                    reason: format!("no valid response found after {skipped} lines"),
                });
            }
        }
    }

    /// Read one raw line, but give up if the process exits while nothing
    /// arrives. Bytes are not required to be UTF-8.
    async fn read_line_or_exit(
        &self,
        reader: &mut BufReader<R>,
        buf: &mut Vec<u8>,
    ) -> Result<usize, McpError> {
        let read = reader.read_until(b'\n', buf);
        let Some(exit_rx) = &self.exit_rx else {
            return read
                .await
                .map_err(|e| self.transport_error(format!("failed to read from stdout: {e}")));
        };

        let mut exit_rx = exit_rx.clone();
        let outcome = tokio::select! {
            biased;
            res = read => Ok(res),
            status = exit_rx.wait_for(|s| s.is_some()) => Err(match status {
                Ok(s) => s.clone().unwrap_or_default(),
                Err(_) => "unknown".to_string(),
            }),
        };

        match outcome {
            Ok(res) => {
                res.map_err(|e| self.transport_error(format!("failed to read from stdout: {e}")))
            }
            Err(status) => Err(McpError::ProcessExited {
                name: self.server_name.clone(),
                status,
            }),
        }
    }

    /// Explain an EOF on stdout, preferring the exit status if it shows up
    /// shortly after.
    async fn stdout_closed(&self) -> McpError {
        let Some(exit_rx) = &self.exit_rx else {
            return self.transport_error("server stdout closed".into());
        };

        let mut exit_rx = exit_rx.clone();
        let status = match tokio::time::timeout(EXIT_GRACE, exit_rx.wait_for(|s| s.is_some())).await {
            Ok(Ok(s)) => Some(s.clone().unwrap_or_default()),
            _ => None,
        };

        match status {
            Some(status) => McpError::ProcessExited {
                name: self.server_name.clone(),
                status,
            },
            None => self.transport_error("server stdout closed (process may have exited)".into()),
        }
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result object from a response, converting a JSON-RPC error to
/// `McpError::ToolError`. A missing result is treated as an empty object.
pub fn extract_result(
    response: JsonRpcResponse,
    method: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ToolError {
            method: method.to_string(),
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }
    Ok(response.result.unwrap_or_default())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
