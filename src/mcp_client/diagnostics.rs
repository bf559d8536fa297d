//! Background drain for a server's stderr.
//!
//! Runs for the lifetime of the process, independent of the protocol stream.
//! Lines are forwarded to `tracing` and the most recent ones are kept so a
//! failed handshake can report what the server printed.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

/// Number of stderr lines retained for error context.
const TAIL_CAPACITY: usize = 50;

/// Consecutive read errors after which the drain stops.
const MAX_READ_FAILURES: u32 = 16;

/// Maximum characters of stderr appended to an error message.
const MAX_SUFFIX_CHARS: usize = 2000;

/// Shared ring of the most recent stderr lines.
#[derive(Debug, Clone, Default)]
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
    fn push(&self, line: String) {
        let mut lines = match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if lines.len() == TAIL_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Snapshot of the retained lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    /// `" | stderr: ..."` suffix for error messages, or empty if nothing was
    /// captured. Truncated to keep messages readable.
    pub fn error_suffix(&self) -> String {
        let joined = self.lines().join("\n");
        let trimmed = joined.trim();
        if trimmed.is_empty() {
            return String::new();
        }
        if trimmed.chars().count() > MAX_SUFFIX_CHARS {
            let cut: String = trimmed.chars().take(MAX_SUFFIX_CHARS).collect();
            format!(" | stderr: {cut}...(truncated)")
        } else {
            format!(" | stderr: {trimmed}")
        }
    }
}

/// Spawn the drain task. It ends by itself when the stream closes.
pub fn spawn_stderr_drain<R>(server: &str, stderr: R, verbose: bool) -> (JoinHandle<()>, StderrTail)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let tail = StderrTail::default();
    let task_tail = tail.clone();
    let server = server.to_string();

    let handle = tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        let mut failures = 0u32;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    failures = 0;
                    let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                    if verbose {
                        tracing::info!(target: "mcp_stdio_bridge::stderr", server = %server, "{line}");
                    } else {
                        tracing::debug!(target: "mcp_stdio_bridge::stderr", server = %server, "{line}");
                    }
                    task_tail.push(line);
                }
                // Keep the pipe open: the child would die on its next write.
                Err(e) => {
                    failures += 1;
                    tracing::debug!(server = %server, error = %e, "stderr read failed");
                    if failures >= MAX_READ_FAILURES {
                        tracing::warn!(server = %server, "giving up on stderr after repeated read failures");
                        break;
                    }
                }
            }
        }
        tracing::debug!(server = %server, "stderr closed");
    });

    (handle, tail)
}
