//! Provider process supervision.
//!
//! Spawns a server process with all three stdio streams piped, hands the
//! streams to the caller, and keeps ownership of the `Child` inside an exit
//! watcher task. The watcher publishes the exit status as soon as the process
//! dies and performs kills on request, so liveness checks and termination
//! never contend with a blocked protocol read.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};

use super::errors::McpError;
use super::types::ServerConfig;

// ─── Cancellation ────────────────────────────────────────────────────────────

/// Cancellation signal observed while a session is being created.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Trigger side of a [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelSignal {
    /// Create a linked handle/signal pair.
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelSignal { rx })
    }

    /// A signal that is never raised.
    pub fn never() -> Self {
        Self::pair().1
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested. Pends forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|c| *c).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::never()
    }
}

impl CancelHandle {
    /// Request cancellation.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

// ─── Launch Spec ─────────────────────────────────────────────────────────────

/// What to execute: a program, its arguments and its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<String>,
}

impl LaunchSpec {
    /// Launch a single executable with no arguments.
    pub fn from_path(path: &str) -> Self {
        Self {
            program: path.to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        }
    }

    /// Launch a command with an argument list.
    pub fn from_command(command: &str, args: &[String]) -> Self {
        Self {
            program: command.to_string(),
            args: args.to_vec(),
            env: HashMap::new(),
            cwd: None,
        }
    }

    /// Build from a server entry. `command` takes precedence over `path`.
    pub fn from_config(config: &ServerConfig) -> Result<Self, McpError> {
        let mut spec = match (config.command.as_deref(), config.path.as_deref()) {
            (Some(cmd), _) if !cmd.is_empty() => Self::from_command(cmd, &config.args),
            (_, Some(path)) if !path.is_empty() => Self::from_path(path),
            _ => {
                return Err(McpError::ConfigError {
                    reason: format!(
                        "server '{}' must have either 'path' or 'command' configured",
                        config.name
                    ),
                })
            }
        };
        spec.env = config.env.clone();
        spec.cwd = config.cwd.clone();
        Ok(spec)
    }

    /// Human-readable command line for logs.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

// ─── Spawner ─────────────────────────────────────────────────────────────────

/// OS process-spawn primitive. Implementations must pipe all three streams.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, spec: &LaunchSpec) -> std::io::Result<Child>;
}

/// Spawns real OS processes through `tokio::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSpawner;

impl ProcessSpawner for OsSpawner {
    fn spawn(&self, spec: &LaunchSpec) -> std::io::Result<Child> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);

        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        cmd.spawn()
    }
}

// ─── Process Handle ──────────────────────────────────────────────────────────

type KillReply = oneshot::Sender<std::io::Result<()>>;

/// Handle to a supervised process: liveness, exit status, and kill.
#[derive(Debug)]
pub struct ProcessHandle {
    name: String,
    pid: Option<u32>,
    kill_tx: Mutex<Option<oneshot::Sender<KillReply>>>,
    exit_rx: watch::Receiver<Option<String>>,
}

impl ProcessHandle {
    /// Move `child` into a watcher task and return a handle to it.
    pub fn watch(name: &str, mut child: Child) -> Self {
        let pid = child.id();
        let (kill_tx, mut kill_rx) = oneshot::channel::<KillReply>();
        let (exit_tx, exit_rx) = watch::channel(None);
        let server = name.to_string();

        tokio::spawn(async move {
            let status = tokio::select! {
                res = child.wait() => match res {
                    Ok(status) => status.to_string(),
                    Err(e) => format!("wait failed: {e}"),
                },
                req = &mut kill_rx => {
                    let res = child.kill().await;
                    let status = match &res {
                        Ok(()) => "killed".to_string(),
                        Err(e) => format!("kill failed: {e}"),
                    };
                    // A dropped handle means nobody is waiting for the reply.
                    if let Ok(reply) = req {
                        let _ = reply.send(res);
                    }
                    status
                }
            };
            tracing::debug!(server = %server, status = %status, "server process exited");
            let _ = exit_tx.send(Some(status));
        });

        Self {
            name: name.to_string(),
            pid,
            kill_tx: Mutex::new(Some(kill_tx)),
            exit_rx,
        }
    }

    /// OS process id, if the process was still running at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process has not yet exited.
    pub fn is_alive(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// Exit description once the process is gone.
    pub fn exit_status(&self) -> Option<String> {
        self.exit_rx.borrow().clone()
    }

    /// Receiver that changes to `Some(status)` when the process exits.
    pub fn exit_watch(&self) -> watch::Receiver<Option<String>> {
        self.exit_rx.clone()
    }

    /// Wait for the process to exit and return its status description.
    pub async fn wait(&self) -> String {
        let mut rx = self.exit_rx.clone();
        let res = rx.wait_for(|s| s.is_some()).await;
        match res {
            Ok(status) => status.clone().unwrap_or_default(),
            Err(_) => "unknown".to_string(),
        }
    }

    /// Forcibly terminate the process and wait for it to be reaped.
    ///
    /// Only the first call sends the kill; later calls, and calls after the
    /// process already exited, succeed without doing anything.
    pub async fn kill(&self) -> std::io::Result<()> {
        let sender = match self.kill_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(sender) = sender else {
            self.wait().await;
            return Ok(());
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if sender.send(reply_tx).is_err() {
            // Watcher already finished: the process exited on its own.
            return Ok(());
        }

        match reply_rx.await {
            Ok(res) => res,
            // Watcher observed a natural exit in the same instant.
            Err(_) => Ok(()),
        }
    }

    /// Server name this process belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// A freshly spawned process with its three independent streams.
pub struct SpawnedProcess {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
    pub handle: ProcessHandle,
}

/// Spawn a server process unless `cancel` has already been raised.
///
/// On any failure after the OS spawn succeeded the child is killed before
/// returning, so no process is left running.
pub fn spawn_process(
    name: &str,
    spec: &LaunchSpec,
    spawner: &dyn ProcessSpawner,
    cancel: &CancelSignal,
) -> Result<SpawnedProcess, McpError> {
    if cancel.is_cancelled() {
        return Err(McpError::Cancelled {
            name: name.to_string(),
        });
    }

    tracing::info!(server = name, command = %spec.display(), "starting server process");

    let mut child = spawner.spawn(spec).map_err(|e| McpError::SpawnFailed {
        name: name.to_string(),
        reason: format!("{}: {e}", spec.program),
    })?;

    let streams = (child.stdin.take(), child.stdout.take(), child.stderr.take());
    let (Some(stdin), Some(stdout), Some(stderr)) = streams else {
        let _ = child.start_kill();
        return Err(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdio pipes".into(),
        });
    };

    Ok(SpawnedProcess {
        stdin,
        stdout,
        stderr,
        handle: ProcessHandle::watch(name, child),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSpawner {
        calls: Arc<AtomicUsize>,
    }

    impl ProcessSpawner for CountingSpawner {
        fn spawn(&self, spec: &LaunchSpec) -> std::io::Result<Child> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            OsSpawner.spawn(spec)
        }
    }

    #[test]
    fn test_launch_spec_from_config_prefers_command() {
        let mut cfg = ServerConfig::command("b", "npx", &["@browsermcp/mcp@latest"]);
        cfg.path = Some("/ignored".into());
        let spec = LaunchSpec::from_config(&cfg).unwrap();
        assert_eq!(spec.program, "npx");
        assert_eq!(spec.args, vec!["@browsermcp/mcp@latest"]);
        assert_eq!(spec.display(), "npx @browsermcp/mcp@latest");
    }

    #[test]
    fn test_launch_spec_from_path() {
        let spec = LaunchSpec::from_config(&ServerConfig::path("p", "/opt/server")).unwrap();
        assert_eq!(spec.program, "/opt/server");
        assert!(spec.args.is_empty());
    }

    #[test]
    fn test_launch_spec_requires_path_or_command() {
        let mut cfg = ServerConfig::path("x", "");
        cfg.path = None;
        let err = LaunchSpec::from_config(&cfg).unwrap_err();
        assert!(matches!(err, McpError::ConfigError { .. }));
    }

    #[test]
    fn test_cancel_signal() {
        let (handle, signal) = CancelSignal::pair();
        assert!(!signal.is_cancelled());
        handle.cancel();
        assert!(signal.is_cancelled());
        assert!(!CancelSignal::never().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_before_spawn_never_spawns() {
        let calls = Arc::new(AtomicUsize::new(0));
        let spawner = CountingSpawner {
            calls: calls.clone(),
        };
        let (handle, signal) = CancelSignal::pair();
        handle.cancel();

        let res = spawn_process("c", &LaunchSpec::from_path("cat"), &spawner, &signal);
        assert!(matches!(res, Err(McpError::Cancelled { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let res = spawn_process(
            "missing",
            &LaunchSpec::from_path("/nonexistent/definitely-not-a-binary"),
            &OsSpawner,
            &CancelSignal::never(),
        );
        match res {
            Err(McpError::SpawnFailed { name, .. }) => assert_eq!(name, "missing"),
            _ => panic!("expected SpawnFailed"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_terminates_and_is_idempotent() {
        let proc = spawn_process(
            "cat",
            &LaunchSpec::from_path("cat"),
            &OsSpawner,
            &CancelSignal::never(),
        )
        .unwrap();
        assert!(proc.handle.is_alive());

        proc.handle.kill().await.unwrap();
        assert!(!proc.handle.is_alive());
        assert_eq!(proc.handle.exit_status().as_deref(), Some("killed"));

        proc.handle.kill().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_watcher_reports_natural_exit() {
        let spec = LaunchSpec::from_command("sh", &["-c".to_string(), "exit 3".to_string()]);
        let proc = spawn_process("sh", &spec, &OsSpawner, &CancelSignal::never()).unwrap();
        let status = proc.handle.wait().await;
        assert!(status.contains('3'), "status was {status}");
        assert!(!proc.handle.is_alive());
        proc.handle.kill().await.unwrap();
    }
}
