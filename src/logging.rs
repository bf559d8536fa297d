//! Tracing subscriber setup.
//!
//! Logs go to stderr by default so stdout stays free for command output. A
//! log file can be used instead; it is rotated on startup.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Number of rotated log files kept next to the active one.
const KEEP_ROTATED: u32 = 3;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the crate logs at `info` (`debug`
/// when `verbose`) and everything else at `warn`.
pub fn init_tracing(
    verbose: bool,
    format: LogFormat,
    log_file: Option<&Path>,
) -> std::io::Result<()> {
    let default_directive = if verbose {
        "mcp_stdio_bridge=debug,warn"
    } else {
        "mcp_stdio_bridge=info,warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false);

    let installed = match (log_file, format) {
        (Some(path), format) => {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            rotate_log_file(path, KEEP_ROTATED);
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            // `File` is unbuffered, so every event hits the disk as it is written.
            let builder = builder.with_writer(Mutex::new(file)).with_ansi(false);
            match format {
                LogFormat::Text => builder.try_init(),
                LogFormat::Json => builder.json().try_init(),
            }
        }
        (None, LogFormat::Text) => builder.with_writer(std::io::stderr).try_init(),
        (None, LogFormat::Json) => builder.with_writer(std::io::stderr).json().try_init(),
    };
    installed.map_err(|e| std::io::Error::other(format!("tracing already initialized: {e}")))?;

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        log_file = ?log_file,
        "logging initialized"
    );
    Ok(())
}

/// `bridge.log` plus `n` → `bridge.log.n`.
fn rotated_path(base: &Path, n: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

/// Shift `base` to `base.1`, `base.1` to `base.2`, and so on, dropping
/// whatever would land past `keep`. Gaps in the chain are fine.
fn rotate_log_file(base: &Path, keep: u32) {
    if keep == 0 {
        let _ = std::fs::remove_file(base);
        return;
    }
    let _ = std::fs::remove_file(rotated_path(base, keep));
    for n in (1..keep).rev() {
        let _ = std::fs::rename(rotated_path(base, n), rotated_path(base, n + 1));
    }
    let _ = std::fs::rename(base, rotated_path(base, 1));
}
