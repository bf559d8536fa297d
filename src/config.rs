//! Bridge configuration loading and validation.
//!
//! Reads a YAML file listing the provider servers plus the bridge-wide
//! settings, resolving `${VAR}` / `${VAR:-default}` references first.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mcp_client::transport::{DEFAULT_MAX_NOISE_LINES, DEFAULT_REQUEST_TIMEOUT};
use crate::mcp_client::{ClientInfo, McpError, ServerConfig, SessionOptions, TransportSettings};

/// Env var pointing directly at a config file.
pub const CONFIG_ENV_VAR: &str = "MCP_BRIDGE_CONFIG";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Forward server stderr at `info` level and log protocol traffic.
    #[serde(default)]
    pub verbose: bool,
    /// Name announced in the `initialize` handshake.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Version announced in the `initialize` handshake.
    #[serde(default = "default_client_version")]
    pub client_version: String,
    /// Per-request deadline in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Non-protocol stdout lines tolerated per request.
    #[serde(default = "default_max_noise_lines")]
    pub max_noise_lines: usize,
    #[serde(default)]
    pub mcp_servers: Vec<ServerConfig>,
}

fn default_client_name() -> String {
    ClientInfo::default().name
}
fn default_client_version() -> String {
    ClientInfo::default().version
}
fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_millis() as u64
}
fn default_max_noise_lines() -> usize {
    DEFAULT_MAX_NOISE_LINES
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            client_name: default_client_name(),
            client_version: default_client_version(),
            request_timeout_ms: default_request_timeout_ms(),
            max_noise_lines: default_max_noise_lines(),
            mcp_servers: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// Session options derived from the bridge-wide settings.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            client_info: ClientInfo {
                name: self.client_name.clone(),
                version: self.client_version.clone(),
            },
            transport: TransportSettings {
                max_noise_lines: self.max_noise_lines,
                request_timeout: Duration::from_millis(self.request_timeout_ms),
            },
            verbose: self.verbose,
        }
    }

    /// Look up a configured server by name.
    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.mcp_servers.iter().find(|s| s.name == name)
    }

    /// Enabled servers, in file order.
    pub fn enabled_servers(&self) -> Vec<ServerConfig> {
        self.mcp_servers.iter().filter(|s| s.enabled).cloned().collect()
    }

    /// Check names are unique and each server has exactly one launch target.
    pub fn validate(&self) -> Result<(), McpError> {
        let mut seen = HashSet::new();
        for server in &self.mcp_servers {
            if server.name.trim().is_empty() {
                return Err(config_error("server entry with empty name".into()));
            }
            if !seen.insert(server.name.as_str()) {
                return Err(config_error(format!("duplicate server name '{}'", server.name)));
            }
            let has_path = server.path.as_deref().is_some_and(|p| !p.is_empty());
            let has_command = server.command.as_deref().is_some_and(|c| !c.is_empty());
            match (has_path, has_command) {
                (false, false) => {
                    return Err(config_error(format!(
                        "server '{}' must have either 'path' or 'command' configured",
                        server.name
                    )))
                }
                (true, true) => {
                    return Err(config_error(format!(
                        "server '{}' sets both 'path' and 'command'",
                        server.name
                    )))
                }
                _ => {}
            }
        }
        if self.max_noise_lines == 0 {
            return Err(config_error("max_noise_lines must be at least 1".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(config_error("request_timeout_ms must be at least 1".into()));
        }
        Ok(())
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Checks `MCP_BRIDGE_CONFIG` first, then `<config dir>/mcp-bridge/config.yaml`.
pub fn find_config_path() -> Result<PathBuf, McpError> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            return Ok(candidate);
        }
        return Err(config_error(format!(
            "{CONFIG_ENV_VAR} points to missing file {}",
            candidate.display()
        )));
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("mcp-bridge").join("config.yaml");
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(config_error("could not find mcp-bridge/config.yaml".into()))
}

/// Load, interpolate, parse and validate a config file.
pub fn load_config(path: &Path) -> Result<BridgeConfig, McpError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| config_error(format!("failed to read {}: {e}", path.display())))?;
    parse_config(&raw)
}

/// Parse config text (after env interpolation) and validate it.
pub fn parse_config(raw: &str) -> Result<BridgeConfig, McpError> {
    let interpolated = interpolate_env_vars(raw);
    let config: BridgeConfig = serde_yaml::from_str(&interpolated)
        .map_err(|e| config_error(format!("failed to parse config: {e}")))?;
    config.validate()?;
    Ok(config)
}

fn config_error(reason: String) -> McpError {
    McpError::ConfigError { reason }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` references. An unterminated
/// `${` is kept as written.
fn interpolate_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        out.push_str(&lookup_var(&after[..end]));
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

fn lookup_var(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, fallback)) => std::env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| expand_tilde(fallback)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand `~` or a leading `~/` to the home directory.
fn expand_tilde(path: &str) -> String {
    let rest = match path {
        "~" => "",
        _ => match path.strip_prefix("~/") {
            Some(rest) => rest,
            None => return path.to_string(),
        },
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home.display().to_string(),
        Some(home) => home.join(rest).display().to_string(),
        None => path.to_string(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::TransportKind;

    const SAMPLE: &str = r#"
verbose: true
client_name: host-app
request_timeout_ms: 5000
mcp_servers:
  - name: browser
    type: stdio
    command: npx
    args: ["@browsermcp/mcp@latest"]
    description: Browser automation
  - name: local
    path: /usr/local/bin/tool-server
    enabled: false
"#;

    #[test]
    fn test_parse_sample() {
        let config = parse_config(SAMPLE).unwrap();
        assert!(config.verbose);
        assert_eq!(config.client_name, "host-app");
        assert_eq!(config.client_version, env!("CARGO_PKG_VERSION"));
        assert_eq!(config.max_noise_lines, 100);
        assert_eq!(config.mcp_servers.len(), 2);

        let browser = config.server("browser").unwrap();
        assert_eq!(browser.kind, TransportKind::Stdio);
        assert_eq!(browser.command.as_deref(), Some("npx"));

        let enabled: Vec<String> = config.enabled_servers().into_iter().map(|s| s.name).collect();
        assert_eq!(enabled, vec!["browser"]);
    }

    #[test]
    fn test_session_options_from_config() {
        let config = parse_config(SAMPLE).unwrap();
        let opts = config.session_options();
        assert_eq!(opts.client_info.name, "host-app");
        assert_eq!(opts.transport.request_timeout, Duration::from_millis(5000));
        assert_eq!(opts.transport.max_noise_lines, 100);
        assert!(opts.verbose);
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let yaml = "mcp_servers:\n  - {name: a, path: /x}\n  - {name: a, command: y}\n";
        let err = parse_config(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate server name 'a'"));
    }

    #[test]
    fn test_rejects_missing_launch_target() {
        let err = parse_config("mcp_servers:\n  - {name: a}\n").unwrap_err();
        assert!(err.to_string().contains("either 'path' or 'command'"));
    }

    #[test]
    fn test_rejects_both_launch_targets() {
        let err = parse_config("mcp_servers:\n  - {name: a, path: /x, command: y}\n").unwrap_err();
        assert!(err.to_string().contains("both"));
    }

    #[test]
    fn test_rejects_zero_noise_bound() {
        assert!(parse_config("max_noise_lines: 0\n").is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.mcp_servers.len(), 2);
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, McpError::ConfigError { .. }));
    }

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__MCP_BRIDGE_TEST_UNSET__");
        let result = interpolate_env_vars("${__MCP_BRIDGE_TEST_UNSET__:-/fallback/path}");
        assert_eq!(result, "/fallback/path");
    }

    #[test]
    fn test_interpolate_env_vars_with_value() {
        std::env::set_var("__MCP_BRIDGE_TEST_SET__", "/custom/bin");
        let result = interpolate_env_vars("path: ${__MCP_BRIDGE_TEST_SET__}/server");
        assert_eq!(result, "path: /custom/bin/server");
        std::env::remove_var("__MCP_BRIDGE_TEST_SET__");
    }

    #[test]
    fn test_interpolate_no_vars() {
        let input = "plain text with no variables";
        assert_eq!(interpolate_env_vars(input), input);
    }

    #[test]
    fn test_interpolate_unterminated_reference_is_kept() {
        assert_eq!(interpolate_env_vars("cost: ${5"), "cost: ${5");
    }

    #[test]
    fn test_empty_var_uses_default() {
        std::env::set_var("__MCP_BRIDGE_TEST_EMPTY__", "");
        assert_eq!(interpolate_env_vars("${__MCP_BRIDGE_TEST_EMPTY__:-x}"), "x");
        std::env::remove_var("__MCP_BRIDGE_TEST_EMPTY__");
    }

    #[test]
    fn test_expand_tilde_leaves_other_users_alone() {
        assert_eq!(expand_tilde("~bob/bin"), "~bob/bin");
        assert_eq!(expand_tilde("/abs/~/path"), "/abs/~/path");
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/bin/server");
        assert!(!result.starts_with('~'));
        assert!(result.ends_with("/bin/server"));
    }
}
