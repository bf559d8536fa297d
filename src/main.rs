use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use mcp_stdio_bridge::config::{self, BridgeConfig};
use mcp_stdio_bridge::logging::{self, LogFormat};
use mcp_stdio_bridge::mcp_client::{CancelSignal, ServerConfig, ServerRegistry};

#[derive(Parser)]
#[command(name = "mcp-bridge")]
#[command(about = "Drive MCP tool-provider processes over stdio")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $MCP_BRIDGE_CONFIG, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run a single ad-hoc server instead of the configured ones
    #[arg(long, global = true)]
    command: Option<String>,

    /// Argument for --command (repeatable)
    #[arg(long = "arg", global = true, allow_hyphen_values = true)]
    command_args: Vec<String>,

    /// Log server stderr and protocol traffic
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured servers
    Servers,

    /// Start servers and list the tools they expose
    Tools {
        /// Only this server
        #[arg(long)]
        server: Option<String>,
    },

    /// Call a tool and print its output
    Call {
        /// Tool name
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,

        /// Server to call (defaults to whichever exposes the tool)
        #[arg(long)]
        server: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    logging::init_tracing(cli.verbose, format, cli.log_file.as_deref())
        .context("failed to initialize logging")?;

    let mut bridge = load_bridge_config(&cli)?;
    if cli.verbose {
        bridge.verbose = true;
    }

    match &cli.cmd {
        Commands::Servers => {
            print_servers(&bridge);
            Ok(())
        }
        Commands::Tools { server } => {
            let targets = select_servers(&bridge, server.as_deref())?;
            let registry = start_registry(&bridge, &targets).await?;
            for (server, tool) in registry.all_tools().await {
                println!("{server}/{}", tool.name);
                if !tool.description.is_empty() {
                    println!("    {}", tool.description);
                }
                let required = tool.required_params();
                if !required.is_empty() {
                    println!("    required: {}", required.join(", "));
                }
            }
            registry.stop_all().await;
            Ok(())
        }
        Commands::Call { tool, args, server } => {
            let arguments: serde_json::Value =
                serde_json::from_str(args).context("--args must be valid JSON")?;
            if !arguments.is_object() {
                bail!("--args must be a JSON object");
            }

            let targets = select_servers(&bridge, server.as_deref())?;
            let registry = start_registry(&bridge, &targets).await?;
            let result = match server {
                Some(name) => registry.execute_tool_on(name, tool, arguments).await,
                None => registry.execute_tool(tool, arguments).await,
            };
            registry.stop_all().await;

            println!("{}", result?);
            Ok(())
        }
    }
}

/// Build the config from `--command` or from the config file.
fn load_bridge_config(cli: &Cli) -> Result<BridgeConfig> {
    if let Some(command) = &cli.command {
        let args: Vec<&str> = cli.command_args.iter().map(String::as_str).collect();
        return Ok(BridgeConfig {
            mcp_servers: vec![ServerConfig::command("adhoc", command, &args)],
            ..BridgeConfig::default()
        });
    }

    let path = match &cli.config {
        Some(path) => path.clone(),
        None => config::find_config_path()?,
    };
    let bridge = config::load_config(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    tracing::debug!(path = %path.display(), servers = bridge.mcp_servers.len(), "config loaded");
    Ok(bridge)
}

fn print_servers(bridge: &BridgeConfig) {
    for server in &bridge.mcp_servers {
        let target = match (&server.command, &server.path) {
            (Some(cmd), _) => format!("{cmd} {}", server.args.join(" ")),
            (None, Some(path)) => path.clone(),
            (None, None) => String::new(),
        };
        let status = if server.enabled { "enabled" } else { "disabled" };
        println!("{} [{}, {}] {}", server.name, server.kind, status, target.trim_end());
        if let Some(desc) = &server.description {
            println!("    {desc}");
        }
    }
}

fn select_servers(bridge: &BridgeConfig, only: Option<&str>) -> Result<Vec<ServerConfig>> {
    match only {
        Some(name) => match bridge.server(name) {
            Some(server) => {
                // An explicitly named server is started even if disabled.
                let mut server = server.clone();
                server.enabled = true;
                Ok(vec![server])
            }
            None => bail!("server '{name}' is not configured"),
        },
        None => Ok(bridge.enabled_servers()),
    }
}

/// Start the given servers; Ctrl-C aborts any start still in progress.
async fn start_registry(bridge: &BridgeConfig, targets: &[ServerConfig]) -> Result<ServerRegistry> {
    if targets.is_empty() {
        bail!("no servers to start");
    }

    let registry = ServerRegistry::new(bridge.session_options());
    let (cancel_handle, cancel) = CancelSignal::pair();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_handle.cancel();
        }
    });

    let errors = registry.start_enabled(targets, &cancel).await;
    interrupt.abort();

    for (name, err) in &errors {
        eprintln!("{name}: {err}");
    }
    if registry.server_count().await == 0 {
        bail!("no server could be started");
    }
    Ok(registry)
}
