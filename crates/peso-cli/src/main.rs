//! Peso CLI — inspect and exercise the MCP server registry.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use peso_mcp::{Manager, Registry, default_config_path};
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "peso", version, about = "MCP connection manager")]
struct Cli {
    /// Registry file (defaults to PESO_MCP_CONFIG or config/mcp_servers.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose/debug logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered servers with availability and priority
    Servers,
    /// Connect auto-connect servers and list their tools
    Tools,
    /// Connect auto-connect servers and print connection statistics
    Stats,
    /// Call a tool by qualified name, or by capability with --capability
    Call {
        /// Qualified `<server>_<tool>` name (bare tool name with --capability)
        name: String,

        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,

        /// Route by capability instead of qualified name
        #[arg(long)]
        capability: Option<String>,
    },
    /// Read a resource from one server
    Read {
        /// Registry name of the server
        server: String,

        /// Resource URI
        uri: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let path = cli.config.unwrap_or_else(default_config_path);
    let registry = Registry::load(&path);
    tracing::debug!("Loaded {} server specs from {}", registry.len(), path.display());

    match cli.command {
        Command::Servers => {
            for spec in registry.specs() {
                let available = if registry.is_available(spec) {
                    "available"
                } else {
                    "missing env"
                };
                let auto = if spec.auto_connect { "auto" } else { "manual" };
                let capabilities: Vec<&str> =
                    spec.capabilities.iter().map(String::as_str).collect();
                println!(
                    "{}  priority={} {} {} [{}]",
                    spec.name,
                    spec.priority,
                    auto,
                    available,
                    capabilities.join(", ")
                );
            }
        }
        Command::Tools => {
            let mut manager = Manager::new(registry);
            manager.auto_connect_servers().await;
            for tool in manager.tool_catalog() {
                println!("{}  {}", tool.name, tool.description);
            }
            manager.disconnect_all().await;
        }
        Command::Stats => {
            let mut manager = Manager::new(registry);
            manager.auto_connect_servers().await;
            let stats = manager.get_connection_stats();
            println!(
                "{}",
                serde_json::to_string_pretty(&stats).context("Failed to render stats")?
            );
            manager.disconnect_all().await;
        }
        Command::Call {
            name,
            args,
            capability,
        } => {
            let arguments: serde_json::Value =
                serde_json::from_str(&args).context("Invalid --args JSON")?;
            let mut manager = Manager::new(registry);
            let result = match capability {
                Some(capability) => {
                    manager.call_tool_smart(&capability, &name, arguments).await
                }
                None => {
                    manager.auto_connect_servers().await;
                    manager.call_tool_by_function_name(&name, arguments).await
                }
            };
            let output = match result {
                Ok(value) => value,
                Err(e) => {
                    manager.disconnect_all().await;
                    return Err(e).context("Tool call failed");
                }
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&output).context("Failed to render result")?
            );
            manager.disconnect_all().await;
        }
        Command::Read { server, uri } => {
            let mut manager = Manager::new(registry);
            let text = match read_resource(&mut manager, &server, &uri).await {
                Ok(text) => text,
                Err(e) => {
                    manager.disconnect_all().await;
                    return Err(e);
                }
            };
            println!("{text}");
            manager.disconnect_all().await;
        }
    }

    Ok(())
}

async fn read_resource(manager: &mut Manager, server: &str, uri: &str) -> Result<String> {
    manager
        .connect_server_by_name(server)
        .await
        .with_context(|| format!("Could not connect '{server}'"))?;
    let connection = manager
        .connection(server)
        .context("Connection disappeared after connect")?;
    connection
        .read_resource(uri)
        .await
        .with_context(|| format!("Could not read '{uri}'"))
}
