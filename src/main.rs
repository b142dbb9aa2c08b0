// pmguard - Main Entry Point
//
// Command-line front end for the guarded package-management dispatcher:
// - `call`: run one tool request and print its result
// - `tools`: list the available tools
// - `policy`: print the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pmguard::{Config, Operation, ToolDispatcher, ToolRequest};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// pmguard: sandboxed npm / uv / pip operations
#[derive(Parser, Debug)]
#[command(name = "pmguard")]
#[command(version)]
#[command(about = "Run package-manager operations behind a path sandbox and package allow-list", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: ~/.config/pmguard/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a single tool call
    Call {
        /// Tool name (install, uninstall, init, create_venv, add)
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        arguments: String,
    },
    /// List available tools
    Tools,
    /// Print the effective configuration as JSON
    Policy,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = tracing::subscriber::with_default(pmguard::logging::bootstrap(), || {
        match &args.config {
            Some(path) => Config::load_from_path(path),
            None => Config::load(),
        }
    })?;
    pmguard::logging::init(&config.logging, args.verbose)?;

    debug!(root = %config.policy.project_root.display(), "Configuration loaded");

    match args.command {
        Some(Commands::Call { tool, arguments }) => {
            let arguments: Value = serde_json::from_str(&arguments)
                .context("--arguments must be valid JSON")?;
            if !arguments.is_object() {
                anyhow::bail!("--arguments must be a JSON object");
            }

            info!(tool = %tool, "pmguard v{} handling tool call", env!("CARGO_PKG_VERSION"));
            let dispatcher = ToolDispatcher::new(Arc::new(config.policy));
            let result = dispatcher
                .dispatch_request(ToolRequest::from_value(tool, arguments))
                .await;

            println!("{}", result.message);
            if !result.success {
                std::process::exit(1);
            }
        }
        Some(Commands::Policy) => {
            let rendered =
                serde_json::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        Some(Commands::Tools) | None => list_tools(),
    }

    Ok(())
}

fn list_tools() {
    for operation in Operation::ALL {
        println!("{:<12} {}", operation.as_str(), operation.description());
    }
}
