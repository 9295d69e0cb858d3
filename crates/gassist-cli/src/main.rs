//! gassist CLI
//!
//! Pre-authorize Google scope sets, run a single tool, or keep the
//! attachment delivery server up in the foreground.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gassist_core::config::Config;
use gassist_core::models::ScopeSet;
use gassist_core::tools::{self, TOOL_NAMES};
use gassist_core::Services;

#[derive(Parser)]
#[command(name = "gassist")]
#[command(about = "gassist - Google Calendar, Gmail and Tasks tools for LLM agents")]
#[command(long_about = "gassist manages OAuth credentials per Google scope set and runs the \
Calendar, Gmail and Tasks tools that the MCP server exposes.

QUICK START:
  1. Authorize:   gassist auth login --scope calendar
  2. Check:       gassist auth status
  3. Run a tool:  gassist tool list_events --args '{\"days_ahead\": 3}'

OUTPUT FORMAT:
  All commands print JSON. Tool results carry \"status\": \"success\" or \"error\".")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize, inspect or revoke stored credentials.
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Invoke one tool and print its structured result.
    Tool {
        /// Tool name, e.g. list_events
        name: String,

        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Start the attachment delivery server and serve until Ctrl-C.
    Serve,
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Run the browser consent flow unless a usable credential exists.
    Login {
        /// Scope set: calendar, gmail or tasks
        #[arg(long)]
        scope: String,
    },
    /// Show credential state; all scope sets when --scope is omitted.
    Status {
        #[arg(long)]
        scope: Option<String>,
    },
    /// Delete the stored credential for a scope set.
    Revoke {
        #[arg(long)]
        scope: String,
    },
}

fn parse_scope(name: &str) -> Result<ScopeSet> {
    match ScopeSet::from_name(name) {
        Some(scopes) => Ok(scopes),
        None => bail!("Unknown scope set '{}', expected calendar, gmail or tasks", name),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    // stdout carries results, logs go to stderr
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Auth { command } => handle_auth_command(command, &config).await,
        Commands::Tool { name, args } => handle_tool_command(&name, &args, &config).await,
        Commands::Serve => handle_serve_command(&config).await,
    }
}

async fn handle_auth_command(command: AuthCommands, config: &Config) -> Result<()> {
    let services = Services::from_config(config)?;

    match command {
        AuthCommands::Login { scope } => {
            let scopes = parse_scope(&scope)?;
            let record = services.broker.acquire(&scopes).await?;
            print_json(&serde_json::json!({
                "status": "success",
                "message": format!("Authorized {}", scope),
                "scopes": scopes.joined(),
                "expiry": record.expiry.to_rfc3339(),
                "refreshable": record.can_refresh(),
            }))
        }
        AuthCommands::Status { scope } => {
            let names: Vec<String> = match scope {
                Some(name) => vec![name],
                None => ["calendar", "gmail", "tasks"].iter().map(|s| s.to_string()).collect(),
            };
            let mut statuses = Vec::new();
            for name in &names {
                let status = services.broker.status(&parse_scope(name)?).await;
                statuses.push(serde_json::to_value(status)?);
            }
            print_json(&Value::Array(statuses))
        }
        AuthCommands::Revoke { scope } => {
            let scopes = parse_scope(&scope)?;
            services.broker.revoke(&scopes).await?;
            print_json(&serde_json::json!({
                "status": "success",
                "message": format!("Removed stored credential for {}", scope),
            }))
        }
    }
}

async fn handle_tool_command(name: &str, args: &str, config: &Config) -> Result<()> {
    if !TOOL_NAMES.contains(&name) {
        bail!("Unknown tool '{}'. Available: {}", name, TOOL_NAMES.join(", "));
    }
    let args: Value = serde_json::from_str(args)?;
    if !args.is_object() {
        bail!("--args must be a JSON object");
    }

    let services = Services::from_config(config)?;
    let result = tools::invoke(&services.tool_context(), name, &args).await?;
    print_json(&result)?;

    if tools::is_error(&result) {
        std::process::exit(1);
    }
    Ok(())
}

async fn handle_serve_command(config: &Config) -> Result<()> {
    let services = Services::from_config(config)?;
    let handle = services.fetcher.server_handle().await?;

    print_json(&serde_json::json!({
        "status": "success",
        "message": format!("File server running at {}", handle.base_url()),
        "root": handle.root,
        "port": handle.port,
    }))?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down delivery server");
    services.delivery.shutdown().await;
    Ok(())
}
