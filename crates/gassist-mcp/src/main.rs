//! gassist MCP Server
//!
//! Spawned by an agent runtime to reach Google Calendar, Gmail and Tasks.
//! Communicates via stdio JSON-RPC, so all logging goes to a file.

use anyhow::Result;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use gassist_core::config::Config;
use gassist_core::mcp::McpServer;
use gassist_core::Services;

#[tokio::main]
async fn main() -> Result<()> {
    // Load config first to get log path
    let config = Config::load().unwrap_or_else(|_| Config::default());

    // Set up file logging with timestamps
    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "mcp.log");

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_ansi(false)
        .with_target(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));
    tracing_subscriber::registry()
        .with(file_layer.with_filter(filter))
        .init();

    info!("gassist MCP server starting");

    let services = Services::from_config(&config).map_err(|e| {
        error!("Failed to initialize services: {}", e);
        e
    })?;

    let server = McpServer::new(services.tool_context());
    server.run().await?;

    services.delivery.shutdown().await;
    info!("gassist MCP server stopped");
    Ok(())
}
