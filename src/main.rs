//! SQL MCP Server - Main entry point.
//!
//! This server exposes MCP (Model Context Protocol) tools that let AI
//! assistants run validated, read-only SQL against configured SQLite,
//! PostgreSQL, MySQL and SQL Server instances.

use clap::Parser;
use sql_mcp_server::config::{Config, TransportMode};
use sql_mcp_server::db::InstanceRegistry;
use sql_mcp_server::transport::{HttpTransport, StdioTransport, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr; stdout carries the stdio MCP transport.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    info!(
        transport = %config.transport,
        "Starting SQL MCP Server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let env: HashMap<String, String> = std::env::vars().collect();
    let instances = config.instance_configs(&env).inspect_err(|e| {
        error!(error = %e, "Invalid instance configuration");
    })?;
    for instance in &instances {
        info!(
            instance_id = %instance.id,
            engine = %instance.engine,
            read_only = instance.read_only,
            max_rows = instance.max_rows,
            "Configured instance"
        );
    }

    // Connections open lazily on first use of each instance
    let registry = Arc::new(InstanceRegistry::new(instances)?);

    let result = match config.transport {
        TransportMode::Stdio => {
            let transport = StdioTransport::new(registry, &config.server_name);
            transport.run().await
        }
        TransportMode::Http => {
            info!(
                host = %config.http_host,
                port = config.http_port,
                endpoint = %config.mcp_endpoint,
                "Using HTTP transport"
            );
            let transport = HttpTransport::new(
                registry,
                &config.server_name,
                &config.http_host,
                config.http_port,
                &config.mcp_endpoint,
            );
            transport.run().await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
