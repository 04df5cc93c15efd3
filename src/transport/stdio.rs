//! Stdio transport: a single MCP session over stdin/stdout.
//!
//! Logs must stay on stderr while this transport is active.

use crate::db::InstanceRegistry;
use crate::error::{DbError, DbResult};
use crate::mcp::SqlGatewayService;
use crate::transport::{Transport, wait_for_signal};
use rmcp::{ServiceExt, transport::stdio};
use std::sync::Arc;
use tracing::{info, warn};

/// Serves one gateway session to the process that spawned us.
pub struct StdioTransport {
    registry: Arc<InstanceRegistry>,
    server_name: String,
}

impl StdioTransport {
    pub fn new(registry: Arc<InstanceRegistry>, server_name: impl Into<String>) -> Self {
        Self {
            registry,
            server_name: server_name.into(),
        }
    }
}

impl Transport for StdioTransport {
    async fn run(&self) -> DbResult<()> {
        info!(server_name = %self.server_name, "Starting MCP server with stdio transport");

        let service = SqlGatewayService::new(self.registry.clone(), self.server_name.clone());
        let running_service = service
            .serve(stdio())
            .await
            .map_err(|e| DbError::internal(format!("Failed to start stdio transport: {}", e)))?;

        let shutdown_requested = tokio::select! {
            result = running_service.waiting() => {
                match result {
                    Ok(_quit_reason) => info!("Stdio transport completed normally"),
                    Err(e) => {
                        warn!(error = %e, "Stdio transport error");
                        return Err(DbError::internal(format!("Stdio transport error: {}", e)));
                    }
                }
                false
            }
            _ = wait_for_signal() => {
                info!("Shutdown signal received");
                true
            }
        };

        if shutdown_requested {
            // A blocking stdin read cannot be cancelled from here
            info!("Exiting process");
            std::process::exit(0);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}
