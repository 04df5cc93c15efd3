//! Streamable HTTP transport.
//!
//! Every MCP session gets its own gateway service; all sessions share the
//! instance registry and therefore the same backend connections.

use crate::db::InstanceRegistry;
use crate::error::{DbError, DbResult};
use crate::mcp::SqlGatewayService;
use crate::transport::{Transport, wait_for_signal};
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Time open SSE streams get to finish after the first shutdown signal.
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP transport implementation with Streamable HTTP support.
pub struct HttpTransport {
    registry: Arc<InstanceRegistry>,
    server_name: String,
    host: String,
    port: u16,
    /// MCP endpoint path
    endpoint: String,
}

impl HttpTransport {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        server_name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            server_name: server_name.into(),
            host: host.into(),
            port,
            endpoint: endpoint.into(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Router serving one gateway session per MCP client.
    fn router(&self) -> axum::Router {
        let registry = Arc::clone(&self.registry);
        let server_name = self.server_name.clone();
        let service = StreamableHttpService::new(
            move || Ok(SqlGatewayService::new(Arc::clone(&registry), server_name.clone())),
            LocalSessionManager::default().into(),
            Default::default(),
        );

        // nest_service rejects "/", so the root endpoint goes through fallback_service
        match self.endpoint.as_str() {
            "/" => axum::Router::new().fallback_service(service),
            path => axum::Router::new().nest_service(path, service),
        }
    }
}

/// Resolves once shutdown has started and either the grace period ran out
/// or a second signal arrived.
async fn grace_period_elapsed(started: Arc<Notify>) {
    started.notified().await;
    info!(
        timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
        "Draining open streams (send signal again to force exit)"
    );
    tokio::select! {
        _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
            warn!("Graceful shutdown timeout, forcing exit");
        }
        _ = wait_for_signal() => {
            warn!("Received second signal, forcing immediate exit");
        }
    }
}

impl Transport for HttpTransport {
    async fn run(&self) -> DbResult<()> {
        let bind_addr = self.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| DbError::internal(format!("Failed to bind to {}: {}", bind_addr, e)))?;
        info!(
            addr = %bind_addr,
            endpoint = %self.endpoint,
            instances = self.registry.instance_ids().len(),
            "MCP gateway listening over HTTP"
        );

        let shutdown_started = Arc::new(Notify::new());
        let notify = Arc::clone(&shutdown_started);
        let server = axum::serve(listener, self.router()).with_graceful_shutdown(async move {
            wait_for_signal().await;
            notify.notify_one();
        });

        // Open SSE streams would otherwise hold graceful shutdown forever
        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    error!(error = %e, "HTTP server error");
                    return Err(DbError::internal(format!("HTTP server error: {}", e)));
                }
                info!("HTTP server stopped");
            }
            _ = grace_period_elapsed(shutdown_started) => {}
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
