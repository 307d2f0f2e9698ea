//! HTTP transport with Streamable HTTP support for the MCP server.
//!
//! The MCP endpoint is served next to `GET /health`, which always answers
//! 200 with the per-backend health report.

use crate::context::AppContext;
use crate::error::{DbError, DbResult};
use crate::mcp::McpService;
use crate::models::HealthReport;
use crate::transport::{Transport, wait_for_signal};
use axum::{Json, Router, extract::State, routing::get};
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// How long open SSE streams get to finish after the first signal.
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpTransport {
    context: Arc<AppContext>,
    /// Host to bind to
    host: String,
    /// Port to bind to
    port: u16,
    /// MCP endpoint path
    endpoint: String,
}

impl HttpTransport {
    pub fn new(
        context: Arc<AppContext>,
        host: impl Into<String>,
        port: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            context,
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

    /// `/health` plus the MCP service mounted at the configured endpoint.
    fn router(&self) -> Router {
        let context = Arc::clone(&self.context);
        let service = StreamableHttpService::new(
            move || Ok(McpService::new(Arc::clone(&context))),
            LocalSessionManager::default().into(),
            Default::default(),
        );

        let app = Router::new()
            .route("/health", get(health))
            .with_state(Arc::clone(&self.context));

        // nest_service doesn't accept "/", so the root endpoint becomes the fallback
        if self.endpoint == "/" {
            app.fallback_service(service)
        } else {
            app.nest_service(&self.endpoint, service)
        }
    }
}

async fn health(State(context): State<Arc<AppContext>>) -> Json<HealthReport> {
    Json(context.health().await)
}

impl Transport for HttpTransport {
    async fn run(&self) -> DbResult<()> {
        let bind_addr = self.bind_addr();
        info!("Starting MCP server with HTTP transport on {}", bind_addr);

        let app = self.router();

        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            DbError::connection(
                format!("Failed to bind to {}: {}", bind_addr, e),
                "Check that the port is available",
            )
        })?;

        info!(endpoint = %self.endpoint, "MCP endpoint ready");

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = Arc::clone(&shutdown_notify);
        let shutdown_signal = async move {
            wait_for_signal().await;
            shutdown_notify_clone.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        // SSE streams can hold the server open indefinitely, so after the
        // first signal the server gets a grace period or a second signal.
        let result = tokio::select! {
            result = server => {
                match result {
                    Ok(()) => {
                        info!("HTTP server stopped");
                        Ok(())
                    }
                    Err(e) => {
                        error!(error = %e, "HTTP server error");
                        Err(DbError::internal(format!("HTTP server error: {}", e)))
                    }
                }
            }
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for connections to close (send signal again to force exit)..."
                );

                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => Ok(()),
        };

        self.context.shutdown().await;
        result
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
