//! Multi-database MCP server entry point.
//!
//! Exposes PostgreSQL, Redis, MongoDB and InfluxDB as MCP tools and
//! resources over stdio or streamable HTTP.

use multidb_mcp_server::config::{Config, TransportMode};
use multidb_mcp_server::context::AppContext;
use multidb_mcp_server::transport::{HttpTransport, StdioTransport, Transport};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Logs go to stderr; stdout belongs to the stdio transport.
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
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    let config = Config::parse_args();
    init_tracing(&config);

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    info!(
        transport = %config.transport,
        "Starting multidb MCP server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let context = Arc::new(AppContext::start(&config).await);
    let health = context.health().await;
    info!(
        status = %health.status,
        postgres = ?health.postgres,
        redis = ?health.redis,
        mongodb = ?health.mongodb,
        influxdb = ?health.influxdb,
        "Backends ready"
    );

    let result = match config.transport {
        TransportMode::Stdio => StdioTransport::new(Arc::clone(&context)).run().await,
        TransportMode::Http => {
            info!(
                host = %config.http_host,
                port = config.http_port,
                endpoint = %config.mcp_endpoint,
                "Using HTTP transport"
            );
            HttpTransport::new(
                Arc::clone(&context),
                &config.http_host,
                config.http_port,
                &config.mcp_endpoint,
            )
            .run()
            .await
        }
    };

    // No-op when the transport already tore the context down
    context.shutdown().await;

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
