//! API Gateway
//!
//! A path-routing reverse proxy built with Tokio, Axum and hyper.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────────┐
//!                  │                     API GATEWAY                      │
//!                  │                                                      │
//!  Client Request  │  ┌─────────┐    ┌──────────┐    ┌───────────────┐    │
//!  ────────────────┼─▶│  http   │───▶│ routing  │───▶│ load_balancer │    │
//!                  │  │ server  │    │ matcher  │    │ weighted RR   │    │
//!                  │  └─────────┘    └──────────┘    └───────┬───────┘    │
//!                  │                                         ▼            │
//!  Client Response │  ┌──────────┐   ┌──────────┐    ┌───────────────┐    │
//!  ◀───────────────┼──│streaming │◀──│forwarder │◀──▶│ pool + client │◀───┼── Upstream
//!                  │  └──────────┘   └──────────┘    └───────────────┘    │
//!                  │                                                      │
//!                  │  hooks → observability (logs, metrics)               │
//!                  │  health (passive cooldown, optional active probes)   │
//!                  │  config (TOML, hot reload) · lifecycle (signals)     │
//!                  └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use api_gateway::config::{load_config, ConfigWatcher, GatewayConfig};
use api_gateway::hooks::Hooks;
use api_gateway::http::HttpServer;
use api_gateway::lifecycle::Shutdown;
use api_gateway::observability::{self, init_logging, init_metrics};

/// How long in-flight requests may drain after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "api-gateway", version, about = "Path-routing API gateway")]
struct Args {
    /// TOML configuration file. Without it, `/api/auth` is proxied to
    /// http://localhost:3001.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listening port; overrides the configured bind address port.
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::auth_service(3000),
    };
    if let Some(port) = args.port {
        let host = config
            .listener
            .bind_address
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        config.listener.bind_address = format!("{}:{}", host, port);
    }

    init_logging(&config.observability)?;
    tracing::info!("api-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        request_timeout_ms = config.timeouts.request_ms,
        "Configuration loaded"
    );

    let mut hooks = Hooks::new();
    observability::logging::register(&mut hooks);
    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        init_metrics(addr)?;
        observability::metrics::register(&mut hooks);
    }

    // Keep the watcher handle alive for the whole run.
    let (config_updates, _watcher) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (updates, Some(watcher.run()?))
        }
        None => (mpsc::unbounded_channel().1, None),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::with_hooks(config, hooks)?;
    let shutdown = Shutdown::new();
    let server_task = tokio::spawn(server.run(listener, config_updates, shutdown.subscribe()));

    shutdown.trigger_on_signal().await;

    match tokio::time::timeout(DRAIN_TIMEOUT, server_task).await {
        Ok(joined) => joined??,
        Err(_) => tracing::warn!(
            timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "Drain timeout elapsed, closing remaining connections"
        ),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
