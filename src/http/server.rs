//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router dispatching every request to the gateway
//! - Serve HTTP/1.1 and HTTP/2 (h2c)
//! - Wire up middleware (tracing, request ID)
//! - Answer the status route before routing
//! - Apply route reloads and run the active health monitor
//! - Drain in-flight requests on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Method, Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use hyper_util::client::legacy::connect::{Connect, HttpConnector};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::gateway::{Gateway, GatewaySettings};
use crate::health::HealthMonitor;
use crate::hooks::Hooks;
use crate::http::headers::PeerInfo;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::routing::RouteTable;

/// Body of the status route.
pub const STATUS_MESSAGE: &str = "API Gateway is running!";

/// Application state injected into handlers.
pub struct AppState<C = HttpConnector> {
    pub gateway: Arc<Gateway<C>>,
    pub status_path: Option<Arc<str>>,
    pub local_addr: SocketAddr,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            status_path: self.status_path.clone(),
            local_addr: self.local_addr,
        }
    }
}

/// HTTP server for the gateway.
pub struct HttpServer<C = HttpConnector> {
    gateway: Arc<Gateway<C>>,
    config: GatewayConfig,
}

impl HttpServer<HttpConnector> {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        Self::with_hooks(config, Hooks::new())
    }

    /// Like [`HttpServer::new`], with caller-registered hooks.
    pub fn with_hooks(config: GatewayConfig, hooks: Hooks) -> Result<Self, GatewayError> {
        let table = RouteTable::from_config(&config.routes)?;
        let gateway = Gateway::new(table, GatewaySettings::from(&config), hooks);
        Ok(Self {
            gateway: Arc::new(gateway),
            config,
        })
    }
}

impl<C> HttpServer<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    /// Serve an already-built gateway, e.g. one with a TLS connector.
    pub fn with_gateway(config: GatewayConfig, gateway: Arc<Gateway<C>>) -> Self {
        Self { gateway, config }
    }

    pub fn gateway(&self) -> &Arc<Gateway<C>> {
        &self.gateway
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState<C>) -> Router {
        Router::new().fallback(proxy_handler::<C>).with_state(state).layer(
            ServiceBuilder::new()
                .layer(set_request_id_layer())
                .layer(TraceLayer::new_for_http())
                .layer(propagate_request_id_layer()),
        )
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Validated configs arriving on `config_updates` replace the route
    /// table. Returns once `shutdown` fires and in-flight requests drained.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        if self.config.health.active.enabled {
            let monitor = HealthMonitor::new(
                self.gateway.table_handle(),
                self.config.health.active.clone(),
                Duration::from_millis(self.config.health.cooldown_ms),
            );
            tokio::spawn(monitor.run(shutdown.resubscribe()));
        }

        tokio::spawn(apply_reloads(
            Arc::clone(&self.gateway),
            config_updates,
            shutdown.resubscribe(),
        ));

        let state = AppState {
            gateway: Arc::clone(&self.gateway),
            status_path: self.config.listener.status_path.as_deref().map(Arc::from),
            local_addr: addr,
        };
        let app = Self::build_router(state).into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Rebuild and swap the route table for every config update.
async fn apply_reloads<C>(
    gateway: Arc<Gateway<C>>,
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    mut shutdown: broadcast::Receiver<()>,
) where
    C: Connect + Clone + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(config) = update else { break };
                match RouteTable::from_config(&config.routes) {
                    Ok(table) => {
                        gateway.swap_table(table);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Rejected reloaded routes, keeping current table");
                    }
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// Main proxy handler.
async fn proxy_handler<C>(
    State(state): State<AppState<C>>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response
where
    C: Connect + Clone + Send + Sync + 'static,
{
    if let Some(status_path) = &state.status_path {
        if request.method() == Method::GET && request.uri().path() == &**status_path {
            return (StatusCode::OK, STATUS_MESSAGE).into_response();
        }
    }

    let peer = PeerInfo {
        client_addr,
        gateway_addr: state.local_addr,
    };
    state.gateway.handle(request, peer).await
}
