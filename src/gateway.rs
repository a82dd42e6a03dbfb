//! The gateway core: match → select → forward.
//!
//! # Responsibilities
//! - Hold the current route table and swap it atomically on reconfiguration
//! - Resolve each request to a route and an upstream target
//! - Hand the request to the forwarder and return whatever it produces
//! - Fire hooks in order: route matched, upstream chosen, then one outcome
//!
//! # Design Decisions
//! - Each request loads the table once and keeps that version to the end,
//!   so a swap never affects in-flight requests
//! - The connector is a type parameter; TLS is the caller's concern

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use hyper_util::client::legacy::connect::{Connect, HttpConnector};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::health::passive::HealthPolicy;
use crate::hooks::{ForwardFailure, Hooks, RouteMatched, UpstreamChosen};
use crate::http::forwarder::{render_error, ForwardContext, Forwarder, ForwarderSettings};
use crate::http::headers::PeerInfo;
use crate::http::request;
use crate::load_balancer::UpstreamSelector;
use crate::routing::RouteTable;

/// Construction-time tunables of a [`Gateway`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GatewaySettings {
    pub forwarder: ForwarderSettings,
    pub health: HealthPolicy,
    pub selector: UpstreamSelector,
}

impl From<&GatewayConfig> for GatewaySettings {
    fn from(config: &GatewayConfig) -> Self {
        let timeouts = &config.timeouts;
        Self {
            forwarder: ForwarderSettings {
                request_timeout: timeouts.request_timeout(),
                connect_timeout: std::time::Duration::from_millis(timeouts.connect_ms),
                idle_timeout: std::time::Duration::from_secs(timeouts.idle_secs),
                max_idle_per_upstream: timeouts.max_idle_per_upstream,
            },
            health: HealthPolicy::from(&config.health),
            selector: UpstreamSelector::new(config.health.fallback_to_unhealthy),
        }
    }
}

/// Routes requests to upstreams.
pub struct Gateway<C = HttpConnector> {
    table: Arc<ArcSwap<RouteTable>>,
    selector: UpstreamSelector,
    forwarder: Forwarder<C>,
    hooks: Arc<Hooks>,
}

impl Gateway<HttpConnector> {
    /// Gateway forwarding over plain TCP.
    pub fn new(table: RouteTable, settings: GatewaySettings, hooks: Hooks) -> Self {
        let hooks = Arc::new(hooks);
        let forwarder = Forwarder::new(settings.forwarder, Arc::clone(&hooks), settings.health);
        Self::assemble(table, settings, hooks, forwarder)
    }
}

impl<C> Gateway<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    /// Gateway forwarding through `connector`, e.g. one that originates TLS.
    pub fn with_connector(connector: C, table: RouteTable, settings: GatewaySettings, hooks: Hooks) -> Self {
        let hooks = Arc::new(hooks);
        let forwarder = Forwarder::with_connector(connector, settings.forwarder, Arc::clone(&hooks), settings.health);
        Self::assemble(table, settings, hooks, forwarder)
    }

    fn assemble(table: RouteTable, settings: GatewaySettings, hooks: Arc<Hooks>, forwarder: Forwarder<C>) -> Self {
        tracing::info!(
            routes = table.len(),
            version = table.version(),
            fallback_to_unhealthy = settings.selector.fallback_to_unhealthy(),
            "Gateway initialized"
        );
        Self {
            table: Arc::new(ArcSwap::from_pointee(table)),
            selector: settings.selector,
            forwarder,
            hooks,
        }
    }

    /// The table new requests are matched against.
    pub fn table(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    /// Shared handle to the swappable table, for collaborators such as the
    /// active health monitor.
    pub fn table_handle(&self) -> Arc<ArcSwap<RouteTable>> {
        Arc::clone(&self.table)
    }

    /// Replace the route table; returns the previous one.
    ///
    /// Requests already in flight finish on the table they started with.
    pub fn swap_table(&self, table: RouteTable) -> Arc<RouteTable> {
        let (routes, version) = (table.len(), table.version());
        let previous = self.table.swap(Arc::new(table));
        tracing::info!(
            routes,
            version,
            previous_version = previous.version(),
            "Route table swapped"
        );
        previous
    }

    pub fn forwarder(&self) -> &Forwarder<C> {
        &self.forwarder
    }

    pub fn hooks(&self) -> &Arc<Hooks> {
        &self.hooks
    }

    /// Handle one inbound request end to end.
    ///
    /// Always produces a response: either the upstream's (streamed) or a
    /// synthesized 404/5xx.
    pub async fn handle(&self, req: Request<Body>, peer: PeerInfo) -> Response<Body> {
        let started = Instant::now();
        let request_id: Arc<str> = match request::request_id(req.headers()) {
            Some(id) => Arc::from(id),
            None => Arc::from(Uuid::new_v4().to_string()),
        };

        let table = self.table.load_full();
        let path = req.uri().path().to_string();

        let route = match table.match_path(&path) {
            Ok(route) => Arc::clone(route),
            Err(error) => {
                tracing::warn!(request_id = %request_id, path = %path, error = %error, "No route matched");
                self.hooks.forward_error(&ForwardFailure {
                    request_id,
                    route_id: None,
                    upstream: None,
                    error: error.clone(),
                    response_started: false,
                    bytes_streamed: 0,
                    duration: started.elapsed(),
                });
                return error.into_response();
            }
        };

        self.hooks.route_matched(&RouteMatched {
            request_id: Arc::clone(&request_id),
            route_id: route.shared_id(),
            method: req.method().clone(),
            path,
        });

        let selection = match self.selector.select(&route) {
            Ok(selection) => selection,
            Err(error) => {
                tracing::warn!(request_id = %request_id, route = %route.id(), error = %error, "No upstream available");
                self.hooks.forward_error(&ForwardFailure {
                    request_id,
                    route_id: Some(route.shared_id()),
                    upstream: None,
                    error: error.clone(),
                    response_started: false,
                    bytes_streamed: 0,
                    duration: started.elapsed(),
                });
                return render_error(error, &route);
            }
        };

        self.hooks.upstream_chosen(&UpstreamChosen {
            request_id: Arc::clone(&request_id),
            route_id: route.shared_id(),
            upstream: selection.target.addr().clone(),
            degraded: selection.degraded,
        });

        let ctx = ForwardContext {
            request_id,
            peer,
            started,
        };
        self.forwarder.forward(req, &route, selection, ctx).await
    }
}
