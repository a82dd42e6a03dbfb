//! Request forwarding to upstream targets.
//!
//! # Responsibilities
//! - Rewrite the request line and forwarding headers
//! - Wait for an upstream slot, connect, exchange headers under one deadline
//! - Stream the request body up and the response body back without buffering
//! - Turn failures into gateway-synthesized responses while that is still possible
//!
//! # Design Decisions
//! - hyper-util's pooled client reuses idle connections per `(scheme, authority)`
//!   and closes them after the idle timeout
//! - The core never does TLS itself: the connector is a type parameter, and
//!   the default `HttpConnector` only speaks plain HTTP
//! - A failure before response headers yields 502/504; after headers the
//!   caller's connection is cut (see `streaming`)
//! - The deadline bounds the request body upload too, including the part
//!   hyper still sends after the response head arrived

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, uri::PathAndQuery, Request, Response, StatusCode, Uri, Version};
use axum::response::IntoResponse;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::{Connect, HttpConnector};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::time::Instant;

use crate::error::{error_chain, GatewayError};
use crate::health::passive::{is_failure_status, HealthPolicy};
use crate::hooks::Hooks;
use crate::http::headers::{apply_forwarding, set_origin, strip_hop_by_hop, PeerInfo};
use crate::http::request::X_REQUEST_ID;
use crate::http::streaming::{DeadlineBody, ForwardTracker, ObservedBody};
use crate::load_balancer::{ConnectionPool, ConnectionSlot, Selection, UpstreamAddr, UpstreamTarget};
use crate::resilience::{Deadline, DEFAULT_REQUEST_TIMEOUT};
use crate::routing::Route;

/// Tunables of the forwarding client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwarderSettings {
    /// Overall deadline: slot wait + connect + headers + body.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Idle pooled connections are closed after this long.
    pub idle_timeout: Duration,
    pub max_idle_per_upstream: usize,
}

impl Default for ForwarderSettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(90),
            max_idle_per_upstream: 32,
        }
    }
}

/// Per-request facts the forwarder needs besides the request itself.
#[derive(Debug, Clone)]
pub struct ForwardContext {
    pub request_id: Arc<str>,
    pub peer: PeerInfo,
    pub started: Instant,
}

/// Streams requests to upstreams and responses back.
pub struct Forwarder<C = HttpConnector> {
    client: Client<C, Body>,
    pool: Arc<ConnectionPool>,
    hooks: Arc<Hooks>,
    health: HealthPolicy,
    settings: ForwarderSettings,
}

impl Forwarder<HttpConnector> {
    /// Forwarder over plain TCP.
    pub fn new(settings: ForwarderSettings, hooks: Arc<Hooks>, health: HealthPolicy) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.set_connect_timeout(Some(settings.connect_timeout));
        Self::with_connector(connector, settings, hooks, health)
    }
}

impl<C> Forwarder<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    /// Forwarder over a caller-supplied connector (e.g. one that adds TLS).
    pub fn with_connector(connector: C, settings: ForwarderSettings, hooks: Arc<Hooks>, health: HealthPolicy) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(settings.idle_timeout)
            .pool_max_idle_per_host(settings.max_idle_per_upstream)
            .build(connector);

        Self {
            client,
            pool: Arc::new(ConnectionPool::new()),
            hooks,
            health,
            settings,
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn settings(&self) -> &ForwarderSettings {
        &self.settings
    }

    /// Forward `req` to the selected target of `route`.
    ///
    /// Never fails: errors before the response starts become a synthesized
    /// 502/504 response; errors after it started abort the relayed body.
    /// Either way `on_forward_error` fires once.
    pub async fn forward(
        &self,
        req: Request<Body>,
        route: &Route,
        selection: Selection,
        ctx: ForwardContext,
    ) -> Response<Body> {
        let Selection { target, degraded } = selection;
        let deadline = Deadline::after(self.settings.request_timeout);

        tracing::debug!(
            request_id = %ctx.request_id,
            route = %route.id(),
            upstream = %target.addr(),
            degraded,
            "Proxying request"
        );

        // Reports ClientCancelled if this future is dropped mid-exchange.
        let mut tracker = ForwardTracker::new(
            Arc::clone(&self.hooks),
            self.health,
            Arc::clone(&target),
            Arc::clone(&ctx.request_id),
            route.shared_id(),
            ctx.started,
        );

        match self.exchange(req, route, &target, &ctx, deadline).await {
            Ok((response, slot)) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);

                if is_failure_status(parts.status) && target.report_failure(&self.health) {
                    tracing::warn!(upstream = %target.addr(), status = %parts.status, "Upstream marked unhealthy");
                }
                tracing::debug!(
                    request_id = %ctx.request_id,
                    upstream = %target.addr(),
                    status = %parts.status,
                    "Received upstream response"
                );

                tracker.set_status(parts.status);
                let body = ObservedBody::new(Body::new(body), deadline, tracker, slot);
                Response::from_parts(parts, Body::new(body))
            }
            Err(error) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    upstream = %target.addr(),
                    degraded,
                    error = %error,
                    "Error in proxying request"
                );
                let error = match error {
                    // The last resort failed too: the route has nothing left.
                    GatewayError::UpstreamUnreachable { reason, .. } if degraded => {
                        target.report_failure(&self.health);
                        GatewayError::NoHealthyUpstream {
                            route: route.id().to_string(),
                            reason: format!("fallback to {} failed: {}", target.addr(), reason),
                        }
                    }
                    other => other,
                };
                tracker.fail(error.clone(), 0, false);
                render_error(error, route)
            }
        }
    }

    /// Everything up to and including response headers, under `deadline`.
    async fn exchange(
        &self,
        req: Request<Body>,
        route: &Route,
        target: &UpstreamTarget,
        ctx: &ForwardContext,
        deadline: Deadline,
    ) -> Result<(Response<Incoming>, ConnectionSlot), GatewayError> {
        let upstream = target.addr();
        let outbound = build_upstream_request(req, route, upstream, ctx)?
            .map(|body| Body::new(DeadlineBody::new(body, deadline, upstream.clone())));

        deadline
            .run(upstream, async {
                let slot = self.pool.acquire(target).await?;
                let response = self
                    .client
                    .request(outbound)
                    .await
                    .map_err(|e| classify(&e, upstream))?;
                Ok::<_, GatewayError>((response, slot))
            })
            .await
    }
}

/// Synthesize the response for a failure on `route`, honoring its custom 502 detail.
pub(crate) fn render_error(error: GatewayError, route: &Route) -> Response<Body> {
    match route.error_message() {
        Some(detail) if error.status() == StatusCode::BAD_GATEWAY => error.into_response_with_detail(detail),
        _ => error.into_response(),
    }
}

fn classify(err: &hyper_util::client::legacy::Error, upstream: &UpstreamAddr) -> GatewayError {
    let reason = error_chain(err);
    if err.is_connect() {
        GatewayError::UpstreamUnreachable {
            upstream: upstream.to_string(),
            reason,
        }
    } else {
        GatewayError::StreamingError {
            upstream: upstream.to_string(),
            reason,
        }
    }
}

/// Rewrite an inbound request into the request sent to `upstream`.
pub(crate) fn build_upstream_request(
    req: Request<Body>,
    route: &Route,
    upstream: &UpstreamAddr,
    ctx: &ForwardContext,
) -> Result<Request<Body>, GatewayError> {
    let (mut parts, body) = req.into_parts();

    let original_host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()));

    let path_and_query = parts.uri.path_and_query().map(PathAndQuery::as_str).unwrap_or("/");
    let rewritten = route.rewrite().apply(path_and_query);

    parts.uri = Uri::builder()
        .scheme(upstream.scheme.as_str())
        .authority(upstream.authority())
        .path_and_query(rewritten.as_str())
        .build()
        .map_err(|e| GatewayError::StreamingError {
            upstream: upstream.to_string(),
            reason: format!("invalid upstream uri for {}: {}", rewritten, e),
        })?;
    parts.version = Version::HTTP_11;

    strip_hop_by_hop(&mut parts.headers);
    apply_forwarding(&mut parts.headers, &ctx.peer, original_host.as_deref());
    if route.change_origin() {
        set_origin(&mut parts.headers, upstream);
    } else if !parts.headers.contains_key(header::HOST) {
        if let Some(host) = original_host.as_deref().and_then(|h| h.parse().ok()) {
            parts.headers.insert(header::HOST, host);
        }
    }
    if !parts.headers.contains_key(&X_REQUEST_ID) {
        if let Ok(value) = ctx.request_id.parse() {
            parts.headers.insert(X_REQUEST_ID, value);
        }
    }

    tracing::trace!(
        request_id = %ctx.request_id,
        target = %parts.uri,
        "Proxying request to upstream"
    );

    Ok(Request::from_parts(parts, body))
}
