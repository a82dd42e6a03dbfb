//! Hook payloads.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode};

use crate::error::GatewayError;
use crate::load_balancer::UpstreamAddr;

/// A request path resolved to a route.
#[derive(Debug, Clone)]
pub struct RouteMatched {
    pub request_id: Arc<str>,
    pub route_id: Arc<str>,
    pub method: Method,
    pub path: String,
}

/// A target was selected for a matched route.
#[derive(Debug, Clone)]
pub struct UpstreamChosen {
    pub request_id: Arc<str>,
    pub route_id: Arc<str>,
    pub upstream: UpstreamAddr,
    /// Chosen from the full list because no target was healthy.
    pub degraded: bool,
}

/// A request failed. Fired at most once per request.
#[derive(Debug, Clone)]
pub struct ForwardFailure {
    pub request_id: Arc<str>,
    /// `None` when no route matched.
    pub route_id: Option<Arc<str>>,
    /// `None` when the failure happened before a target was chosen.
    pub upstream: Option<UpstreamAddr>,
    pub error: GatewayError,
    /// Response headers (and maybe body bytes) already reached the caller,
    /// so no error response could be synthesized; the connection was cut.
    pub response_started: bool,
    pub bytes_streamed: u64,
    pub duration: Duration,
}

/// A response was relayed completely.
#[derive(Debug, Clone)]
pub struct ForwardResult {
    pub request_id: Arc<str>,
    pub route_id: Arc<str>,
    pub status_code: StatusCode,
    pub bytes_streamed: u64,
    pub upstream_used: UpstreamAddr,
    pub duration: Duration,
}

impl ForwardResult {
    pub fn duration_nanos(&self) -> u128 {
        self.duration.as_nanos()
    }
}

/// Any hook payload, for subscribers interested in every slot.
#[derive(Debug, Clone, Copy)]
pub enum GatewayEvent<'a> {
    RouteMatched(&'a RouteMatched),
    UpstreamChosen(&'a UpstreamChosen),
    ForwardError(&'a ForwardFailure),
    ForwardComplete(&'a ForwardResult),
}

impl GatewayEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            GatewayEvent::RouteMatched(_) => "route_matched",
            GatewayEvent::UpstreamChosen(_) => "upstream_chosen",
            GatewayEvent::ForwardError(_) => "forward_error",
            GatewayEvent::ForwardComplete(_) => "forward_complete",
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            GatewayEvent::RouteMatched(e) => &e.request_id,
            GatewayEvent::UpstreamChosen(e) => &e.request_id,
            GatewayEvent::ForwardError(e) => &e.request_id,
            GatewayEvent::ForwardComplete(e) => &e.request_id,
        }
    }
}
