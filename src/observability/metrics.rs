//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, bytes, errors, selections)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): completed requests by route, status
//! - `gateway_request_duration_seconds` (histogram): latency by route
//! - `gateway_bytes_streamed_total` (counter): response bytes relayed by route
//! - `gateway_forward_errors_total` (counter): failures by route, kind, response_started
//! - `gateway_upstream_selected_total` (counter): selections by route, upstream, degraded
//!
//! # Design Decisions
//! - Fed entirely from hooks; the forwarding path knows nothing of metrics
//! - Without an installed recorder every update is a no-op

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::hooks::{GatewayEvent, Hooks};

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record gateway events as metrics.
pub fn register(hooks: &mut Hooks) {
    hooks.subscribe(record_event);
}

fn record_event(event: GatewayEvent<'_>) {
    match event {
        GatewayEvent::RouteMatched(_) => {}
        GatewayEvent::UpstreamChosen(e) => {
            counter!(
                "gateway_upstream_selected_total",
                "route" => e.route_id.to_string(),
                "upstream" => e.upstream.to_string(),
                "degraded" => e.degraded.to_string()
            )
            .increment(1);
        }
        GatewayEvent::ForwardError(e) => {
            let route = e.route_id.as_deref().unwrap_or("none").to_string();
            let status = if e.response_started {
                "aborted".to_string()
            } else {
                e.error.status().as_u16().to_string()
            };
            counter!(
                "gateway_forward_errors_total",
                "route" => route.clone(),
                "kind" => e.error.kind(),
                "response_started" => e.response_started.to_string()
            )
            .increment(1);
            counter!("gateway_requests_total", "route" => route.clone(), "status" => status).increment(1);
            histogram!("gateway_request_duration_seconds", "route" => route.clone())
                .record(e.duration.as_secs_f64());
            if e.bytes_streamed > 0 {
                counter!("gateway_bytes_streamed_total", "route" => route).increment(e.bytes_streamed);
            }
        }
        GatewayEvent::ForwardComplete(e) => {
            let route = e.route_id.to_string();
            counter!(
                "gateway_requests_total",
                "route" => route.clone(),
                "status" => e.status_code.as_u16().to_string()
            )
            .increment(1);
            histogram!("gateway_request_duration_seconds", "route" => route.clone())
                .record(e.duration.as_secs_f64());
            counter!("gateway_bytes_streamed_total", "route" => route).increment(e.bytes_streamed);
        }
    }
}
