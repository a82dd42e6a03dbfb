//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Log gateway events from the hook registry
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - `RUST_LOG` overrides the configured level

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};
use crate::error::GatewayError;
use crate::hooks::{GatewayEvent, Hooks};

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
    }
}

/// Log every gateway event.
pub fn register(hooks: &mut Hooks) {
    hooks.subscribe(log_event);
}

fn log_event(event: GatewayEvent<'_>) {
    match event {
        GatewayEvent::RouteMatched(e) => tracing::debug!(
            request_id = %e.request_id,
            route = %e.route_id,
            method = %e.method,
            path = %e.path,
            "Route matched"
        ),
        GatewayEvent::UpstreamChosen(e) if e.degraded => tracing::warn!(
            request_id = %e.request_id,
            route = %e.route_id,
            upstream = %e.upstream,
            "Forwarding to unhealthy upstream (degraded)"
        ),
        GatewayEvent::UpstreamChosen(e) => tracing::debug!(
            request_id = %e.request_id,
            route = %e.route_id,
            upstream = %e.upstream,
            "Upstream chosen"
        ),
        GatewayEvent::ForwardError(e) => {
            let route = e.route_id.as_deref().unwrap_or("-");
            let upstream = e.upstream.as_ref().map(ToString::to_string).unwrap_or_default();
            match &e.error {
                GatewayError::ClientCancelled { .. } | GatewayError::RouteNotFound { .. } => tracing::info!(
                    request_id = %e.request_id,
                    route,
                    upstream,
                    kind = e.error.kind(),
                    "Request ended without a response: {}", e.error
                ),
                _ => tracing::warn!(
                    request_id = %e.request_id,
                    route,
                    upstream,
                    kind = e.error.kind(),
                    response_started = e.response_started,
                    bytes = e.bytes_streamed,
                    duration_ms = e.duration.as_millis() as u64,
                    "Error in proxying request: {}", e.error
                ),
            }
        }
        GatewayEvent::ForwardComplete(e) => tracing::info!(
            request_id = %e.request_id,
            route = %e.route_id,
            upstream = %e.upstream_used,
            status = e.status_code.as_u16(),
            bytes = e.bytes_streamed,
            duration_ms = e.duration.as_millis() as u64,
            "Received response from upstream"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_adds_subscriber() {
        let mut hooks = Hooks::new();
        assert!(hooks.is_empty());
        register(&mut hooks);
        assert!(!hooks.is_empty());
    }
}
