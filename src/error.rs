//! Gateway error taxonomy.
//!
//! # Responsibilities
//! - Name every way a request (or a route table) can fail
//! - Map each failure to the status code of a gateway-synthesized response
//! - Render the small JSON body callers receive
//!
//! # Design Decisions
//! - `Configuration` is raised at table-build time; at request time it only
//!   appears when a matcher tie slips through (fail closed, 500)
//! - `ClientCancelled` is reported to hooks but never rendered: nobody is
//!   left to receive it
//! - Variants carry strings, not source errors, so hook payloads can clone them

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Every failure the gateway core distinguishes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The route table violates an invariant.
    #[error("invalid route table: {0}")]
    Configuration(String),

    /// No route matches the request path.
    #[error("no route matches {path}")]
    RouteNotFound { path: String },

    /// Neither a healthy target nor the degraded fallback could serve the route.
    #[error("no healthy upstream for route {route}: {reason}")]
    NoHealthyUpstream { route: String, reason: String },

    /// Connecting to the upstream failed.
    #[error("upstream {upstream} unreachable: {reason}")]
    UpstreamUnreachable { upstream: String, reason: String },

    /// The per-request deadline elapsed.
    #[error("upstream {upstream} did not finish within {}ms", .after.as_millis())]
    UpstreamTimeout { upstream: String, after: Duration },

    /// The exchange broke after the connection was established.
    #[error("streaming from upstream {upstream} failed: {reason}")]
    StreamingError { upstream: String, reason: String },

    /// The caller went away before the response completed.
    #[error("client disconnected before the response from {upstream} completed")]
    ClientCancelled { upstream: String },
}

impl GatewayError {
    /// Status code of the synthesized response for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::NoHealthyUpstream { .. }
            | GatewayError::UpstreamUnreachable { .. }
            | GatewayError::StreamingError { .. }
            | GatewayError::ClientCancelled { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short machine-friendly name, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Configuration(_) => "configuration",
            GatewayError::RouteNotFound { .. } => "route_not_found",
            GatewayError::NoHealthyUpstream { .. } => "no_healthy_upstream",
            GatewayError::UpstreamUnreachable { .. } => "upstream_unreachable",
            GatewayError::UpstreamTimeout { .. } => "upstream_timeout",
            GatewayError::StreamingError { .. } => "streaming_error",
            GatewayError::ClientCancelled { .. } => "client_cancelled",
        }
    }

    /// Whether this failure is the upstream's fault and should count against
    /// its health.
    pub fn counts_against_upstream(&self) -> bool {
        matches!(
            self,
            GatewayError::UpstreamUnreachable { .. }
                | GatewayError::UpstreamTimeout { .. }
                | GatewayError::StreamingError { .. }
        )
    }

    /// Body message: `"<Reason Phrase>: <detail>"`.
    pub fn client_message(&self) -> String {
        let reason = self.status().canonical_reason().unwrap_or("Error");
        format!("{}: {}", reason, self)
    }

    /// Render with a caller-chosen detail instead of the generated one.
    pub fn into_response_with_detail(self, detail: &str) -> Response {
        let status = self.status();
        let reason = status.canonical_reason().unwrap_or("Error");
        render(status, format!("{}: {}", reason, detail))
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        render(self.status(), self.client_message())
    }
}

fn render(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "message": message }))).into_response()
}

/// Flatten an error and its `source()` chain into one line.
pub(crate) fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = inner.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        let unreachable = GatewayError::UpstreamUnreachable {
            upstream: "http://localhost:3001".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(unreachable.status(), StatusCode::BAD_GATEWAY);

        let timeout = GatewayError::UpstreamTimeout {
            upstream: "http://localhost:3001".into(),
            after: Duration::from_millis(250),
        };
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);

        let missing = GatewayError::RouteNotFound { path: "/nope".into() };
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert!(!missing.counts_against_upstream());
    }

    #[tokio::test]
    async fn test_bad_gateway_body() {
        let err = GatewayError::UpstreamUnreachable {
            upstream: "http://localhost:3001".into(),
            reason: "connection refused".into(),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let json = body_json(response).await;
        let message = json["message"].as_str().unwrap();
        assert!(message.starts_with("Bad Gateway: upstream http://localhost:3001"));
    }

    #[tokio::test]
    async fn test_custom_detail() {
        let err = GatewayError::NoHealthyUpstream {
            route: "auth".into(),
            reason: "all targets cooling down".into(),
        };
        let response = err.into_response_with_detail("authentication service is down");
        let json = body_json(response).await;
        assert_eq!(json["message"], "Bad Gateway: authentication service is down");
    }

    #[tokio::test]
    async fn test_timeout_body() {
        let err = GatewayError::UpstreamTimeout {
            upstream: "http://10.0.0.1:80".into(),
            after: Duration::from_millis(1500),
        };
        let json = body_json(err.into_response()).await;
        assert_eq!(
            json["message"],
            "Gateway Timeout: upstream http://10.0.0.1:80 did not finish within 1500ms"
        );
    }
}
