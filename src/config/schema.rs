//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::load_balancer::UpstreamAddr;
use crate::routing::{PathRewriteRule, RouteSpec, UpstreamSpec};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, status route).
    pub listener: ListenerConfig,

    /// Route definitions mapping path rules to upstreams.
    pub routes: Vec<RouteConfig>,

    /// Timeout and connection reuse settings.
    pub timeouts: TimeoutConfig,

    /// Passive health policy and optional active probing.
    pub health: HealthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// The single-route setup served when no config file is given:
    /// `/api/auth` → `http://localhost:3001`, prefix stripped, status on `/`.
    pub fn auth_service(port: u16) -> Self {
        Self {
            listener: ListenerConfig {
                bind_address: format!("0.0.0.0:{}", port),
                status_path: Some("/".to_string()),
            },
            routes: vec![RouteConfig {
                id: "auth".to_string(),
                path: "/api/auth".to_string(),
                strip_prefix: Some("/api/auth".to_string()),
                change_origin: true,
                error_message: Some("authentication service is down".to_string()),
                upstreams: vec![UpstreamConfig::new("http://localhost:3001")],
            }],
            ..Self::default()
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Path answering `GET` with a fixed liveness message, checked before routing.
    pub status_path: Option<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            status_path: None,
        }
    }
}

/// Route configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics/hooks.
    pub id: String,

    /// Path rule: literal and `*` segments (e.g. "/api/*/items").
    pub path: String,

    /// Prefix removed from the request path before forwarding.
    #[serde(default)]
    pub strip_prefix: Option<String>,

    /// Rewrite `Host` to the upstream authority.
    #[serde(default = "default_true")]
    pub change_origin: bool,

    /// Detail shown in the 502 body instead of the generated one.
    #[serde(default)]
    pub error_message: Option<String>,

    pub upstreams: Vec<UpstreamConfig>,
}

impl RouteConfig {
    /// Convert into a table entry, parsing upstream URLs.
    pub fn to_spec(&self) -> Result<RouteSpec, GatewayError> {
        let mut spec = RouteSpec::new(self.id.clone(), self.path.clone()).change_origin(self.change_origin);
        if let Some(prefix) = &self.strip_prefix {
            spec = spec.rewrite(PathRewriteRule::strip_prefix(prefix.clone()));
        }
        if let Some(message) = &self.error_message {
            spec = spec.error_message(message.clone());
        }
        for upstream in &self.upstreams {
            let addr: UpstreamAddr = upstream.url.parse().map_err(|e| match e {
                GatewayError::Configuration(msg) => GatewayError::Configuration(format!("route {:?}: {}", self.id, msg)),
                other => other,
            })?;
            spec = spec.upstream(
                UpstreamSpec::new(addr)
                    .weight(upstream.weight)
                    .max_connections(upstream.max_connections),
            );
        }
        Ok(spec)
    }
}

/// Upstream server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct UpstreamConfig {
    /// Base URL (e.g., "http://127.0.0.1:3001"). Scheme, host, and port only.
    pub url: String,

    /// Weight for weighted round-robin (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Maximum concurrent exchanges with this upstream.
    #[serde(default = "default_max_upstream_conns")]
    pub max_connections: usize,
}

impl UpstreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            weight: default_weight(),
            max_connections: default_max_upstream_conns(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_weight() -> u32 {
    1
}

fn default_max_upstream_conns() -> usize {
    100
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Overall per-request deadline in milliseconds.
    pub request_ms: u64,

    /// Pooled connections idle longer than this are closed.
    pub idle_secs: u64,

    /// Idle connections kept per upstream.
    pub max_idle_per_upstream: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            request_ms: 30_000,
            idle_secs: 90,
            max_idle_per_upstream: 32,
        }
    }
}

impl TimeoutConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }
}

/// Health configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failures before an upstream enters cooldown.
    pub unhealthy_threshold: u32,

    /// Cooldown length in milliseconds.
    pub cooldown_ms: u64,

    /// Use an unhealthy upstream when a route has no healthy one left.
    pub fallback_to_unhealthy: bool,

    pub active: ActiveHealthConfig,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 1,
            cooldown_ms: 10_000,
            fallback_to_unhealthy: true,
            active: ActiveHealthConfig::default(),
        }
    }
}

/// Active probing configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ActiveHealthConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Probe interval in seconds.
    pub interval_secs: u64,

    /// Probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Path to probe.
    pub path: String,
}

impl Default for ActiveHealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 10,
            timeout_ms: 2_000,
            path: "/health".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
