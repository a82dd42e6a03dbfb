//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, weights ≥ 1, addresses parse)
//! - Detect conflicting routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system
//! - The route table itself is the final judge of ambiguity

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;
use crate::error::GatewayError;
use crate::load_balancer::UpstreamAddr;
use crate::routing::RouteTable;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g. `routes[0].upstreams[1].url`).
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Check `config` and report every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("{:?} is not a socket address", config.listener.bind_address),
        ));
    }
    if let Some(path) = &config.listener.status_path {
        if !path.starts_with('/') {
            errors.push(ValidationError::new("listener.status_path", "must start with '/'"));
        }
    }

    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::new("timeouts.connect_ms", "must be greater than 0"));
    }
    if config.timeouts.request_ms == 0 {
        errors.push(ValidationError::new("timeouts.request_ms", "must be greater than 0"));
    }
    if config.health.active.enabled {
        if config.health.active.interval_secs == 0 {
            errors.push(ValidationError::new("health.active.interval_secs", "must be greater than 0"));
        }
        if !config.health.active.path.starts_with('/') {
            errors.push(ValidationError::new("health.active.path", "must start with '/'"));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", config.observability.metrics_address),
        ));
    }

    let mut ids = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        let field = format!("routes[{}]", i);
        if route.id.is_empty() {
            errors.push(ValidationError::new(format!("{}.id", field), "must not be empty"));
        } else if !ids.insert(route.id.as_str()) {
            errors.push(ValidationError::new(format!("{}.id", field), format!("duplicate id {:?}", route.id)));
        }
        if !route.path.starts_with('/') {
            errors.push(ValidationError::new(format!("{}.path", field), "must start with '/'"));
        }
        if let Some(prefix) = &route.strip_prefix {
            if !prefix.starts_with('/') {
                errors.push(ValidationError::new(format!("{}.strip_prefix", field), "must start with '/'"));
            }
        }
        if route.upstreams.is_empty() {
            errors.push(ValidationError::new(format!("{}.upstreams", field), "at least one upstream is required"));
        }
        for (j, upstream) in route.upstreams.iter().enumerate() {
            let field = format!("{}.upstreams[{}]", field, j);
            if let Err(e) = upstream.url.parse::<UpstreamAddr>() {
                errors.push(ValidationError::new(format!("{}.url", field), detail(e)));
            }
            if upstream.weight == 0 {
                errors.push(ValidationError::new(format!("{}.weight", field), "must be at least 1"));
            }
            if upstream.max_connections == 0 {
                errors.push(ValidationError::new(format!("{}.max_connections", field), "must be at least 1"));
            }
        }
    }

    // Only worth building once every route is individually sound.
    if errors.is_empty() {
        if let Err(e) = RouteTable::from_config(&config.routes) {
            errors.push(ValidationError::new("routes", detail(e)));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn detail(error: GatewayError) -> String {
    match error {
        GatewayError::Configuration(msg) => msg,
        other => other.to_string(),
    }
}
