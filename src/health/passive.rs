//! Passive health checking (failure detection).
//!
//! # Responsibilities
//! - Hold the failure threshold and cooldown applied on forwarding outcomes
//! - Classify upstream statuses that count as failures
//!
//! # Design Decisions
//! - Connection errors, timeouts and broken streams are failures
//! - 502/503/504 relayed from an upstream are failures
//! - Other statuses, 4xx included, are NOT failures (client error, not backend)
//! - The counters themselves live in atomic cells on each target

use std::time::Duration;

use axum::http::StatusCode;

use crate::config::HealthConfig;

/// How forwarding outcomes move a target in and out of cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    /// Consecutive failures before the target starts cooling down.
    pub unhealthy_threshold: u32,
    /// How long a failing target is excluded from selection.
    pub cooldown: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 1,
            cooldown: Duration::from_secs(10),
        }
    }
}

impl From<&HealthConfig> for HealthPolicy {
    fn from(config: &HealthConfig) -> Self {
        Self {
            unhealthy_threshold: config.unhealthy_threshold,
            cooldown: Duration::from_millis(config.cooldown_ms),
        }
    }
}

/// Returns true if an upstream answering with `status` should be treated as failing.
pub fn is_failure_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_statuses() {
        assert!(is_failure_status(StatusCode::BAD_GATEWAY));
        assert!(is_failure_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_failure_status(StatusCode::GATEWAY_TIMEOUT));
        assert!(!is_failure_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_failure_status(StatusCode::NOT_FOUND));
        assert!(!is_failure_status(StatusCode::OK));
    }

    #[test]
    fn test_policy_from_config() {
        let config = HealthConfig {
            unhealthy_threshold: 3,
            cooldown_ms: 2500,
            ..HealthConfig::default()
        };
        let policy = HealthPolicy::from(&config);
        assert_eq!(policy.unhealthy_threshold, 3);
        assert_eq!(policy.cooldown, Duration::from_millis(2500));
    }
}
