//! Upstream target abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream server of a route
//! - Hold its immutable weight and connection limit
//! - Track liveness in atomic cells (consecutive failures, cooldown deadline)
//!
//! # Design Decisions
//! - Health state belongs to the target, which belongs to one route table
//!   version; tables built side by side never share it
//! - Unhealthy means "cooling down": once the cooldown passes the target is
//!   optimistically eligible again
//! - Time is `tokio::time::Instant` so the clock follows the runtime

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use url::Url;

use crate::error::GatewayError;
use crate::health::passive::HealthPolicy;

/// Scheme used to reach an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an upstream lives. Also the connection pool key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpstreamAddr {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl UpstreamAddr {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
        }
    }

    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self::new(Scheme::Http, host, port)
    }

    /// `host:port`, with IPv6 hosts bracketed.
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for UpstreamAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())
    }
}

impl FromStr for UpstreamAddr {
    type Err = GatewayError;

    /// Parse `http://host[:port]` or `https://host[:port]`. A path is not allowed.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| GatewayError::Configuration(format!("upstream {:?}: {}", s, why));

        let url = Url::parse(s).map_err(|e| invalid(&e.to_string()))?;
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            _ => return Err(invalid("scheme must be http or https")),
        };
        let host = url
            .host_str()
            .ok_or_else(|| invalid("missing host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        if url.path() != "/" && !url.path().is_empty() {
            return Err(invalid("must not carry a path"));
        }
        let port = url.port().unwrap_or_else(|| scheme.default_port());

        Ok(Self { scheme, host, port })
    }
}

/// A single upstream server of a route.
#[derive(Debug)]
pub struct UpstreamTarget {
    addr: UpstreamAddr,
    weight: u32,
    max_connections: usize,

    epoch: Instant,
    /// Consecutive failures since the last success.
    consecutive_failures: AtomicU32,
    /// Milliseconds after `epoch` until which the target is cooling down (0 = healthy).
    unhealthy_until_ms: AtomicU64,
}

impl UpstreamTarget {
    pub fn new(addr: UpstreamAddr, weight: u32, max_connections: usize) -> Self {
        Self {
            addr,
            weight,
            max_connections,
            epoch: Instant::now(),
            consecutive_failures: AtomicU32::new(0),
            unhealthy_until_ms: AtomicU64::new(0),
        }
    }

    pub fn addr(&self) -> &UpstreamAddr {
        &self.addr
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    // --- Health Logic ---

    /// Returns true unless the target is inside a cooldown window.
    pub fn is_healthy(&self) -> bool {
        self.is_healthy_at(Instant::now())
    }

    pub fn is_healthy_at(&self, now: Instant) -> bool {
        let until = self.unhealthy_until_ms.load(Ordering::Acquire);
        until == 0 || self.millis_since_epoch(now) >= until
    }

    /// Report a completed exchange.
    pub fn report_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.unhealthy_until_ms.store(0, Ordering::Release);
    }

    /// Report a failed exchange. Returns true if this report started a cooldown.
    pub fn report_failure(&self, policy: &HealthPolicy) -> bool {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures < policy.unhealthy_threshold.max(1) {
            return false;
        }
        let was_healthy = self.is_healthy();
        self.mark_down(policy.cooldown);
        was_healthy
    }

    /// Health callback: exclude the target for `cooldown`.
    pub fn mark_down(&self, cooldown: Duration) {
        let until = self.millis_since_epoch(Instant::now() + cooldown).max(1);
        self.unhealthy_until_ms.store(until, Ordering::Release);
    }

    /// Health callback: make the target eligible immediately.
    pub fn mark_up(&self) {
        self.report_success();
    }

    fn millis_since_epoch(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.epoch).as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(threshold: u32, cooldown_ms: u64) -> HealthPolicy {
        HealthPolicy {
            unhealthy_threshold: threshold,
            cooldown: Duration::from_millis(cooldown_ms),
        }
    }

    #[test]
    fn test_parse_addr() {
        let addr: UpstreamAddr = "http://localhost:3001".parse().unwrap();
        assert_eq!(addr, UpstreamAddr::http("localhost", 3001));
        assert_eq!(addr.to_string(), "http://localhost:3001");

        let tls: UpstreamAddr = "https://auth.internal".parse().unwrap();
        assert_eq!(tls.scheme, Scheme::Https);
        assert_eq!(tls.port, 443);

        let v6: UpstreamAddr = "http://[::1]:8080".parse().unwrap();
        assert_eq!(v6.host, "::1");
        assert_eq!(v6.authority(), "[::1]:8080");

        assert!("ftp://host:21".parse::<UpstreamAddr>().is_err());
        assert!("http://host:80/base".parse::<UpstreamAddr>().is_err());
        assert!("localhost:3001".parse::<UpstreamAddr>().is_err());
    }

    #[test]
    fn test_threshold_and_recovery() {
        let target = UpstreamTarget::new(UpstreamAddr::http("127.0.0.1", 9000), 1, 10);
        let policy = policy(3, 60_000);

        assert!(target.is_healthy());
        assert!(!target.report_failure(&policy));
        assert!(!target.report_failure(&policy));
        assert!(target.is_healthy());

        assert!(target.report_failure(&policy));
        assert!(!target.is_healthy());

        target.report_success();
        assert!(target.is_healthy());
        assert_eq!(target.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_cooldown_expires() {
        let target = UpstreamTarget::new(UpstreamAddr::http("127.0.0.1", 9001), 1, 10);
        target.report_failure(&policy(1, 40));
        assert!(!target.is_healthy());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(target.is_healthy(), "target should be eligible after cooldown");
    }

    #[test]
    fn test_external_callback() {
        let target = UpstreamTarget::new(UpstreamAddr::http("127.0.0.1", 9002), 1, 10);
        target.mark_down(Duration::from_secs(30));
        assert!(!target.is_healthy());
        target.mark_up();
        assert!(target.is_healthy());
    }
}
