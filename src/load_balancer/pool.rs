//! Upstream connection slots.
//!
//! # Responsibilities
//! - Bound concurrent exchanges per `(scheme, host, port)`
//! - Hand out RAII slots that release on drop
//!
//! # Design Decisions
//! - Keyed by address, not by target: routes sharing an upstream share its slots
//! - Waiting for a slot is a suspension point and sits inside the request deadline
//! - A reload that changes an address's limit replaces its semaphore; slots
//!   held on the old one stay valid until released, so the old and new
//!   limits may briefly overlap
//! - The hyper client below owns the actual idle sockets and their idle timeout

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::GatewayError;
use crate::load_balancer::upstream::{UpstreamAddr, UpstreamTarget};

/// Manages per-upstream slot limits.
#[derive(Debug, Default)]
pub struct ConnectionPool {
    slots: DashMap<UpstreamAddr, Limit>,
}

#[derive(Debug)]
struct Limit {
    max: usize,
    semaphore: Arc<Semaphore>,
}

impl Limit {
    fn new(max: usize) -> Self {
        Self {
            max,
            semaphore: Arc::new(Semaphore::new(max)),
        }
    }
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for a free slot to `target`.
    ///
    /// The limit follows `target.max_connections()`, so a reloaded table
    /// with a new limit takes effect on its first request.
    pub async fn acquire(&self, target: &UpstreamTarget) -> Result<ConnectionSlot, GatewayError> {
        let max = target.max_connections();
        let semaphore = {
            let mut entry = self
                .slots
                .entry(target.addr().clone())
                .or_insert_with(|| Limit::new(max));
            if entry.max != max {
                tracing::info!(
                    upstream = %target.addr(),
                    previous = entry.max,
                    limit = max,
                    "Connection limit changed"
                );
                *entry = Limit::new(max);
            }
            Arc::clone(&entry.semaphore)
        };

        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::UpstreamUnreachable {
                upstream: target.addr().to_string(),
                reason: "connection pool closed".to_string(),
            })?;

        tracing::trace!(
            upstream = %target.addr(),
            available = permit.semaphore().available_permits(),
            "Connection slot acquired"
        );

        Ok(ConnectionSlot { _permit: permit })
    }

    /// Free slots for `addr`, if it has been used.
    pub fn available(&self, addr: &UpstreamAddr) -> Option<usize> {
        self.slots.get(addr).map(|l| l.semaphore.available_permits())
    }
}

/// A slot representing one in-flight exchange with an upstream.
///
/// When dropped, the slot is released back to the pool, including when a
/// caller disconnects mid-response.
#[derive(Debug)]
pub struct ConnectionSlot {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_slots_bounded_and_released() {
        let pool = ConnectionPool::new();
        let target = UpstreamTarget::new(UpstreamAddr::http("127.0.0.1", 7001), 1, 2);

        let a = pool.acquire(&target).await.unwrap();
        let _b = pool.acquire(&target).await.unwrap();
        assert_eq!(pool.available(target.addr()), Some(0));

        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.acquire(&target)).await;
        assert!(blocked.is_err(), "third acquire should wait");

        drop(a);
        assert_eq!(pool.available(target.addr()), Some(1));
        let c = tokio::time::timeout(Duration::from_millis(50), pool.acquire(&target)).await;
        assert!(c.is_ok());
    }

    #[tokio::test]
    async fn test_shared_by_address() {
        let pool = ConnectionPool::new();
        let first = UpstreamTarget::new(UpstreamAddr::http("127.0.0.1", 7002), 1, 1);
        let second = UpstreamTarget::new(UpstreamAddr::http("127.0.0.1", 7002), 3, 1);

        let _slot = pool.acquire(&first).await.unwrap();
        assert_eq!(pool.available(second.addr()), Some(0));
        assert_eq!(pool.available(&UpstreamAddr::http("127.0.0.1", 7003)), None);
    }

    #[tokio::test]
    async fn test_changed_limit_replaces_slots() {
        let pool = ConnectionPool::new();
        let addr = UpstreamAddr::http("127.0.0.1", 7004);
        let before = UpstreamTarget::new(addr.clone(), 1, 1);
        let after = UpstreamTarget::new(addr.clone(), 1, 5);

        let held = pool.acquire(&before).await.unwrap();
        assert_eq!(pool.available(&addr), Some(0));

        let _slot = tokio::time::timeout(Duration::from_millis(50), pool.acquire(&after))
            .await
            .expect("new limit should not wait on the old one")
            .unwrap();
        assert_eq!(pool.available(&addr), Some(4));

        // Releasing a slot of the old limit does not inflate the new one.
        drop(held);
        assert_eq!(pool.available(&addr), Some(4));
    }
}
