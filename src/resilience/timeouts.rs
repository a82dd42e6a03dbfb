//! Per-request deadline.
//!
//! # Responsibilities
//! - Fix one deadline when forwarding starts
//! - Bound slot wait, connect, header exchange and body streaming by it
//!
//! # Design Decisions
//! - Uses Tokio's timer facilities; the clock follows the runtime
//! - Elapsing is reported as `UpstreamTimeout` (504 when still renderable)

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, Sleep};

use crate::error::GatewayError;
use crate::load_balancer::UpstreamAddr;

/// Default overall budget for one forwarded request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A fixed point in time by which a forwarded request must be done.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn is_elapsed(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Run `fut` until the deadline; elapsing drops it.
    pub async fn run<F, T>(&self, upstream: &UpstreamAddr, fut: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        match tokio::time::timeout_at(self.at, fut).await {
            Ok(result) => result,
            Err(_) => Err(self.elapsed(upstream)),
        }
    }

    /// Timer for polling alongside a streaming body.
    pub fn sleep(&self) -> Sleep {
        tokio::time::sleep_until(self.at)
    }

    pub fn elapsed(&self, upstream: &UpstreamAddr) -> GatewayError {
        GatewayError::UpstreamTimeout {
            upstream: upstream.to_string(),
            after: self.budget,
        }
    }
}
