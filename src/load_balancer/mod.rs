//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → route.upstreams
//!     → weighted.rs (filter healthy, weighted round-robin by ticket)
//!         - none healthy: degraded pass over the full list, or fail fast
//!     → pool.rs (wait for a slot to the chosen address)
//!     → upstream.rs (report outcome, maybe start cooldown)
//! ```
//!
//! # Design Decisions
//! - Selector is stateless; routes own counters, targets own health cells
//! - Unhealthy targets excluded from selection until their cooldown ends
//! - Slot limits per upstream address, shared across routes and table versions

pub mod pool;
pub mod upstream;
pub mod weighted;

pub use pool::{ConnectionPool, ConnectionSlot};
pub use upstream::{Scheme, UpstreamAddr, UpstreamTarget};
pub use weighted::{Selection, UpstreamSelector};
