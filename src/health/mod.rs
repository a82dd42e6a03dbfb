//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Passive (passive.rs), on every forwarded request:
//!     Outcome observed
//!     → success resets the target's failure count
//!     → failure increments it; at the threshold a cooldown starts
//!
//! Active (active.rs), optional:
//!     Periodic timer
//!     → Probe each upstream of the current table
//!     → mark_up / mark_down on the targets
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary
//! - Health state is per target of a table version, held in atomic cells
//! - A cooling-down target becomes eligible again when the cooldown ends,
//!   without a recovery probe

pub mod active;
pub mod passive;

pub use active::HealthMonitor;
pub use passive::{is_failure_status, HealthPolicy};
