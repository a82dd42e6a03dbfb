//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path)
//!     → table.rs (current RouteTable version)
//!     → matcher.rs (score every matching rule, keep the most specific)
//!     → Return: matched Route or RouteNotFound
//!
//! Route Compilation (at startup and on reload):
//!     RouteSpec[] / RouteConfig[]
//!     → Parse match rules
//!     → Reject ambiguous or invalid entries
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled up front, immutable at runtime
//! - No regex in hot path (segment comparison only)
//! - Deterministic: same input always matches same route, independent of
//!   registration order
//! - Rewrites run after matching and never produce an empty path

pub mod matcher;
pub mod rewrite;
pub mod table;

pub use matcher::{match_route, PathMatchRule, Segment, Specificity};
pub use rewrite::PathRewriteRule;
pub use table::{Route, RouteSpec, RouteTable, UpstreamSpec};
