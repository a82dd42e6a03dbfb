//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → timeouts.rs (one deadline over slot wait, connect, headers, body)
//!     → On failure: passive health report (see health::passive)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every exchange has a deadline
//! - No retries: request bodies are streamed, never buffered for replay
//! - Circuit breaking and rate limiting attach through hooks, outside the core

pub mod timeouts;

pub use timeouts::{Deadline, DEFAULT_REQUEST_TIMEOUT};
