//! Process lifecycle: signals and coordinated shutdown.
//!
//! # Data Flow
//! ```text
//! SIGINT/SIGTERM (signals.rs)
//!     → Shutdown::trigger (shutdown.rs, broadcast to every subscriber)
//!         → HttpServer stops accepting and drains in-flight requests
//!         → HealthMonitor and the reload task exit their loops
//! main.rs bounds the drain and exits once it is done or has timed out.
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
