//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, HTTP/1.1 + h2c, status route)
//!     → request.rs (add/propagate request ID)
//!     → [gateway: route match, upstream selection]
//!     → forwarder.rs (rewrite, headers.rs, pool slot, deadline, exchange)
//!     → streaming.rs (relay body, report outcome once)
//!     → Send to client
//! ```

pub mod forwarder;
pub mod headers;
pub mod request;
pub mod server;
pub mod streaming;

pub use forwarder::{ForwardContext, Forwarder, ForwarderSettings};
pub use headers::PeerInfo;
pub use request::X_REQUEST_ID;
pub use server::{HttpServer, STATUS_MESSAGE};
