//! API gateway library: path routing, weighted upstream selection, and
//! streaming request forwarding.

pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod hooks;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod resilience;
pub mod routing;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gateway::{Gateway, GatewaySettings};
pub use hooks::{GatewayEvent, Hooks};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
