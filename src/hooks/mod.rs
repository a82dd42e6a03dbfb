//! Event hooks.
//!
//! # Data Flow
//! ```text
//! Gateway::handle
//!     → on_route_matched      (route resolved)
//!     → on_upstream_chosen    (target selected, degraded or not)
//!     → exactly one of:
//!         on_forward_complete (response body fully relayed)
//!         on_forward_error    (failure before or after the response started)
//! ```
//!
//! # Design Decisions
//! - Fixed set of typed slots; payloads are structs, never formatted strings
//! - Callbacks run synchronously on the forwarding task, in registration order
//! - Hook time adds to request latency; callers keep hooks fast or hand work
//!   off to their own tasks
//! - Hooks must not panic: a panic unwinds the forwarding task of that request
//! - Registration happens before the gateway is built; the registry is then frozen

pub mod events;

use std::sync::Arc;

pub use events::{ForwardFailure, ForwardResult, GatewayEvent, RouteMatched, UpstreamChosen};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered callback slots, one per event kind.
#[derive(Default)]
pub struct Hooks {
    route_matched: Vec<Callback<RouteMatched>>,
    upstream_chosen: Vec<Callback<UpstreamChosen>>,
    forward_error: Vec<Callback<ForwardFailure>>,
    forward_complete: Vec<Callback<ForwardResult>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_route_matched(&mut self, f: impl Fn(&RouteMatched) + Send + Sync + 'static) -> &mut Self {
        self.route_matched.push(Arc::new(f));
        self
    }

    pub fn on_upstream_chosen(&mut self, f: impl Fn(&UpstreamChosen) + Send + Sync + 'static) -> &mut Self {
        self.upstream_chosen.push(Arc::new(f));
        self
    }

    pub fn on_forward_error(&mut self, f: impl Fn(&ForwardFailure) + Send + Sync + 'static) -> &mut Self {
        self.forward_error.push(Arc::new(f));
        self
    }

    pub fn on_forward_complete(&mut self, f: impl Fn(&ForwardResult) + Send + Sync + 'static) -> &mut Self {
        self.forward_complete.push(Arc::new(f));
        self
    }

    /// Register one callback for every slot.
    pub fn subscribe(&mut self, f: impl Fn(GatewayEvent<'_>) + Send + Sync + 'static) -> &mut Self {
        let f = Arc::new(f);

        let g = Arc::clone(&f);
        self.on_route_matched(move |e| g(GatewayEvent::RouteMatched(e)));
        let g = Arc::clone(&f);
        self.on_upstream_chosen(move |e| g(GatewayEvent::UpstreamChosen(e)));
        let g = Arc::clone(&f);
        self.on_forward_error(move |e| g(GatewayEvent::ForwardError(e)));
        self.on_forward_complete(move |e| f(GatewayEvent::ForwardComplete(e)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.route_matched.is_empty()
            && self.upstream_chosen.is_empty()
            && self.forward_error.is_empty()
            && self.forward_complete.is_empty()
    }

    pub(crate) fn route_matched(&self, event: &RouteMatched) {
        self.route_matched.iter().for_each(|cb| cb(event));
    }

    pub(crate) fn upstream_chosen(&self, event: &UpstreamChosen) {
        self.upstream_chosen.iter().for_each(|cb| cb(event));
    }

    pub(crate) fn forward_error(&self, event: &ForwardFailure) {
        self.forward_error.iter().for_each(|cb| cb(event));
    }

    pub(crate) fn forward_complete(&self, event: &ForwardResult) {
        self.forward_complete.iter().for_each(|cb| cb(event));
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("route_matched", &self.route_matched.len())
            .field("upstream_chosen", &self.upstream_chosen.len())
            .field("forward_error", &self.forward_error.len())
            .field("forward_complete", &self.forward_complete.len())
            .finish()
    }
}
