//! Route table construction and lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Reject the whole table when any invariant is violated
//! - Look up the matching route for a path
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Reconfiguration builds a new table and swaps it as a unit
//! - Per-route counters and per-target health cells are owned by the table,
//!   so two versions never share mutable state
//! - O(n) scan over routes (acceptable for typical route counts)

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::RouteConfig;
use crate::error::GatewayError;
use crate::load_balancer::upstream::{UpstreamAddr, UpstreamTarget};
use crate::routing::matcher::{match_route, PathMatchRule};
use crate::routing::rewrite::PathRewriteRule;

static TABLE_VERSION: AtomicU64 = AtomicU64::new(1);

/// Upstream entry of a [`RouteSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSpec {
    pub addr: UpstreamAddr,
    pub weight: u32,
    pub max_connections: usize,
}

impl UpstreamSpec {
    pub fn new(addr: UpstreamAddr) -> Self {
        Self {
            addr,
            weight: 1,
            max_connections: 100,
        }
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }
}

/// Input tuple for one route: match rule, rewrite, upstreams.
#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub id: String,
    pub rule: String,
    pub rewrite: PathRewriteRule,
    pub upstreams: Vec<UpstreamSpec>,
    /// Rewrite `Host` to the upstream authority.
    pub change_origin: bool,
    /// Replaces the generated detail in 502 bodies.
    pub error_message: Option<String>,
}

impl RouteSpec {
    pub fn new(id: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rule: rule.into(),
            rewrite: PathRewriteRule::identity(),
            upstreams: Vec::new(),
            change_origin: true,
            error_message: None,
        }
    }

    pub fn rewrite(mut self, rewrite: PathRewriteRule) -> Self {
        self.rewrite = rewrite;
        self
    }

    pub fn upstream(mut self, upstream: UpstreamSpec) -> Self {
        self.upstreams.push(upstream);
        self
    }

    pub fn change_origin(mut self, change_origin: bool) -> Self {
        self.change_origin = change_origin;
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    id: Arc<str>,
    rule: PathMatchRule,
    rewrite: PathRewriteRule,
    upstreams: Vec<Arc<UpstreamTarget>>,
    total_weight: u64,
    change_origin: bool,
    error_message: Option<String>,
    /// Weighted round-robin ticket counter.
    counter: AtomicU64,
}

impl Route {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn shared_id(&self) -> Arc<str> {
        Arc::clone(&self.id)
    }

    pub fn rule(&self) -> &PathMatchRule {
        &self.rule
    }

    pub fn rewrite(&self) -> &PathRewriteRule {
        &self.rewrite
    }

    pub fn upstreams(&self) -> &[Arc<UpstreamTarget>] {
        &self.upstreams
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    pub fn change_origin(&self) -> bool {
        self.change_origin
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Take the next round-robin ticket (increment-then-read).
    pub(crate) fn next_ticket(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
}

/// Immutable set of routes, built once per configuration version.
#[derive(Debug)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
    version: u64,
}

impl RouteTable {
    /// Build a table, validating every invariant up front.
    ///
    /// All problems found are reported together in one `Configuration` error.
    pub fn build(specs: impl IntoIterator<Item = RouteSpec>) -> Result<Self, GatewayError> {
        let mut errors = Vec::new();
        let mut ids = HashSet::new();
        // The connection pool keys slots by address, so one address has one limit.
        let mut limits: HashMap<UpstreamAddr, (String, usize)> = HashMap::new();
        let mut routes: Vec<Arc<Route>> = Vec::new();

        for spec in specs {
            if spec.id.is_empty() {
                errors.push(format!("route for {:?} has an empty id", spec.rule));
            } else if !ids.insert(spec.id.clone()) {
                errors.push(format!("duplicate route id {:?}", spec.id));
            }

            let rule = match PathMatchRule::parse(&spec.rule) {
                Ok(rule) => rule,
                Err(GatewayError::Configuration(msg)) => {
                    errors.push(format!("route {:?}: {}", spec.id, msg));
                    continue;
                }
                Err(other) => {
                    errors.push(format!("route {:?}: {}", spec.id, other));
                    continue;
                }
            };

            if spec.upstreams.is_empty() {
                errors.push(format!("route {:?} has no upstreams", spec.id));
            }
            for upstream in &spec.upstreams {
                if upstream.weight == 0 {
                    errors.push(format!("route {:?}: upstream {} has weight 0", spec.id, upstream.addr));
                }
                if upstream.max_connections == 0 {
                    errors.push(format!(
                        "route {:?}: upstream {} allows no connections",
                        spec.id, upstream.addr
                    ));
                }
                match limits.get(&upstream.addr) {
                    Some((other, limit)) if *limit != upstream.max_connections => {
                        errors.push(format!(
                            "route {:?}: upstream {} allows {} connections but route {:?} allows {}",
                            spec.id, upstream.addr, upstream.max_connections, other, limit
                        ));
                    }
                    Some(_) => {}
                    None => {
                        limits.insert(upstream.addr.clone(), (spec.id.clone(), upstream.max_connections));
                    }
                }
            }

            if let Some(existing) = routes.iter().find(|r| r.rule.is_ambiguous_with(&rule)) {
                errors.push(format!(
                    "route {:?} ({}) is ambiguous with route {:?} ({})",
                    spec.id, rule, existing.id, existing.rule
                ));
            }

            let upstreams: Vec<Arc<UpstreamTarget>> = spec
                .upstreams
                .iter()
                .map(|u| Arc::new(UpstreamTarget::new(u.addr.clone(), u.weight, u.max_connections)))
                .collect();
            let total_weight = upstreams.iter().map(|u| u.weight() as u64).sum();

            routes.push(Arc::new(Route {
                id: Arc::from(spec.id.as_str()),
                rule,
                rewrite: spec.rewrite,
                upstreams,
                total_weight,
                change_origin: spec.change_origin,
                error_message: spec.error_message,
                counter: AtomicU64::new(0),
            }));
        }

        if !errors.is_empty() {
            return Err(GatewayError::Configuration(errors.join("; ")));
        }

        Ok(Self {
            routes,
            version: TABLE_VERSION.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Build a table from configuration entries.
    pub fn from_config(configs: &[RouteConfig]) -> Result<Self, GatewayError> {
        let specs = configs
            .iter()
            .map(RouteConfig::to_spec)
            .collect::<Result<Vec<_>, _>>()?;
        Self::build(specs)
    }

    /// A table without routes; every request resolves to `RouteNotFound`.
    pub fn empty() -> Self {
        Self {
            routes: Vec::new(),
            version: TABLE_VERSION.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Resolve the best route for `path`.
    pub fn match_path(&self, path: &str) -> Result<&Arc<Route>, GatewayError> {
        match_route(path, self)
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Route>> {
        self.routes.iter().find(|r| r.id() == id)
    }

    /// Process-unique version number, increasing with each build.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
