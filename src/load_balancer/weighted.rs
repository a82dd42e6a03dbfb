//! Weighted round-robin upstream selection.
//!
//! Each route carries a monotonically increasing ticket counter. A ticket is
//! taken with `fetch_add` (increment-then-read), so two concurrent requests
//! never share a ticket. The ticket modulo the candidates' total weight is
//! mapped onto contiguous weight ranges, which gives every target exactly
//! its weight share over each `total_weight` consecutive tickets.
//!
//! When no candidate is healthy the selector falls back to the full list
//! (degraded mode) and says so in the returned [`Selection`]; with
//! `fallback_to_unhealthy` disabled it fails fast instead.

use std::sync::Arc;

use tokio::time::Instant;

use crate::error::GatewayError;
use crate::load_balancer::upstream::UpstreamTarget;
use crate::routing::table::Route;

/// Outcome of a selection.
#[derive(Debug, Clone)]
pub struct Selection {
    pub target: Arc<UpstreamTarget>,
    /// True when no target was healthy and the full list was used instead.
    pub degraded: bool,
}

/// Picks the upstream for a matched route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamSelector {
    fallback_to_unhealthy: bool,
}

impl Default for UpstreamSelector {
    fn default() -> Self {
        Self {
            fallback_to_unhealthy: true,
        }
    }
}

impl UpstreamSelector {
    pub fn new(fallback_to_unhealthy: bool) -> Self {
        Self {
            fallback_to_unhealthy,
        }
    }

    pub fn fallback_to_unhealthy(&self) -> bool {
        self.fallback_to_unhealthy
    }

    /// Select a target for `route`.
    pub fn select(&self, route: &Route) -> Result<Selection, GatewayError> {
        let now = Instant::now();
        let upstreams = route.upstreams();

        let healthy_weight: u64 = upstreams
            .iter()
            .filter(|t| t.is_healthy_at(now))
            .map(|t| t.weight() as u64)
            .sum();

        if healthy_weight > 0 {
            let ticket = route.next_ticket();
            let target = pick(upstreams.iter().filter(|t| t.is_healthy_at(now)), healthy_weight, ticket);
            return target
                .map(|target| Selection {
                    target,
                    degraded: false,
                })
                .ok_or_else(|| no_healthy(route, "selection raced with a health change"));
        }

        if !self.fallback_to_unhealthy {
            return Err(no_healthy(route, "all targets are cooling down"));
        }

        tracing::warn!(
            route = %route.id(),
            targets = upstreams.len(),
            "No healthy upstream, falling back to the full target list"
        );
        let ticket = route.next_ticket();
        pick(upstreams.iter(), route.total_weight(), ticket)
            .map(|target| Selection {
                target,
                degraded: true,
            })
            .ok_or_else(|| no_healthy(route, "route has no targets"))
    }
}

/// Map `ticket` onto the weight ranges of `candidates`.
fn pick<'a>(
    candidates: impl Iterator<Item = &'a Arc<UpstreamTarget>>,
    total_weight: u64,
    ticket: u64,
) -> Option<Arc<UpstreamTarget>> {
    if total_weight == 0 {
        return None;
    }
    let mut point = ticket % total_weight;
    for target in candidates {
        let weight = target.weight() as u64;
        if point < weight {
            return Some(Arc::clone(target));
        }
        point -= weight;
    }
    None
}

fn no_healthy(route: &Route, reason: &str) -> GatewayError {
    GatewayError::NoHealthyUpstream {
        route: route.id().to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::load_balancer::upstream::UpstreamAddr;
    use crate::routing::table::{RouteSpec, RouteTable, UpstreamSpec};

    fn table(weights: &[u32]) -> RouteTable {
        let mut spec = RouteSpec::new("r1", "/");
        for (i, weight) in weights.iter().enumerate() {
            spec = spec.upstream(
                UpstreamSpec::new(UpstreamAddr::http("127.0.0.1", 8080 + i as u16)).weight(*weight),
            );
        }
        RouteTable::build(vec![spec]).unwrap()
    }

    fn count(selector: &UpstreamSelector, route: &Route, n: u64) -> HashMap<u16, u64> {
        let mut hits = HashMap::new();
        for _ in 0..n {
            let selection = selector.select(route).unwrap();
            *hits.entry(selection.target.addr().port).or_insert(0) += 1;
        }
        hits
    }

    #[test]
    fn test_round_robin() {
        let table = table(&[1, 1]);
        let route = &table.routes()[0];
        let lb = UpstreamSelector::default();

        let ports: Vec<u16> = (0..4)
            .map(|_| lb.select(route).unwrap().target.addr().port)
            .collect();
        assert_eq!(ports, vec![8080, 8081, 8080, 8081]);
    }

    #[test]
    fn test_weighted_proportions() {
        let table = table(&[5, 3, 1]);
        let route = &table.routes()[0];
        let lb = UpstreamSelector::default();
        let rounds = 40;

        let hits = count(&lb, route, rounds * route.total_weight());
        for (i, weight) in [5u64, 3, 1].iter().enumerate() {
            let got = hits[&(8080 + i as u16)];
            let want = rounds * weight;
            assert!(got.abs_diff(want) <= 1, "target {} got {} want {}", i, got, want);
        }
    }

    #[test]
    fn test_deterministic_sequence() {
        let table = table(&[2, 1]);
        let route = &table.routes()[0];
        let lb = UpstreamSelector::default();

        let ports: Vec<u16> = (0..6)
            .map(|_| lb.select(route).unwrap().target.addr().port)
            .collect();
        assert_eq!(ports, vec![8080, 8080, 8081, 8080, 8080, 8081]);
    }

    #[test]
    fn test_unhealthy_excluded() {
        let table = table(&[1, 1, 1]);
        let route = &table.routes()[0];
        route.upstreams()[1].mark_down(Duration::from_secs(60));
        let lb = UpstreamSelector::default();

        let hits = count(&lb, route, 30);
        assert_eq!(hits.get(&8081), None);
        assert_eq!(hits[&8080], 15);
        assert_eq!(hits[&8082], 15);
    }

    #[test]
    fn test_fallback_when_all_unhealthy() {
        let table = table(&[1, 1]);
        let route = &table.routes()[0];
        for target in route.upstreams() {
            target.mark_down(Duration::from_secs(60));
        }

        let selection = UpstreamSelector::default().select(route).unwrap();
        assert!(selection.degraded);

        let err = UpstreamSelector::new(false).select(route).unwrap_err();
        assert!(matches!(err, GatewayError::NoHealthyUpstream { ref route, .. } if route == "r1"));
    }

    #[test]
    fn test_concurrent_tickets_are_unique() {
        let table = table(&[1, 1, 1, 1]);
        let route = &table.routes()[0];
        let lb = UpstreamSelector::default();

        let hits: Vec<HashMap<u16, u64>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8).map(|_| s.spawn(|| count(&lb, route, 1000))).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut totals: HashMap<u16, u64> = HashMap::new();
        for map in hits {
            for (port, n) in map {
                *totals.entry(port).or_insert(0) += n;
            }
        }
        for port in 8080..8084 {
            assert_eq!(totals[&port], 2000, "port {}", port);
        }
    }
}
