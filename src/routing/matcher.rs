//! Path matching rules and best-route selection.
//!
//! # Responsibilities
//! - Parse path patterns made of literal and `*` segments
//! - Decide whether a request path falls under a pattern
//! - Rank competing matches deterministically
//!
//! # Design Decisions
//! - Matching is segment aligned: `/api/auth` covers `/api/auth/x` but not `/api/authz`
//! - Path matching is case-sensitive; query and fragment are ignored
//! - Empty segments (`//`, trailing `/`) are skipped
//! - More matched segments beat fewer; at equal depth a literal beats a
//!   wildcard, compared left to right
//! - No regex to guarantee O(segments) matching

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::error::GatewayError;
use crate::routing::table::{Route, RouteTable};

/// One segment of a [`PathMatchRule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Must equal the request segment exactly.
    Literal(String),
    /// Matches any single non-empty segment.
    Wildcard,
}

/// A path pattern such as `/api/auth` or `/tenants/*/orders`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatchRule {
    pattern: String,
    segments: Vec<Segment>,
}

impl PathMatchRule {
    /// Parse a pattern. It must start with `/`; `*` is only allowed as a
    /// whole segment.
    pub fn parse(pattern: &str) -> Result<Self, GatewayError> {
        if !pattern.starts_with('/') {
            return Err(GatewayError::Configuration(format!(
                "path pattern {:?} must start with '/'",
                pattern
            )));
        }
        if pattern.contains(['?', '#']) {
            return Err(GatewayError::Configuration(format!(
                "path pattern {:?} must not contain a query or fragment",
                pattern
            )));
        }

        let mut segments = Vec::new();
        for raw in path_segments(pattern) {
            if raw == "*" {
                segments.push(Segment::Wildcard);
            } else if raw.contains('*') {
                return Err(GatewayError::Configuration(format!(
                    "path pattern {:?}: '*' must be a whole segment",
                    pattern
                )));
            } else {
                segments.push(Segment::Literal(raw.to_string()));
            }
        }

        Ok(Self {
            pattern: pattern.to_string(),
            segments,
        })
    }

    /// The pattern as written.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns true if `path` falls under this rule.
    pub fn matches(&self, path: &str) -> bool {
        let mut request = path_segments(strip_query(path));
        self.segments.iter().all(|segment| match request.next() {
            Some(actual) => match segment {
                Segment::Literal(expected) => expected == actual,
                Segment::Wildcard => true,
            },
            None => false,
        })
    }

    /// Rank of this rule among rules matching the same path.
    pub fn specificity(&self) -> Specificity {
        Specificity {
            depth: self.segments.len(),
            literals: self
                .segments
                .iter()
                .map(|s| matches!(s, Segment::Literal(_)))
                .collect(),
        }
    }

    /// True when both rules have equal specificity and some path matches
    /// both, i.e. a request could not be resolved between them.
    pub fn is_ambiguous_with(&self, other: &PathMatchRule) -> bool {
        if self.specificity() != other.specificity() {
            return false;
        }
        self.segments
            .iter()
            .zip(other.segments.iter())
            .all(|pair| match pair {
                (Segment::Literal(a), Segment::Literal(b)) => a == b,
                _ => true,
            })
    }
}

impl fmt::Display for PathMatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

/// Ordering key for competing matches. Greater is more specific.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specificity {
    depth: usize,
    literals: Vec<bool>,
}

impl Ord for Specificity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.depth
            .cmp(&other.depth)
            .then_with(|| self.literals.cmp(&other.literals))
    }
}

impl PartialOrd for Specificity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Resolve the best route for `path`.
///
/// Evaluates every route and keeps the most specific match. A tie fails
/// closed with a configuration error instead of picking one arbitrarily.
pub fn match_route<'t>(path: &str, table: &'t RouteTable) -> Result<&'t Arc<Route>, GatewayError> {
    let mut best: Option<(&'t Arc<Route>, Specificity)> = None;
    let mut tied = false;

    for route in table.routes() {
        if !route.rule().matches(path) {
            continue;
        }
        let score = route.rule().specificity();
        match &best {
            Some((_, current)) => match score.cmp(current) {
                Ordering::Greater => {
                    best = Some((route, score));
                    tied = false;
                }
                Ordering::Equal => tied = true,
                Ordering::Less => {}
            },
            None => best = Some((route, score)),
        }
    }

    match best {
        Some((route, _)) if tied => Err(GatewayError::Configuration(format!(
            "ambiguous match for {} at route {}",
            path,
            route.id()
        ))),
        Some((route, _)) => Ok(route),
        None => Err(GatewayError::RouteNotFound {
            path: strip_query(path).to_string(),
        }),
    }
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or("")
}

pub(crate) fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}
