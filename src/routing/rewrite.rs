//! Path rewriting applied before forwarding.

use crate::routing::matcher::path_segments;

/// Removes a fixed prefix from the request path.
///
/// The prefix is compared segment by segment, with empty segments skipped
/// the same way the matcher skips them, so `/api//auth/x` loses its
/// `/api/auth` prefix and `/apiv2` never loses `/api`. When the prefix is
/// stripped, the rest of the path is rejoined from its segments.
///
/// The result always starts with `/`; stripping the whole path yields `/`.
/// The query string is carried over untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathRewriteRule {
    strip_prefix: Option<String>,
}

impl PathRewriteRule {
    pub fn strip_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            strip_prefix: (!prefix.is_empty()).then_some(prefix),
        }
    }

    /// Forward the path unchanged.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn prefix(&self) -> Option<&str> {
        self.strip_prefix.as_deref()
    }

    /// Rewrite a path (optionally carrying a `?query`).
    pub fn apply(&self, path_and_query: &str) -> String {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };

        let mut rewritten = match self.strip_prefix.as_deref().and_then(|p| strip_segments(path, p)) {
            Some(stripped) => stripped,
            None if path.starts_with('/') => path.to_string(),
            None => format!("/{}", path),
        };

        if let Some(query) = query {
            rewritten.push('?');
            rewritten.push_str(query);
        }
        rewritten
    }
}

/// `path` without the leading segments of `prefix`, or `None` when they
/// do not line up.
fn strip_segments(path: &str, prefix: &str) -> Option<String> {
    let mut rest = path_segments(path);
    for expected in path_segments(prefix) {
        if rest.next() != Some(expected) {
            return None;
        }
    }

    let mut stripped = String::with_capacity(path.len());
    for segment in rest {
        stripped.push('/');
        stripped.push_str(segment);
    }
    if stripped.is_empty() {
        stripped.push('/');
    } else if path.ends_with('/') {
        stripped.push('/');
    }
    Some(stripped)
}
