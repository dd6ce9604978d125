//! The fixed set of tracked paths.
//!
//! The same list gates collection (begin-visit rejects anything else) and
//! filters query results, so a route dropped from the list disappears from
//! the dashboards as well.

use serde::Serialize;

/// Routes tracked when `PAGETRAIL_TRACKED_ROUTES` is not set.
pub const DEFAULT_TRACKED_ROUTES: &[&str] = &[
    "/", "/about", "/profile", "/teams", "/ideas", "/pricing", "/chat",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RouteAllowList {
    routes: Vec<String>,
}

impl Default for RouteAllowList {
    fn default() -> Self {
        Self::new(DEFAULT_TRACKED_ROUTES.iter().copied())
    }
}

impl RouteAllowList {
    /// Build an allow-list from raw paths. The site root is always included;
    /// duplicates and blanks are dropped and declaration order is kept.
    pub fn new<I, S>(routes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = vec!["/".to_string()];
        for raw in routes {
            if let Some(route) = normalize_route(raw.as_ref()) {
                if !out.contains(&route) {
                    out.push(route);
                }
            }
        }
        Self { routes: out }
    }

    /// Parse a comma-separated list such as `"/,/about,/profile"`.
    pub fn parse(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    /// Return the canonical form of `route` if it is tracked.
    pub fn resolve(&self, route: &str) -> Option<&str> {
        let normalized = normalize_route(route)?;
        self.routes
            .iter()
            .find(|r| **r == normalized)
            .map(String::as_str)
    }

    pub fn contains(&self, route: &str) -> bool {
        self.resolve(route).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Trim whitespace and a trailing slash (except for the root). Query strings
/// and fragments are not part of a route.
fn normalize_route(raw: &str) -> Option<String> {
    let path = raw
        .trim()
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    if !path.starts_with('/') {
        return None;
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        Some("/".to_string())
    } else {
        Some(trimmed.to_string())
    }
}
