use crate::models::Role;

/// RouteRule
///
/// One entry of the static access table: a path prefix and the roles allowed under it.
/// `allow` is never empty.
#[derive(Debug, Clone, Copy)]
pub struct RouteRule {
    pub prefix: &'static str,
    pub allow: &'static [Role],
}

impl RouteRule {
    /// Prefix match anchored at a segment boundary: `/admin` matches `/admin` and
    /// `/admin/logs`, never `/administrator`.
    pub fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Ordered rule table. Evaluated top to bottom, first match wins.
pub const RULES: [RouteRule; 3] = [
    RouteRule {
        prefix: "/admin",
        allow: &[Role::Admin],
    },
    RouteRule {
        prefix: "/mentor",
        allow: &[Role::Mentor, Role::Admin],
    },
    RouteRule {
        prefix: "/dashboard",
        allow: &[Role::Student, Role::Mentor, Role::Admin],
    },
];

/// Access
///
/// Result of classifying a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Restricted(&'static [Role]),
}

impl Access {
    pub fn permits(&self, role: Role) -> bool {
        match self {
            Access::Public => true,
            Access::Restricted(allow) => allow.contains(&role),
        }
    }
}

/// classify
///
/// Pure and total. Paths that match no rule are public. Any query string or fragment is
/// ignored so `/mentor?x=1` classifies like `/mentor`.
pub fn classify(path: &str) -> Access {
    let path = strip_query(path);
    RULES
        .iter()
        .find(|rule| rule.matches(path))
        .map_or(Access::Public, |rule| Access::Restricted(rule.allow))
}

/// UI-side check: may a visitor with `role` (or nobody) open `path`?
pub fn has_access(path: &str, role: Option<Role>) -> bool {
    match (classify(path), role) {
        (Access::Public, _) => true,
        (Access::Restricted(_), None) => false,
        (access, Some(role)) => access.permits(role),
    }
}

/// Gated areas `role` may open, in table order. Used to render navigation.
pub fn accessible_sections(role: Role) -> Vec<String> {
    RULES
        .iter()
        .filter(|rule| rule.allow.contains(&role))
        .map(|rule| rule.prefix.to_string())
        .collect()
}

pub(crate) fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}
