//! # Rule Module
//!
//! Core value types: resources, rules, roles and the wildcard path grammar
//! the rest of the crate matches against.

use std::cmp::Ordering;
use std::fmt;

// ================================================================================================
// ACCESS
// ================================================================================================

/// The decision a [`Rule`] contributes.
///
/// Declaration order is significant: it fixes the access-priority used by
/// [`matching_order_key`] (`Deny < Allow < Inherit`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Access {
    Deny,
    Allow,
    Inherit,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Deny => write!(f, "deny"),
            Access::Allow => write!(f, "allow"),
            Access::Inherit => write!(f, "inherit"),
        }
    }
}

// ================================================================================================
// ROLE KIND
// ================================================================================================

/// Governs evaluation precedence; see [`crate::evaluator::EVAL_ORDER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleKind {
    Bypass,
    Context,
    Common,
    Authenticated,
    Anonymous,
}

impl Default for RoleKind {
    /// A role whose kind was never set loads as `Common`.
    fn default() -> Self {
        RoleKind::Common
    }
}

/// A role a [`Session`](crate::session::Session) may belong to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Role {
    pub id: u64,
    pub handle: String,
    pub kind: RoleKind,
}

impl Role {
    pub fn new(id: u64, handle: impl Into<String>, kind: RoleKind) -> Self {
        Role {
            id,
            handle: handle.into(),
            kind,
        }
    }
}

// ================================================================================================
// RULE
// ================================================================================================

/// An immutable grant/deny/inherit for `(role_id, operation, resource)`.
///
/// `Access::Inherit` is a tombstone: it means "delete any stored rule
/// matching this key" rather than a decision in its own right.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    pub role_id: u64,
    pub resource: String,
    pub operation: String,
    pub access: Access,
}

impl Rule {
    pub fn new(
        role_id: u64,
        resource: impl Into<String>,
        operation: impl Into<String>,
        access: Access,
    ) -> Self {
        Rule {
            role_id,
            resource: resource.into(),
            operation: operation.into(),
            access,
        }
    }

    /// The `(role_id, resource, operation, access)` key used for add-time dedup.
    fn dedup_key(&self) -> (u64, &str, &str, Access) {
        (self.role_id, &self.resource, &self.operation, self.access)
    }

    pub fn specificity(&self) -> usize {
        specificity(&self.resource)
    }
}

/// Dedup key equality — two rules with the same role/resource/operation/access
/// are the same rule for index-add purposes.
pub fn same_key(a: &Rule, b: &Rule) -> bool {
    a.dedup_key() == b.dedup_key()
}

/// Sort key for picking the "matching rule" among several candidates (§4.5).
///
/// Most specific resource wins; ties break by access-priority (`Deny` first).
/// Sorting by this key ascending and taking the first non-`Inherit` entry
/// reproduces the worked example in the spec's Scenario 8: among
/// `{res/1/*/*, Deny}` (specificity 2) and `{res/1/2/*, Allow}` (specificity 3)
/// the latter — more specific — wins even though Deny has lower access-priority.
pub fn matching_order_key(rule: &Rule) -> (std::cmp::Reverse<usize>, Access) {
    (std::cmp::Reverse(rule.specificity()), rule.access)
}

/// Full total order over rules, used when a trace needs a stable output order
/// (sorted by resource, operation, role_id, access per §4.5).
pub fn trace_order(a: &Rule, b: &Rule) -> Ordering {
    a.resource
        .cmp(&b.resource)
        .then_with(|| a.operation.cmp(&b.operation))
        .then_with(|| a.role_id.cmp(&b.role_id))
        .then_with(|| a.access.cmp(&b.access))
}

// ================================================================================================
// RESOURCE PATH GRAMMAR
// ================================================================================================

/// Counts non-`*` segments in a resource path.
pub fn specificity(resource: &str) -> usize {
    resource.split('/').filter(|seg| *seg != "*").count()
}

/// True if `resource` contains a wildcard segment.
pub fn is_wildcard(resource: &str) -> bool {
    resource.split('/').any(|seg| seg == "*")
}

/// Segment-wise wildcard match: equal length, each segment literal-equal or
/// the pattern segment is `*`.
pub fn resource_matches(pattern: &str, concrete: &str) -> bool {
    let p: Vec<&str> = pattern.split('/').collect();
    let c: Vec<&str> = concrete.split('/').collect();
    if p.len() != c.len() {
        return false;
    }
    p.iter().zip(c.iter()).all(|(ps, cs)| *ps == "*" || ps == cs)
}

/// The suffix-wildcard permutation of a concrete resource path: the path
/// itself, then each path obtained by replacing the trailing tail with `*`
/// one segment at a time.
///
/// `permute("a:b/1/2/3") == ["a:b/1/2/3", "a:b/1/2/*", "a:b/1/*/*", "a:b/*/*/*"]`
pub fn permute(resource: &str) -> Vec<String> {
    let mut segs: Vec<&str> = resource.split('/').collect();
    let mut out = vec![resource.to_string()];

    for i in (1..segs.len()).rev() {
        if segs[i] == "*" {
            continue;
        }
        segs[i] = "*";
        out.push(segs.join("/"));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permute_matches_worked_example() {
        assert_eq!(
            permute("a:b/1/2/3"),
            vec!["a:b/1/2/3", "a:b/1/2/*", "a:b/1/*/*", "a:b/*/*/*"]
        );
    }

    #[test]
    fn permute_single_segment_is_itself() {
        assert_eq!(permute("a:b"), vec!["a:b"]);
    }

    #[test]
    fn specificity_counts_non_wildcard_segments() {
        assert_eq!(specificity("a:b/1/2/3"), 4);
        assert_eq!(specificity("a:b/1/*/*"), 2);
    }

    #[test]
    fn resource_matches_respects_wildcard_segments() {
        assert!(resource_matches("a:b/*/*", "a:b/1/2"));
        assert!(!resource_matches("a:b/*/*", "a:b/1/2/3"));
        assert!(!resource_matches("a:b/1/*", "a:b/2/3"));
    }

    #[test]
    fn access_priority_orders_deny_before_allow_before_inherit() {
        assert!(Access::Deny < Access::Allow);
        assert!(Access::Allow < Access::Inherit);
    }

    #[test]
    fn matching_order_key_prefers_specificity_over_access_priority() {
        let deny = Rule::new(1, "res/1/*/*", "read", Access::Deny);
        let allow = Rule::new(1, "res/1/2/*", "read", Access::Allow);
        let mut rules = vec![deny, allow];
        rules.sort_by_key(matching_order_key);
        assert_eq!(rules[0].access, Access::Allow);
    }
}
