//! # Cache Manager Module
//!
//! Wraps a [`RuleIndex`] with a membership set that distinguishes "we have
//! cached rules for this (role, resource)" from "we have never considered
//! this (role, resource)". Concrete keys populate the membership set and
//! answer `is_cached` precisely; wildcard grants opportunistically update
//! already-hot entries without ever promoting a new key, keeping the cache
//! footprint bounded by `max_index_size`.

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::rule::{is_wildcard, Rule};
use crate::rule_index::RuleIndex;

pub struct CacheManager {
    index: RwLock<RuleIndex>,
    presence: RwLock<HashSet<String>>,
}

impl CacheManager {
    pub fn new() -> Self {
        CacheManager {
            index: RwLock::new(RuleIndex::new()),
            presence: RwLock::new(HashSet::new()),
        }
    }

    /// Concrete resource: always indexes and returns `true`. Wildcard
    /// resource: indexes and returns `true` only if some already-cached
    /// concrete key for this role shares the wildcard's non-wildcard prefix;
    /// otherwise skips the rules and returns `false`. The presence set is
    /// never populated with wildcard keys.
    pub fn add(&self, role: u64, resource: &str, rules: Vec<Rule>) -> bool {
        if !is_wildcard(resource) {
            self.presence.write().insert(mkkey(role, resource));
            self.index.write().add(rules);
            return true;
        }

        let prefix = format!("{}:{}", role, wildcard_prefix(resource));
        let covers_existing = self
            .presence
            .read()
            .iter()
            .any(|k| k.starts_with(&prefix));

        if covers_existing {
            self.index.write().add(rules);
            true
        } else {
            false
        }
    }

    /// Wildcard resources are always reported as cached (callers must
    /// consult the index regardless, knowing `get` may return nothing).
    /// Concrete resources consult the presence set.
    pub fn is_cached(&self, role: u64, resource: &str) -> bool {
        if is_wildcard(resource) {
            return true;
        }
        self.presence.read().contains(&mkkey(role, resource))
    }

    pub fn get(&self, role: u64, op: &str, res: &str) -> Vec<Rule> {
        self.index.read().get(role, op, res)
    }

    pub fn has(&self, rule: &Rule) -> bool {
        self.index.read().has(rule)
    }

    /// Number of cache-hot `(role, resource)` keys — bounded by `max_index_size`.
    pub fn size(&self) -> usize {
        self.presence.read().len()
    }

    pub fn list_keys(&self) -> Vec<String> {
        self.presence.read().iter().cloned().collect()
    }

    pub fn all_rules(&self) -> Vec<Rule> {
        self.index.read().all_rules()
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        CacheManager::new()
    }
}

fn mkkey(role: u64, resource: &str) -> String {
    format!("{}:{}", role, resource)
}

/// The portion of a resource path up to (not including) its first `*`
/// segment, trailing separator stripped.
fn wildcard_prefix(resource: &str) -> String {
    resource
        .split('/')
        .take_while(|seg| *seg != "*")
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Access;

    #[test]
    fn concrete_add_always_succeeds_and_marks_cached() {
        let cm = CacheManager::new();
        let added = cm.add(1, "x/y/z", vec![Rule::new(1, "x/y/z", "read", Access::Allow)]);
        assert!(added);
        assert!(cm.is_cached(1, "x/y/z"));
        assert!(!cm.is_cached(1, "x/y/w"));
        assert!(cm.is_cached(1, "x/y/*"));
    }

    #[test]
    fn wildcard_add_is_opportunistic() {
        let cm = CacheManager::new();
        // Nothing cached yet under role 1's x/y prefix: wildcard add is skipped.
        let added = cm.add(1, "x/y/*", vec![Rule::new(1, "x/y/*", "read", Access::Allow)]);
        assert!(!added);
        assert_eq!(cm.get(1, "read", "x/y/z").len(), 0);

        // Once a concrete key under that prefix exists, the wildcard grant sticks.
        cm.add(1, "x/y/z", vec![]);
        let added = cm.add(1, "x/y/*", vec![Rule::new(1, "x/y/*", "read", Access::Allow)]);
        assert!(added);
        assert_eq!(cm.get(1, "read", "x/y/z").len(), 1);
    }

    #[test]
    fn wildcard_add_never_populates_presence_set() {
        let cm = CacheManager::new();
        cm.add(1, "x/y/z", vec![]);
        cm.add(1, "x/y/*", vec![Rule::new(1, "x/y/*", "read", Access::Allow)]);
        assert_eq!(cm.size(), 1);
    }
}
