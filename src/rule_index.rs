//! # Rule Index Module
//!
//! Pure in-memory lookup structure mapping a concrete `(role, operation,
//! resource)` triple to the set of matching rules, including rules whose
//! resource contains path wildcards.
//!
//! Keeps rules in a per-role bucket rather than a fully keyed index: role
//! fan-out is bounded in practice (dozens, not thousands), so a linear scan
//! filtered by operation and wildcard-match stays fast without the
//! bookkeeping of a secondary index.

use std::collections::HashMap;

use crate::rule::{resource_matches, same_key, Rule};

// ================================================================================================
// RULE INDEX
// ================================================================================================

/// In-memory rule lookup structure, keyed by role.
#[derive(Debug, Clone, Default)]
pub struct RuleIndex {
    rules_by_role: HashMap<u64, Vec<Rule>>,
}

impl RuleIndex {
    pub fn new() -> Self {
        RuleIndex {
            rules_by_role: HashMap::new(),
        }
    }

    /// Bulk construction equivalent to successive [`RuleIndex::add`] calls.
    pub fn build(rules: impl IntoIterator<Item = Rule>) -> Self {
        let mut ix = RuleIndex::new();
        ix.add(rules);
        ix
    }

    /// Appends rules, deduplicating by `(role, resource, operation, access)`
    /// and dropping `Access::Inherit` entries — an inherit rule represents a
    /// removal, never a resident fact.
    pub fn add(&mut self, rules: impl IntoIterator<Item = Rule>) {
        for rule in rules {
            if rule.access == crate::rule::Access::Inherit {
                self.remove_matching(&rule);
                continue;
            }

            let bucket = self.rules_by_role.entry(rule.role_id).or_default();
            if let Some(existing) = bucket.iter_mut().find(|r| same_key(r, &rule)) {
                *existing = rule;
            } else {
                bucket.push(rule);
            }
        }
    }

    /// Removes any rule matching `rule`'s key — used when an `Inherit` rule
    /// is added, since it represents a tombstone rather than a fact to keep.
    fn remove_matching(&mut self, rule: &Rule) {
        if let Some(bucket) = self.rules_by_role.get_mut(&rule.role_id) {
            bucket.retain(|r| {
                !(r.resource == rule.resource && r.operation == rule.operation)
            });
        }
    }

    /// Exact equality membership.
    pub fn has(&self, rule: &Rule) -> bool {
        self.rules_by_role
            .get(&rule.role_id)
            .map(|bucket| bucket.contains(rule))
            .unwrap_or(false)
    }

    /// Every rule whose `role_id == role`, `operation == op`, and whose
    /// resource matches `res` under wildcard semantics.
    pub fn get(&self, role: u64, op: &str, res: &str) -> Vec<Rule> {
        self.rules_by_role
            .get(&role)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|r| r.operation == op && resource_matches(&r.resource, res))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn rules_for_role(&self, role: u64) -> Vec<Rule> {
        self.rules_by_role.get(&role).cloned().unwrap_or_default()
    }

    pub fn all_rules(&self) -> Vec<Rule> {
        self.rules_by_role.values().flatten().cloned().collect()
    }

    pub fn remove_role(&mut self, role: u64) {
        self.rules_by_role.remove(&role);
    }

    pub fn clear(&mut self) {
        self.rules_by_role.clear();
    }

    pub fn len(&self) -> usize {
        self.rules_by_role.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Access;

    fn rule(role: u64, resource: &str, op: &str, access: Access) -> Rule {
        Rule::new(role, resource, op, access)
    }

    #[test]
    fn get_matches_concrete_and_wildcard_rules() {
        let ix = RuleIndex::build(vec![
            rule(1, "a:b/c/d", "read", Access::Allow),
            rule(1, "a:b/*/*", "read", Access::Inherit),
        ]);
        // The Inherit rule is a tombstone for "a:b/*/*" only, so it never
        // makes it into the index — only the concrete Allow rule matches.
        let got = ix.get(1, "read", "a:b/c/d");
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].access, Access::Allow);
    }

    #[test]
    fn get_filters_by_role_operation_and_resource() {
        let ix = RuleIndex::build(vec![
            rule(2, "a:b/c/d", "read", Access::Allow),
            rule(1, "a:b/c/e", "read", Access::Allow),
            rule(1, "a:b/c/d", "write", Access::Allow),
        ]);
        assert!(ix.get(1, "read", "a:b/c/d").is_empty());
    }

    #[test]
    fn add_overwrites_rule_with_same_key() {
        let mut ix = RuleIndex::build(vec![rule(1, "a:b/c/d", "read", Access::Allow)]);
        ix.add(vec![rule(1, "a:b/c/d", "read", Access::Allow)]);
        assert_eq!(ix.rules_for_role(1).len(), 1);
    }

    #[test]
    fn has_is_exact_equality() {
        let ix = RuleIndex::build(vec![rule(1, "a:b/c/x", "write", Access::Allow)]);
        assert!(ix.has(&rule(1, "a:b/c/x", "write", Access::Allow)));
        assert!(!ix.has(&rule(2, "a:b/c/x", "write", Access::Allow)));
    }

    #[test]
    fn adding_new_rules_keeps_existing_ones() {
        let mut ix = RuleIndex::build(vec![rule(1, "a:b/c/d", "write", Access::Allow)]);
        ix.add(vec![rule(1, "a:b/c/x", "write", Access::Allow)]);
        assert_eq!(ix.get(1, "write", "a:b/c/x").len(), 1);
        assert_eq!(ix.get(1, "write", "a:b/c/d").len(), 1);
    }
}
