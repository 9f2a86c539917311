//! # Evaluator Module
//!
//! The decision algorithm: segments session roles into indexed/unindexed
//! sets, fetches unindexed rules from storage, resolves per-role-kind
//! access with short-circuit, and (optionally) emits a trace of every
//! non-`Inherit` matching rule it encountered.

use std::collections::HashMap;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::cache_manager::CacheManager;
use crate::error::Result;
use crate::popularity::PopularityCounter;
use crate::rule::{
    is_wildcard, matching_order_key, permute, trace_order, Access, Role, RoleKind, Rule,
};
use crate::stats::StatsRecorder;
use crate::storage::{RuleFilter, RuleStorage};

/// Fixed per-role-kind resolution order (§4.5). Bypass is handled in the
/// preflight step and never appears here.
pub const EVAL_ORDER: [RoleKind; 4] = [
    RoleKind::Context,
    RoleKind::Common,
    RoleKind::Authenticated,
    RoleKind::Anonymous,
];

/// Outcome of a single `check`/`trace` call.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub access: Access,
    pub reason: &'static str,
    /// Every non-`Inherit` matching rule encountered, sorted by
    /// `(resource, operation, role_id, access)`. Empty unless a trace was
    /// requested.
    pub trace: Vec<Rule>,
}

/// Borrowed collaborators the evaluator needs for one check; owned and
/// locked by [`crate::service::Service`].
pub struct Evaluator<'a> {
    pub cache: &'a CacheManager,
    pub counter: &'a PopularityCounter<String>,
    pub stats: &'a StatsRecorder,
    pub rule_storage: &'a dyn RuleStorage,
}

impl<'a> Evaluator<'a> {
    /// Evaluates `(session roles, op, res)` against `roles` — the full,
    /// currently-known role catalogue, used to resolve each session role id
    /// to its [`RoleKind`]. `cx` is the session's cancellation scope; it is
    /// forwarded to the one storage call a check can make (the unindexed
    /// fetch in step 3).
    pub async fn evaluate(
        &self,
        cx: &CancellationToken,
        roles: &[Role],
        session_role_ids: &[u64],
        op: &str,
        res: &str,
        want_trace: bool,
    ) -> Result<CheckOutcome> {
        if is_wildcard(res) {
            return Ok(CheckOutcome {
                access: Access::Inherit,
                reason: "unknown_context",
                trace: Vec::new(),
            });
        }

        let by_kind = segment_by_kind(roles, session_role_ids);

        // Unconditional: every role visited counts as activity, even when
        // the check resolves in preflight (bypass membership or an
        // anonymous integrity violation).
        self.bump_counter(&by_kind, res);

        if let Some(outcome) = preflight(&by_kind) {
            return Ok(outcome);
        }

        let (indexed, unindexed) = self.segment_cache_residency(&by_kind, op, res);

        let fetched = self.fetch_unindexed(cx, &unindexed, op, res).await?;

        let mut trace: Vec<Rule> = Vec::new();

        for kind in EVAL_ORDER {
            let Some(role_ids) = by_kind.get(&kind) else {
                continue;
            };

            let mut kind_allowed = false;

            for role_id in role_ids {
                let mut candidates = indexed.get(role_id).cloned().unwrap_or_default();
                if let Some(fetched_for_role) = fetched.get(role_id) {
                    candidates.extend(fetched_for_role.iter().cloned());
                }

                candidates.sort_by_key(matching_order_key);
                let matching = candidates.into_iter().find(|r| r.access != Access::Inherit);

                let Some(matching) = matching else {
                    continue;
                };

                if want_trace {
                    trace.push(matching.clone());
                }

                match matching.access {
                    Access::Deny => {
                        trace.sort_by(trace_order);
                        return Ok(CheckOutcome {
                            access: Access::Deny,
                            reason: "matched_deny_rule",
                            trace,
                        });
                    }
                    Access::Allow => kind_allowed = true,
                    Access::Inherit => unreachable!("filtered above"),
                }
            }

            if kind_allowed {
                trace.sort_by(trace_order);
                return Ok(CheckOutcome {
                    access: Access::Allow,
                    reason: "matched_allow_rule",
                    trace,
                });
            }
        }

        trace.sort_by(trace_order);
        Ok(CheckOutcome {
            access: Access::Inherit,
            reason: "no_matching_rule",
            trace,
        })
    }

    /// Bumps the popularity counter for every `(role, res)` pair the session
    /// touches, regardless of how the check ultimately resolves.
    fn bump_counter(&self, by_kind: &HashMap<RoleKind, Vec<u64>>, res: &str) {
        for role_id in by_kind.values().flatten() {
            self.counter.inc(format!("{}:{}", role_id, res));
        }
    }

    /// Partitions roles into cache-hot (`indexed`) and cache-cold
    /// (`unindexed`), recording a hit or miss per role.
    fn segment_cache_residency(
        &self,
        by_kind: &HashMap<RoleKind, Vec<u64>>,
        op: &str,
        res: &str,
    ) -> (HashMap<u64, Vec<Rule>>, Vec<u64>) {
        let mut indexed = HashMap::new();
        let mut unindexed = Vec::new();

        for role_id in by_kind.values().flatten() {
            if self.cache.is_cached(*role_id, res) {
                self.stats.record_hit(&[*role_id], op, res);
                indexed.insert(*role_id, self.cache.get(*role_id, op, res));
            } else {
                self.stats.record_miss(&[*role_id], op, res);
                unindexed.push(*role_id);
            }
        }

        (indexed, unindexed)
    }

    /// Queries storage for every unindexed role with `resource ∈
    /// permute(res)`, recording the whole fetch as a single timing sample.
    async fn fetch_unindexed(
        &self,
        cx: &CancellationToken,
        unindexed: &[u64],
        op: &str,
        res: &str,
    ) -> Result<HashMap<u64, Vec<Rule>>> {
        let mut out = HashMap::new();
        if unindexed.is_empty() {
            return Ok(out);
        }

        let candidates = permute(res);
        let started = Instant::now();

        for role_id in unindexed {
            let (rules, _) = self
                .rule_storage
                .search(
                    cx,
                    RuleFilter {
                        role_id: Some(*role_id),
                        operation: Some(op.to_string()),
                        resources: Some(candidates.clone()),
                        limit: None,
                    },
                )
                .await?;
            out.insert(*role_id, rules);
        }

        self.stats.record_timing(started.elapsed());
        Ok(out)
    }
}

/// Partitions `session_role_ids` by their kind in `roles`. Session role ids
/// absent from the catalogue contribute nothing.
fn segment_by_kind(roles: &[Role], session_role_ids: &[u64]) -> HashMap<RoleKind, Vec<u64>> {
    let mut out: HashMap<RoleKind, Vec<u64>> = HashMap::new();
    for role in roles {
        if session_role_ids.contains(&role.id) {
            out.entry(role.kind).or_default().push(role.id);
        }
    }
    out
}

/// Step 1 of §4.5: integrity check and bypass short-circuit. Returns `Some`
/// when the check is already resolved, `None` to continue to segmentation.
fn preflight(by_kind: &HashMap<RoleKind, Vec<u64>>) -> Option<CheckOutcome> {
    let anonymous_present = by_kind.contains_key(&RoleKind::Anonymous);
    if anonymous_present && by_kind.len() > 1 {
        return Some(CheckOutcome {
            access: Access::Deny,
            reason: "failed_integrity_check",
            trace: Vec::new(),
        });
    }

    if by_kind.contains_key(&RoleKind::Bypass) {
        return Some(CheckOutcome {
            access: Access::Allow,
            reason: "bypass_role_membership",
            trace: Vec::new(),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::testing::InMemoryStorage;

    fn role(id: u64, kind: RoleKind) -> Role {
        Role::new(id, format!("role-{id}"), kind)
    }

    async fn eval(
        roles: Vec<Role>,
        session_roles: &[u64],
        op: &str,
        res: &str,
        seed_storage_rules: Vec<Rule>,
        seed_cache: Vec<(u64, &str, Vec<Rule>)>,
    ) -> CheckOutcome {
        eval_with_cx(
            &CancellationToken::new(),
            roles,
            session_roles,
            op,
            res,
            seed_storage_rules,
            seed_cache,
        )
        .await
        .unwrap()
    }

    async fn eval_with_cx(
        cx: &CancellationToken,
        roles: Vec<Role>,
        session_roles: &[u64],
        op: &str,
        res: &str,
        seed_storage_rules: Vec<Rule>,
        seed_cache: Vec<(u64, &str, Vec<Rule>)>,
    ) -> Result<CheckOutcome> {
        let storage = InMemoryStorage::new();
        storage.seed_rules(seed_storage_rules);

        let cache = CacheManager::new();
        for (role_id, resource, rules) in seed_cache {
            cache.add(role_id, resource, rules);
        }

        let counter = PopularityCounter::new(0.5, std::time::Duration::from_secs(300), 0.1);
        let stats = StatsRecorder::new();

        let evaluator = Evaluator {
            cache: &cache,
            counter: &counter,
            stats: &stats,
            rule_storage: &storage,
        };

        evaluator
            .evaluate(cx, &roles, session_roles, op, res, true)
            .await
    }

    #[tokio::test]
    async fn empty_index_cache_miss_resolves_from_storage() {
        let outcome = eval(
            vec![role(1, RoleKind::Common)],
            &[1],
            "read",
            "smt/1/1/1",
            vec![Rule::new(1, "smt/1/1/1", "read", Access::Allow)],
            vec![],
        )
        .await;
        assert_eq!(outcome.access, Access::Allow);
    }

    #[tokio::test]
    async fn mixed_hit_and_miss_still_resolves_allow() {
        let outcome = eval(
            vec![role(1, RoleKind::Common), role(2, RoleKind::Common)],
            &[1, 2],
            "read",
            "smt/1/1/1",
            vec![Rule::new(2, "smt/1/1/1", "read", Access::Allow)],
            vec![(
                1,
                "smt/1/1/1",
                vec![Rule::new(1, "smt/1/1/1", "read", Access::Allow)],
            )],
        )
        .await;
        assert_eq!(outcome.access, Access::Allow);
    }

    #[tokio::test]
    async fn wildcard_resource_short_circuits_to_inherit() {
        let outcome = eval(
            vec![
                role(1, RoleKind::Common),
                role(2, RoleKind::Common),
                role(3, RoleKind::Common),
            ],
            &[1, 2, 3],
            "read",
            "res/1/2/*",
            vec![],
            vec![],
        )
        .await;
        assert_eq!(outcome.access, Access::Inherit);
        assert_eq!(outcome.reason, "unknown_context");
    }

    #[tokio::test]
    async fn bypass_beats_a_stored_deny() {
        let outcome = eval(
            vec![role(1, RoleKind::Bypass), role(2, RoleKind::Common)],
            &[1, 2],
            "read",
            "smt/1",
            vec![Rule::new(2, "smt/1", "read", Access::Deny)],
            vec![],
        )
        .await;
        assert_eq!(outcome.access, Access::Allow);
        assert_eq!(outcome.reason, "bypass_role_membership");
    }

    #[tokio::test]
    async fn anonymous_with_any_other_kind_is_denied() {
        let outcome = eval(
            vec![role(1, RoleKind::Anonymous), role(2, RoleKind::Common)],
            &[1, 2],
            "read",
            "smt/1",
            vec![Rule::new(2, "smt/1", "read", Access::Allow)],
            vec![],
        )
        .await;
        assert_eq!(outcome.access, Access::Deny);
        assert_eq!(outcome.reason, "failed_integrity_check");
    }

    #[tokio::test]
    async fn deny_in_any_processed_kind_short_circuits_the_whole_check() {
        let outcome = eval(
            vec![role(1, RoleKind::Context), role(2, RoleKind::Common)],
            &[1, 2],
            "read",
            "smt/1",
            vec![
                Rule::new(1, "smt/1", "read", Access::Deny),
                Rule::new(2, "smt/1", "read", Access::Allow),
            ],
            vec![],
        )
        .await;
        assert_eq!(outcome.access, Access::Deny);
    }

    #[tokio::test]
    async fn specificity_ordering_picks_the_most_specific_non_inherit_rule() {
        let outcome = eval(
            vec![role(1, RoleKind::Common)],
            &[1],
            "read",
            "res/1/2/3",
            vec![
                Rule::new(1, "res/1/*/*", "read", Access::Deny),
                Rule::new(1, "res/1/2/*", "read", Access::Allow),
                Rule::new(1, "res/1/2/3", "read", Access::Inherit),
            ],
            vec![],
        )
        .await;
        assert_eq!(outcome.access, Access::Allow);
    }

    #[tokio::test]
    async fn bypass_role_still_bumps_the_counter_for_every_visited_role() {
        let counter = PopularityCounter::new(0.5, std::time::Duration::from_secs(300), 0.1);
        let cache = CacheManager::new();
        let stats = StatsRecorder::new();
        let storage = InMemoryStorage::new();

        let evaluator = Evaluator {
            cache: &cache,
            counter: &counter,
            stats: &stats,
            rule_storage: &storage,
        };

        let outcome = evaluator
            .evaluate(
                &CancellationToken::new(),
                &[role(1, RoleKind::Bypass), role(2, RoleKind::Common)],
                &[1, 2],
                "read",
                "smt/1",
                false,
            )
            .await
            .unwrap();

        assert_eq!(outcome.reason, "bypass_role_membership");
        assert_eq!(counter.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_context_propagates_as_cancelled_error_on_unindexed_fetch() {
        let cx = CancellationToken::new();
        cx.cancel();

        let result = eval_with_cx(
            &cx,
            vec![role(1, RoleKind::Common)],
            &[1],
            "read",
            "smt/1/1/1",
            vec![Rule::new(1, "smt/1/1/1", "read", Access::Allow)],
            vec![],
        )
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
