//! # Service Module
//!
//! Lifecycle orchestrator: owns roles, cache, counter and stats; runs the
//! periodic decay/cleanup/reindex/flush scheduler; exposes check/grant/trace
//! to callers.
//!
//! Background workers hold only an `Arc` back-reference to the shared
//! state, never to `Service` itself — callers are expected to cancel the
//! `CancellationToken` passed to [`Service::new`] before dropping the
//! service, keeping worker ownership acyclic.

use std::sync::Arc;

use log::{debug, error};
use parking_lot::RwLock;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::cache_manager::CacheManager;
use crate::config::{Config, ReindexStrategy};
use crate::error::Result;
use crate::evaluator::{CheckOutcome, Evaluator};
use crate::popularity::PopularityCounter;
use crate::rule::{Access, Role, Rule};
use crate::session::Session;
use crate::stats::{StatsRecorder, StatsSnapshot};
use crate::storage::{partition_for_flush, RoleFilter, RoleStorage, RuleFilter, RuleStorage};

pub struct Service {
    config: Config,
    roles: RwLock<Vec<Role>>,
    cache: RwLock<Arc<CacheManager>>,
    counter: Arc<PopularityCounter<String>>,
    stats: Arc<StatsRecorder>,
    cancel: CancellationToken,
}

impl Service {
    /// Builds the service, seeds its roles and (optionally) its cache, and
    /// spawns the background scheduler bound to `cancel`.
    pub async fn new(config: Config, cancel: CancellationToken) -> Result<Arc<Self>> {
        let config = config.normalized()?;

        let (role_list, _) = config.role_storage.search(&cancel, RoleFilter::default()).await?;

        let counter = if config.synchronous {
            Arc::new(PopularityCounter::new(
                config.decay_factor,
                config.decay_interval,
                config.evict_threshold,
            ))
        } else {
            let (counter, mut rx) = PopularityCounter::new(
                config.decay_factor,
                config.decay_interval,
                config.evict_threshold,
            )
            .into_async();
            let counter = Arc::new(counter);
            let worker = Arc::clone(&counter);
            tokio::spawn(async move {
                while let Some(key) = rx.recv().await {
                    worker.apply(key);
                }
            });
            counter
        };

        let stats = if config.synchronous {
            Arc::new(StatsRecorder::new())
        } else {
            StatsRecorder::new_async()
        };

        let cache = CacheManager::new();
        if let Some(pull) = &config.pull_initial_state {
            seed_cache(&cache, pull(config.max_index_size));
        }

        let svc = Arc::new(Service {
            config,
            roles: RwLock::new(role_list),
            cache: RwLock::new(Arc::new(cache)),
            counter,
            stats,
            cancel,
        });

        tokio::spawn(Arc::clone(&svc).run_scheduler());

        Ok(svc)
    }

    // ============================================================================================
    // CHECK / GRANT
    // ============================================================================================

    pub async fn check(&self, session: &dyn Session, op: &str, res: &str) -> Result<Access> {
        Ok(self.evaluate(session, op, res, false).await?.access)
    }

    pub async fn can(&self, session: &dyn Session, op: &str, res: &str) -> Result<bool> {
        Ok(self.check(session, op, res).await? == Access::Allow)
    }

    pub async fn trace(&self, session: &dyn Session, op: &str, res: &str) -> Result<CheckOutcome> {
        self.evaluate(session, op, res, true).await
    }

    async fn evaluate(
        &self,
        session: &dyn Session,
        op: &str,
        res: &str,
        want_trace: bool,
    ) -> Result<CheckOutcome> {
        if let Some(noop) = self.config.noop_access {
            return Ok(CheckOutcome {
                access: noop,
                reason: "noop_mode",
                trace: Vec::new(),
            });
        }

        let roles = self.roles.read().clone();
        let cache = Arc::clone(&self.cache.read());
        let cx = session.context();

        let evaluator = Evaluator {
            cache: &cache,
            counter: &self.counter,
            stats: &self.stats,
            rule_storage: self.config.rule_storage.as_ref(),
        };

        let outcome = evaluator
            .evaluate(&cx, &roles, session.roles(), op, res, want_trace)
            .await?;

        debug!(
            "check identity={} op={} res={} access={} reason={}",
            session.identity(),
            op,
            res,
            outcome.access,
            outcome.reason
        );

        Ok(outcome)
    }

    /// Grants `rules`. Cache-resident keys are updated synchronously before
    /// the storage write; `Access::Inherit` rules flush as deletes, every
    /// other rule as an upsert.
    pub async fn grant(&self, rules: Vec<Rule>) -> Result<()> {
        let cache = Arc::clone(&self.cache.read());
        for rule in &rules {
            if cache.is_cached(rule.role_id, &rule.resource) {
                cache.add(rule.role_id, &rule.resource, vec![rule.clone()]);
                self.stats.record_update(rule);
            }
            debug!(
                "grant role={} op={} res={} access={}",
                rule.role_id, rule.operation, rule.resource, rule.access
            );
        }

        let (upserts, deletes) = partition_for_flush(rules);
        if !upserts.is_empty() {
            self.config.rule_storage.upsert(&self.cancel, &upserts).await?;
        }
        if !deletes.is_empty() {
            self.config.rule_storage.delete(&self.cancel, &deletes).await?;
        }

        Ok(())
    }

    // ============================================================================================
    // ROLE MANAGEMENT
    // ============================================================================================

    pub fn update_roles(&self, rr: Vec<Role>) {
        let removed = {
            let mut roles = self.roles.write();
            let removed: Vec<u64> = roles
                .iter()
                .filter(|r| !rr.iter().any(|n| n.id == r.id))
                .map(|r| r.id)
                .collect();
            *roles = rr;
            removed
        };

        for role_id in removed {
            self.cleanup_role(role_id);
        }
    }

    pub fn remove_role(&self, role_id: u64) {
        self.roles.write().retain(|r| r.id != role_id);
        self.cleanup_role(role_id);
    }

    pub async fn reload_roles(&self) -> Result<()> {
        let (fresh, _) = self
            .config
            .role_storage
            .search(&self.cancel, RoleFilter::default())
            .await?;
        self.update_roles(fresh);
        Ok(())
    }

    fn cleanup_role(&self, role_id: u64) {
        let prefix = format!("{}:", role_id);
        self.counter.cleanup_keys(|k| k.starts_with(&prefix));
    }

    // ============================================================================================
    // RULE QUERIES
    // ============================================================================================

    pub async fn find_rules_by_role_id(&self, role_id: u64) -> Result<Vec<Rule>> {
        let (rules, _) = self
            .config
            .rule_storage
            .search(
                &self.cancel,
                RuleFilter {
                    role_id: Some(role_id),
                    ..Default::default()
                },
            )
            .await?;
        Ok(rules)
    }

    pub async fn rules(&self) -> Result<Vec<Rule>> {
        let (rules, _) = self
            .config
            .rule_storage
            .search(&self.cancel, RuleFilter::default())
            .await?;
        Ok(rules)
    }

    /// Copies role `from`'s rules onto every role in `to`. Each target's
    /// existing rules are first marked `Inherit` so `grant` deletes them
    /// before the clone is granted.
    pub async fn clone_rules_by_role_id(&self, from: u64, to: &[u64]) -> Result<()> {
        let source_rules = self.find_rules_by_role_id(from).await?;

        for &target in to {
            let existing = self.find_rules_by_role_id(target).await?;
            let tombstones: Vec<Rule> = existing
                .into_iter()
                .map(|r| Rule::new(target, r.resource, r.operation, Access::Inherit))
                .collect();
            if !tombstones.is_empty() {
                self.grant(tombstones).await?;
            }

            let cloned: Vec<Rule> = source_rules
                .iter()
                .map(|r| Rule::new(target, r.resource.clone(), r.operation.clone(), r.access))
                .collect();
            if !cloned.is_empty() {
                self.grant(cloned).await?;
            }
        }

        Ok(())
    }

    /// Role IDs with an `Allow` rule and role IDs with a `Deny` rule for the
    /// exact `(resource, operation)` pair.
    pub async fn significant_roles(&self, res: &str, op: &str) -> Result<(Vec<u64>, Vec<u64>)> {
        let (stored, _) = self
            .config
            .rule_storage
            .search(
                &self.cancel,
                RuleFilter {
                    operation: Some(op.to_string()),
                    resources: Some(vec![res.to_string()]),
                    ..Default::default()
                },
            )
            .await?;

        let mut cached = self.cache.read().all_rules();
        cached.retain(|r| r.resource == res && r.operation == op);
        cached.extend(stored);

        let mut allow = Vec::new();
        let mut deny = Vec::new();
        for rule in cached {
            match rule.access {
                Access::Allow => allow.push(rule.role_id),
                Access::Deny => deny.push(rule.role_id),
                Access::Inherit => {}
            }
        }
        allow.sort_unstable();
        allow.dedup();
        deny.sort_unstable();
        deny.dedup();

        Ok((allow, deny))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // ============================================================================================
    // BACKGROUND SCHEDULER
    // ============================================================================================

    async fn run_scheduler(self: Arc<Self>) {
        let mut decay_tick = interval(self.config.decay_interval);
        let mut cleanup_tick = interval(self.config.cleanup_interval);
        let mut reindex_tick = interval(self.config.reindex_interval);
        let mut flush_tick = interval(self.config.index_flush_interval);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("rbac service scheduler stopping");
                    return;
                }
                _ = decay_tick.tick() => {
                    self.counter.decay();
                }
                _ = cleanup_tick.tick() => {
                    self.counter.evict();
                }
                _ = reindex_tick.tick() => {
                    if let Err(e) = self.reindex().await {
                        error!("reindex failed: {e}");
                    }
                }
                _ = flush_tick.tick() => {
                    if let Some(flush) = &self.config.flush_index_state {
                        flush(&self.cache.read().list_keys());
                    }
                }
            }
        }
    }

    /// Rebuilds the cache from the popularity counter's top `max_index_size`
    /// keys. `ReindexStrategy::Speed` releases the current cache before the
    /// rebuild, trading a short all-storage window for lower peak memory;
    /// `ReindexStrategy::Memory` (default) builds the replacement first so
    /// reads keep hitting the old cache until the atomic swap.
    async fn reindex(&self) -> Result<()> {
        if self.config.reindex_strategy == ReindexStrategy::Speed {
            *self.cache.write() = Arc::new(CacheManager::new());
        }

        let top_keys = self.counter.top_n(self.config.max_index_size);
        let fresh = CacheManager::new();

        for key in top_keys {
            let Some((role_id, resource)) = parse_cache_key(&key) else {
                continue;
            };

            let (rules, _) = self
                .config
                .rule_storage
                .search(
                    &self.cancel,
                    RuleFilter {
                        role_id: Some(role_id),
                        resources: Some(vec![resource.clone()]),
                        ..Default::default()
                    },
                )
                .await?;

            fresh.add(role_id, &resource, rules);
        }

        *self.cache.write() = Arc::new(fresh);
        Ok(())
    }
}

fn seed_cache(cache: &CacheManager, rules: Vec<Rule>) {
    use std::collections::HashMap;

    let mut by_key: HashMap<(u64, String), Vec<Rule>> = HashMap::new();
    for rule in rules {
        by_key
            .entry((rule.role_id, rule.resource.clone()))
            .or_default()
            .push(rule);
    }

    for ((role_id, resource), rules) in by_key {
        cache.add(role_id, &resource, rules);
    }
}

/// Parses a `"{role_id}:{resource}"` popularity-counter key back into its
/// parts. Splits on the first `:` only, since role ids never contain one but
/// resources legitimately do (e.g. `corteza::compose:module-field`).
fn parse_cache_key(key: &str) -> Option<(u64, String)> {
    let (role_part, resource) = key.split_once(':')?;
    let role_id = role_part.parse().ok()?;
    Some((role_id, resource.to_string()))
}
