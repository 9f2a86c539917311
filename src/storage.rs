//! # Storage Module
//!
//! Narrow async trait interfaces for rule and role persistence. Production
//! backing is out of scope for this crate; [`testing::InMemoryStorage`] is
//! the fake used by the `Service` test suite.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::rule::{Access, Role, Rule};

/// Search filter for [`RuleStorage::search`].
#[derive(Debug, Clone, Default)]
pub struct RuleFilter {
    pub role_id: Option<u64>,
    pub resources: Option<Vec<String>>,
    pub operation: Option<String>,
    pub limit: Option<usize>,
}

/// Search filter for [`RoleStorage::search`].
#[derive(Debug, Clone, Default)]
pub struct RoleFilter {
    pub ids: Option<Vec<u64>>,
}

/// Every method takes the caller's cancellation token first, mirroring the
/// `ctx context.Context` leading parameter of the system this crate is
/// built from.
#[async_trait]
pub trait RuleStorage: Send + Sync {
    async fn search(&self, cx: &CancellationToken, filter: RuleFilter) -> Result<(Vec<Rule>, RuleFilter)>;
    async fn upsert(&self, cx: &CancellationToken, rules: &[Rule]) -> Result<()>;
    async fn delete(&self, cx: &CancellationToken, rules: &[Rule]) -> Result<()>;
    async fn truncate(&self, cx: &CancellationToken) -> Result<()>;
}

#[async_trait]
pub trait RoleStorage: Send + Sync {
    async fn search(&self, cx: &CancellationToken, filter: RoleFilter) -> Result<(Vec<Role>, RoleFilter)>;
}

/// Splits `rules` into `(upserts, deletes)`: an `Access::Inherit` rule is a
/// tombstone, so it becomes a delete rather than an upsert (§7, Scenario 3/4).
pub fn partition_for_flush(rules: Vec<Rule>) -> (Vec<Rule>, Vec<Rule>) {
    rules.into_iter().partition(|r| r.access != Access::Inherit)
}

pub mod testing {
    //! In-memory fakes satisfying [`super::RuleStorage`] and
    //! [`super::RoleStorage`], for deterministic tests only.

    use super::*;
    use crate::error::Error;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct InMemoryStorage {
        rules: Mutex<Vec<Rule>>,
        roles: Mutex<Vec<Role>>,
    }

    impl InMemoryStorage {
        pub fn new() -> Self {
            InMemoryStorage::default()
        }

        pub fn seed_rules(&self, rules: Vec<Rule>) {
            self.rules.lock().extend(rules);
        }

        pub fn seed_roles(&self, roles: Vec<Role>) {
            self.roles.lock().extend(roles);
        }
    }

    #[async_trait]
    impl RuleStorage for InMemoryStorage {
        async fn search(&self, cx: &CancellationToken, filter: RuleFilter) -> Result<(Vec<Rule>, RuleFilter)> {
            if cx.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let rules = self.rules.lock();
            let mut out: Vec<Rule> = rules
                .iter()
                .filter(|r| filter.role_id.map_or(true, |id| id == r.role_id))
                .filter(|r| {
                    filter
                        .operation
                        .as_deref()
                        .map_or(true, |op| op == r.operation)
                })
                .filter(|r| {
                    filter
                        .resources
                        .as_ref()
                        .map_or(true, |rs| rs.iter().any(|res| res == &r.resource))
                })
                .cloned()
                .collect();

            if let Some(limit) = filter.limit {
                out.truncate(limit);
            }

            Ok((out, filter))
        }

        async fn upsert(&self, cx: &CancellationToken, rules: &[Rule]) -> Result<()> {
            if cx.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut store = self.rules.lock();
            for rule in rules {
                if let Some(existing) = store
                    .iter_mut()
                    .find(|r| r.role_id == rule.role_id && r.resource == rule.resource && r.operation == rule.operation)
                {
                    *existing = rule.clone();
                } else {
                    store.push(rule.clone());
                }
            }
            Ok(())
        }

        async fn delete(&self, cx: &CancellationToken, rules: &[Rule]) -> Result<()> {
            if cx.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut store = self.rules.lock();
            store.retain(|r| {
                !rules.iter().any(|d| {
                    d.role_id == r.role_id && d.resource == r.resource && d.operation == r.operation
                })
            });
            Ok(())
        }

        async fn truncate(&self, cx: &CancellationToken) -> Result<()> {
            if cx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.rules.lock().clear();
            Ok(())
        }
    }

    #[async_trait]
    impl RoleStorage for InMemoryStorage {
        async fn search(&self, cx: &CancellationToken, filter: RoleFilter) -> Result<(Vec<Role>, RoleFilter)> {
            if cx.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let roles = self.roles.lock();
            let out = roles
                .iter()
                .filter(|r| {
                    filter
                        .ids
                        .as_ref()
                        .map_or(true, |ids| ids.contains(&r.id))
                })
                .cloned()
                .collect();
            Ok((out, filter))
        }
    }
}
