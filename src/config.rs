//! # Configuration Module
//!
//! The single configuration record every [`crate::service::Service`] needs
//! to construct. Zero-valued durations fall back to the defaults named in
//! each field's doc comment, matching the source system's table.

use std::sync::Arc;
use std::time::Duration;

use crate::rule::Access;
use crate::storage::{RoleStorage, RuleStorage};

/// Which strategy [`crate::service::Service`] uses when rebuilding its cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReindexStrategy {
    /// Build the fresh cache before swapping it in; the old cache keeps
    /// serving reads during the build. Default — favors availability.
    Memory,
    /// Drop the current cache before building the new one, trading a short
    /// unavailability window for roughly half the peak memory.
    Speed,
}

impl Default for ReindexStrategy {
    fn default() -> Self {
        ReindexStrategy::Memory
    }
}

/// Callback invoked once at startup with `max_index_size` to seed the cache.
pub type PullInitialState = Arc<dyn Fn(i64) -> Vec<crate::rule::Rule> + Send + Sync>;

/// Callback invoked on every flush tick with the current cache key list.
pub type FlushIndexState = Arc<dyn Fn(&[String]) + Send + Sync>;

/// Configuration for a [`crate::service::Service`].
pub struct Config {
    /// `-1` = unlimited; `0` is treated as `-1`; negative disables
    /// partitioning of the cache by size.
    pub max_index_size: i64,

    /// Testing only: forces the direct-call (synchronous) counter and
    /// stats paths instead of the asynchronous mailbox.
    pub synchronous: bool,

    pub reindex_strategy: ReindexStrategy,

    /// In `(0, 1]`.
    pub decay_factor: f64,

    /// Falls back to 5 minutes if zero.
    pub decay_interval: Duration,

    /// Falls back to 30 minutes if zero.
    pub cleanup_interval: Duration,

    /// Falls back to 30 minutes if zero.
    pub reindex_interval: Duration,

    /// Falls back to 5 minutes if zero.
    pub index_flush_interval: Duration,

    /// Score at or below which the popularity counter evicts an entry.
    pub evict_threshold: f64,

    /// If set, the `Service` operates in noop mode: `check` returns this
    /// constant access without touching storage, cache, or counters.
    pub noop_access: Option<Access>,

    pub pull_initial_state: Option<PullInitialState>,
    pub flush_index_state: Option<FlushIndexState>,

    pub rule_storage: Arc<dyn RuleStorage>,
    pub role_storage: Arc<dyn RoleStorage>,
}

impl Config {
    /// Applies the zero-duration fallbacks and rejects configuration faults
    /// that would otherwise panic a background worker later.
    pub(crate) fn normalized(mut self) -> Result<Self, crate::error::Error> {
        if self.decay_interval.is_zero() {
            self.decay_interval = Duration::from_secs(5 * 60);
        }
        if self.cleanup_interval.is_zero() {
            self.cleanup_interval = Duration::from_secs(30 * 60);
        }
        if self.reindex_interval.is_zero() {
            self.reindex_interval = Duration::from_secs(30 * 60);
        }
        if self.index_flush_interval.is_zero() {
            self.index_flush_interval = Duration::from_secs(5 * 60);
        }
        if self.max_index_size == 0 {
            self.max_index_size = -1;
        }

        if !(self.decay_factor > 0.0 && self.decay_factor <= 1.0) {
            return Err(crate::error::Error::Configuration(format!(
                "decay_factor must be in (0, 1], got {}",
                self.decay_factor
            )));
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::InMemoryStorage;

    fn base_config() -> Config {
        let storage = Arc::new(InMemoryStorage::new());
        Config {
            max_index_size: -1,
            synchronous: true,
            reindex_strategy: ReindexStrategy::default(),
            decay_factor: 0.5,
            decay_interval: Duration::ZERO,
            cleanup_interval: Duration::ZERO,
            reindex_interval: Duration::ZERO,
            index_flush_interval: Duration::ZERO,
            evict_threshold: 0.1,
            noop_access: None,
            pull_initial_state: None,
            flush_index_state: None,
            rule_storage: storage.clone(),
            role_storage: storage,
        }
    }

    #[test]
    fn zero_durations_fall_back_to_defaults() {
        let cfg = base_config().normalized().unwrap();
        assert_eq!(cfg.decay_interval, Duration::from_secs(5 * 60));
        assert_eq!(cfg.cleanup_interval, Duration::from_secs(30 * 60));
        assert_eq!(cfg.reindex_interval, Duration::from_secs(30 * 60));
        assert_eq!(cfg.index_flush_interval, Duration::from_secs(5 * 60));
    }

    #[test]
    fn zero_max_index_size_means_unlimited() {
        let mut cfg = base_config();
        cfg.max_index_size = 0;
        let cfg = cfg.normalized().unwrap();
        assert_eq!(cfg.max_index_size, -1);
    }

    #[test]
    fn invalid_decay_factor_is_a_configuration_fault() {
        let mut cfg = base_config();
        cfg.decay_factor = 0.0;
        assert!(cfg.normalized().is_err());
    }
}
