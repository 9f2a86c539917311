//! # Popularity Counter Module
//!
//! Generic keyed score tracker with exponential decay, threshold eviction,
//! and top-/bottom-N selection. Used by [`crate::service::Service`] to decide
//! which `(role, resource)` keys stay cache-resident.
//!
//! Supports both a synchronous (direct-call) and an asynchronous (unbounded
//! mailbox) increment path, mirroring the dual-mode counter in the lineage
//! this crate is built from: synchronous mode exists purely for
//! deterministic tests, asynchronous is the default for production use and
//! silently drops increments if the receiving task has gone away — the
//! counter is an approximation, no invariant depends on exact counts.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
struct CounterItem {
    score: f64,
    #[allow(dead_code)]
    added_at: Instant,
    last_scored_at: Instant,
    last_access_at: Instant,
}

pub struct PopularityCounter<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    index: RwLock<HashMap<K, CounterItem>>,
    decay_factor: f64,
    decay_interval: Duration,
    evict_threshold: f64,
    inc_tx: Option<mpsc::UnboundedSender<K>>,
}

impl<K> PopularityCounter<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(decay_factor: f64, decay_interval: Duration, evict_threshold: f64) -> Self {
        PopularityCounter {
            index: RwLock::new(HashMap::new()),
            decay_factor,
            decay_interval,
            evict_threshold,
            inc_tx: None,
        }
    }

    /// Switches this counter into asynchronous mailbox mode. The returned
    /// receiver must be drained by a background task (see
    /// [`crate::service::Service`]'s scheduler) via [`PopularityCounter::apply`].
    pub fn into_async(mut self) -> (Self, mpsc::UnboundedReceiver<K>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inc_tx = Some(tx);
        (self, rx)
    }

    /// Records an access to `key`. In synchronous mode this mutates the
    /// counter directly; in asynchronous mode it enqueues the key and
    /// returns immediately, dropping the increment if the mailbox is closed.
    pub fn inc(&self, key: K) {
        match &self.inc_tx {
            Some(tx) => {
                let _ = tx.send(key);
            }
            None => self.apply(key),
        }
    }

    /// Applies one increment directly — used both by synchronous `inc` and
    /// by the background task draining the asynchronous mailbox.
    pub fn apply(&self, key: K) {
        let now = Instant::now();
        let mut index = self.index.write();
        index
            .entry(key)
            .and_modify(|item| {
                item.score += 1.0;
                item.last_access_at = now;
                item.last_scored_at = now;
            })
            .or_insert(CounterItem {
                score: 1.0,
                added_at: now,
                last_scored_at: now,
                last_access_at: now,
            });
    }

    /// For every entry whose `last_access_at + decay_interval <= now`,
    /// multiplies its score by `decay_factor`.
    pub fn decay(&self) {
        let now = Instant::now();
        let mut index = self.index.write();
        for item in index.values_mut() {
            if now < item.last_access_at + self.decay_interval {
                continue;
            }
            item.score *= self.decay_factor;
            item.last_scored_at = now;
        }
    }

    /// Removes all entries with `score <= evict_threshold`; returns their keys.
    pub fn evict(&self) -> Vec<K> {
        let mut index = self.index.write();
        let doomed: Vec<K> = index
            .iter()
            .filter(|(_, item)| item.score <= self.evict_threshold)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &doomed {
            index.remove(k);
        }
        doomed
    }

    /// Removes every key for which `belongs_to(key)` is true.
    pub fn cleanup_keys(&self, belongs_to: impl Fn(&K) -> bool) {
        self.index.write().retain(|k, _| !belongs_to(k));
    }

    /// Up to `n` keys by descending score; `n < 0` means "all".
    pub fn top_n(&self, n: i64) -> Vec<K> {
        self.ranked(n, false)
    }

    /// Up to `n` keys by ascending score; `n < 0` means "all".
    pub fn bottom_n(&self, n: i64) -> Vec<K> {
        self.ranked(n, true)
    }

    fn ranked(&self, n: i64, ascending: bool) -> Vec<K> {
        let index = self.index.read();
        let mut items: Vec<(K, f64)> = index.iter().map(|(k, v)| (k.clone(), v.score)).collect();
        if ascending {
            items.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        } else {
            items.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        }

        let take = if n < 0 { items.len() } else { n as usize };
        items.into_iter().take(take).map(|(k, _)| k).collect()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }
}
