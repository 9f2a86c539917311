//! # Stats Recorder Module
//!
//! Async-capable counters and bounded-history ring buffers for cache hits,
//! misses, updates and timing samples.
//!
//! Like [`crate::popularity::PopularityCounter`], recording can happen
//! synchronously (direct call, for deterministic tests) or asynchronously
//! (an unbounded mailbox drained by a background task) — both delivery
//! modes are best-effort; an async recording lost to a closed mailbox is
//! never an error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::circular::CircularBuffer;
use crate::rule::Rule;

const HISTORY_CAPACITY: usize = 10_000;

enum StatEvent {
    Hit { roles: Vec<u64>, op: String, res: String },
    Miss { roles: Vec<u64>, op: String, res: String },
    Update,
    Timing(Duration),
}

#[derive(Debug, Clone, Default)]
struct TimingStats {
    min: Option<Duration>,
    max: Option<Duration>,
    avg: Option<Duration>,
}

impl TimingStats {
    fn record(&mut self, d: Duration) {
        self.min = Some(self.min.map_or(d, |m| m.min(d)));
        self.max = Some(self.max.map_or(d, |m| m.max(d)));
        // EMA with alpha=1/2 — deliberately biased to recent samples, not a
        // true mean. External tests may depend on this exact formula.
        self.avg = Some(match self.avg {
            None => d,
            Some(avg) => (avg + d) / 2,
        });
    }
}

/// Point-in-time read of all counters and buffer contents.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_updates: u64,
    pub min_timing: Option<Duration>,
    pub avg_timing: Option<Duration>,
    pub max_timing: Option<Duration>,
    pub recent_hits: Vec<String>,
    pub recent_misses: Vec<String>,
}

pub struct StatsRecorder {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_updates: AtomicU64,
    timings: RwLock<TimingStats>,
    hit_log: RwLock<CircularBuffer<String>>,
    miss_log: RwLock<CircularBuffer<String>>,
    tx: Option<mpsc::UnboundedSender<StatEvent>>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        StatsRecorder {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_updates: AtomicU64::new(0),
            timings: RwLock::new(TimingStats::default()),
            hit_log: RwLock::new(CircularBuffer::new(HISTORY_CAPACITY)),
            miss_log: RwLock::new(CircularBuffer::new(HISTORY_CAPACITY)),
            tx: None,
        }
    }

    /// Builds a recorder in asynchronous mailbox mode and spawns the task
    /// that drains it. `record_*` calls return immediately; the drain task
    /// applies them in arrival order.
    pub fn new_async() -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(StatsRecorder {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_updates: AtomicU64::new(0),
            timings: RwLock::new(TimingStats::default()),
            hit_log: RwLock::new(CircularBuffer::new(HISTORY_CAPACITY)),
            miss_log: RwLock::new(CircularBuffer::new(HISTORY_CAPACITY)),
            tx: Some(tx),
        });

        let worker = Arc::clone(&recorder);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                worker.apply(event);
            }
        });

        recorder
    }

    fn record(&self, event: StatEvent) {
        match &self.tx {
            Some(tx) => {
                let _ = tx.send(event);
            }
            None => self.apply(event),
        }
    }

    fn apply(&self, event: StatEvent) {
        match event {
            StatEvent::Hit { roles, op, res } => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                self.hit_log.write().add(format_entry(&roles, &op, &res));
            }
            StatEvent::Miss { roles, op, res } => {
                self.cache_misses.fetch_add(1, Ordering::Relaxed);
                self.miss_log.write().add(format_entry(&roles, &op, &res));
            }
            StatEvent::Update => {
                self.cache_updates.fetch_add(1, Ordering::Relaxed);
            }
            StatEvent::Timing(d) => {
                self.timings.write().record(d);
            }
        }
    }

    pub fn record_hit(&self, roles: &[u64], op: &str, res: &str) {
        self.record(StatEvent::Hit {
            roles: roles.to_vec(),
            op: op.to_string(),
            res: res.to_string(),
        });
    }

    pub fn record_miss(&self, roles: &[u64], op: &str, res: &str) {
        self.record(StatEvent::Miss {
            roles: roles.to_vec(),
            op: op.to_string(),
            res: res.to_string(),
        });
    }

    pub fn record_update(&self, _rule: &Rule) {
        self.record(StatEvent::Update);
    }

    pub fn record_timing(&self, d: Duration) {
        self.record(StatEvent::Timing(d));
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let timings = self.timings.read().clone();
        StatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_updates: self.cache_updates.load(Ordering::Relaxed),
            min_timing: timings.min,
            avg_timing: timings.avg,
            max_timing: timings.max,
            recent_hits: self.hit_log.read().slice(),
            recent_misses: self.miss_log.read().slice(),
        }
    }
}

impl Default for StatsRecorder {
    fn default() -> Self {
        StatsRecorder::new()
    }
}

fn format_entry(roles: &[u64], op: &str, res: &str) -> String {
    let mut sorted = roles.to_vec();
    sorted.sort_unstable();
    format!("{:?} {} {}", sorted, op, res)
}
