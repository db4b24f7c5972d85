//! Run statistics.
//!
//! Counters are advisory: they never influence control flow, and all of them
//! are plain atomics so the hot path pays one relaxed increment at most.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Duration of one pipeline stage.
#[derive(Debug, Clone)]
pub struct StageDuration {
    pub name: &'static str,
    pub duration: Duration,
}

/// Counters and stage durations of one run.
#[derive(Debug, Default)]
pub struct StatBag {
    /// Candidate combinations assessed.
    pub candidates: AtomicU64,
    /// Total point-space size over all assessed candidates.
    pub candidate_size: AtomicU64,
    /// Pairwise extrema scans, weighted by scanned pair count.
    pub lookups: AtomicU64,
    /// Children forked as parallel tasks.
    pub parallel_children: AtomicU64,
    /// Children run sequentially inside the parent task.
    pub sequential_children: AtomicU64,
    /// Decisive-positive combinations (accepted leaves).
    pub positive_decisions: AtomicU64,
    /// Decisive-negative combinations (discarded subtrees).
    pub negative_decisions: AtomicU64,
    /// Combinations resolved through bound discounting.
    pub discounted: AtomicU64,
    /// Cut combinations materialized by discounting.
    pub discount_cuts: AtomicU64,

    stages: Mutex<Vec<StageDuration>>,
}

impl StatBag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    /// Run `f` and record its wall-clock duration under `name`.
    pub fn stage<T>(&self, name: &'static str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        let duration = start.elapsed();
        log::info!("stage {name:?} took {duration:.2?}");
        self.stages.lock().push(StageDuration { name, duration });
        out
    }

    /// Recorded stage durations, in execution order.
    #[must_use]
    pub fn stage_durations(&self) -> Vec<StageDuration> {
        self.stages.lock().clone()
    }

    /// Mean point-space size of assessed candidates.
    #[must_use]
    pub fn avg_candidate_size(&self) -> f64 {
        let n = self.candidates.load(Ordering::Relaxed);
        if n == 0 {
            return 0.0;
        }
        self.candidate_size.load(Ordering::Relaxed) as f64 / n as f64
    }
}
