//! Dedup window and per-scenario best tracking.
//!
//! The dedup window remembers which `(input_len, output_len, concurrency)`
//! probes were already processed. It is capped; on overflow the oldest half
//! (by insertion order) is evicted. Eviction only means an old probe may be
//! re-evaluated if the harness logs it again, which is harmless: re-offering
//! a record whose concurrency does not beat the current best is a no-op.
//!
//! Both structures live behind one mutex so eviction and best replacement
//! always see the same snapshot.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;

use serde::Serialize;
use tracing::info;

use crate::record::{DedupKey, ScenarioKey, TestRecord};
use crate::threshold::Threshold;

/// Outcome of [`ResultTracker::update_best`].
#[derive(Debug, Clone, PartialEq)]
pub struct BestUpdate {
    /// Whether the record became the scenario's best
    pub updated: bool,
    /// The best it displaced, if any
    pub previous: Option<TestRecord>,
}

impl BestUpdate {
    fn unchanged() -> Self {
        Self {
            updated: false,
            previous: None,
        }
    }
}

/// Aggregate counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    /// Keys currently in the dedup window
    pub seen: usize,
    /// Scenarios with a best record
    pub bests: usize,
    /// Keys evicted from the window so far
    pub evicted: u64,
}

#[derive(Debug, Default)]
struct TrackerState {
    seen: HashSet<DedupKey>,
    order: VecDeque<DedupKey>,
    best: BTreeMap<ScenarioKey, TestRecord>,
    evicted: u64,
}

impl TrackerState {
    fn evict_oldest_half(&mut self) {
        let drop_count = self.order.len().div_ceil(2);
        for key in self.order.drain(..drop_count) {
            self.seen.remove(&key);
        }
        self.evicted += drop_count as u64;
    }
}

/// Thread-safe dedup set plus per-scenario best map.
#[derive(Debug)]
pub struct ResultTracker {
    max_seen: usize,
    state: Mutex<TrackerState>,
}

impl Default for ResultTracker {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl ResultTracker {
    /// Tracker whose dedup window holds at most `max_seen` keys (minimum 1).
    #[must_use]
    pub fn new(max_seen: usize) -> Self {
        Self {
            max_seen: max_seen.max(1),
            state: Mutex::new(TrackerState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        // Every critical section leaves the state consistent, so a poisoned
        // lock is still safe to reuse.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Mark the record's key as seen; true iff it was not already in the window.
    pub fn add_if_new(&self, record: &TestRecord) -> bool {
        let key = record.dedup_key();
        let mut state = self.lock();
        if !state.seen.insert(key) {
            return false;
        }
        state.order.push_back(key);
        if state.seen.len() > self.max_seen {
            state.evict_oldest_half();
            info!(
                target: "autobatch.tracker",
                remaining = state.seen.len(),
                evicted_total = state.evicted,
                "dedup window full, evicted oldest half"
            );
        }
        true
    }

    /// Make `record` the scenario's best if it satisfies `threshold` and beats
    /// the current best's concurrency.
    pub fn update_best(&self, record: &TestRecord, threshold: &Threshold) -> BestUpdate {
        if !threshold.is_satisfied_by(record) {
            return BestUpdate::unchanged();
        }
        let mut state = self.lock();
        let scenario = record.scenario();
        let beats = state
            .best
            .get(&scenario)
            .is_none_or(|current| record.concurrency > current.concurrency);
        if !beats {
            return BestUpdate::unchanged();
        }
        let previous = state.best.insert(scenario, record.clone());
        BestUpdate {
            updated: true,
            previous,
        }
    }

    #[must_use]
    pub fn best_for(&self, scenario: ScenarioKey) -> Option<TestRecord> {
        self.lock().best.get(&scenario).cloned()
    }

    /// All bests ordered by scenario.
    #[must_use]
    pub fn all_bests(&self) -> Vec<TestRecord> {
        self.lock().best.values().cloned().collect()
    }

    /// Drop a scenario's best so a lower concurrency can be accepted again.
    pub fn reset_scenario(&self, scenario: ScenarioKey) -> Option<TestRecord> {
        self.lock().best.remove(&scenario)
    }

    /// Forget everything.
    pub fn clear(&self) {
        *self.lock() = TrackerState::default();
    }

    #[must_use]
    pub fn stats(&self) -> TrackerStats {
        let state = self.lock();
        TrackerStats {
            seen: state.seen.len(),
            bests: state.best.len(),
            evicted: state.evicted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn rec(concurrency: u32, ttft: f64) -> TestRecord {
        TestRecord::new(128, 128, concurrency).with_ttft(ttft)
    }

    #[test]
    fn duplicate_is_reported_once() {
        let tracker = ResultTracker::new(100);
        assert!(tracker.add_if_new(&rec(8, 50.0)));
        assert!(!tracker.add_if_new(&rec(8, 50.0)));
        // Same key, different measurements: still a duplicate.
        assert!(!tracker.add_if_new(&rec(8, 75.0)));
        assert_eq!(tracker.stats().seen, 1);
    }

    #[test]
    fn best_only_moves_up() {
        let tracker = ResultTracker::new(100);
        let threshold = Threshold::parse("ttft:100");

        let first = tracker.update_best(&rec(16, 50.0), &threshold);
        assert!(first.updated);
        assert!(first.previous.is_none());

        assert!(!tracker.update_best(&rec(8, 10.0), &threshold).updated);
        assert!(!tracker.update_best(&rec(16, 10.0), &threshold).updated);

        let bigger = tracker.update_best(&rec(32, 90.0), &threshold);
        assert!(bigger.updated);
        assert_eq!(bigger.previous.unwrap().concurrency, 16);
        assert_eq!(
            tracker.best_for(ScenarioKey::new(128, 128)).unwrap().concurrency,
            32
        );
    }

    #[test]
    fn failing_record_never_becomes_best() {
        let tracker = ResultTracker::new(100);
        let threshold = Threshold::parse("ttft:100");
        assert!(!tracker.update_best(&rec(64, 150.0), &threshold).updated);
        assert!(tracker.best_for(ScenarioKey::new(128, 128)).is_none());
        assert!(tracker.update_best(&rec(4, 90.0), &threshold).updated);
    }

    #[test]
    fn scenarios_are_independent() {
        let tracker = ResultTracker::new(100);
        let threshold = Threshold::new();
        tracker.update_best(&TestRecord::new(128, 128, 64), &threshold);
        tracker.update_best(&TestRecord::new(1024, 128, 8), &threshold);
        let bests = tracker.all_bests();
        assert_eq!(bests.len(), 2);
        assert_eq!(bests[0].concurrency, 64);
        assert_eq!(bests[1].concurrency, 8);
    }

    #[test]
    fn overflow_evicts_oldest_half() {
        let tracker = ResultTracker::new(4);
        for c in 1..=5 {
            assert!(tracker.add_if_new(&TestRecord::new(1, 1, c)));
        }
        let stats = tracker.stats();
        assert_eq!(stats.seen, 2);
        assert_eq!(stats.evicted, 3);
        // Oldest keys are gone, newest remain.
        assert!(tracker.add_if_new(&TestRecord::new(1, 1, 1)));
        assert!(!tracker.add_if_new(&TestRecord::new(1, 1, 5)));
    }

    #[test]
    fn eviction_does_not_disturb_best() {
        let tracker = ResultTracker::new(2);
        let threshold = Threshold::new();
        for c in [8, 16, 4, 2, 1] {
            tracker.add_if_new(&TestRecord::new(1, 1, c));
            tracker.update_best(&TestRecord::new(1, 1, c), &threshold);
        }
        // Re-inserting an evicted key is new to the window but not to the best map.
        assert!(tracker.add_if_new(&TestRecord::new(1, 1, 8)));
        assert!(!tracker.update_best(&TestRecord::new(1, 1, 8), &threshold).updated);
        assert_eq!(tracker.best_for(ScenarioKey::new(1, 1)).unwrap().concurrency, 16);
    }

    #[test]
    fn reset_allows_lower_best() {
        let tracker = ResultTracker::new(10);
        let threshold = Threshold::new();
        tracker.update_best(&TestRecord::new(1, 1, 32), &threshold);
        let removed = tracker.reset_scenario(ScenarioKey::new(1, 1)).unwrap();
        assert_eq!(removed.concurrency, 32);
        assert!(tracker.update_best(&TestRecord::new(1, 1, 4), &threshold).updated);
    }

    #[test]
    fn concurrent_add_if_new_admits_each_key_once() {
        let tracker = Arc::new(ResultTracker::new(10_000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    (1..=200)
                        .filter(|&c| tracker.add_if_new(&TestRecord::new(1, 1, c)))
                        .count()
                })
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 200);
    }
}
