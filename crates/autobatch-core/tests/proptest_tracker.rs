//! Property-based tests for best tracking.
//!
//! Covers dedup idempotence, monotonic bests, threshold gating, and the
//! persisted store agreeing with the in-memory tracker.

use std::collections::BTreeMap;

use proptest::prelude::*;

use autobatch_core::record::{ScenarioKey, TestRecord};
use autobatch_core::store::BestStore;
use autobatch_core::threshold::{Metric, Threshold};
use autobatch_core::tracker::ResultTracker;

// =============================================================================
// Strategies
// =============================================================================

/// Small scenario space so records collide often.
fn arb_scenario() -> impl Strategy<Value = (u32, u32)> {
    (
        prop::sample::select(vec![128u32, 512, 1024]),
        prop::sample::select(vec![128u32, 256]),
    )
}

fn arb_opt_latency() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        2 => Just(None),
        8 => (0u32..400).prop_map(|v| Some(f64::from(v))),
    ]
}

fn arb_record() -> impl Strategy<Value = TestRecord> {
    (arb_scenario(), 1u32..=256, arb_opt_latency(), arb_opt_latency()).prop_map(
        |((input, output), concurrency, ttft, tpot)| {
            let mut record = TestRecord::new(input, output, concurrency);
            record.ttft_ms = ttft;
            record.tpot_ms = tpot;
            record
        },
    )
}

/// Records with distinct dedup keys, so every record is judged exactly once.
fn arb_distinct_records(max: usize) -> impl Strategy<Value = Vec<TestRecord>> {
    prop::collection::vec(arb_record(), 0..max).prop_map(|records| {
        let mut seen = std::collections::HashSet::new();
        records
            .into_iter()
            .filter(|r| seen.insert(r.dedup_key()))
            .collect()
    })
}

fn arb_threshold() -> impl Strategy<Value = Threshold> {
    (prop::option::of(1u32..300), prop::option::of(1u32..300)).prop_map(|(ttft, tpot)| {
        let mut threshold = Threshold::new();
        if let Some(ceiling) = ttft {
            threshold = threshold.with_ceiling(Metric::Ttft, f64::from(ceiling));
        }
        if let Some(ceiling) = tpot {
            threshold = threshold.with_ceiling(Metric::Tpot, f64::from(ceiling));
        }
        threshold
    })
}

/// Reference model: the highest satisfying concurrency per scenario.
fn expected_bests(records: &[TestRecord], threshold: &Threshold) -> BTreeMap<ScenarioKey, u32> {
    let mut best = BTreeMap::new();
    for record in records.iter().filter(|r| threshold.is_satisfied_by(r)) {
        let entry = best.entry(record.scenario()).or_insert(record.concurrency);
        *entry = (*entry).max(record.concurrency);
    }
    best
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn add_if_new_is_idempotent(records in prop::collection::vec(arb_record(), 1..60)) {
        let tracker = ResultTracker::new(10_000);
        for record in &records {
            tracker.add_if_new(record);
            prop_assert!(!tracker.add_if_new(record), "second insert of {:?} reported new", record.dedup_key());
        }
    }

    #[test]
    fn best_is_max_satisfying_concurrency(
        records in arb_distinct_records(80),
        threshold in arb_threshold(),
    ) {
        let tracker = ResultTracker::new(10_000);
        for record in &records {
            if tracker.add_if_new(record) {
                tracker.update_best(record, &threshold);
            }
        }

        let expected = expected_bests(&records, &threshold);
        let actual: BTreeMap<ScenarioKey, u32> = tracker
            .all_bests()
            .into_iter()
            .map(|r| (r.scenario(), r.concurrency))
            .collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn best_never_decreases(
        records in prop::collection::vec(arb_record(), 0..80),
        threshold in arb_threshold(),
    ) {
        let tracker = ResultTracker::new(10_000);
        let mut last: BTreeMap<ScenarioKey, u32> = BTreeMap::new();
        for record in &records {
            let update = tracker.update_best(record, &threshold);
            if let Some(previous) = &update.previous {
                prop_assert!(previous.concurrency < record.concurrency);
            }
            for best in tracker.all_bests() {
                let prior = last.insert(best.scenario(), best.concurrency);
                prop_assert!(prior.is_none_or(|p| p <= best.concurrency));
            }
        }
    }

    #[test]
    fn eviction_never_corrupts_bests(
        records in arb_distinct_records(80),
        threshold in arb_threshold(),
        cap in 1usize..8,
    ) {
        let tracker = ResultTracker::new(cap);
        for record in &records {
            if tracker.add_if_new(record) {
                tracker.update_best(record, &threshold);
            }
        }
        prop_assert!(tracker.stats().seen <= cap);

        let expected = expected_bests(&records, &threshold);
        let actual: BTreeMap<ScenarioKey, u32> = tracker
            .all_bests()
            .into_iter()
            .map(|r| (r.scenario(), r.concurrency))
            .collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn violating_records_never_become_best(record in arb_record(), threshold in arb_threshold()) {
        let tracker = ResultTracker::new(16);
        let update = tracker.update_best(&record, &threshold);
        prop_assert_eq!(update.updated, threshold.is_satisfied_by(&record));
        prop_assert_eq!(update.updated, threshold.violations(&record).is_empty());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn reopened_store_matches_model(
        first in prop::collection::vec(arb_record(), 0..20),
        second in prop::collection::vec(arb_record(), 0..20),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("best.jsonl");
        {
            let store = BestStore::open(&path).unwrap();
            for record in &first {
                store.put(record).unwrap();
            }
        }
        let store = BestStore::open(&path).unwrap();
        for record in &second {
            store.put(record).unwrap();
        }

        let everything: Vec<TestRecord> = first.iter().chain(&second).cloned().collect();
        let expected = expected_bests(&everything, &Threshold::new());
        let reopened = BestStore::open(&path).unwrap();
        let actual: BTreeMap<ScenarioKey, u32> = reopened
            .all()
            .into_iter()
            .map(|r| (r.scenario(), r.concurrency))
            .collect();
        prop_assert_eq!(actual, expected);
    }
}
