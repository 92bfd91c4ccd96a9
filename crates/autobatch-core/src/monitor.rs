//! Passive monitor mode.
//!
//! Watches the benchmark log while an external sweep runs, keeps the best
//! satisfying batch per scenario, persists each new best, and announces a
//! best as confirmed once a larger batch for the same scenario is observed
//! to miss the threshold.
//!
//! ```text
//! log ─► LogTailReader ─► ResultTracker ─┬─► BestStore      (new best)
//!                          (dedup, best)  └─► SignalChannel  (larger batch regressed)
//! ```
//!
//! Confirmation assumes the sweep probes batches in increasing order. An
//! out-of-order sweep can confirm a best that a later, larger probe beats.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::record::TestRecord;
use crate::shutdown::Shutdown;
use crate::signal::SignalChannel;
use crate::store::BestStore;
use crate::tail::{LogTailReader, TailStats};
use crate::threshold::Threshold;
use crate::tracker::{ResultTracker, TrackerStats};

/// Lifecycle of a [`MonitorLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Running,
    Stopped,
}

/// What happened to one record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// Already seen in the dedup window
    Duplicate,
    /// Became the scenario's best
    NewBest { previous: Option<TestRecord> },
    /// Did not become best. `confirmed` carries the current best when this
    /// record's larger batch confirms it as final.
    Rejected { confirmed: Option<TestRecord> },
}

/// Per-cycle counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub processed: usize,
    pub new_bests: usize,
    pub confirmations: usize,
}

/// Sleep policy between poll cycles.
///
/// A cycle that processed records is followed by the fixed active delay and
/// resets the idle streak; each consecutive empty cycle lengthens the idle
/// delay up to its cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollBackoff {
    empty_cycles: u64,
}

impl PollBackoff {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consecutive empty cycles so far.
    #[must_use]
    pub fn empty_cycles(&self) -> u64 {
        self.empty_cycles
    }

    pub fn next_delay(&mut self, report: &CycleReport, config: &MonitorConfig) -> Duration {
        if report.processed > 0 {
            self.empty_cycles = 0;
            config.active_delay()
        } else {
            self.empty_cycles = self.empty_cycles.saturating_add(1);
            config.idle_delay(self.empty_cycles)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorCounters {
    pub records_read: u64,
    pub duplicates: u64,
    pub new_bests: u64,
    pub rejected: u64,
    pub confirmations: u64,
    pub cycles: u64,
}

/// Final report produced when the loop stops.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSummary {
    pub counters: MonitorCounters,
    pub tail: TailStats,
    pub tracker: TrackerStats,
    /// Best per scenario seen during this run
    pub bests: Vec<TestRecord>,
    pub output: PathBuf,
    pub signal_file: PathBuf,
}

/// Monitor context: owns every piece of mutable state the loop touches.
#[derive(Debug)]
pub struct MonitorLoop {
    reader: LogTailReader,
    tracker: ResultTracker,
    store: BestStore,
    signal: SignalChannel,
    threshold: Threshold,
    config: MonitorConfig,
    shutdown: Shutdown,
    state: MonitorState,
    counters: MonitorCounters,
}

impl MonitorLoop {
    #[must_use]
    pub fn new(
        reader: LogTailReader,
        store: BestStore,
        signal: SignalChannel,
        threshold: Threshold,
        config: MonitorConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            reader,
            tracker: ResultTracker::new(config.max_seen_size),
            store,
            signal,
            threshold,
            config,
            shutdown,
            state: MonitorState::Stopped,
            counters: MonitorCounters::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> MonitorState {
        self.state
    }

    #[must_use]
    pub fn tracker(&self) -> &ResultTracker {
        &self.tracker
    }

    #[must_use]
    pub fn store(&self) -> &BestStore {
        &self.store
    }

    #[must_use]
    pub fn counters(&self) -> MonitorCounters {
        self.counters
    }

    /// Poll until shutdown is requested, then return the final summary.
    pub fn run(&mut self) -> Result<MonitorSummary> {
        self.state = MonitorState::Running;
        info!(
            target: "autobatch.monitor",
            log = %self.reader.path().display(),
            output = %self.store.path().display(),
            signal = %self.signal.path().display(),
            threshold = %self.threshold,
            "monitor started"
        );

        let mut backoff = PollBackoff::new();
        while !self.shutdown.is_requested() {
            let report = self.poll_once();
            let delay = backoff.next_delay(&report, &self.config);

            if self.config.stats_every > 0 && self.counters.cycles % self.config.stats_every == 0
            {
                self.log_stats();
            }

            if !self.shutdown.sleep(delay) {
                break;
            }
        }

        self.state = MonitorState::Stopped;
        let summary = self.summary();
        info!(
            target: "autobatch.monitor",
            records = summary.counters.records_read,
            scenarios = summary.bests.len(),
            "monitor stopped"
        );
        for best in &summary.bests {
            info!(
                target: "autobatch.monitor",
                scenario = %best.scenario(),
                batch = best.concurrency,
                "final best"
            );
        }
        Ok(summary)
    }

    /// Drain and process everything currently in the log.
    pub fn poll_once(&mut self) -> CycleReport {
        self.counters.cycles += 1;
        let records = match self.reader.read_new() {
            Ok(records) => records,
            Err(err) => {
                warn!(
                    target: "autobatch.monitor",
                    path = %self.reader.path().display(),
                    error = %err,
                    "log read failed, retrying next cycle"
                );
                return CycleReport::default();
            }
        };

        let mut report = CycleReport::default();
        for record in &records {
            report.processed += 1;
            match self.process(record) {
                RecordOutcome::NewBest { .. } => report.new_bests += 1,
                RecordOutcome::Rejected {
                    confirmed: Some(_),
                } => report.confirmations += 1,
                _ => {}
            }
        }
        report
    }

    /// Apply one record to the tracker, store, and signal channel.
    pub fn process(&mut self, record: &TestRecord) -> RecordOutcome {
        self.counters.records_read += 1;
        let scenario = record.scenario();

        if !self.tracker.add_if_new(record) {
            self.counters.duplicates += 1;
            debug!(
                target: "autobatch.monitor",
                scenario = %scenario,
                batch = record.concurrency,
                "duplicate record"
            );
            return RecordOutcome::Duplicate;
        }

        let update = self.tracker.update_best(record, &self.threshold);
        if update.updated {
            self.counters.new_bests += 1;
            if let Err(err) = self.store.put(record) {
                warn!(
                    target: "autobatch.monitor",
                    scenario = %scenario,
                    error = %err,
                    "failed to persist best record"
                );
            }
            info!(
                target: "autobatch.monitor",
                scenario = %scenario,
                batch = record.concurrency,
                previous = ?update.previous.as_ref().map(|p| p.concurrency),
                "batch satisfies threshold"
            );
            return RecordOutcome::NewBest {
                previous: update.previous,
            };
        }

        self.counters.rejected += 1;
        let Some(best) = self.tracker.best_for(scenario) else {
            info!(
                target: "autobatch.monitor",
                scenario = %scenario,
                batch = record.concurrency,
                violations = %self.describe_violations(record),
                "batch rejected, no satisfying batch yet"
            );
            return RecordOutcome::Rejected { confirmed: None };
        };

        info!(
            target: "autobatch.monitor",
            scenario = %scenario,
            batch = record.concurrency,
            best = best.concurrency,
            violations = %self.describe_violations(record),
            "batch rejected, keeping best"
        );

        if best.concurrency >= record.concurrency {
            return RecordOutcome::Rejected { confirmed: None };
        }

        self.counters.confirmations += 1;
        info!(
            target: "autobatch.monitor",
            scenario = %scenario,
            batch = best.concurrency,
            regressed = record.concurrency,
            "best batch confirmed"
        );
        if let Err(err) = self.signal.announce(&best) {
            warn!(
                target: "autobatch.monitor",
                scenario = %scenario,
                error = %err,
                "failed to write signal file"
            );
        }
        RecordOutcome::Rejected {
            confirmed: Some(best),
        }
    }

    fn describe_violations(&self, record: &TestRecord) -> String {
        let violations = self.threshold.violations(record);
        if violations.is_empty() {
            return "none".to_string();
        }
        violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn log_stats(&self) {
        let stats = self.tracker.stats();
        info!(
            target: "autobatch.monitor",
            cycles = self.counters.cycles,
            records = self.counters.records_read,
            seen = stats.seen,
            bests = stats.bests,
            confirmations = self.counters.confirmations,
            "monitor stats"
        );
    }

    #[must_use]
    pub fn summary(&self) -> MonitorSummary {
        MonitorSummary {
            counters: self.counters,
            tail: self.reader.stats(),
            tracker: self.tracker.stats(),
            bests: self.tracker.all_bests(),
            output: self.store.path().to_path_buf(),
            signal_file: self.signal.path().to_path_buf(),
        }
    }
}
