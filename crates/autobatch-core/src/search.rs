//! Active binary-search mode.
//!
//! Drives the benchmark harness directly: each probe runs the command
//! template with one concurrency value substituted, then reads the harness'
//! summary record from the log. The search looks for the rightmost batch that
//! still satisfies the threshold, assuming satisfaction only gets worse as
//! concurrency grows. Measurement noise can break that assumption and make
//! the search settle below the true optimum; probes are not retried.
//!
//! A probe that produces no record (command failed, harness wrote nothing)
//! counts as not satisfying, so the upper bound shrinks and the lower bound
//! never moves on an unknown outcome.

use std::process::Command;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::error::{ConfigError, Result};
use crate::record::TestRecord;
use crate::shutdown::Shutdown;
use crate::store::BestStore;
use crate::tail::LogTailReader;
use crate::threshold::Threshold;

/// Placeholder replaced by the probed batch size.
pub const BATCH_PLACEHOLDER: &str = "{batch}";

/// Maximum bytes of stderr quoted in a failed-probe log line.
const STDERR_EXCERPT: usize = 2048;

/// Benchmark command with a `{batch}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    template: String,
}

impl CommandTemplate {
    pub fn parse(template: &str) -> std::result::Result<Self, ConfigError> {
        if template.trim().is_empty() {
            return Err(ConfigError::MissingCommandTemplate);
        }
        if !template.contains(BATCH_PLACEHOLDER) {
            return Err(ConfigError::MissingPlaceholder {
                template: template.to_string(),
                placeholder: BATCH_PLACEHOLDER,
            });
        }
        Ok(Self {
            template: template.to_string(),
        })
    }

    /// Substitute every placeholder occurrence with `batch`.
    #[must_use]
    pub fn render(&self, batch: u32) -> String {
        self.template
            .replace(BATCH_PLACEHOLDER, &batch.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.template
    }
}

/// Whether a probe invocation ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Completed,
    Failed { reason: String },
}

/// Runs one benchmark probe at a given concurrency, blocking until it ends.
pub trait ProbeRunner {
    fn run(&mut self, batch: u32) -> ProbeStatus;
}

/// Probe runner that executes the template through the system shell.
///
/// No timeout is applied; bound the harness' runtime inside the command
/// itself (e.g. `timeout 600 bench.sh ...`).
#[derive(Debug, Clone)]
pub struct ShellProbe {
    template: CommandTemplate,
}

impl ShellProbe {
    #[must_use]
    pub fn new(template: CommandTemplate) -> Self {
        Self { template }
    }
}

impl ProbeRunner for ShellProbe {
    fn run(&mut self, batch: u32) -> ProbeStatus {
        let command = self.template.render(batch);
        info!(target: "autobatch.search", batch, command = %command, "running probe");

        let output = shell_command(&command).output();
        match output {
            Ok(output) if output.status.success() => ProbeStatus::Completed,
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let excerpt = tail_excerpt(stderr.trim_end(), STDERR_EXCERPT);
                warn!(
                    target: "autobatch.search",
                    batch,
                    status = %output.status,
                    stderr = %excerpt,
                    "probe command failed"
                );
                ProbeStatus::Failed {
                    reason: format!("exit status {}", output.status),
                }
            }
            Err(err) => {
                warn!(target: "autobatch.search", batch, error = %err, "probe command could not start");
                ProbeStatus::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

fn tail_excerpt(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// How one probe was judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeVerdict {
    Satisfied,
    Violated,
    NoResult,
}

/// One iteration of the search.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeRecord {
    pub batch: u32,
    pub lo: u32,
    pub hi: u32,
    pub verdict: ProbeVerdict,
    pub result: Option<TestRecord>,
}

/// Result of a search run.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    /// Largest satisfying record found
    pub best: Option<TestRecord>,
    pub probes: Vec<ProbeRecord>,
    /// Stopped early by a shutdown request
    pub interrupted: bool,
    pub min_batch: u32,
    pub max_batch: u32,
}

/// Binary search over concurrency, one external probe per step.
#[derive(Debug)]
pub struct SearchLoop<P> {
    reader: LogTailReader,
    store: BestStore,
    threshold: Threshold,
    config: SearchConfig,
    probe: P,
    shutdown: Shutdown,
}

impl<P: ProbeRunner> SearchLoop<P> {
    #[must_use]
    pub fn new(
        reader: LogTailReader,
        store: BestStore,
        threshold: Threshold,
        config: SearchConfig,
        probe: P,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            reader,
            store,
            threshold,
            config,
            probe,
            shutdown,
        }
    }

    #[must_use]
    pub fn store(&self) -> &BestStore {
        &self.store
    }

    /// Run the search to completion (or until shutdown between probes).
    pub fn run(&mut self) -> Result<SearchOutcome> {
        self.config.validate()?;
        let (min_batch, max_batch) = (self.config.min_batch, self.config.max_batch);
        info!(
            target: "autobatch.search",
            log = %self.reader.path().display(),
            output = %self.store.path().display(),
            threshold = %self.threshold,
            min_batch,
            max_batch,
            "binary search started"
        );

        let mut lo = u64::from(min_batch);
        let mut hi = u64::from(max_batch);
        let mut outcome = SearchOutcome {
            best: None,
            probes: Vec::new(),
            interrupted: false,
            min_batch,
            max_batch,
        };

        while lo <= hi {
            if self.shutdown.is_requested() {
                outcome.interrupted = true;
                info!(target: "autobatch.search", "search interrupted between probes");
                break;
            }

            let mid = lo + (hi - lo) / 2;
            let batch = u32::try_from(mid).unwrap_or(u32::MAX);
            info!(
                target: "autobatch.search",
                iteration = outcome.probes.len() + 1,
                batch,
                lo,
                hi,
                "probing batch"
            );

            self.reader.reset();
            let status = self.probe.run(batch);
            if let ProbeStatus::Failed { reason } = &status {
                warn!(target: "autobatch.search", batch, %reason, "probe produced no usable run");
            }
            self.shutdown.sleep(self.config.settle_delay());
            let result = self.latest_result(batch);

            let verdict = match &result {
                None => {
                    warn!(target: "autobatch.search", batch, "no result found for probe");
                    hi = mid - 1;
                    ProbeVerdict::NoResult
                }
                Some(record) if self.threshold.is_satisfied_by(record) => {
                    info!(
                        target: "autobatch.search",
                        batch,
                        ttft_ms = ?record.ttft_ms,
                        tpot_ms = ?record.tpot_ms,
                        e2el_ms = ?record.e2el_ms,
                        "threshold satisfied, trying larger batch"
                    );
                    if let Err(err) = self.store.put(record) {
                        warn!(target: "autobatch.search", error = %err, "failed to persist best record");
                    }
                    outcome.best = Some(record.clone());
                    lo = mid + 1;
                    ProbeVerdict::Satisfied
                }
                Some(record) => {
                    let violations: Vec<String> = self
                        .threshold
                        .violations(record)
                        .iter()
                        .map(ToString::to_string)
                        .collect();
                    info!(
                        target: "autobatch.search",
                        batch,
                        violations = %violations.join(", "),
                        "threshold violated, trying smaller batch"
                    );
                    hi = mid - 1;
                    ProbeVerdict::Violated
                }
            };

            outcome.probes.push(ProbeRecord {
                batch,
                lo: u32::try_from(lo.min(u64::from(u32::MAX))).unwrap_or(u32::MAX),
                hi: u32::try_from(hi).unwrap_or(u32::MAX),
                verdict,
                result,
            });
        }

        match &outcome.best {
            Some(best) => info!(
                target: "autobatch.search",
                scenario = %best.scenario(),
                batch = best.concurrency,
                probes = outcome.probes.len(),
                "binary search finished"
            ),
            None => warn!(
                target: "autobatch.search",
                probes = outcome.probes.len(),
                "binary search finished without a satisfying batch"
            ),
        }
        Ok(outcome)
    }

    /// The last record in the log for `batch`.
    ///
    /// The reader is rewound before each probe, so earlier probes' summaries
    /// are read again; only a record at the probed concurrency counts. A
    /// harness that reports a clamped or otherwise adjusted concurrency
    /// therefore yields no result for that probe, which narrows the search
    /// downward.
    fn latest_result(&mut self, batch: u32) -> Option<TestRecord> {
        match self.reader.read_new() {
            Ok(records) => {
                let total = records.len();
                let found = records.into_iter().rev().find(|r| r.concurrency == batch);
                if found.is_none() && total > 0 {
                    debug!(
                        target: "autobatch.search",
                        batch,
                        stale = total,
                        "log holds only records from other probes"
                    );
                }
                found
            }
            Err(err) => {
                warn!(
                    target: "autobatch.search",
                    path = %self.reader.path().display(),
                    error = %err,
                    "failed to read probe result"
                );
                None
            }
        }
    }
}
