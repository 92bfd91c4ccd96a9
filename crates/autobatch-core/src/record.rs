//! Benchmark data points decoded from the harness log.
//!
//! Every line the benchmark harness appends is one JSON object describing a
//! single probe: the scenario (`input_len`, `output_len`), the probed
//! `concurrency`, and the mean latency metrics it measured. Lines are decoded
//! strictly into [`TestRecord`] once, at the tail boundary; nothing downstream
//! ever sees raw key/value maps.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RecordError;

/// A fixed (input length, output length) pair under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScenarioKey {
    pub input_len: u32,
    pub output_len: u32,
}

impl ScenarioKey {
    #[must_use]
    pub fn new(input_len: u32, output_len: u32) -> Self {
        Self {
            input_len,
            output_len,
        }
    }
}

impl fmt::Display for ScenarioKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.input_len, self.output_len)
    }
}

/// Identity of one probe: scenario plus concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub scenario: ScenarioKey,
    pub concurrency: u32,
}

/// One measured data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub input_len: u32,
    pub output_len: u32,
    pub concurrency: u32,
    /// Mean time to first token (ms)
    #[serde(
        rename = "mean_ttft_ms",
        alias = "ttft_ms",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ttft_ms: Option<f64>,
    /// Mean time per output token (ms)
    #[serde(
        rename = "mean_tpot_ms",
        alias = "tpot_ms",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tpot_ms: Option<f64>,
    /// Mean end-to-end request latency (ms)
    #[serde(
        rename = "mean_e2el_ms",
        alias = "e2el_ms",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub e2el_ms: Option<f64>,
}

impl TestRecord {
    /// Record with no latency measurements attached.
    #[must_use]
    pub fn new(input_len: u32, output_len: u32, concurrency: u32) -> Self {
        Self {
            input_len,
            output_len,
            concurrency,
            ttft_ms: None,
            tpot_ms: None,
            e2el_ms: None,
        }
    }

    #[must_use]
    pub fn with_ttft(mut self, ms: f64) -> Self {
        self.ttft_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_tpot(mut self, ms: f64) -> Self {
        self.tpot_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_e2el(mut self, ms: f64) -> Self {
        self.e2el_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn scenario(&self) -> ScenarioKey {
        ScenarioKey::new(self.input_len, self.output_len)
    }

    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            scenario: self.scenario(),
            concurrency: self.concurrency,
        }
    }

    /// Decode one log line.
    ///
    /// The line must be a single JSON object carrying non-negative integer
    /// `input_len`, `output_len` and `concurrency`. Latency fields are
    /// optional; any other keys the harness emits are ignored.
    pub fn decode_line(line: &str) -> Result<Self, RecordError> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return Err(RecordError::Malformed("not a JSON object".to_string()));
        }
        serde_json::from_str(trimmed).map_err(|e| RecordError::Malformed(e.to_string()))
    }

    /// Encode as one compact JSON line (without the trailing newline).
    pub fn encode_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
