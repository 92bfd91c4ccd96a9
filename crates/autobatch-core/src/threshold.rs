//! Latency ceilings and the predicate that checks a record against them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::record::TestRecord;

/// A latency metric that can carry a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Time to first token
    Ttft,
    /// Time per output token
    Tpot,
    /// End-to-end request latency
    E2el,
}

impl Metric {
    pub const ALL: [Self; 3] = [Self::Ttft, Self::Tpot, Self::E2el];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ttft => "ttft",
            Self::Tpot => "tpot",
            Self::E2el => "e2el",
        }
    }

    /// The measured value of this metric, if the record carries it.
    #[must_use]
    pub fn measured(self, record: &TestRecord) -> Option<f64> {
        match self {
            Self::Ttft => record.ttft_ms,
            Self::Tpot => record.tpot_ms,
            Self::E2el => record.e2el_ms,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ttft" => Ok(Self::Ttft),
            "tpot" => Ok(Self::Tpot),
            "e2el" => Ok(Self::E2el),
            other => Err(format!(
                "unknown metric: {other}. Expected one of: ttft, tpot, e2el"
            )),
        }
    }
}

/// One exceeded ceiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Violation {
    pub metric: Metric,
    pub measured: f64,
    pub ceiling: f64,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={:.2}ms > {:.2}ms",
            self.metric, self.measured, self.ceiling
        )
    }
}

/// Per-metric latency ceilings.
///
/// A record satisfies the threshold iff every constrained metric that the
/// record actually carries is at or below its ceiling. Metrics the record
/// lacks never block, and metrics without a ceiling are unconstrained, so an
/// empty threshold accepts everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    ceilings: BTreeMap<Metric, f64>,
}

impl Threshold {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a compact `"ttft:100 tpot:50"` string.
    ///
    /// Malformed tokens are dropped with a warning; parsing never fails.
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        let mut threshold = Self::new();
        for token in spec.split_whitespace() {
            match parse_token(token) {
                Ok((metric, ceiling)) => {
                    threshold.ceilings.insert(metric, ceiling);
                }
                Err(reason) => {
                    warn!(target: "autobatch.threshold", token, %reason, "ignoring invalid threshold token");
                }
            }
        }
        threshold
    }

    #[must_use]
    pub fn with_ceiling(mut self, metric: Metric, ceiling: f64) -> Self {
        self.ceilings.insert(metric, ceiling);
        self
    }

    #[must_use]
    pub fn ceiling(&self, metric: Metric) -> Option<f64> {
        self.ceilings.get(&metric).copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ceilings.is_empty()
    }

    #[must_use]
    pub fn is_satisfied_by(&self, record: &TestRecord) -> bool {
        self.ceilings.iter().all(|(metric, ceiling)| {
            metric
                .measured(record)
                .is_none_or(|measured| measured <= *ceiling)
        })
    }

    /// Every ceiling the record exceeds, in metric order.
    #[must_use]
    pub fn violations(&self, record: &TestRecord) -> Vec<Violation> {
        self.ceilings
            .iter()
            .filter_map(|(metric, ceiling)| {
                let measured = metric.measured(record)?;
                (measured > *ceiling).then_some(Violation {
                    metric: *metric,
                    measured,
                    ceiling: *ceiling,
                })
            })
            .collect()
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ceilings.is_empty() {
            return f.write_str("(none)");
        }
        let mut first = true;
        for (metric, ceiling) in &self.ceilings {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            write!(f, "{metric}:{ceiling}")?;
        }
        Ok(())
    }
}

fn parse_token(token: &str) -> Result<(Metric, f64), String> {
    let (name, value) = token
        .split_once(':')
        .ok_or_else(|| "expected metric:ceiling".to_string())?;
    let metric = name.parse::<Metric>()?;
    let ceiling = value
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid ceiling {value:?}: {e}"))?;
    if !ceiling.is_finite() {
        return Err(format!("ceiling must be finite, got {value}"));
    }
    Ok((metric, ceiling))
}
