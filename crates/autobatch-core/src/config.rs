//! Configuration management for autobatch
//!
//! Handles loading and validation of `autobatch.toml` files. Every section
//! and key is optional; CLI flags layer on top of whatever the file sets.
//! Durations are expressed in milliseconds.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Monitor mode settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Binary search mode settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Waiting for the benchmark log to appear
    #[serde(default)]
    pub tail: WaitPolicy,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected pretty or json")),
        }
    }
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Optional log file (appended)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Monitor mode configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// Dedup window cap; the oldest half is evicted on overflow
    #[serde(default = "default_max_seen_size")]
    pub max_seen_size: usize,

    /// Where confirmed bests are announced
    #[serde(default = "default_signal_file")]
    pub signal_file: PathBuf,

    /// Sleep after a cycle that processed records
    #[serde(default = "default_active_delay_ms")]
    pub active_delay_ms: u64,

    /// Base sleep after an empty cycle
    #[serde(default = "default_idle_base_ms")]
    pub idle_base_ms: u64,

    /// Extra sleep per consecutive empty cycle
    #[serde(default = "default_idle_step_ms")]
    pub idle_step_ms: u64,

    /// Upper bound for the idle sleep
    #[serde(default = "default_idle_max_ms")]
    pub idle_max_ms: u64,

    /// Log aggregate counts every N poll cycles (0 disables)
    #[serde(default = "default_stats_every")]
    pub stats_every: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_seen_size: default_max_seen_size(),
            signal_file: default_signal_file(),
            active_delay_ms: default_active_delay_ms(),
            idle_base_ms: default_idle_base_ms(),
            idle_step_ms: default_idle_step_ms(),
            idle_max_ms: default_idle_max_ms(),
            stats_every: default_stats_every(),
        }
    }
}

impl MonitorConfig {
    #[must_use]
    pub fn active_delay(&self) -> Duration {
        Duration::from_millis(self.active_delay_ms)
    }

    /// Sleep before the next poll after `empty_cycles` consecutive empty cycles.
    #[must_use]
    pub fn idle_delay(&self, empty_cycles: u64) -> Duration {
        let ms = self
            .idle_base_ms
            .saturating_add(self.idle_step_ms.saturating_mul(empty_cycles))
            .min(self.idle_max_ms);
        Duration::from_millis(ms)
    }
}

fn default_max_seen_size() -> usize {
    10_000
}

fn default_signal_file() -> PathBuf {
    PathBuf::from("best_signal.json")
}

fn default_active_delay_ms() -> u64 {
    1_000
}

fn default_idle_base_ms() -> u64 {
    2_000
}

fn default_idle_step_ms() -> u64 {
    1_000
}

fn default_idle_max_ms() -> u64 {
    10_000
}

fn default_stats_every() -> u64 {
    10
}

/// Binary search configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    /// Smallest batch size probed
    #[serde(default = "default_min_batch")]
    pub min_batch: u32,

    /// Largest batch size probed
    #[serde(default = "default_max_batch")]
    pub max_batch: u32,

    /// Wait after each probe before reading its result
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_batch: default_min_batch(),
            max_batch: default_max_batch(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl SearchConfig {
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Bounds must be positive and ordered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_batch == 0 || self.min_batch > self.max_batch {
            return Err(ConfigError::InvalidBounds {
                min: self.min_batch,
                max: self.max_batch,
            });
        }
        Ok(())
    }
}

fn default_min_batch() -> u32 {
    1
}

fn default_max_batch() -> u32 {
    128
}

fn default_settle_delay_ms() -> u64 {
    1_000
}

/// Polling policy while waiting for a file to appear
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WaitPolicy {
    /// First poll interval
    #[serde(default = "default_wait_initial_ms")]
    pub initial_delay_ms: u64,

    /// Poll interval ceiling
    #[serde(default = "default_wait_max_ms")]
    pub max_delay_ms: u64,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_wait_initial_ms(),
            max_delay_ms: default_wait_max_ms(),
        }
    }
}

impl WaitPolicy {
    /// Delay before poll number `attempt` (0-indexed), doubling up to the cap.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.min(31);
        let ms = self
            .initial_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms.max(self.initial_delay_ms));
        Duration::from_millis(ms)
    }
}

fn default_wait_initial_ms() -> u64 {
    500
}

fn default_wait_max_ms() -> u64 {
    5_000
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::ParseFailed(e.to_string()))
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;
        Self::from_toml_str(&text)
    }
}
