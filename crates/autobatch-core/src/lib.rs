//! autobatch-core: Core library for autobatch
//!
//! This crate finds, per (input length, output length) scenario, the largest
//! serving concurrency whose benchmark latencies stay under configured
//! ceilings. It either watches a benchmark harness' JSON-lines log passively
//! or drives the harness itself with a binary search.
//!
//! # Architecture
//!
//! ```text
//! results.jsonl → LogTailReader → ResultTracker (dedup + best) → BestStore
//!                                         ↓
//!                                   SignalChannel
//!
//! SearchLoop: command template → probe → LogTailReader → BestStore
//! ```
//!
//! # Modules
//!
//! - `record`: Benchmark summary record and its wire format
//! - `threshold`: Latency ceilings and the satisfaction predicate
//! - `tail`: Incremental, truncation-aware log reader
//! - `tracker`: Dedup window and per-scenario best tracking
//! - `store`: Durable best-records file with atomic rewrites
//! - `signal`: Confirmed-best notifier file
//! - `shutdown`: Cooperative cancellation handle
//! - `monitor`: Passive monitor loop
//! - `search`: Active binary-search loop
//! - `config`: Configuration management
//! - `logging`: Structured logging setup
//! - `error`: Error types and remediation hints
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod record;
pub mod search;
pub mod shutdown;
pub mod signal;
pub mod store;
pub mod tail;
pub mod threshold;
pub mod tracker;

pub use error::{Error, Result};

/// Version of the autobatch-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
