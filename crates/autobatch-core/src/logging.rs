//! Structured logging for autobatch
//!
//! This module provides the logging infrastructure for autobatch, using
//! `tracing` with configurable output formats and destinations.
//!
//! # Usage
//!
//! Initialize logging once at startup:
//!
//! ```ignore
//! use autobatch_core::logging::{init_logging, LogConfig};
//! use autobatch_core::config::LogFormat;
//!
//! let config = LogConfig {
//!     level: "info".to_string(),
//!     format: LogFormat::Pretty,
//!     file: None,
//! };
//! init_logging(&config)?;
//! ```
//!
//! # Correlation Fields
//!
//! Use these field names consistently in events:
//! - `scenario`: `<input_len>x<output_len>`
//! - `batch`: probed or best concurrency
//! - `previous`: displaced best concurrency
//! - `path`: file being tailed or written
//!
//! Targets are `autobatch.<component>` (`autobatch.tail`, `autobatch.store`, ...).

pub use crate::config::LogFormat;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Global flag to track if logging has been initialized
static LOGGING_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error)
    /// Can be overridden by RUST_LOG environment variable
    pub level: String,

    /// Output format (pretty or json)
    pub format: LogFormat,

    /// Optional path to log file
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

impl From<&crate::config::GeneralConfig> for LogConfig {
    fn from(general: &crate::config::GeneralConfig) -> Self {
        Self {
            level: general.log_level.clone(),
            format: general.log_format,
            file: general.log_file.clone(),
        }
    }
}

/// Error type for logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("failed to create log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

fn ensure_parent_dir(path: &std::path::Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Initialize the global logging subscriber
///
/// Call once at startup; later calls return `Err(LogError::AlreadyInitialized)`.
/// `RUST_LOG` overrides the configured level, e.g.
/// `RUST_LOG=autobatch.monitor=debug`.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }

    config
        .level
        .parse::<LogLevel>()
        .map_err(|_| LogError::InvalidLevel(config.level.clone()))?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_writer = if let Some(path) = &config.file {
        ensure_parent_dir(path)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Some(file)
    } else {
        None
    };

    match config.format {
        LogFormat::Pretty => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_span_events(FmtSpan::NONE)
                    .with_ansi(true),
            );

            if let Some(file) = file_writer {
                let file_layer = fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_target(true)
                    .with_ansi(false);
                tracing::subscriber::set_global_default(subscriber.with(file_layer))?;
            } else {
                tracing::subscriber::set_global_default(subscriber)?;
            }
        }
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .json()
                    .with_timer(SystemTime)
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(false)
                    .flatten_event(true),
            );

            if let Some(file) = file_writer {
                let file_layer = fmt::layer()
                    .json()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_timer(SystemTime)
                    .with_target(true)
                    .with_current_span(true)
                    .flatten_event(true);
                tracing::subscriber::set_global_default(subscriber.with(file_layer))?;
            } else {
                tracing::subscriber::set_global_default(subscriber)?;
            }
        }
    }

    let _ = LOGGING_INITIALIZED.set(true);

    tracing::debug!(
        target: "autobatch.logging",
        log_level = %config.level,
        log_format = %config.format,
        log_file = ?config.file,
        "Logging initialized"
    );

    Ok(())
}

/// Check if logging has been initialized
pub fn is_logging_initialized() -> bool {
    LOGGING_INITIALIZED.get().is_some()
}

/// Log levels that can be used for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!(
                "unknown log level: {s}. Expected one of: trace, debug, info, warn, error"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_levels_case_insensitively() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn log_config_follows_general_section() {
        let general = crate::config::GeneralConfig {
            log_level: "debug".to_string(),
            log_format: LogFormat::Json,
            log_file: Some(PathBuf::from("/tmp/autobatch.log")),
        };
        let config = LogConfig::from(&general);
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.file.is_some());
    }

    #[test]
    fn invalid_level_is_rejected_before_install() {
        let config = LogConfig {
            level: "loud".to_string(),
            ..LogConfig::default()
        };
        let err = init_logging(&config).unwrap_err();
        assert!(matches!(err, LogError::InvalidLevel(_)));
        assert!(!is_logging_initialized());
    }
}
