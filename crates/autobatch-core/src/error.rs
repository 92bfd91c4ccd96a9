//! Error types for autobatch-core

use std::fmt::Write;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a suggested command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for autobatch-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors (fatal at setup time)
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Best-record persistence errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A log line that does not decode to a benchmark record
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation was cancelled by a shutdown request
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Config(err) => Some(err.remediation()),
            Self::Storage(err) => Some(err.remediation()),
            Self::Record(_) => None,
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .alternative("Verify the log and output directories exist and are writable."),
            ),
            Self::Json(_) => Some(
                Remediation::new("Validate the JSON input and retry.")
                    .command("Validate JSON lines", "jq -c . < results.jsonl")
                    .alternative("Check for truncated lines or invalid UTF-8."),
            ),
            Self::Cancelled(_) => None,
        }
    }

    /// Whether this error means a shutdown was requested rather than a fault.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Binary search mode requires a benchmark command template")]
    MissingCommandTemplate,

    #[error("Command template has no {placeholder} placeholder: {template}")]
    MissingPlaceholder {
        template: String,
        placeholder: &'static str,
    },

    #[error("Invalid batch bounds: min {min} / max {max}")]
    InvalidBounds { min: u32, max: u32 },

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::MissingCommandTemplate => Remediation::new(
                "Pass --bench-cmd-template with a {batch} placeholder, or run in monitor mode.",
            )
            .command(
                "Example",
                "autobatch --mode binary --bench-cmd-template 'bench.sh --concurrency {batch}' ...",
            )
            .alternative("Use --mode monitor to watch an externally driven sweep."),
            Self::MissingPlaceholder { placeholder, .. } => Remediation::new(format!(
                "Add the {placeholder} placeholder where the probed batch size belongs."
            ))
            .command("Example", "bench.sh --max-concurrency {batch}"),
            Self::InvalidBounds { .. } => {
                Remediation::new("Use 1 <= --min-batch <= --max-batch.")
                    .command("Default range", "--min-batch 1 --max-batch 128")
            }
            Self::ReadFailed(path, _) => {
                Remediation::new(format!("Check that the config file exists: {path}"))
                    .command("Inspect", format!("ls -la \"{path}\""))
            }
            Self::ParseFailed(_) => Remediation::new("Fix the TOML syntax in the config file.")
                .alternative("Unknown keys are rejected; check section and key spelling."),
        }
    }
}

/// Best-record persistence errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to write best records to {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Failed to read best records from {path}: {reason}")]
    ReadFailed { path: String, reason: String },
}

impl StorageError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::WriteFailed { path, .. } => {
                Remediation::new(format!("Ensure the output location is writable: {path}"))
                    .command("Check space", "df -h .")
                    .alternative("Point --output at a local, writable directory.")
            }
            Self::ReadFailed { path, .. } => {
                Remediation::new(format!("Ensure the best-records file is readable: {path}"))
                    .alternative("Move the file aside to start with an empty store.")
            }
        }
    }
}

/// Errors decoding one log line into a record
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("malformed record: {0}")]
    Malformed(String),
}
