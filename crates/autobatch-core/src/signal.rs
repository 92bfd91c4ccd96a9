//! Single-slot notifier file announcing a confirmed best.
//!
//! Other processes (a sweep driver, a dashboard) poll this file to learn that
//! a scenario's best batch is final. Each announcement overwrites the
//! previous one in place; the file is a "latest best" slot, not a ledger.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::record::{ScenarioKey, TestRecord};

/// Contents of the signal file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestSignal {
    pub input_len: u32,
    pub output_len: u32,
    pub best_batch: u32,
    /// Unix epoch seconds
    pub timestamp: f64,
}

impl BestSignal {
    #[must_use]
    pub fn for_record(record: &TestRecord) -> Self {
        let now = chrono::Utc::now();
        Self {
            input_len: record.input_len,
            output_len: record.output_len,
            best_batch: record.concurrency,
            timestamp: now.timestamp_millis() as f64 / 1000.0,
        }
    }

    #[must_use]
    pub fn scenario(&self) -> ScenarioKey {
        ScenarioKey::new(self.input_len, self.output_len)
    }
}

/// Writer for the signal file.
#[derive(Debug)]
pub struct SignalChannel {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SignalChannel {
    /// Prepare a channel at `path`, creating its directory if needed.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the signal file with `record` as the confirmed best.
    pub fn announce(&self, record: &TestRecord) -> Result<BestSignal> {
        let signal = BestSignal::for_record(record);
        let body = serde_json::to_string_pretty(&signal)?;
        {
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            fs::write(&self.path, body)?;
        }
        info!(
            target: "autobatch.signal",
            scenario = %signal.scenario(),
            batch = signal.best_batch,
            path = %self.path.display(),
            "announced confirmed best"
        );
        Ok(signal)
    }

    /// Read the latest announcement, if any.
    pub fn read(path: &Path) -> Result<Option<BestSignal>> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
