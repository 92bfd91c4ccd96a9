//! Durable best-record persistence.
//!
//! The best-records file holds exactly one JSON record per scenario, one per
//! line. Every change rewrites the whole file: the records go to a hidden
//! sibling temp file, which is fsynced and renamed over the target, so a
//! reader opening the file sees either the old or the new complete content.
//!
//! If the atomic path fails the store logs a warning and overwrites the
//! target directly. That fallback can expose a half-written file to a
//! concurrent reader; it exists so a flaky rename does not stop progress.
//!
//! The lock is in-process only. Two processes writing the same file race.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};
use crate::record::{ScenarioKey, TestRecord};

/// Thread-safe, file-backed map of scenario → best record.
#[derive(Debug)]
pub struct BestStore {
    path: PathBuf,
    records: Mutex<BTreeMap<ScenarioKey, TestRecord>>,
}

impl BestStore {
    /// Open the store at `path`, seeding it from the file if one exists.
    ///
    /// Duplicate scenarios in the file resolve to the higher concurrency.
    /// Lines that do not decode are skipped with a warning.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| StorageError::WriteFailed {
                    path: parent.display().to_string(),
                    reason: e.to_string(),
                })?;
            }
        }

        let records = load_existing(&path)?;
        if !records.is_empty() {
            info!(
                target: "autobatch.store",
                path = %path.display(),
                scenarios = records.len(),
                "loaded existing best records"
            );
        }

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ScenarioKey, TestRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `record` if its scenario is new or it beats the stored concurrency.
    ///
    /// Returns whether the store changed. An error means both the atomic
    /// rewrite and the direct fallback failed; the in-memory map still holds
    /// the new best and the next successful write persists it.
    pub fn put(&self, record: &TestRecord) -> Result<bool> {
        let mut records = self.lock();
        let scenario = record.scenario();
        let improves = records
            .get(&scenario)
            .is_none_or(|stored| record.concurrency > stored.concurrency);
        if !improves {
            debug!(
                target: "autobatch.store",
                scenario = %scenario,
                batch = record.concurrency,
                "not better than stored best"
            );
            return Ok(false);
        }

        records.insert(scenario, record.clone());
        self.persist(&records)?;
        info!(
            target: "autobatch.store",
            scenario = %scenario,
            batch = record.concurrency,
            path = %self.path.display(),
            "persisted best record"
        );
        Ok(true)
    }

    #[must_use]
    pub fn get(&self, scenario: ScenarioKey) -> Option<TestRecord> {
        self.lock().get(&scenario).cloned()
    }

    /// All stored bests ordered by scenario.
    #[must_use]
    pub fn all(&self) -> Vec<TestRecord> {
        self.lock().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn persist(&self, records: &BTreeMap<ScenarioKey, TestRecord>) -> Result<()> {
        let mut content = String::new();
        for record in records.values() {
            content.push_str(&record.encode_line()?);
            content.push('\n');
        }

        let tmp_path = temp_path_for(&self.path);
        match write_atomic(&tmp_path, &self.path, content.as_bytes()) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(
                    target: "autobatch.store",
                    path = %self.path.display(),
                    error = %err,
                    "atomic replace failed, overwriting in place"
                );
                if let Err(cleanup) = fs::remove_file(&tmp_path) {
                    if cleanup.kind() != io::ErrorKind::NotFound {
                        debug!(
                            target: "autobatch.store",
                            path = %tmp_path.display(),
                            error = %cleanup,
                            "could not remove leftover temp file"
                        );
                    }
                }
                fs::write(&self.path, content.as_bytes()).map_err(|e| {
                    StorageError::WriteFailed {
                        path: self.path.display().to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(())
            }
        }
    }
}

fn load_existing(path: &Path) -> Result<BTreeMap<ScenarioKey, TestRecord>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => {
            return Err(StorageError::ReadFailed {
                path: path.display().to_string(),
                reason: err.to_string(),
            }
            .into());
        }
    };

    let mut records: BTreeMap<ScenarioKey, TestRecord> = BTreeMap::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = match TestRecord::decode_line(line) {
            Ok(record) => record,
            Err(err) => {
                warn!(
                    target: "autobatch.store",
                    path = %path.display(),
                    line = index + 1,
                    error = %err,
                    "skipping unreadable best record"
                );
                continue;
            }
        };
        let scenario = record.scenario();
        let keep = records
            .get(&scenario)
            .is_none_or(|existing| record.concurrency > existing.concurrency);
        if keep {
            records.insert(scenario, record);
        }
    }
    Ok(records)
}

/// Hidden sibling in the same directory, so the rename never crosses filesystems.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "best".into(), |n| n.to_string_lossy().into_owned());
    path.with_file_name(format!(".{name}.tmp"))
}

fn write_atomic(tmp_path: &Path, path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp_path, path)
}
