//! Incremental reader over the append-only benchmark log.
//!
//! The reader remembers a byte offset into the file and, on each
//! [`LogTailReader::read_new`], decodes only what was appended since. If the
//! file is now shorter than the offset it was truncated or rotated, and the
//! reader starts over from byte 0.
//!
//! # Partial lines
//!
//! The harness may be halfway through writing a line when we read. The offset
//! moves past every newline-terminated line (decodable or not). A trailing
//! segment without a newline is consumed only if it already decodes as a
//! record; otherwise the offset stops in front of it and the next read
//! retries the completed line.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::WaitPolicy;
use crate::error::{Error, Result};
use crate::record::TestRecord;
use crate::shutdown::Shutdown;

/// Counters for one reader's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TailStats {
    /// Records decoded
    pub records: u64,
    /// Complete lines that failed to decode
    pub skipped_lines: u64,
    /// Times the file shrank and the offset was reset
    pub truncations: u64,
}

/// Restartable tail over a line-delimited record log.
#[derive(Debug)]
pub struct LogTailReader {
    path: PathBuf,
    offset: u64,
    stats: TailStats,
}

impl LogTailReader {
    /// Reader positioned at the start of `path`. Does not touch the filesystem.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            stats: TailStats::default(),
        }
    }

    /// Block until `path` exists, polling with capped backoff.
    ///
    /// Returns [`Error::Cancelled`] if shutdown is requested while waiting.
    pub fn wait_for(
        path: impl Into<PathBuf>,
        policy: &WaitPolicy,
        shutdown: &Shutdown,
    ) -> Result<Self> {
        let path = path.into();
        let mut attempt = 0u32;
        while !path.exists() {
            let delay = policy.delay_for_attempt(attempt);
            if attempt == 0 {
                info!(target: "autobatch.tail", path = %path.display(), "waiting for log file to appear");
            } else {
                debug!(target: "autobatch.tail", path = %path.display(), attempt, ?delay, "log file still absent");
            }
            if !shutdown.sleep(delay) {
                return Err(Error::Cancelled(format!(
                    "stopped while waiting for {}",
                    path.display()
                )));
            }
            attempt = attempt.saturating_add(1);
        }
        Ok(Self::new(path))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset the next read starts from.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub fn stats(&self) -> TailStats {
        self.stats
    }

    /// Forget the offset so the next read starts from byte 0.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Decode every record appended since the previous call, in file order.
    ///
    /// A file that disappeared between polls yields an empty batch.
    pub fn read_new(&mut self) -> Result<Vec<TestRecord>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(target: "autobatch.tail", path = %self.path.display(), "log file missing");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        let size = file.metadata()?.len();
        if size < self.offset {
            info!(
                target: "autobatch.tail",
                path = %self.path.display(),
                size,
                offset = self.offset,
                "log file truncated or rotated, rereading from start"
            );
            self.offset = 0;
            self.stats.truncations += 1;
        }
        if size == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::new();
        file.take(size - self.offset).read_to_end(&mut buf)?;

        let (records, consumed) = self.decode_chunk(&buf);
        self.offset += consumed as u64;
        self.stats.records += records.len() as u64;
        Ok(records)
    }

    /// Decode a chunk, returning the records and how many bytes were consumed.
    fn decode_chunk(&mut self, buf: &[u8]) -> (Vec<TestRecord>, usize) {
        let mut records = Vec::new();
        let mut consumed = 0usize;

        while consumed < buf.len() {
            let rest = &buf[consumed..];
            match rest.iter().position(|&b| b == b'\n') {
                Some(newline) => {
                    if let Some(record) = self.decode_complete_line(&rest[..newline]) {
                        records.push(record);
                    }
                    consumed += newline + 1;
                }
                None => {
                    // Unterminated tail: keep it only if it is already whole.
                    let decoded = std::str::from_utf8(rest)
                        .ok()
                        .filter(|text| !text.trim().is_empty())
                        .and_then(|text| TestRecord::decode_line(text).ok());
                    match decoded {
                        Some(record) => {
                            records.push(record);
                            consumed = buf.len();
                        }
                        None => {
                            debug!(
                                target: "autobatch.tail",
                                pending_bytes = rest.len(),
                                "leaving partial trailing line for next read"
                            );
                        }
                    }
                    break;
                }
            }
        }

        (records, consumed)
    }

    fn decode_complete_line(&mut self, raw: &[u8]) -> Option<TestRecord> {
        let Ok(text) = std::str::from_utf8(raw) else {
            warn!(target: "autobatch.tail", bytes = raw.len(), "skipping non-UTF-8 log line");
            self.stats.skipped_lines += 1;
            return None;
        };
        if text.trim().is_empty() {
            return None;
        }
        match TestRecord::decode_line(text) {
            Ok(record) => Some(record),
            Err(err) => {
                debug!(target: "autobatch.tail", error = %err, "skipping undecodable log line");
                self.stats.skipped_lines += 1;
                None
            }
        }
    }
}
