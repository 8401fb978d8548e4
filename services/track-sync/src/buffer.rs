//! Bounded gzip buffer, one per grouping key.
//!
//! A buffer accumulates encoded lines into a gzip sink under a budget,
//! counted in uncompressed bytes or in lines, and flushes exactly once:
//!
//! ```text
//!   Open ──(budget overflow | flush())──▶ Flushing ──(payload handed off)──▶ Flushed
//! ```
//!
//! The Open→Flushing transition happens under the buffer mutex, so only one
//! caller ever wins it no matter how many writers observe the overflow at the
//! same time. The winner finishes the gzip stream outside the lock and submits
//! the payload to the upload pool. Writes that arrive after the transition are
//! rejected and never reach the sink.

use crate::classifier::{Budget, GroupKey};
use crate::record::LINE_SEPARATOR;
use crate::uploader::{UploadJob, UploadPool};
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Open,
    Flushing,
    Flushed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The line did not fit. If the buffer held data it is now flushing.
    BudgetExceeded,
    /// Flush has already begun, or the sink failed and the buffer was sealed
    AlreadyFlushed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Accepted,
    Rejected(Rejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyBuffer,
    AlreadyFlushed,
}

#[derive(Error, Debug, Clone)]
pub enum FlushError {
    #[error("Compression failed: {0}")]
    Compression(String),

    #[error("Upload handoff failed: {0}")]
    Handoff(String),
}

#[derive(Debug, Clone)]
pub enum FlushResult {
    /// Payload handed to the upload pool
    Uploaded {
        key: GroupKey,
        object_key: String,
        line_count: u64,
        byte_count: u64,
    },
    Skipped(SkipReason),
    Failed(FlushError),
}

/// Point-in-time view of a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub key: GroupKey,
    pub state: BufferState,
    /// Budget consumed so far, in the budget's unit
    pub current_size: u64,
    pub line_count: u64,
    pub byte_count: u64,
    pub budget: Budget,
}

/// The sink only exists while the buffer is open
enum Stage {
    Open(GzEncoder<Vec<u8>>),
    Flushing,
    Flushed,
}

struct Inner {
    stage: Stage,
    current_size: u64,
    line_count: u64,
    byte_count: u64,
    outcome: Option<FlushResult>,
}

impl Inner {
    fn state(&self) -> BufferState {
        match self.stage {
            Stage::Open(_) => BufferState::Open,
            Stage::Flushing => BufferState::Flushing,
            Stage::Flushed => BufferState::Flushed,
        }
    }
}

/// Payload taken out of the buffer by the caller that won the flush
struct Sealed {
    sink: GzEncoder<Vec<u8>>,
    line_count: u64,
    byte_count: u64,
}

pub struct BoundedBuffer {
    key: GroupKey,
    object_key: String,
    budget: Budget,
    uploads: Arc<UploadPool>,
    inner: Mutex<Inner>,
}

impl BoundedBuffer {
    pub fn new(key: GroupKey, object_key: String, budget: Budget, uploads: Arc<UploadPool>) -> Self {
        Self {
            key,
            object_key,
            budget,
            uploads,
            inner: Mutex::new(Inner {
                stage: Stage::Open(GzEncoder::new(Vec::new(), Compression::default())),
                current_size: 0,
                line_count: 0,
                byte_count: 0,
                outcome: None,
            }),
        }
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn object_key(&self) -> &str {
        &self.object_key
    }

    pub fn budget(&self) -> Budget {
        self.budget
    }

    pub fn state(&self) -> BufferState {
        self.inner.lock().state()
    }

    pub fn is_flushed(&self) -> bool {
        self.state() == BufferState::Flushed
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        let inner = self.inner.lock();
        BufferSnapshot {
            key: self.key.clone(),
            state: inner.state(),
            current_size: inner.current_size,
            line_count: inner.line_count,
            byte_count: inner.byte_count,
            budget: self.budget,
        }
    }

    /// Result of the flush that sealed this buffer, once it has completed
    pub fn flush_outcome(&self) -> Option<FlushResult> {
        self.inner.lock().outcome.clone()
    }

    /// Append one encoded line (without newline).
    ///
    /// A line is accepted only if `current_size + cost <= limit`, where the
    /// cost is `len + 1` for a byte budget and `1` for a line budget. The
    /// first line that does not fit seals the buffer and triggers the flush;
    /// the line itself is dropped. A line that does not fit into an empty
    /// buffer is rejected and the buffer stays open.
    pub fn write(&self, line: &str) -> WriteOutcome {
        let needed = self.budget.cost(line.len());

        let sealed = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;

            let Stage::Open(sink) = &mut inner.stage else {
                return WriteOutcome::Rejected(Rejection::AlreadyFlushed);
            };

            if inner.current_size + needed <= self.budget.limit {
                // A Vec-backed encoder only fails if the deflate stream is corrupt
                if let Err(e) = append(sink, line.as_bytes()) {
                    warn!(key = %self.key, error = %e, "Buffer sink failed, discarding buffer");
                    inner.stage = Stage::Flushed;
                    inner.outcome = Some(FlushResult::Failed(FlushError::Compression(e.to_string())));
                    return WriteOutcome::Rejected(Rejection::AlreadyFlushed);
                }

                inner.current_size += needed;
                inner.line_count += 1;
                inner.byte_count += (line.len() + LINE_SEPARATOR.len()) as u64;
                return WriteOutcome::Accepted;
            }

            if inner.line_count == 0 {
                debug!(key = %self.key, cost = needed, limit = self.budget.limit, "Line larger than budget");
                return WriteOutcome::Rejected(Rejection::BudgetExceeded);
            }

            match seal(inner) {
                Some(sealed) => sealed,
                None => return WriteOutcome::Rejected(Rejection::AlreadyFlushed),
            }
        };

        info!(
            key = %self.key,
            lines = sealed.line_count,
            bytes = sealed.byte_count,
            limit = self.budget.limit,
            unit = ?self.budget.unit,
            "Budget reached, flushing"
        );
        self.complete(sealed);
        WriteOutcome::Rejected(Rejection::BudgetExceeded)
    }

    /// Flush whatever has been written so far. Idempotent.
    pub fn flush(&self) -> FlushResult {
        let sealed = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;

            if inner.state() != BufferState::Open {
                return FlushResult::Skipped(SkipReason::AlreadyFlushed);
            }
            if inner.line_count == 0 {
                return FlushResult::Skipped(SkipReason::EmptyBuffer);
            }

            match seal(inner) {
                Some(sealed) => sealed,
                None => return FlushResult::Skipped(SkipReason::AlreadyFlushed),
            }
        };

        self.complete(sealed)
    }

    /// Finish the gzip stream and hand it off. Runs without the buffer lock.
    fn complete(&self, sealed: Sealed) -> FlushResult {
        let Sealed {
            sink,
            line_count,
            byte_count,
        } = sealed;

        let result = match sink.finish() {
            Ok(body) => {
                let job = UploadJob {
                    key: self.key.clone(),
                    object_key: self.object_key.clone(),
                    body,
                    line_count,
                    byte_count,
                };
                match self.uploads.submit(job) {
                    Ok(()) => FlushResult::Uploaded {
                        key: self.key.clone(),
                        object_key: self.object_key.clone(),
                        line_count,
                        byte_count,
                    },
                    Err(e) => FlushResult::Failed(FlushError::Handoff(e.to_string())),
                }
            }
            Err(e) => FlushResult::Failed(FlushError::Compression(e.to_string())),
        };

        if let FlushResult::Failed(ref e) = result {
            warn!(key = %self.key, error = %e, "Flush failed");
        }
        metrics::counter!("track_sync.buffers.flushed").increment(1);

        let mut inner = self.inner.lock();
        inner.stage = Stage::Flushed;
        inner.outcome = Some(result.clone());
        result
    }
}

fn append(sink: &mut GzEncoder<Vec<u8>>, line: &[u8]) -> io::Result<()> {
    sink.write_all(line)?;
    sink.write_all(LINE_SEPARATOR)
}

/// Open→Flushing. Caller holds the buffer lock.
fn seal(inner: &mut Inner) -> Option<Sealed> {
    match std::mem::replace(&mut inner.stage, Stage::Flushing) {
        Stage::Open(sink) => Some(Sealed {
            sink,
            line_count: inner.line_count,
            byte_count: inner.byte_count,
        }),
        previous => {
            inner.stage = previous;
            None
        }
    }
}
