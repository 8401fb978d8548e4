//! End-of-run drain: flush what is left, then wait on the upload barrier.

use crate::buffer::{FlushResult, SkipReason};
use crate::classifier::GroupKey;
use crate::registry::BufferRegistry;
use crate::uploader::{UploadPool, UploadResult};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedObject {
    pub key: String,
    pub location: String,
    pub line_count: u64,
    pub byte_count: u64,
    pub compressed_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedKey {
    pub key: String,
    pub error: String,
}

/// Per-key outcome of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    pub uploaded: Vec<UploadedObject>,
    pub skipped_empty: Vec<String>,
    pub failed: Vec<FailedKey>,
    /// Set when the upload barrier itself could not be awaited
    pub pool_error: Option<String>,
}

impl DrainSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.pool_error.is_none()
    }
}

pub struct FlushDrainer {
    registry: Arc<BufferRegistry>,
    uploads: Arc<UploadPool>,
}

impl FlushDrainer {
    pub fn new(registry: Arc<BufferRegistry>, uploads: Arc<UploadPool>) -> Self {
        Self { registry, uploads }
    }

    /// Flush every open buffer and wait for all uploads of the run.
    ///
    /// Must run after ingestion has finished writing.
    pub async fn drain(&self) -> DrainSummary {
        let mut summary = DrainSummary::default();

        for (key, result) in self.registry.drain_all() {
            match result {
                FlushResult::Uploaded { .. } => {}
                FlushResult::Skipped(SkipReason::EmptyBuffer) => {
                    summary.skipped_empty.push(key.to_string());
                }
                FlushResult::Skipped(SkipReason::AlreadyFlushed) => {
                    warn!(key = %key, "Buffer still flushing at drain time");
                }
                FlushResult::Failed(e) => summary.failed.push(failed(&key, e.to_string())),
            }
        }

        match self.uploads.finish().await {
            Ok(reports) => {
                for report in reports {
                    match report.result {
                        UploadResult::Uploaded {
                            location,
                            compressed_bytes,
                            ..
                        } => summary.uploaded.push(UploadedObject {
                            key: report.key.to_string(),
                            location,
                            line_count: report.line_count,
                            byte_count: report.byte_count,
                            compressed_bytes,
                        }),
                        UploadResult::Failed { error, .. } => {
                            summary.failed.push(failed(&report.key, error))
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Upload barrier failed");
                summary.pool_error = Some(e.to_string());
            }
        }

        summary.uploaded.sort_by(|a, b| a.key.cmp(&b.key));
        summary.failed.sort_by(|a, b| a.key.cmp(&b.key));

        info!(
            uploaded = summary.uploaded.len(),
            skipped_empty = summary.skipped_empty.len(),
            failed = summary.failed.len(),
            "Drain complete"
        );
        summary
    }
}

fn failed(key: &GroupKey, error: String) -> FailedKey {
    FailedKey {
        key: key.to_string(),
        error,
    }
}
