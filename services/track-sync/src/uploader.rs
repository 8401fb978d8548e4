//! Bounded upload pool.
//!
//! Buffers hand finished payloads to the pool from synchronous code while
//! holding no locks. A single dispatcher task drains the submission queue with
//! at most `concurrency` puts in flight. `finish` is the barrier the run waits
//! on before reporting.

use crate::classifier::GroupKey;
use crate::store::DestinationStore;
use futures::stream::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum UploadPoolError {
    #[error("Upload pool is closed")]
    Closed,

    #[error("Upload dispatcher failed: {0}")]
    Dispatcher(#[from] tokio::task::JoinError),
}

/// A finished, compressed buffer waiting for upload
#[derive(Debug)]
pub struct UploadJob {
    pub key: GroupKey,
    pub object_key: String,
    pub body: Vec<u8>,
    pub line_count: u64,
    /// Uncompressed bytes, separators included
    pub byte_count: u64,
}

#[derive(Debug, Clone)]
pub enum UploadResult {
    Uploaded {
        location: String,
        compressed_bytes: usize,
        duration: Duration,
    },
    Failed {
        location: String,
        error: String,
    },
}

/// Outcome of one upload job
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub key: GroupKey,
    pub object_key: String,
    pub line_count: u64,
    pub byte_count: u64,
    pub result: UploadResult,
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        matches!(self.result, UploadResult::Uploaded { .. })
    }
}

pub struct UploadPool {
    sender: Mutex<Option<mpsc::UnboundedSender<UploadJob>>>,
    dispatcher: Mutex<Option<JoinHandle<Vec<UploadReport>>>>,
}

impl UploadPool {
    /// Spawn the dispatcher. Must be called from within a Tokio runtime.
    pub fn start(store: Arc<dyn DestinationStore>, concurrency: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<UploadJob>();
        let concurrency = concurrency.max(1);

        let dispatcher = tokio::spawn(async move {
            UnboundedReceiverStream::new(receiver)
                .map(|job| {
                    let store = Arc::clone(&store);
                    async move { upload(store.as_ref(), job).await }
                })
                .buffer_unordered(concurrency)
                .collect::<Vec<_>>()
                .await
        });

        info!(concurrency, "Upload pool started");

        Self {
            sender: Mutex::new(Some(sender)),
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Queue a job without waiting for it
    pub fn submit(&self, job: UploadJob) -> Result<(), UploadPoolError> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(UploadPoolError::Closed)?;

        debug!(key = %job.key, object_key = %job.object_key, "Upload queued");
        sender.send(job).map_err(|_| UploadPoolError::Closed)
    }

    /// Close the queue and wait for every submitted upload to complete
    pub async fn finish(&self) -> Result<Vec<UploadReport>, UploadPoolError> {
        drop(self.sender.lock().take());

        let dispatcher = self.dispatcher.lock().take().ok_or(UploadPoolError::Closed)?;
        let reports = dispatcher.await?;

        info!(uploads = reports.len(), "Upload pool drained");
        Ok(reports)
    }
}

async fn upload(store: &dyn DestinationStore, job: UploadJob) -> UploadReport {
    let location = store.describe(&job.object_key);
    let compressed_bytes = job.body.len();
    let started = Instant::now();

    let result = match store.put_object(&job.object_key, job.body).await {
        Ok(()) => {
            let duration = started.elapsed();
            metrics::counter!("track_sync.uploads.succeeded").increment(1);
            metrics::histogram!("track_sync.upload.duration_seconds").record(duration.as_secs_f64());

            info!(
                key = %job.key,
                location = %location,
                lines = job.line_count,
                bytes = job.byte_count,
                compressed_bytes,
                "Uploaded"
            );
            UploadResult::Uploaded {
                location,
                compressed_bytes,
                duration,
            }
        }
        Err(e) => {
            metrics::counter!("track_sync.uploads.failed").increment(1);
            error!(key = %job.key, location = %location, error = %e, "Upload failed");
            UploadResult::Failed {
                location,
                error: e.to_string(),
            }
        }
    };

    UploadReport {
        key: job.key,
        object_key: job.object_key,
        line_count: job.line_count,
        byte_count: job.byte_count,
        result,
    }
}
