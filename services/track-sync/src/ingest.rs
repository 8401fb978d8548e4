//! Ingestion pipeline: list → download → parse → classify → buffer.
//!
//! Listing is sequential per source and paginated. Downloads run on a bounded
//! pool of tasks; every line is routed to the buffer of its key. Failures of a
//! single page, object or line never abort the run.

use crate::buffer::WriteOutcome;
use crate::classifier::{Classification, KeyClassifier};
use crate::config::EarlyStop;
use crate::record::{ParseOutcome, RecordCodec};
use crate::registry::BufferRegistry;
use crate::store::{ObjectReader, SourceStore};
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncBufReadExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, trace, warn};

/// Longest source line kept unless configured otherwise
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// One source bucket prefix to ingest
#[derive(Clone)]
pub struct SourceLocation {
    /// Region name, used in logs
    pub name: String,
    pub bucket: String,
    pub prefix: String,
    pub store: Arc<dyn SourceStore>,
}

/// Counters of one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub objects_listed: u64,
    pub objects_processed: u64,
    pub objects_failed: u64,
    /// Listed but never scheduled because of early stop
    pub objects_skipped: u64,
    pub list_errors: u64,
    pub lines_accepted: u64,
    pub lines_malformed: u64,
    /// Unsupported platform, unknown country or no budget
    pub lines_dropped: u64,
    /// Routed, but refused by a full or flushed buffer
    pub lines_rejected: u64,
    pub stopped_early: bool,
}

#[derive(Default)]
struct IngestStats {
    objects_listed: AtomicU64,
    objects_processed: AtomicU64,
    objects_failed: AtomicU64,
    objects_skipped: AtomicU64,
    list_errors: AtomicU64,
    lines_accepted: AtomicU64,
    lines_malformed: AtomicU64,
    lines_dropped: AtomicU64,
    lines_rejected: AtomicU64,
}

/// Per-object line tallies, merged into the shared stats once per object
#[derive(Debug, Default, Clone, Copy)]
struct LineCounts {
    accepted: u64,
    malformed: u64,
    dropped: u64,
    rejected: u64,
}

#[derive(Clone)]
pub struct IngestionPipeline {
    registry: Arc<BufferRegistry>,
    classifier: Arc<KeyClassifier>,
    download_concurrency: usize,
    early_stop: EarlyStop,
    max_line_bytes: usize,
    stats: Arc<IngestStats>,
}

impl IngestionPipeline {
    pub fn new(
        registry: Arc<BufferRegistry>,
        classifier: Arc<KeyClassifier>,
        download_concurrency: usize,
        early_stop: EarlyStop,
    ) -> Self {
        Self {
            registry,
            classifier,
            download_concurrency: download_concurrency.max(1),
            early_stop,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            stats: Arc::new(IngestStats::default()),
        }
    }

    /// Lines longer than `max` bytes, newline excluded, are discarded as malformed
    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max.max(1);
        self
    }

    /// Ingest every object under every source location.
    ///
    /// Returns once all scheduled downloads have finished.
    pub async fn run(&self, sources: &[SourceLocation]) -> IngestSummary {
        let semaphore = Arc::new(Semaphore::new(self.download_concurrency));
        let mut tasks = JoinSet::new();
        let mut stopped = false;

        'sources: for source in sources {
            info!(
                source = %source.name,
                bucket = %source.bucket,
                prefix = %source.prefix,
                "Listing source objects"
            );

            let mut marker: Option<String> = None;
            loop {
                let page = match source
                    .store
                    .list_objects(&source.bucket, &source.prefix, marker.as_deref())
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        self.stats.list_errors.fetch_add(1, Ordering::Relaxed);
                        error!(source = %source.name, error = %e, "Listing failed, skipping rest of source");
                        break;
                    }
                };

                for key in page.keys.iter().filter(|k| !k.ends_with('/')) {
                    self.stats.objects_listed.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("track_sync.objects.listed").increment(1);

                    if stopped {
                        self.stats.objects_skipped.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }

                    let permit = match Arc::clone(&semaphore).acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break 'sources,
                    };

                    if self.should_stop() {
                        info!(source = %source.name, key = %key, "All buffers flushed, no new objects will be scheduled");
                        stopped = true;
                        self.stats.objects_skipped.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }

                    let pipeline = self.clone();
                    let store = Arc::clone(&source.store);
                    let bucket = source.bucket.clone();
                    let key = key.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        pipeline.process_object(store.as_ref(), &bucket, &key).await;
                    });
                }

                if stopped {
                    break 'sources;
                }

                match page.continuation() {
                    Some(next) => marker = Some(next),
                    None => break,
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                self.stats.objects_failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "Download task panicked");
            }
        }

        let summary = self.summary(stopped);
        info!(
            listed = summary.objects_listed,
            processed = summary.objects_processed,
            failed = summary.objects_failed,
            skipped = summary.objects_skipped,
            lines_accepted = summary.lines_accepted,
            lines_malformed = summary.lines_malformed,
            lines_dropped = summary.lines_dropped,
            "Ingestion complete"
        );
        summary
    }

    pub fn summary(&self, stopped_early: bool) -> IngestSummary {
        let s = &self.stats;
        IngestSummary {
            objects_listed: s.objects_listed.load(Ordering::Relaxed),
            objects_processed: s.objects_processed.load(Ordering::Relaxed),
            objects_failed: s.objects_failed.load(Ordering::Relaxed),
            objects_skipped: s.objects_skipped.load(Ordering::Relaxed),
            list_errors: s.list_errors.load(Ordering::Relaxed),
            lines_accepted: s.lines_accepted.load(Ordering::Relaxed),
            lines_malformed: s.lines_malformed.load(Ordering::Relaxed),
            lines_dropped: s.lines_dropped.load(Ordering::Relaxed),
            lines_rejected: s.lines_rejected.load(Ordering::Relaxed),
            stopped_early,
        }
    }

    fn should_stop(&self) -> bool {
        match self.early_stop {
            EarlyStop::Never => false,
            EarlyStop::AllRegistered => self.registry.all_flushed(),
            EarlyStop::AllBudgeted => self
                .registry
                .all_flushed_for(self.classifier.limits().accepted_keys()),
        }
    }

    #[instrument(level = "debug", skip(self, store))]
    async fn process_object(&self, store: &dyn SourceStore, bucket: &str, key: &str) {
        let started = Instant::now();

        let reader = match store.get_object(bucket, key).await {
            Ok(reader) => reader,
            Err(e) => {
                self.record_failure(key, &e.to_string());
                return;
            }
        };

        let mut counts = LineCounts::default();
        let read = self.consume(reader, &mut counts).await;
        self.merge(counts);

        match read {
            Ok(()) => {
                self.stats.objects_processed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("track_sync.objects.processed").increment(1);
                debug!(
                    bucket,
                    key,
                    accepted = counts.accepted,
                    malformed = counts.malformed,
                    dropped = counts.dropped,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Object processed"
                );
            }
            Err(e) => self.record_failure(key, &e.to_string()),
        }
    }

    async fn consume(&self, mut reader: ObjectReader, counts: &mut LineCounts) -> io::Result<()> {
        let mut line = Vec::with_capacity(4096);
        loop {
            match read_line_capped(&mut reader, &mut line, self.max_line_bytes).await? {
                LineRead::Line => self.handle_line(&line, counts),
                LineRead::TooLong => {
                    debug!(max_bytes = self.max_line_bytes, "Line exceeds length cap, discarded");
                    counts.malformed += 1;
                }
                LineRead::Eof => return Ok(()),
            }
        }
    }

    fn handle_line(&self, raw: &[u8], counts: &mut LineCounts) {
        let record = match RecordCodec::parse(raw) {
            ParseOutcome::Record(record) => record,
            ParseOutcome::Blank => return,
            ParseOutcome::Malformed(e) => {
                trace!(error = %e, "Malformed line");
                counts.malformed += 1;
                return;
            }
        };

        match self.classifier.classify(&record) {
            Classification::Route { key, budget } => {
                let line = RecordCodec::encode(&record, &key);
                match self.registry.get_or_create(&key, budget).write(&line) {
                    WriteOutcome::Accepted => counts.accepted += 1,
                    WriteOutcome::Rejected(_) => counts.rejected += 1,
                }
            }
            Classification::Drop { reason } => {
                trace!(reason = %reason, "Record dropped");
                counts.dropped += 1;
            }
        }
    }

    fn merge(&self, counts: LineCounts) {
        let s = &self.stats;
        s.lines_accepted.fetch_add(counts.accepted, Ordering::Relaxed);
        s.lines_malformed.fetch_add(counts.malformed, Ordering::Relaxed);
        s.lines_dropped.fetch_add(counts.dropped, Ordering::Relaxed);
        s.lines_rejected.fetch_add(counts.rejected, Ordering::Relaxed);

        metrics::counter!("track_sync.lines.accepted").increment(counts.accepted);
        metrics::counter!("track_sync.lines.malformed").increment(counts.malformed);
        metrics::counter!("track_sync.lines.dropped").increment(counts.dropped);
    }

    fn record_failure(&self, key: &str, error: &str) {
        self.stats.objects_failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("track_sync.objects.failed").increment(1);
        warn!(key, error, "Skipping source object");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineRead {
    Line,
    TooLong,
    Eof,
}

/// Read through the next `\n` into `line`, buffering at most `max` bytes of it.
///
/// An overlong line is still consumed up to its newline, but its bytes are
/// dropped as they arrive so memory stays bounded.
async fn read_line_capped(
    reader: &mut ObjectReader,
    line: &mut Vec<u8>,
    max: usize,
) -> io::Result<LineRead> {
    line.clear();
    let mut read_any = false;
    let mut too_long = false;

    loop {
        let (used, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(match (read_any, too_long) {
                    (false, _) => LineRead::Eof,
                    (true, true) => LineRead::TooLong,
                    (true, false) => LineRead::Line,
                });
            }

            let (chunk, done) = match available.iter().position(|b| *b == b'\n') {
                Some(end) => (&available[..=end], true),
                None => (available, false),
            };

            if !too_long {
                if line.len() + chunk.len() - usize::from(done) > max {
                    too_long = true;
                    line.clear();
                } else {
                    line.extend_from_slice(chunk);
                }
            }
            (chunk.len(), done)
        };

        read_any = true;
        reader.consume(used);
        if done {
            return Ok(if too_long { LineRead::TooLong } else { LineRead::Line });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferState;
    use crate::classifier::{GroupKey, KeyClassifier, KeyClassifierBuilder};
    use crate::config::BudgetUnit;
    use crate::record::Platform;
    use crate::store::memory::{MemoryDestination, MemorySource};
    use crate::store::{ListPage, StoreError};
    use crate::uploader::UploadPool;
    use crate::window::RunWindow;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    const BUCKET: &str = "pando-adx-us-1374116111";
    const PREFIX: &str = "adx_device/request/20240115/23/";

    fn android(country: &str, device: &str) -> String {
        format!(
            r#"{{"platform":"android","country_code":"{}","deviceId":"{}","brand":"Pixel"}}"#,
            country, device
        )
    }

    fn android_us(device: &str) -> String {
        android("US", device)
    }

    fn setup(
        limit: u64,
        concurrency: usize,
        early_stop: EarlyStop,
    ) -> (IngestionPipeline, Arc<BufferRegistry>, Arc<UploadPool>) {
        let classifier = KeyClassifierBuilder::new()
            .budget(Platform::Android, "usa", limit)
            .build();
        let (pipeline, registry, pool, _store) = setup_with(classifier, concurrency, early_stop);
        (pipeline, registry, pool)
    }

    fn setup_with(
        classifier: KeyClassifier,
        concurrency: usize,
        early_stop: EarlyStop,
    ) -> (
        IngestionPipeline,
        Arc<BufferRegistry>,
        Arc<UploadPool>,
        Arc<MemoryDestination>,
    ) {
        let store = Arc::new(MemoryDestination::new());
        let pool = Arc::new(UploadPool::start(store.clone(), 2));
        let window = RunWindow::for_hour(Utc.with_ymd_and_hms(2024, 1, 15, 15, 0, 0).unwrap(), 8);
        let registry = Arc::new(BufferRegistry::new(window, "track", pool.clone()));
        let pipeline =
            IngestionPipeline::new(registry.clone(), Arc::new(classifier), concurrency, early_stop);
        (pipeline, registry, pool, store)
    }

    fn reader(body: &[u8], capacity: usize) -> ObjectReader {
        Box::pin(tokio::io::BufReader::with_capacity(
            capacity,
            std::io::Cursor::new(body.to_vec()),
        ))
    }

    fn location(store: Arc<dyn SourceStore>) -> SourceLocation {
        SourceLocation {
            name: "us".to_string(),
            bucket: BUCKET.to_string(),
            prefix: PREFIX.to_string(),
            store,
        }
    }

    #[tokio::test]
    async fn test_ingest_paginates_and_counts_lines() {
        let mut source = MemorySource::new(2).with_object(BUCKET, PREFIX, Vec::new());
        for i in 0..5 {
            let body = format!("{}\n\n{}\nnot json\n", android_us(&format!("d{}", i)), android_us("x"));
            source = source.with_object(BUCKET, &format!("{}part-{}.log", PREFIX, i), body);
        }
        source = source.with_object(BUCKET, "adx_device/request/20240115/22/other.log", android_us("y"));
        let source = Arc::new(source);

        let (pipeline, registry, pool) = setup(1024 * 1024, 3, EarlyStop::Never);
        let summary = pipeline.run(&[location(source.clone())]).await;

        assert_eq!(summary.objects_listed, 5);
        assert_eq!(summary.objects_processed, 5);
        assert_eq!(summary.objects_failed, 0);
        assert_eq!(summary.lines_accepted, 10);
        assert_eq!(summary.lines_malformed, 5);
        assert!(!summary.stopped_early);
        assert!(*source.list_calls.lock() >= 3);

        let buffer = registry.get(&GroupKey::new(Platform::Android, "usa")).unwrap();
        assert_eq!(buffer.snapshot().line_count, 10);
        assert_eq!(buffer.state(), BufferState::Open);
        pool.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_unroutable_records_create_no_buffer() {
        let body = [
            r#"{"platform":"windows","country_code":"US"}"#,
            r#"{"platform":"ios","country_code":"US"}"#,
            r#"{"platform":"android","country_code":"ZZ"}"#,
            r#"{"platform":"android","country_code":"BR"}"#,
        ]
        .join("\n");
        let source = Arc::new(MemorySource::new(10).with_object(BUCKET, &format!("{}a.log", PREFIX), body));

        let (pipeline, registry, pool) = setup(1024, 2, EarlyStop::Never);
        let summary = pipeline.run(&[location(source)]).await;

        assert_eq!(summary.lines_dropped, 4);
        assert_eq!(summary.lines_accepted, 0);
        assert!(registry.is_empty());
        pool.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_object_does_not_stop_run() {
        let source = Arc::new(
            MemorySource::new(10)
                .with_failing_object(BUCKET, &format!("{}a.log", PREFIX))
                .with_object(BUCKET, &format!("{}b.log", PREFIX), android_us("d1")),
        );

        let (pipeline, _registry, pool) = setup(1024, 2, EarlyStop::Never);
        let summary = pipeline.run(&[location(source)]).await;

        assert_eq!(summary.objects_failed, 1);
        assert_eq!(summary.objects_processed, 1);
        assert_eq!(summary.lines_accepted, 1);
        pool.finish().await.unwrap();
    }

    struct BrokenListing;

    #[async_trait]
    impl SourceStore for BrokenListing {
        async fn list_objects(
            &self,
            bucket: &str,
            prefix: &str,
            _marker: Option<&str>,
        ) -> Result<ListPage, StoreError> {
            Err(StoreError::List {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                message: "timeout".to_string(),
            })
        }

        async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader, StoreError> {
            Err(StoreError::Get {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: "unreachable".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_listing_error_skips_only_that_source() {
        let healthy = Arc::new(
            MemorySource::new(10).with_object(BUCKET, &format!("{}a.log", PREFIX), android_us("d1")),
        );
        let mut broken = location(Arc::new(BrokenListing));
        broken.name = "de".to_string();

        let (pipeline, _registry, pool) = setup(1024, 2, EarlyStop::Never);
        let summary = pipeline.run(&[broken, location(healthy)]).await;

        assert_eq!(summary.list_errors, 1);
        assert_eq!(summary.objects_processed, 1);
        assert_eq!(summary.lines_accepted, 1);
        pool.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_early_stop_once_all_buffers_flushed() {
        let line = android_us("d1");
        let line_bytes = RecordCodec::encode(
            &match RecordCodec::parse(line.as_bytes()) {
                ParseOutcome::Record(r) => r,
                other => panic!("unexpected {:?}", other),
            },
            &GroupKey::new(Platform::Android, "usa"),
        )
        .len() as u64
            + 1;

        // Two lines fit, the third flushes the only buffer
        let body = vec![line.clone(); 3].join("\n");
        let source = Arc::new(
            MemorySource::new(10)
                .with_object(BUCKET, &format!("{}a.log", PREFIX), body.clone())
                .with_object(BUCKET, &format!("{}b.log", PREFIX), body.clone())
                .with_object(BUCKET, &format!("{}c.log", PREFIX), body),
        );

        let (pipeline, registry, pool) = setup(line_bytes * 2, 1, EarlyStop::AllRegistered);
        let summary = pipeline.run(&[location(source)]).await;

        assert!(summary.stopped_early);
        assert_eq!(summary.objects_processed, 1);
        assert_eq!(summary.objects_skipped, 2);
        assert_eq!(summary.lines_accepted, 2);
        assert_eq!(summary.lines_rejected, 1);
        assert!(registry.all_flushed());

        let reports = pool.finish().await.unwrap();
        assert_eq!(reports.len(), 1);
    }

    #[tokio::test]
    async fn test_early_stop_waits_for_every_budgeted_key() {
        let body = |country: &str| {
            (0..3)
                .map(|i| android(country, &format!("d{}", i)))
                .collect::<Vec<_>>()
                .join("\n")
        };
        // a.log flushes usa, b.log flushes bra, nothing after that is read
        let source = Arc::new(
            MemorySource::new(10)
                .with_object(BUCKET, &format!("{}a.log", PREFIX), body("US"))
                .with_object(BUCKET, &format!("{}b.log", PREFIX), body("BR"))
                .with_object(BUCKET, &format!("{}c.log", PREFIX), body("US"))
                .with_object(BUCKET, &format!("{}d.log", PREFIX), body("BR")),
        );
        let classifier = KeyClassifierBuilder::new()
            .budget_unit(BudgetUnit::Lines)
            .budget(Platform::Android, "usa", 2)
            .budget(Platform::Android, "bra", 2)
            .build();

        let (pipeline, registry, pool, store) = setup_with(classifier, 1, EarlyStop::AllBudgeted);
        let summary = pipeline.run(&[location(source)]).await;

        assert!(summary.stopped_early);
        assert_eq!(summary.objects_listed, 4);
        assert_eq!(summary.objects_processed, 2);
        assert_eq!(summary.objects_skipped, 2);
        assert_eq!(summary.lines_accepted, 4);
        assert_eq!(summary.lines_rejected, 2);
        assert!(registry.all_flushed());

        pool.finish().await.unwrap();
        assert_eq!(store.keys().len(), 2);
    }

    #[tokio::test]
    async fn test_early_stop_all_budgeted_ignores_partial_flush() {
        let body = (0..3).map(|i| android_us(&format!("d{}", i))).collect::<Vec<_>>().join("\n");
        let source = Arc::new(
            MemorySource::new(10)
                .with_object(BUCKET, &format!("{}a.log", PREFIX), body.clone())
                .with_object(BUCKET, &format!("{}b.log", PREFIX), body),
        );
        // bra never sees a record, so the run never stops early
        let classifier = KeyClassifierBuilder::new()
            .budget_unit(BudgetUnit::Lines)
            .budget(Platform::Android, "usa", 2)
            .budget(Platform::Android, "bra", 2)
            .build();

        let (pipeline, _registry, pool, _store) = setup_with(classifier, 1, EarlyStop::AllBudgeted);
        let summary = pipeline.run(&[location(source)]).await;

        assert!(!summary.stopped_early);
        assert_eq!(summary.objects_processed, 2);
        assert_eq!(summary.objects_skipped, 0);
        pool.finish().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_downloads_fill_line_budget_exactly() {
        const OBJECTS: usize = 12;
        const LINES: usize = 100;
        const LIMIT: u64 = 777;

        let mut source = MemorySource::new(5);
        for object in 0..OBJECTS {
            let body = (0..LINES)
                .map(|i| android_us(&format!("o{}-{}", object, i)))
                .collect::<Vec<_>>()
                .join("\n");
            source = source.with_object(BUCKET, &format!("{}part-{:02}.log", PREFIX, object), body);
        }
        let classifier = KeyClassifierBuilder::new()
            .budget_unit(BudgetUnit::Lines)
            .budget(Platform::Android, "usa", LIMIT)
            .build();

        let (pipeline, _registry, pool, store) = setup_with(classifier, 8, EarlyStop::AllBudgeted);
        let summary = pipeline.run(&[location(Arc::new(source))]).await;

        assert_eq!(summary.lines_accepted, LIMIT);
        assert_eq!(summary.objects_processed + summary.objects_skipped, OBJECTS as u64);
        assert_eq!(
            summary.lines_accepted + summary.lines_rejected,
            summary.objects_processed * LINES as u64
        );

        pool.finish().await.unwrap();
        let lines = store.lines("track/2024-01-15/15/android.usa.log.gz").unwrap();
        assert_eq!(lines.len() as u64, LIMIT);
    }

    #[tokio::test]
    async fn test_overlong_line_counted_malformed() {
        let mut body = "x".repeat(300).into_bytes();
        body.push(b'\n');
        body.extend_from_slice(android_us("d1").as_bytes());
        body.push(b'\n');
        body.extend_from_slice(&[b'y'; 300]);
        let source = Arc::new(MemorySource::new(10).with_object(BUCKET, &format!("{}a.log", PREFIX), body));

        let (pipeline, registry, pool) = setup(1024, 1, EarlyStop::Never);
        let pipeline = pipeline.with_max_line_bytes(128);
        let summary = pipeline.run(&[location(source)]).await;

        assert_eq!(summary.objects_processed, 1);
        assert_eq!(summary.lines_malformed, 2);
        assert_eq!(summary.lines_accepted, 1);
        assert_eq!(
            registry.get(&GroupKey::new(Platform::Android, "usa")).unwrap().snapshot().line_count,
            1
        );
        pool.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_line_capped_across_small_chunks() {
        let mut reader = reader(b"abcdefgh\nabcdefghijk\nxy", 3);
        let mut line = Vec::new();

        assert_eq!(read_line_capped(&mut reader, &mut line, 8).await.unwrap(), LineRead::Line);
        assert_eq!(line, b"abcdefgh\n");

        assert_eq!(read_line_capped(&mut reader, &mut line, 8).await.unwrap(), LineRead::TooLong);
        assert!(line.is_empty());

        assert_eq!(read_line_capped(&mut reader, &mut line, 8).await.unwrap(), LineRead::Line);
        assert_eq!(line, b"xy");

        assert_eq!(read_line_capped(&mut reader, &mut line, 8).await.unwrap(), LineRead::Eof);
    }
}
