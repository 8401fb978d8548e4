//! One hourly sync run: window → ingest → drain → report.

use crate::classifier::{IsoCountryLookup, KeyClassifier, SizeLimitTable};
use crate::config::{Config, EarlyStop};
use crate::drain::{DrainSummary, FlushDrainer};
use crate::ingest::{IngestSummary, IngestionPipeline, SourceLocation};
use crate::registry::BufferRegistry;
use crate::s3_store::{EndpointSettings, S3DestinationStore, S3SourceStore};
use crate::store::{DestinationStore, SourceStore};
use crate::uploader::UploadPool;
use crate::window::RunWindow;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// A regional source bucket
#[derive(Clone)]
pub struct SourceBucket {
    pub name: String,
    pub bucket: String,
    pub store: Arc<dyn SourceStore>,
}

/// Scheduling and layout settings of a run
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub prefix_template: String,
    pub utc_offset_hours: i32,
    pub target_hour: Option<String>,
    pub path_prefix: String,
    pub download_concurrency: usize,
    pub upload_concurrency: usize,
    pub early_stop: EarlyStop,
    pub max_line_bytes: usize,
}

impl From<&Config> for JobSettings {
    fn from(config: &Config) -> Self {
        Self {
            prefix_template: config.source.prefix_template.clone(),
            utc_offset_hours: config.source.utc_offset_hours,
            target_hour: config.ingest.target_hour.clone(),
            path_prefix: config.destination.path_prefix.clone(),
            download_concurrency: config.ingest.download_concurrency,
            upload_concurrency: config.ingest.upload_concurrency,
            early_stop: config.ingest.early_stop,
            max_line_bytes: config.ingest.max_line_bytes,
        }
    }
}

/// Result of one run, logged as a single line at the end
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Destination hour, `YYYY-MM-DDTHH` in UTC+0
    pub utc_hour: String,
    /// Source hour, `YYYY-MM-DDTHH` in the source time zone
    pub source_hour: String,
    pub ingest: IngestSummary,
    pub drain: DrainSummary,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn log(&self) {
        let summary = serde_json::to_string(self).unwrap_or_default();
        if self.drain.is_clean() {
            info!(
                utc_hour = %self.utc_hour,
                uploaded = self.drain.uploaded.len(),
                lines_accepted = self.ingest.lines_accepted,
                lines_malformed = self.ingest.lines_malformed,
                elapsed_ms = self.elapsed_ms,
                report = %summary,
                "Sync run finished"
            );
        } else {
            warn!(
                utc_hour = %self.utc_hour,
                uploaded = self.drain.uploaded.len(),
                failed = self.drain.failed.len(),
                elapsed_ms = self.elapsed_ms,
                report = %summary,
                "Sync run finished with failures"
            );
        }
    }
}

pub struct SyncJob {
    settings: JobSettings,
    sources: Vec<SourceBucket>,
    destination: Arc<dyn DestinationStore>,
    classifier: Arc<KeyClassifier>,
}

impl SyncJob {
    pub fn new(
        settings: JobSettings,
        sources: Vec<SourceBucket>,
        destination: Arc<dyn DestinationStore>,
        classifier: Arc<KeyClassifier>,
    ) -> Self {
        Self {
            settings,
            sources,
            destination,
            classifier,
        }
    }

    /// Build the job with S3-compatible clients for every active region
    pub async fn from_config(config: &Config) -> Self {
        let mut sources = Vec::new();
        for region in config.active_regions() {
            let settings = EndpointSettings::for_source(region, &config.source.credentials);
            let store: Arc<dyn SourceStore> = Arc::new(S3SourceStore::new(&settings).await);
            sources.push(SourceBucket {
                name: region.name.clone(),
                bucket: region.bucket.clone(),
                store,
            });
        }

        let destination: Arc<dyn DestinationStore> =
            Arc::new(S3DestinationStore::new(&config.destination).await);

        let limits = Arc::new(SizeLimitTable::from_config(&config.classification));
        info!(budgeted_keys = limits.len(), unit = ?limits.unit(), "Budget table loaded");
        let classifier = Arc::new(KeyClassifier::from_config(
            &config.classification,
            Arc::new(IsoCountryLookup),
            limits,
        ));

        Self::new(JobSettings::from(config), sources, destination, classifier)
    }

    /// Hour processed by a run started at `now`
    pub fn window(&self, now: DateTime<Utc>) -> Result<RunWindow> {
        let offset = self.settings.utc_offset_hours;
        match &self.settings.target_hour {
            Some(raw) => RunWindow::parse_target_hour(raw, offset).context("Invalid ingest.target_hour"),
            None => RunWindow::previous_hour(now, offset).context("Failed to compute run window"),
        }
    }

    /// Run one sync. Only an invalid window is fatal; per-object and
    /// per-upload failures are reported in the summary.
    #[instrument(skip(self), fields(now = %now))]
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let started = Instant::now();
        let window = self.window(now)?;
        let prefix = window.source_prefix(&self.settings.prefix_template);

        info!(
            utc_hour = %window.utc_hour().format("%Y-%m-%dT%H"),
            source_prefix = %prefix,
            sources = self.sources.len(),
            "Starting sync run"
        );

        let uploads = Arc::new(UploadPool::start(
            Arc::clone(&self.destination),
            self.settings.upload_concurrency,
        ));
        let registry = Arc::new(BufferRegistry::new(
            window,
            self.settings.path_prefix.clone(),
            Arc::clone(&uploads),
        ));

        let locations: Vec<SourceLocation> = self
            .sources
            .iter()
            .map(|source| SourceLocation {
                name: source.name.clone(),
                bucket: source.bucket.clone(),
                prefix: prefix.clone(),
                store: Arc::clone(&source.store),
            })
            .collect();

        let pipeline = IngestionPipeline::new(
            Arc::clone(&registry),
            Arc::clone(&self.classifier),
            self.settings.download_concurrency,
            self.settings.early_stop,
        )
        .with_max_line_bytes(self.settings.max_line_bytes);
        let ingest = pipeline.run(&locations).await;

        let drain = FlushDrainer::new(registry, uploads).drain().await;

        Ok(RunReport {
            utc_hour: window.utc_hour().format("%Y-%m-%dT%H").to_string(),
            source_hour: window.source_hour().format("%Y-%m-%dT%H").to_string(),
            ingest,
            drain,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}
