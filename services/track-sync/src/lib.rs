//! Track Sync
//!
//! Hourly sync of mobile tracking logs from the regional COS buckets to OSS.
//! Each run reads the previous hour of raw JSON lines (partitioned by UTC+8
//! hour), re-encodes them into the compact `@`-delimited format and writes one
//! gzip object per `(platform, country)` into the destination hour (UTC+0).
//!
//! ## Features
//!
//! - **Bounded memory**: every key buffers into gzip under a byte budget and
//!   flushes exactly once, as soon as the budget is reached
//! - **Bounded concurrency**: separate download and upload pools
//! - **Best effort**: a bad line, object, page or upload is counted and skipped,
//!   never fatal to the run
//!
//! ## Architecture
//!
//! ```text
//! COS de/sg/us                                              OSS
//! ┌──────────────┐                                    ┌────────────────┐
//! │ adx_device/  │   list + download                  │ track/         │
//! │  request/    │──────────┐                         │  {date}/{hour}/│
//! │  {date}/{hr} │          ▼                         │  android.usa…  │
//! └──────────────┘   ┌──────────────┐                 └────────────────┘
//!                    │ Ingestion    │                         ▲
//!                    │ Pipeline     │                         │
//!                    └──────────────┘                  ┌──────────────┐
//!                           │ parse + classify         │ Upload Pool  │
//!                           ▼                          └──────────────┘
//!                    ┌──────────────┐  budget reached         ▲
//!                    │ Buffer       │─────────────────────────┤
//!                    │ Registry     │                         │
//!                    └──────────────┘  end of run      ┌──────────────┐
//!                           └─────────────────────────▶│ Flush Drainer│
//!                                                      └──────────────┘
//! ```

pub mod buffer;
pub mod classifier;
pub mod config;
pub mod drain;
pub mod ingest;
pub mod job;
pub mod record;
pub mod registry;
pub mod s3_store;
pub mod store;
pub mod uploader;
pub mod window;

pub use buffer::{BoundedBuffer, BufferState, FlushResult, WriteOutcome};
pub use classifier::{Budget, GroupKey, KeyClassifier, KeyClassifierBuilder, SizeLimitTable};
pub use config::{BudgetUnit, Config};
pub use drain::{DrainSummary, FlushDrainer};
pub use ingest::{IngestSummary, IngestionPipeline, SourceLocation};
pub use job::{RunReport, SyncJob};
pub use record::{LogRecord, ParseOutcome, Platform, RecordCodec};
pub use registry::BufferRegistry;
pub use store::{DestinationStore, SourceStore};
pub use uploader::{UploadPool, UploadReport, UploadResult};
pub use window::RunWindow;
