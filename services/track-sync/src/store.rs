//! Object store collaborators.
//!
//! The sync job reads from a source store (listing + streaming reads) and writes
//! to a destination store (whole-object puts). Both sides are traits so the
//! pipeline can run against S3-compatible services or in-memory stores.

use async_trait::async_trait;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncBufRead;

/// Errors raised by object store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to list {bucket}/{prefix}: {message}")]
    List {
        bucket: String,
        prefix: String,
        message: String,
    },

    #[error("Failed to get {bucket}/{key}: {message}")]
    Get {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("Failed to put {key}: {message}")]
    Put { key: String, message: String },
}

/// One page of a marker-based listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Object keys on this page, directory placeholders included
    pub keys: Vec<String>,
    /// Marker for the next page
    pub next_marker: Option<String>,
    /// More pages follow
    pub is_truncated: bool,
}

impl ListPage {
    /// Marker to request the next page with, `None` when the listing is done
    pub fn continuation(&self) -> Option<String> {
        if !self.is_truncated {
            return None;
        }
        self.next_marker
            .clone()
            .filter(|m| !m.is_empty())
            .or_else(|| self.keys.last().cloned())
    }
}

/// Streaming body of a source object
pub type ObjectReader = Pin<Box<dyn AsyncBufRead + Send>>;

/// Source store: paginated listing and streaming reads
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<ListPage, StoreError>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader, StoreError>;
}

/// Destination store: whole-object puts into one bucket
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DestinationStore: Send + Sync {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError>;

    /// Human readable location of `key`, used in logs and reports
    fn describe(&self, key: &str) -> String;
}
