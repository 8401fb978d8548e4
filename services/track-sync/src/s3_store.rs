//! S3-compatible stores on top of `aws-sdk-s3`.
//!
//! Tencent COS (source) and Alibaba OSS (destination) both expose the S3 API,
//! so a single client type covers both sides; only endpoint, region and
//! credentials differ.

use crate::config::{Credentials, DestinationConfig, SourceRegionConfig};
use crate::store::{DestinationStore, ListPage, ObjectReader, SourceStore, StoreError};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, info};

/// Connection settings shared by source and destination clients
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub region: String,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub credentials: Credentials,
}

impl EndpointSettings {
    pub fn for_source(region: &SourceRegionConfig, credentials: &Credentials) -> Self {
        Self {
            region: region.region.clone(),
            endpoint_url: region.endpoint_url.clone(),
            force_path_style: region.force_path_style,
            credentials: credentials.clone(),
        }
    }

    pub fn for_destination(config: &DestinationConfig) -> Self {
        Self {
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            force_path_style: config.force_path_style,
            credentials: config.credentials.clone(),
        }
    }
}

/// Build an S3 client for one endpoint
pub async fn build_client(settings: &EndpointSettings) -> S3Client {
    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(settings.region.clone()))
        .load()
        .await;

    let mut builder = S3ConfigBuilder::from(&sdk_config);

    if let Some(ref endpoint_url) = settings.endpoint_url {
        builder = builder.endpoint_url(endpoint_url);
    }

    if settings.force_path_style {
        builder = builder.force_path_style(true);
    }

    // Explicit keys win over the provider chain
    if let Some((id, secret)) = settings.credentials.static_pair() {
        builder = builder.credentials_provider(aws_sdk_s3::config::Credentials::new(
            id, secret, None, None, "static",
        ));
    }

    S3Client::from_conf(builder.build())
}

/// Source store reading regional COS buckets
pub struct S3SourceStore {
    client: S3Client,
}

impl S3SourceStore {
    pub async fn new(settings: &EndpointSettings) -> Self {
        let client = build_client(settings).await;
        info!(
            region = %settings.region,
            endpoint = ?settings.endpoint_url,
            "Source store initialized"
        );
        Self::from_client(client)
    }

    pub fn from_client(client: S3Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceStore for S3SourceStore {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let output = self
            .client
            .list_objects()
            .bucket(bucket)
            .prefix(prefix)
            .set_marker(marker.map(String::from))
            .send()
            .await
            .map_err(|e| StoreError::List {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let keys: Vec<String> = output
            .contents()
            .iter()
            .filter_map(|object| object.key().map(String::from))
            .collect();

        debug!(bucket, prefix, marker, count = keys.len(), "Listed page");

        Ok(ListPage {
            keys,
            next_marker: output.next_marker().map(String::from),
            is_truncated: output.is_truncated().unwrap_or(false),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::Get {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(Box::pin(output.body.into_async_read()))
    }
}

/// Destination store writing into one OSS bucket
pub struct S3DestinationStore {
    client: S3Client,
    bucket: String,
}

impl S3DestinationStore {
    pub async fn new(config: &DestinationConfig) -> Self {
        let settings = EndpointSettings::for_destination(config);
        let client = build_client(&settings).await;
        info!(
            bucket = %config.bucket,
            region = %config.region,
            "Destination store initialized"
        );
        Self::from_client(client, config.bucket.clone())
    }

    pub fn from_client(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl DestinationStore for S3DestinationStore {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/gzip")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StoreError::Put {
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(())
    }

    fn describe(&self, key: &str) -> String {
        format!("{}/{}", self.bucket, key)
    }
}
