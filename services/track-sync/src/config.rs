use crate::record::Platform;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration for the sync job
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Source (COS) buckets
    #[serde(default)]
    pub source: SourceConfig,
    /// Destination (OSS) bucket
    pub destination: DestinationConfig,
    /// Worker pools and scheduling
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Platform/country routing and byte budgets
    #[serde(default)]
    pub classification: ClassificationConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Prometheus exporter port, exporter disabled when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Static credentials for an S3-compatible endpoint.
/// When either half is missing the default AWS provider chain is used.
#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "***"),
            )
            .finish()
    }
}

impl Credentials {
    pub fn static_pair(&self) -> Option<(&str, &str)> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Some((id.as_str(), secret.as_str()))
            }
            _ => None,
        }
    }
}

/// One regional source bucket
#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegionConfig {
    /// Short region name (de, sg, us)
    pub name: String,
    /// Bucket holding the raw tracking logs
    pub bucket: String,
    /// Provider region identifier
    pub region: String,
    /// Custom endpoint URL
    pub endpoint_url: Option<String>,
    /// Force path-style access
    #[serde(default)]
    pub force_path_style: bool,
}

/// Source store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub credentials: Credentials,
    /// Object prefix, `{date}` = YYYYMMDD and `{hour}` = HH in the source time zone
    #[serde(default = "default_prefix_template")]
    pub prefix_template: String,
    /// Offset of the source partitioning time zone from UTC, in hours
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    /// Restrict the run to one region by name
    #[serde(default)]
    pub select_region: Option<String>,
    #[serde(default = "default_regions")]
    pub regions: Vec<SourceRegionConfig>,
}

/// Destination store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    #[serde(default)]
    pub credentials: Credentials,
    /// Destination bucket name
    pub bucket: String,
    /// Provider region identifier
    #[serde(default = "default_destination_region")]
    pub region: String,
    /// Custom endpoint URL
    #[serde(default = "default_destination_endpoint")]
    pub endpoint_url: Option<String>,
    /// Force path-style access
    #[serde(default)]
    pub force_path_style: bool,
    /// Leading path segment of every uploaded object
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
}

/// When ingestion may stop scheduling new source objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarlyStop {
    /// Always read every listed object
    #[default]
    Never,
    /// Stop once every buffer created so far has flushed
    AllRegistered,
    /// Stop once every key with a budget has flushed
    AllBudgeted,
}

/// Ingestion and upload scheduling
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Parallel source object downloads
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,
    /// Parallel destination uploads
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,
    #[serde(default)]
    pub early_stop: EarlyStop,
    /// Explicit UTC+0 hour to sync (`YYYY-MM-DDTHH`), previous hour when unset
    #[serde(default)]
    pub target_hour: Option<String>,
    /// Longest source line kept, in bytes. Longer lines count as malformed.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

/// What a budget entry counts and what each accepted line is charged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetUnit {
    /// `limit` is in MB of uncompressed output; a line costs its length plus the newline
    #[default]
    Bytes,
    /// `limit` is in lines per second over the hour; a line costs 1
    Lines,
}

/// One `(platform, country)` budget
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BudgetEntry {
    pub platform: Platform,
    /// ISO 3166 alpha-3 code
    pub country: String,
    /// MB or lines per second depending on `budget_unit`, zero rejects the key
    #[serde(alias = "limit_mb")]
    pub limit: u64,
}

/// Routing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationConfig {
    /// Accepted platforms
    #[serde(default = "default_platforms")]
    pub platforms: Vec<Platform>,
    /// Non-ISO country codes mapped to their ISO equivalent
    #[serde(default = "default_country_aliases")]
    pub country_aliases: HashMap<String, String>,
    #[serde(default)]
    pub budget_unit: BudgetUnit,
    /// Scaling factor applied to every budget
    #[serde(default = "default_budget_multiplier")]
    pub budget_multiplier: f64,
    #[serde(default = "default_budgets")]
    pub budgets: Vec<BudgetEntry>,
}

// Default value functions
fn default_service_name() -> String {
    "track-sync".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_prefix_template() -> String {
    "adx_device/request/{date}/{hour}/".to_string()
}

fn default_utc_offset_hours() -> i32 {
    8
}

fn default_regions() -> Vec<SourceRegionConfig> {
    [
        ("de", "eu-frankfurt"),
        ("sg", "ap-singapore"),
        ("us", "na-siliconvalley"),
    ]
    .into_iter()
    .map(|(name, region)| SourceRegionConfig {
        name: name.to_string(),
        bucket: format!("pando-adx-{}-1374116111", name),
        region: region.to_string(),
        endpoint_url: Some(format!("https://cos.{}.myqcloud.com", region)),
        force_path_style: false,
    })
    .collect()
}

fn default_destination_region() -> String {
    "oss-ap-southeast-1".to_string()
}

fn default_destination_endpoint() -> Option<String> {
    Some("https://oss-ap-southeast-1.aliyuncs.com".to_string())
}

fn default_path_prefix() -> String {
    "track".to_string()
}

fn default_download_concurrency() -> usize {
    8
}

fn default_upload_concurrency() -> usize {
    4
}

fn default_max_line_bytes() -> usize {
    1024 * 1024
}

fn default_platforms() -> Vec<Platform> {
    vec![Platform::Android, Platform::Ios]
}

fn default_country_aliases() -> HashMap<String, String> {
    HashMap::from([("UK".to_string(), "GB".to_string())])
}

fn default_budget_multiplier() -> f64 {
    1.0
}

fn default_budgets() -> Vec<BudgetEntry> {
    [
        ("idn", 200),
        ("tha", 100),
        ("phl", 240),
        ("ita", 15),
        ("pol", 20),
        ("nld", 20),
        ("bra", 80),
        ("mex", 150),
        ("zaf", 20),
        ("kor", 7),
        ("ukr", 20),
        ("can", 11),
        ("usa", 40),
        ("esp", 35),
        ("ind", 75),
        ("sau", 70),
        ("fra", 50),
        ("gbr", 20),
        ("deu", 75),
        ("are", 40),
        ("rus", 200),
    ]
    .into_iter()
    .map(|(country, limit)| BudgetEntry {
        platform: Platform::Android,
        country: country.to_string(),
        limit,
    })
    .collect()
}

impl Config {
    /// Load configuration from config files and environment
    pub fn load() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .set_default("service.name", "track-sync")?
            .set_default("service.log_level", "info")?
            // Add config file if present
            .add_source(config::File::with_name("config/track-sync").required(false))
            .add_source(config::File::with_name("/etc/track-sync/track-sync").required(false))
            // TRACK_SYNC__DESTINATION__BUCKET -> destination.bucket
            .add_source(
                config::Environment::with_prefix("TRACK_SYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            // Credential variables of the existing cron deployment
            .set_override_option(
                "source.credentials.access_key_id",
                std::env::var("COS_SECRET_ID").ok(),
            )?
            .set_override_option(
                "source.credentials.secret_access_key",
                std::env::var("COS_SECRET_KEY").ok(),
            )?
            .set_override_option(
                "destination.credentials.access_key_id",
                std::env::var("OSS_ACCESS_KEY_ID").ok(),
            )?
            .set_override_option(
                "destination.credentials.secret_access_key",
                std::env::var("OSS_ACCESS_KEY_SECRET").ok(),
            )?
            .set_override_option(
                "source.select_region",
                std::env::var("SELECT_REGION").ok(),
            )?
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Regions taking part in this run
    pub fn active_regions(&self) -> Vec<&SourceRegionConfig> {
        match &self.source.select_region {
            Some(selected) => self
                .source
                .regions
                .iter()
                .filter(|r| r.name.eq_ignore_ascii_case(selected.trim()))
                .collect(),
            None => self.source.regions.iter().collect(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.destination.bucket.trim().is_empty() {
            return Err(ConfigError::MissingRequired("destination.bucket".to_string()));
        }

        if self.active_regions().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "source.regions".to_string(),
                message: match &self.source.select_region {
                    Some(r) => format!("no configured region named {:?}", r),
                    None => "at least one region is required".to_string(),
                },
            });
        }

        if self.ingest.download_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ingest.download_concurrency".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.ingest.upload_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ingest.upload_concurrency".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.ingest.max_line_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ingest.max_line_bytes".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        let multiplier = self.classification.budget_multiplier;
        if !(multiplier.is_finite() && multiplier > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "classification.budget_multiplier".to_string(),
                message: format!("must be a finite number greater than 0, got {}", multiplier),
            });
        }

        for entry in &self.classification.budgets {
            if entry.country.len() != 3 || !entry.country.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(ConfigError::InvalidValue {
                    key: "classification.budgets".to_string(),
                    message: format!("{:?} is not an ISO 3166 alpha-3 code", entry.country),
                });
            }
        }

        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: None,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            prefix_template: default_prefix_template(),
            utc_offset_hours: default_utc_offset_hours(),
            select_region: None,
            regions: default_regions(),
        }
    }
}

impl DestinationConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::default(),
            bucket: bucket.into(),
            region: default_destination_region(),
            endpoint_url: default_destination_endpoint(),
            force_path_style: false,
            path_prefix: default_path_prefix(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            download_concurrency: default_download_concurrency(),
            upload_concurrency: default_upload_concurrency(),
            early_stop: EarlyStop::default(),
            target_hour: None,
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            platforms: default_platforms(),
            country_aliases: default_country_aliases(),
            budget_unit: BudgetUnit::default(),
            budget_multiplier: default_budget_multiplier(),
            budgets: default_budgets(),
        }
    }
}
