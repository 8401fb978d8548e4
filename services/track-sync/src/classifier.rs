use crate::config::{BudgetEntry, BudgetUnit, ClassificationConfig};
use crate::record::{LogRecord, Platform, LINE_SEPARATOR};
use isocountry::CountryCode;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Two-letter to three-letter country code resolution
pub trait CountryLookup: Send + Sync {
    /// Resolve an upper-case ISO 3166 alpha-2 code to a lower-case alpha-3 code
    fn resolve(&self, alpha2: &str) -> Option<String>;
}

/// ISO 3166-1 lookup backed by the `isocountry` table
#[derive(Debug, Default, Clone, Copy)]
pub struct IsoCountryLookup;

impl CountryLookup for IsoCountryLookup {
    fn resolve(&self, alpha2: &str) -> Option<String> {
        CountryCode::for_alpha2(alpha2)
            .ok()
            .map(|country| country.alpha3().to_ascii_lowercase())
    }
}

/// Grouping key `(platform, country3)`, one output object per key and hour
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    platform: Platform,
    country: String,
}

impl GroupKey {
    pub fn new(platform: Platform, country: impl Into<String>) -> Self {
        Self {
            platform,
            country: country.into().to_ascii_lowercase(),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Lower-case alpha-3 country code
    pub fn country(&self) -> &str {
        &self.country
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.platform, self.country)
    }
}

/// Hourly allowance of one key and the unit it is counted in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub limit: u64,
    pub unit: BudgetUnit,
}

impl Budget {
    pub fn bytes(limit: u64) -> Self {
        Self {
            limit,
            unit: BudgetUnit::Bytes,
        }
    }

    pub fn lines(limit: u64) -> Self {
        Self {
            limit,
            unit: BudgetUnit::Lines,
        }
    }

    /// What one line of `line_len` bytes (newline excluded) consumes
    pub fn cost(&self, line_len: usize) -> u64 {
        match self.unit {
            BudgetUnit::Bytes => (line_len + LINE_SEPARATOR.len()) as u64,
            BudgetUnit::Lines => 1,
        }
    }
}

/// Per-key hourly budgets, all in the same unit.
///
/// A key that is absent, or configured with a zero budget, is rejected:
/// records for it are dropped and no buffer is ever created.
#[derive(Debug, Clone, Default)]
pub struct SizeLimitTable {
    unit: BudgetUnit,
    limits: HashMap<GroupKey, u64>,
}

impl SizeLimitTable {
    pub fn new(unit: BudgetUnit) -> Self {
        Self {
            unit,
            limits: HashMap::new(),
        }
    }

    /// Build the table from configured entries scaled by `multiplier`.
    ///
    /// Byte entries are in MB. Line entries are a per-second rate and the
    /// hourly limit is `rate * 3600`.
    pub fn from_entries(entries: &[BudgetEntry], unit: BudgetUnit, multiplier: f64) -> Self {
        let scale = match unit {
            BudgetUnit::Bytes => BYTES_PER_MB,
            BudgetUnit::Lines => SECONDS_PER_HOUR,
        };

        let mut table = Self::new(unit);
        for entry in entries {
            let limit = (entry.limit as f64 * multiplier * scale) as u64;
            table.insert(GroupKey::new(entry.platform, entry.country.as_str()), limit);
        }
        table
    }

    pub fn from_config(config: &ClassificationConfig) -> Self {
        Self::from_entries(&config.budgets, config.budget_unit, config.budget_multiplier)
    }

    pub fn unit(&self) -> BudgetUnit {
        self.unit
    }

    /// Set the hourly limit for a key in the table's unit. Zero marks the key as rejected.
    pub fn insert(&mut self, key: GroupKey, limit: u64) {
        self.limits.insert(key, limit);
    }

    /// `None` when records for this key must be dropped
    pub fn limit_for(&self, key: &GroupKey) -> Option<Budget> {
        self.limits
            .get(key)
            .copied()
            .filter(|limit| *limit > 0)
            .map(|limit| Budget {
                limit,
                unit: self.unit,
            })
    }

    /// Keys that accept records
    pub fn accepted_keys(&self) -> impl Iterator<Item = &GroupKey> {
        self.limits
            .iter()
            .filter(|(_, limit)| **limit > 0)
            .map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }
}

/// Why a record was not routed to a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Platform missing or not whitelisted
    UnsupportedPlatform,
    /// Country code empty or not an ISO 3166 code
    UnknownCountry(String),
    /// Key resolved but has no budget
    NoBudget(GroupKey),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::UnsupportedPlatform => f.write_str("unsupported platform"),
            DropReason::UnknownCountry(code) => write!(f, "unknown country code {:?}", code),
            DropReason::NoBudget(key) => write!(f, "no budget for {}", key),
        }
    }
}

/// Classification decision for one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Route the record to the buffer of `key`
    Route { key: GroupKey, budget: Budget },
    /// Drop the record
    Drop { reason: DropReason },
}

/// Derives the grouping key of a record and checks it against the budgets
pub struct KeyClassifier {
    platforms: HashSet<Platform>,
    country_aliases: HashMap<String, String>,
    lookup: Arc<dyn CountryLookup>,
    limits: Arc<SizeLimitTable>,
}

impl KeyClassifier {
    pub fn new(
        platforms: HashSet<Platform>,
        country_aliases: HashMap<String, String>,
        lookup: Arc<dyn CountryLookup>,
        limits: Arc<SizeLimitTable>,
    ) -> Self {
        let country_aliases = country_aliases
            .into_iter()
            .map(|(from, to)| {
                (
                    from.trim().to_ascii_uppercase(),
                    to.trim().to_ascii_uppercase(),
                )
            })
            .collect();

        Self {
            platforms,
            country_aliases,
            lookup,
            limits,
        }
    }

    pub fn from_config(
        config: &ClassificationConfig,
        lookup: Arc<dyn CountryLookup>,
        limits: Arc<SizeLimitTable>,
    ) -> Self {
        Self::new(
            config.platforms.iter().copied().collect(),
            config.country_aliases.clone(),
            lookup,
            limits,
        )
    }

    /// Classify one record
    pub fn classify(&self, record: &LogRecord) -> Classification {
        let platform = match record.platform {
            Some(p) if self.platforms.contains(&p) => p,
            _ => {
                return Classification::Drop {
                    reason: DropReason::UnsupportedPlatform,
                }
            }
        };

        let alpha2 = self.normalize_country(&record.country_code);
        let country = match self.resolve_country(alpha2) {
            Some(c) => c,
            None => {
                return Classification::Drop {
                    reason: DropReason::UnknownCountry(alpha2.to_string()),
                }
            }
        };

        let key = GroupKey::new(platform, country);
        match self.limits.limit_for(&key) {
            Some(budget) => Classification::Route { key, budget },
            None => {
                trace!(key = %key, "No budget configured, dropping record");
                Classification::Drop {
                    reason: DropReason::NoBudget(key),
                }
            }
        }
    }

    /// Apply the country alias table (`UK` is reported where ISO says `GB`)
    fn normalize_country<'a>(&'a self, code: &'a str) -> &'a str {
        self.country_aliases
            .get(code)
            .map(String::as_str)
            .unwrap_or(code)
    }

    fn resolve_country(&self, alpha2: &str) -> Option<String> {
        if alpha2.len() != 2 {
            return None;
        }
        self.lookup.resolve(alpha2)
    }

    pub fn limits(&self) -> &Arc<SizeLimitTable> {
        &self.limits
    }
}

/// Builder for creating a KeyClassifier with custom settings
pub struct KeyClassifierBuilder {
    platforms: HashSet<Platform>,
    country_aliases: HashMap<String, String>,
    lookup: Arc<dyn CountryLookup>,
    limits: SizeLimitTable,
}

impl KeyClassifierBuilder {
    pub fn new() -> Self {
        Self {
            platforms: [Platform::Android, Platform::Ios].into_iter().collect(),
            country_aliases: [("UK".to_string(), "GB".to_string())]
                .into_iter()
                .collect(),
            lookup: Arc::new(IsoCountryLookup),
            limits: SizeLimitTable::new(BudgetUnit::Bytes),
        }
    }

    pub fn platforms(mut self, platforms: impl IntoIterator<Item = Platform>) -> Self {
        self.platforms = platforms.into_iter().collect();
        self
    }

    pub fn country_alias(mut self, from: &str, to: &str) -> Self {
        self.country_aliases.insert(from.to_string(), to.to_string());
        self
    }

    pub fn lookup(mut self, lookup: Arc<dyn CountryLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    /// Switch the unit of every budget, set before or after adding budgets
    pub fn budget_unit(mut self, unit: BudgetUnit) -> Self {
        self.limits.unit = unit;
        self
    }

    pub fn budget(mut self, platform: Platform, country: &str, limit: u64) -> Self {
        self.limits.insert(GroupKey::new(platform, country), limit);
        self
    }

    pub fn build(self) -> KeyClassifier {
        KeyClassifier::new(
            self.platforms,
            self.country_aliases,
            self.lookup,
            Arc::new(self.limits),
        )
    }
}

impl Default for KeyClassifierBuilder {
    fn default() -> Self {
        Self::new()
    }
}
