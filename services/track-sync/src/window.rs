//! Run window: which hour is read from the source and where it lands.
//!
//! Source buckets are partitioned by UTC+8 wall-clock hour, the destination by
//! UTC+0 hour. A run always covers one hour of each, both "previous hour" in
//! their own zone.

use crate::classifier::GroupKey;
use chrono::{DateTime, Duration, DurationRound, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WindowError {
    #[error("Invalid target hour {0:?}, expected YYYY-MM-DDTHH")]
    InvalidTargetHour(String),

    #[error("Failed to truncate timestamp to the hour: {0}")]
    Rounding(#[from] chrono::RoundingError),
}

/// The hour processed by one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunWindow {
    utc_hour: DateTime<Utc>,
    source_hour: NaiveDateTime,
}

impl RunWindow {
    /// The hour before `now`, as seen in UTC+0 and in the source zone
    pub fn previous_hour(now: DateTime<Utc>, source_offset_hours: i32) -> Result<Self, WindowError> {
        let utc_hour = now.duration_trunc(Duration::hours(1))? - Duration::hours(1);
        Ok(Self::for_hour(utc_hour, source_offset_hours))
    }

    /// An explicit UTC+0 hour, used for backfills
    pub fn for_hour(utc_hour: DateTime<Utc>, source_offset_hours: i32) -> Self {
        let source_hour = utc_hour.naive_utc() + Duration::hours(i64::from(source_offset_hours));
        Self {
            utc_hour,
            source_hour,
        }
    }

    /// Parse a `YYYY-MM-DDTHH` UTC+0 hour
    pub fn parse_target_hour(raw: &str, source_offset_hours: i32) -> Result<Self, WindowError> {
        let naive = NaiveDateTime::parse_from_str(&format!("{}:00:00", raw.trim()), "%Y-%m-%dT%H:%M:%S")
            .map_err(|_| WindowError::InvalidTargetHour(raw.to_string()))?;
        Ok(Self::for_hour(Utc.from_utc_datetime(&naive), source_offset_hours))
    }

    pub fn utc_hour(&self) -> DateTime<Utc> {
        self.utc_hour
    }

    pub fn source_hour(&self) -> NaiveDateTime {
        self.source_hour
    }

    /// Expand `{date}` (YYYYMMDD) and `{hour}` (HH) with the source-zone hour
    pub fn source_prefix(&self, template: &str) -> String {
        template
            .replace("{date}", &self.source_hour.format("%Y%m%d").to_string())
            .replace("{hour}", &self.source_hour.format("%H").to_string())
    }

    /// Object key of a group's output:
    /// `<path_prefix>/<YYYY-MM-DD>/<HH>/<platform>.<country3>.log.gz`
    pub fn destination_key(&self, path_prefix: &str, key: &GroupKey) -> String {
        let prefix = path_prefix.trim_matches('/');
        let file = format!("{}.{}.log.gz", key.platform(), key.country());
        let date = self.utc_hour.format("%Y-%m-%d");
        let hour = self.utc_hour.format("%H");

        if prefix.is_empty() {
            format!("{}/{}/{}", date, hour, file)
        } else {
            format!("{}/{}/{}/{}", prefix, date, hour, file)
        }
    }
}
