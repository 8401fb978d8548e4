//! Record codec for tracking log lines.
//!
//! Input lines are JSON objects written by the tracking collectors. Output lines
//! are the compact `@`-delimited format consumed downstream:
//!
//! ```text
//! COUNTRY3@PLATFORM_CODE@display_manager@deviceId@brand@user_agent@ip@language@timestamp@os_version@app_id@model@network_type
//! ```

use crate::classifier::GroupKey;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Field separator of the output format
pub const FIELD_SEPARATOR: char = '@';

/// Line separator appended to every buffered line
pub const LINE_SEPARATOR: &[u8] = b"\n";

/// Errors that make a single input line unusable
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Line is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("Line is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Line is JSON but not an object")]
    NotAnObject,
}

/// Mobile platform reported by the tracking SDK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    /// Parse a raw platform value, ignoring case and surrounding whitespace
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "android" => Some(Platform::Android),
            "ios" => Some(Platform::Ios),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
        }
    }

    /// Numeric code used in the output format
    pub fn code(&self) -> u8 {
        match self {
            Platform::Android => 2,
            Platform::Ios => 1,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed tracking record. Lives for a single parse/encode cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogRecord {
    /// Recognised platform, `None` when the raw value is not android/ios
    pub platform: Option<Platform>,
    /// Raw two-letter country code, trimmed and upper-cased
    pub country_code: String,
    pub device_id: String,
    pub brand: String,
    pub user_agent: String,
    pub ip: String,
    pub language: String,
    pub timestamp: String,
    pub os_version: String,
    pub app_id: String,
    pub model: String,
    pub network_type: String,
    pub display_manager: String,
}

impl LogRecord {
    /// Output platform code, `0` for an unrecognised platform
    pub fn platform_code(&self) -> u8 {
        self.platform.map_or(0, |platform| platform.code())
    }
}

/// Result of parsing one raw line
#[derive(Debug)]
pub enum ParseOutcome {
    /// A usable record
    Record(LogRecord),
    /// Empty or whitespace-only line, not counted anywhere
    Blank,
    /// Line that could not be decoded
    Malformed(ParseError),
}

/// Stateless parser/serializer for tracking lines
pub struct RecordCodec;

impl RecordCodec {
    /// Parse one raw line (with or without its trailing newline)
    pub fn parse(raw: &[u8]) -> ParseOutcome {
        match Self::try_parse(raw) {
            Ok(Some(record)) => ParseOutcome::Record(record),
            Ok(None) => ParseOutcome::Blank,
            Err(e) => ParseOutcome::Malformed(e),
        }
    }

    fn try_parse(raw: &[u8]) -> Result<Option<LogRecord>, ParseError> {
        let text = std::str::from_utf8(raw)?.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(text)?;
        let object = value.as_object().ok_or(ParseError::NotAnObject)?;

        let platform = object
            .get("platform")
            .and_then(Value::as_str)
            .and_then(Platform::parse);

        let country_code = object
            .get("country_code")
            .and_then(Value::as_str)
            .map(|c| c.trim().to_ascii_uppercase())
            .unwrap_or_default();

        Ok(Some(LogRecord {
            platform,
            country_code,
            device_id: field(object, "deviceId"),
            brand: field(object, "brand"),
            user_agent: field(object, "user_agent"),
            ip: field(object, "ip"),
            language: field(object, "language"),
            timestamp: field(object, "timestamp"),
            os_version: field(object, "os_version"),
            app_id: field(object, "app_id"),
            model: field(object, "model"),
            network_type: field(object, "network_type"),
            display_manager: field(object, "display_manager"),
        }))
    }

    /// Serialize a classified record into the output line (without newline)
    pub fn encode(record: &LogRecord, key: &GroupKey) -> String {
        let platform_code = record.platform_code().to_string();
        let country = key.country().to_ascii_uppercase();

        let fields: [&str; 13] = [
            country.as_str(),
            platform_code.as_str(),
            record.display_manager.as_str(),
            record.device_id.as_str(),
            record.brand.as_str(),
            record.user_agent.as_str(),
            record.ip.as_str(),
            record.language.as_str(),
            record.timestamp.as_str(),
            record.os_version.as_str(),
            record.app_id.as_str(),
            record.model.as_str(),
            record.network_type.as_str(),
        ];

        let mut line = String::with_capacity(fields.iter().map(|f| f.len() + 1).sum());
        for (i, value) in fields.iter().enumerate() {
            if i > 0 {
                line.push(FIELD_SEPARATOR);
            }
            line.push_str(value);
        }
        line
    }
}

/// Render a JSON field as text. Missing and null become empty.
fn field(object: &Map<String, Value>, name: &str) -> String {
    let rendered = match object.get(name) {
        None | Some(Value::Null) => return String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    sanitize(rendered)
}

/// Keep every output line at exactly 13 columns
fn sanitize(value: String) -> String {
    if value.contains(|c: char| matches!(c, '@' | '\n' | '\r')) {
        value
            .chars()
            .map(|c| match c {
                '@' | '\n' | '\r' => ' ',
                _ => c,
            })
            .collect()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_record(line: &str) -> LogRecord {
        match RecordCodec::parse(line.as_bytes()) {
            ParseOutcome::Record(record) => record,
            other => panic!("Expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_full_record() {
        let record = parse_record(
            r#"{"platform":" Android ","country_code":"us","deviceId":"d-1","brand":"Pixel",
                "user_agent":"UA","ip":"1.2.3.4","language":"en","timestamp":1700000000,
                "os_version":"14","app_id":"com.app","model":"P8","network_type":"wifi",
                "display_manager":"dm"}"#
                .replace('\n', "")
                .as_str(),
        );

        assert_eq!(record.platform, Some(Platform::Android));
        assert_eq!(record.country_code, "US");
        assert_eq!(record.device_id, "d-1");
        assert_eq!(record.timestamp, "1700000000");
        assert_eq!(record.display_manager, "dm");
    }

    #[test]
    fn test_missing_and_null_fields_are_empty() {
        let record = parse_record(r#"{"platform":"ios","brand":null}"#);
        assert_eq!(record.platform, Some(Platform::Ios));
        assert_eq!(record.brand, "");
        assert_eq!(record.country_code, "");
    }

    #[test]
    fn test_blank_and_malformed_lines() {
        assert!(matches!(RecordCodec::parse(b"   \n"), ParseOutcome::Blank));
        assert!(matches!(
            RecordCodec::parse(b"{not json"),
            ParseOutcome::Malformed(ParseError::Json(_))
        ));
        assert!(matches!(
            RecordCodec::parse(b"[1,2,3]"),
            ParseOutcome::Malformed(ParseError::NotAnObject)
        ));
        assert!(matches!(
            RecordCodec::parse(&[0xff, 0xfe, b'{', b'}']),
            ParseOutcome::Malformed(ParseError::Encoding(_))
        ));
    }

    #[test]
    fn test_platform_codes() {
        assert_eq!(Platform::Android.code(), 2);
        assert_eq!(Platform::Ios.code(), 1);
        let record = parse_record(r#"{"platform":"IOS","country_code":"JP"}"#);
        assert_eq!(record.platform_code(), 1);
    }

    #[test]
    fn test_unknown_platform_is_none() {
        let record = parse_record(r#"{"platform":"windows","country_code":"US"}"#);
        assert_eq!(record.platform, None);
        assert_eq!(record.platform_code(), 0);
    }

    #[test]
    fn test_encode_android_us() {
        let record = parse_record(
            r#"{"platform":"android","country_code":"US","deviceId":"abc","network_type":"4g"}"#,
        );
        let key = GroupKey::new(Platform::Android, "usa");
        let line = RecordCodec::encode(&record, &key);

        assert!(line.starts_with("USA@2@"));
        assert!(line.ends_with("@4g"));
        assert_eq!(line.split(FIELD_SEPARATOR).count(), 13);
        assert_eq!(line.split(FIELD_SEPARATOR).nth(3), Some("abc"));
    }

    #[test]
    fn test_encode_ios_code() {
        let record = parse_record(r#"{"platform":"ios","country_code":"JP"}"#);
        let line = RecordCodec::encode(&record, &GroupKey::new(Platform::Ios, "jpn"));
        assert!(line.starts_with("JPN@1@"));
    }

    #[test]
    fn test_separators_inside_fields_are_replaced() {
        let record = parse_record(
            r#"{"platform":"android","user_agent":"a@b\nc","brand":{"name":"x"}}"#,
        );
        assert_eq!(record.user_agent, "a b c");
        assert_eq!(record.brand, r#"{"name":"x"}"#);

        let line = RecordCodec::encode(&record, &GroupKey::new(Platform::Android, "usa"));
        assert_eq!(line.split(FIELD_SEPARATOR).count(), 13);
        assert!(!line.contains('\n'));
    }
}
