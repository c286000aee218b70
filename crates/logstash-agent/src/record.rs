// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log record assembly and JSON encoding.
//!
//! A record is encoded as a single JSON object whose keys are emitted in sorted order:
//!
//! ```text
//! {"label":"api","loglevel":"error","message":"boom","metadata":{"k":"v"},"timestamp":"2026-10-18T09:15:02.123Z"}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::OffsetDateTime;

use crate::constants::LOCATION_METADATA_KEY;
use crate::errors::EncodingError;
use crate::value::{LogValue, Metadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "notice" => Ok(Self::Notice),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Self::Trace,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Info,
            tracing::Level::WARN => Self::Warning,
            tracing::Level::ERROR => Self::Error,
        }
    }
}

/// Where in the application a log call was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub function: Option<String>,
    pub line: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            function: None,
            line,
        }
    }

    #[must_use]
    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(function) => write!(f, "{}:{} {}", self.file, self.line, function),
            None => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

/// One decoded log event, as the endpoint receives it.
///
/// Fields are declared in sorted order so that serialization emits sorted keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub label: String,
    pub loglevel: LogLevel,
    pub message: String,
    pub metadata: Metadata,
    pub timestamp: String,
}

impl LogRecord {
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        encode(
            self.loglevel,
            &self.message,
            &self.metadata,
            &self.label,
            &self.timestamp,
        )
    }
}

#[derive(Serialize)]
struct EncodedRecord<'a> {
    label: &'a str,
    loglevel: LogLevel,
    message: &'a str,
    metadata: &'a Metadata,
    timestamp: &'a str,
}

/// Serializes one event to its wire form, without framing.
pub fn encode(
    level: LogLevel,
    message: &str,
    metadata: &Metadata,
    label: &str,
    timestamp: &str,
) -> Result<Vec<u8>, EncodingError> {
    let record = EncodedRecord {
        label,
        loglevel: level,
        message,
        metadata,
        timestamp,
    };
    Ok(serde_json::to_vec(&record)?)
}

/// RFC 3339 UTC timestamp with millisecond precision.
pub fn format_timestamp(at: OffsetDateTime) -> Result<String, EncodingError> {
    let format = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    );
    Ok(at.to_offset(time::UtcOffset::UTC).format(format)?)
}

pub fn now_timestamp() -> Result<String, EncodingError> {
    format_timestamp(OffsetDateTime::now_utc())
}

/// Merges handler-level metadata with call-site metadata. Call-site values win on collisions;
/// the source location, when known, is stored under [`LOCATION_METADATA_KEY`].
#[must_use]
pub fn merge_metadata(
    handler: &Metadata,
    call_site: Option<Metadata>,
    source: Option<&SourceLocation>,
) -> Metadata {
    let mut merged = handler.clone();
    if let Some(call_site) = call_site {
        merged.extend(call_site);
    }
    if let Some(source) = source {
        merged.insert(
            LOCATION_METADATA_KEY.to_string(),
            LogValue::Text(source.to_string()),
        );
    }
    merged
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn metadata(entries: &[(&str, &str)]) -> Metadata {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), LogValue::from(*v)))
            .collect()
    }

    #[test]
    fn test_encode_shape() {
        let encoded = encode(
            LogLevel::Error,
            "boom",
            &metadata(&[("k", "v")]),
            "logstash-test",
            "2026-10-18T09:15:02.123Z",
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(encoded).unwrap(),
            r#"{"label":"logstash-test","loglevel":"error","message":"boom","metadata":{"k":"v"},"timestamp":"2026-10-18T09:15:02.123Z"}"#
        );
    }

    #[test]
    fn test_encode_is_deterministic() {
        let meta = metadata(&[("b", "2"), ("a", "1"), ("c", "3")]);
        let first = encode(LogLevel::Info, "m", &meta, "l", "t").unwrap();
        let second = encode(LogLevel::Info, "m", &meta, "l", "t").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_record_round_trip() {
        let record = LogRecord {
            label: "label".to_string(),
            loglevel: LogLevel::Notice,
            message: "escaped \"quote\"\nnewline".to_string(),
            metadata: metadata(&[("path", "/var/log")]),
            timestamp: "2026-10-18T09:15:02.123Z".to_string(),
        };
        let encoded = record.encode().unwrap();
        assert!(!encoded.contains(&b'\n'));
        let decoded: LogRecord = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_format_timestamp_has_fraction() {
        let at = datetime!(2026-10-18 09:15:02.5 UTC);
        assert_eq!(format_timestamp(at).unwrap(), "2026-10-18T09:15:02.500Z");

        let offset = datetime!(2026-10-18 11:15:02.042 +2);
        assert_eq!(format_timestamp(offset).unwrap(), "2026-10-18T09:15:02.042Z");
    }

    #[test]
    fn test_merge_metadata_call_site_wins() {
        let handler = metadata(&[("shared", "handler"), ("only_handler", "h")]);
        let call_site = metadata(&[("shared", "call"), ("only_call", "c")]);
        let merged = merge_metadata(&handler, Some(call_site), None);
        assert_eq!(
            merged,
            metadata(&[
                ("shared", "call"),
                ("only_handler", "h"),
                ("only_call", "c")
            ])
        );
    }

    #[test]
    fn test_merge_metadata_adds_location() {
        let source = SourceLocation::new("src/main.rs", 42).with_function("main");
        let merged = merge_metadata(&Metadata::new(), None, Some(&source));
        assert_eq!(
            merged.get(LOCATION_METADATA_KEY),
            Some(&LogValue::from("src/main.rs:42 main"))
        );
    }

    #[test]
    fn test_level_parsing_and_order() {
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert_eq!("WARN".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert!("verbose".parse::<LogLevel>().is_err());
        assert!(LogLevel::Trace < LogLevel::Info);
        assert!(LogLevel::Error < LogLevel::Critical);
        assert_eq!(LogLevel::from(tracing::Level::WARN), LogLevel::Warning);
    }
}
