// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::record::{self, LogLevel, SourceLocation};
use crate::shipper::ShipperContext;
use crate::value::{LogValue, Metadata};

/// Entry point for application log events.
///
/// Logging never fails and never waits on the network: an event is encoded, appended to the
/// shared buffer and left for the upload loop. Events that cannot be encoded or do not fit
/// in the buffer are dropped with a warning on the diagnostics sink.
#[derive(Clone)]
pub struct LogstashHandler {
    label: String,
    log_level: LogLevel,
    metadata: Metadata,
    context: Arc<ShipperContext>,
}

impl LogstashHandler {
    pub(crate) fn new(label: impl Into<String>, context: Arc<ShipperContext>) -> Self {
        Self {
            label: label.into(),
            log_level: LogLevel::Info,
            metadata: Metadata::new(),
            context,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    /// Events below `log_level` are ignored.
    pub fn set_log_level(&mut self, log_level: LogLevel) {
        self.log_level = log_level;
    }

    #[must_use]
    pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    /// Metadata added to every record of this handler.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<LogValue>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn log(
        &self,
        level: LogLevel,
        message: &str,
        metadata: Option<Metadata>,
        source: Option<SourceLocation>,
    ) {
        self.log_labeled(&self.label, level, message, metadata, source.as_ref());
    }

    /// Same as [`log`](Self::log) with a per-event label.
    pub(crate) fn log_labeled(
        &self,
        label: &str,
        level: LogLevel,
        message: &str,
        metadata: Option<Metadata>,
        source: Option<&SourceLocation>,
    ) {
        if level < self.log_level {
            return;
        }

        let metadata = record::merge_metadata(&self.metadata, metadata, source);
        let encoded = record::now_timestamp()
            .and_then(|timestamp| record::encode(level, message, &metadata, label, &timestamp));

        match encoded {
            Ok(encoded) => {
                if let Err(e) = self.context.buffer.append(&encoded) {
                    self.context
                        .diagnostics
                        .in_scope(|| warn!("Dropping {level} log record from '{label}': {e}"));
                }
            }
            Err(e) => {
                self.context
                    .diagnostics
                    .in_scope(|| warn!("Dropping {level} log record from '{label}': {e}"));
            }
        }

        self.context.scheduler.start();
    }
}

impl fmt::Debug for LogstashHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogstashHandler")
            .field("label", &self.label)
            .field("log_level", &self.log_level)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{Endpoint, ShipperConfig};
    use crate::diagnostics::DiagnosticsSink;
    use crate::record::LogRecord;
    use crate::shipper::Shipper;
    use std::fmt::Display;
    use tracing_test::traced_test;

    fn shipper(diagnostics: DiagnosticsSink, max_total_capacity: usize) -> Shipper {
        Shipper::setup(ShipperConfig {
            buffer_capacity: 64,
            max_total_capacity,
            diagnostics,
            flush_on_shutdown: false,
            ..ShipperConfig::new(Endpoint::new("127.0.0.1", 31311, false))
        })
        .unwrap()
    }

    fn records(shipper: &Shipper) -> Vec<LogRecord> {
        shipper
            .buffer()
            .snapshot()
            .split(|b| *b == b'\n')
            .map(|line| serde_json::from_slice(line).unwrap())
            .collect()
    }

    struct Unprintable;

    impl Display for Unprintable {
        fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
            Err(fmt::Error)
        }
    }

    #[tokio::test]
    async fn test_log_appends_encoded_record() {
        let shipper = shipper(DiagnosticsSink::silent(), 4096);
        let mut handler = shipper.handler("checkout");
        handler.set_metadata("region", "eu-west-1");
        handler.set_metadata("shared", "handler");

        let call_site = Metadata::from([
            ("shared".to_string(), LogValue::from("call")),
            ("order".to_string(), LogValue::stringified(1234)),
        ]);
        handler.log(
            LogLevel::Error,
            "payment failed",
            Some(call_site),
            Some(SourceLocation::new("src/checkout.rs", 88)),
        );

        let records = records(&shipper);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.label, "checkout");
        assert_eq!(record.loglevel, LogLevel::Error);
        assert_eq!(record.message, "payment failed");
        assert_eq!(record.metadata["region"], LogValue::from("eu-west-1"));
        assert_eq!(record.metadata["shared"], LogValue::from("call"));
        assert_eq!(record.metadata["order"], LogValue::from("1234"));
        assert_eq!(record.metadata["location"], LogValue::from("src/checkout.rs:88"));
        assert!(record.timestamp.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_log_filters_below_level() {
        let shipper = shipper(DiagnosticsSink::silent(), 4096);
        let handler = shipper.handler("app");

        handler.log(LogLevel::Trace, "too chatty", None, None);
        handler.log(LogLevel::Debug, "still too chatty", None, None);
        assert!(shipper.buffer().is_empty());

        let handler = handler.with_log_level(LogLevel::Trace);
        handler.log(LogLevel::Trace, "now kept", None, None);
        assert_eq!(records(&shipper)[0].message, "now kept");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_log_drops_record_over_capacity() {
        let shipper = shipper(DiagnosticsSink::current(), 128);
        let handler = shipper.handler("app");

        handler.log(LogLevel::Info, "fits", None, None);
        let before = shipper.buffer().snapshot();
        handler.log(LogLevel::Info, &"x".repeat(256), None, None);

        assert_eq!(shipper.buffer().snapshot(), before);
        assert!(logs_contain("Dropping info log record from 'app'"));
        assert!(logs_contain("log buffer full"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_log_drops_unencodable_record() {
        let shipper = shipper(DiagnosticsSink::current(), 4096);
        let handler = shipper.handler("app");

        let metadata = Metadata::from([("bad".to_string(), LogValue::stringified(Unprintable))]);
        handler.log(LogLevel::Warning, "lost", Some(metadata), None);

        assert!(shipper.buffer().is_empty());
        assert!(logs_contain("failed to encode log record"));
    }
}
