// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `tracing` front end for the shipper.
//!
//! Every event that reaches the layer becomes one record: the event target is the label, the
//! `message` field is the message, all other fields go to the metadata and the source
//! file and line are stored under `location`.

use std::fmt;

use tracing::field::{Field, Visit};
use tracing_core::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::handler::LogstashHandler;
use crate::record::{LogLevel, SourceLocation};
use crate::value::{LogValue, Metadata};

const MESSAGE_FIELD: &str = "message";
const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");

#[derive(Debug, Clone)]
pub struct LogstashLayer {
    handler: LogstashHandler,
}

impl LogstashLayer {
    #[must_use]
    pub fn new(handler: LogstashHandler) -> Self {
        Self { handler }
    }

    #[must_use]
    pub fn handler(&self) -> &LogstashHandler {
        &self.handler
    }
}

impl<S: Subscriber> Layer<S> for LogstashLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_own_target(metadata.target()) {
            return;
        }

        let level = LogLevel::from(*metadata.level());
        if level < self.handler.log_level() {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let source = metadata
            .file()
            .zip(metadata.line())
            .map(|(file, line)| SourceLocation::new(file, line));

        self.handler.log_labeled(
            metadata.target(),
            level,
            &visitor.message,
            Some(visitor.fields),
            source.as_ref(),
        );
    }
}

/// The agent's own diagnostics never become records.
fn is_own_target(target: &str) -> bool {
    target == OWN_TARGET
        || target
            .strip_prefix(OWN_TARGET)
            .is_some_and(|rest| rest.starts_with("::"))
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: Metadata,
}

impl EventVisitor {
    fn insert(&mut self, field: &Field, value: LogValue) {
        if field.name() == MESSAGE_FIELD {
            self.message = value.to_text().unwrap_or_else(|| format!("{value:?}"));
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for EventVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, LogValue::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, LogValue::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, LogValue::stringified(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, LogValue::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, LogValue::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, LogValue::Text(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, LogValue::Text(format!("{value:?}")));
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
    use tracing::{dispatcher, Dispatch};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    fn shipper() -> Shipper {
        Shipper::setup(ShipperConfig {
            diagnostics: DiagnosticsSink::silent(),
            flush_on_shutdown: false,
            ..ShipperConfig::new(Endpoint::new("127.0.0.1", 31311, false))
        })
        .unwrap()
    }

    fn records(shipper: &Shipper) -> Vec<LogRecord> {
        let snapshot = shipper.buffer().snapshot();
        if snapshot.is_empty() {
            return Vec::new();
        }
        snapshot
            .split(|b| *b == b'\n')
            .map(|line| serde_json::from_slice(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_events_become_records() {
        let shipper = shipper();
        let dispatch = Dispatch::new(Registry::default().with(shipper.layer()));

        dispatcher::with_default(&dispatch, || {
            tracing::error!(target: "billing", k = "v", attempt = 3, ok = false, "boom");
            tracing::warn!(target: "billing", ratio = f64::INFINITY, "degraded");
            tracing::debug!(target: "billing", "below the handler level");
        });

        let records = records(&shipper);
        assert_eq!(records.len(), 2);

        let boom = &records[0];
        assert_eq!(boom.label, "billing");
        assert_eq!(boom.loglevel, LogLevel::Error);
        assert_eq!(boom.message, "boom");
        assert_eq!(boom.metadata["k"], LogValue::from("v"));
        assert_eq!(boom.metadata["attempt"], LogValue::from("3"));
        assert_eq!(boom.metadata["ok"], LogValue::from("false"));
        let location = boom.metadata["location"].as_text().unwrap();
        assert!(location.starts_with(file!()));

        let degraded = &records[1];
        assert_eq!(degraded.loglevel, LogLevel::Warning);
        assert_eq!(degraded.metadata["ratio"], LogValue::from("+inf"));
    }

    #[tokio::test]
    async fn test_own_diagnostics_are_skipped() {
        let shipper = shipper();
        let dispatch = Dispatch::new(Registry::default().with(shipper.layer()));

        dispatcher::with_default(&dispatch, || {
            tracing::warn!(target: "logstash_agent::scheduler", "Failed to upload logs");
        });

        assert!(shipper.buffer().is_empty());

        dispatcher::with_default(&dispatch, || {
            tracing::info!(target: "logstash_agent_ext::orders", "application event");
        });
        let records = records(&shipper);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label, "logstash_agent_ext::orders");
    }

    #[test]
    fn test_own_target_matching() {
        assert!(is_own_target("logstash_agent"));
        assert!(is_own_target("logstash_agent::scheduler"));
        assert!(!is_own_target("logstash_agent_ext"));
        assert!(!is_own_target("logstash_agent_ext::orders"));
        assert!(!is_own_target("billing"));
    }

    #[tokio::test]
    async fn test_non_text_message_uses_display() {
        let shipper = shipper();
        let dispatch = Dispatch::new(Registry::default().with(shipper.layer()));

        dispatcher::with_default(&dispatch, || {
            tracing::error!(target: "billing", message = 42u64);
        });

        let records = records(&shipper);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "42");
    }
}
