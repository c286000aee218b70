// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the log shipper.
//!
//! Only [`ConfigurationError`] ever reaches application code, and only from
//! [`Shipper::setup`](crate::shipper::Shipper::setup). Every other error is recovered where it
//! happens and reported on the diagnostics sink.

use reqwest::StatusCode;

/// A single event could not be serialized. The event is dropped.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("failed to encode log record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to format log timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
}

/// Appending a record would push the buffer past its hard ceiling. The record is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("log buffer full: record needs {needed} bytes but only {available} of {max_size} are free")]
pub struct CapacityExceeded {
    pub needed: usize,
    pub available: usize,
    pub max_size: usize,
}

/// An upload cycle failed. The buffered data stays in place for the next tick.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("{endpoint} answered with status {status}")]
    Status { endpoint: String, status: StatusCode },
    #[error("failed to send logs to {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
}

impl DeliveryError {
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport { source, .. } => source.status(),
        }
    }
}

/// The agent cannot run with the given setup. Raised once, at setup time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Logstash host is not configured")]
    MissingHost,

    #[error("Logstash port must be greater than 0")]
    InvalidPort,

    #[error("invalid Logstash endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("upload interval must be a finite, positive number of seconds, got {0}")]
    InvalidUploadInterval(f64),

    #[error(
        "maximum total capacity ({max_total_capacity}) must be at least twice the buffer capacity ({buffer_capacity}) once both are rounded to powers of two"
    )]
    MaximumCapacityTooLow {
        buffer_capacity: usize,
        max_total_capacity: usize,
    },

    #[error("invalid diagnostics filter '{filter}': {reason}")]
    InvalidDiagnosticsFilter { filter: String, reason: String },

    #[error("the diagnostics sink routes through the Logstash layer, which would feed the agent's own logs back into itself")]
    DiagnosticsFeedbackLoop,

    #[error("setup must run inside a tokio runtime")]
    NoRuntime,

    #[error("invalid value for {name}: {value}")]
    Env { name: &'static str, value: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Writing or reading the crash-recovery copy of the buffer failed.
#[derive(Debug, thiserror::Error)]
#[error("log buffer persistence failed for {path}: {source}")]
pub struct PersistenceError {
    pub path: String,
    #[source]
    pub source: std::io::Error,
}
