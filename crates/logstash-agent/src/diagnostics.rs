// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destination of the agent's own diagnostics.
//!
//! The agent reports dropped events and failed uploads through `tracing`, but never through
//! the subscriber that feeds the [`LogstashLayer`]: that would turn every failed upload into a
//! new log record to upload. Diagnostics are therefore pinned to an explicit
//! [`DiagnosticsSink`], chosen at setup.
//!
//! The stderr sink formats events as
//!
//! ```text
//! LOGSTASH_AGENT | WARN | Failed to upload logs: http://127.0.0.1:31311/ answered with status 503 Service Unavailable
//! ```

use std::fmt;
use std::future::Future;

use tracing::instrument::{WithDispatch, WithSubscriber};
use tracing::subscriber::NoSubscriber;
use tracing::{dispatcher, Dispatch, Level};
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::{FmtContext, FormattedFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::errors::ConfigurationError;
use crate::layer::LogstashLayer;

const PREFIX: &str = "LOGSTASH_AGENT";

#[derive(Debug, Clone)]
pub struct DiagnosticsSink {
    dispatch: Dispatch,
}

impl DiagnosticsSink {
    #[must_use]
    pub fn new(dispatch: Dispatch) -> Self {
        Self { dispatch }
    }

    /// The caller's default dispatcher at the time of the call.
    #[must_use]
    pub fn current() -> Self {
        Self::new(dispatcher::get_default(Dispatch::clone))
    }

    /// Falls back to a stderr sink at `warn` when no default dispatcher is set.
    #[must_use]
    pub fn current_or_stderr() -> Self {
        let current = dispatcher::get_default(Dispatch::clone);
        if current.is::<NoSubscriber>() {
            return Self::stderr_warn();
        }
        Self::new(current)
    }

    /// Discards every diagnostic.
    #[must_use]
    pub fn silent() -> Self {
        Self::new(Dispatch::none())
    }

    /// A dedicated stderr subscriber filtered by an `EnvFilter` directive such as `warn` or
    /// `logstash_agent=debug`.
    pub fn stderr(filter: &str) -> Result<Self, ConfigurationError> {
        let env_filter = format!("h2=off,hyper=off,rustls=off,{filter}");
        let env_filter = EnvFilter::try_new(env_filter).map_err(|e| {
            ConfigurationError::InvalidDiagnosticsFilter {
                filter: filter.to_string(),
                reason: e.to_string(),
            }
        })?;

        let subscriber = tracing_subscriber::fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .event_format(Formatter)
            .finish();
        Ok(Self::new(Dispatch::new(subscriber)))
    }

    fn stderr_warn() -> Self {
        let subscriber = tracing_subscriber::fmt::Subscriber::builder()
            .with_max_level(Level::WARN)
            .with_writer(std::io::stderr)
            .event_format(Formatter)
            .finish();
        Self::new(Dispatch::new(subscriber))
    }

    #[must_use]
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Runs `f` with this sink as the default dispatcher.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        dispatcher::with_default(&self.dispatch, f)
    }

    /// Attaches this sink to a background future, for every poll.
    pub fn instrument<F: Future>(&self, future: F) -> WithDispatch<F> {
        future.with_subscriber(self.dispatch.clone())
    }

    /// Rejects a sink that would route diagnostics back into the shipper.
    pub fn check_feedback_loop(&self) -> Result<(), ConfigurationError> {
        if self.dispatch.is::<LogstashLayer>() {
            return Err(ConfigurationError::DiagnosticsFeedbackLoop);
        }
        Ok(())
    }
}

impl Default for DiagnosticsSink {
    fn default() -> Self {
        Self::current_or_stderr()
    }
}

/// Event formatter for the stderr sink: `LOGSTASH_AGENT | LEVEL | [spans: ]message fields`.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(&mut writer, "{PREFIX} | {} | ", event.metadata().level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
