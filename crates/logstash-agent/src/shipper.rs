// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Setup and lifetime of the log shipper.
//!
//! ```rust,ignore
//! use logstash_agent::config::{Endpoint, ShipperConfig};
//! use logstash_agent::diagnostics::DiagnosticsSink;
//! use logstash_agent::shipper::Shipper;
//! use tracing_subscriber::layer::SubscriberExt;
//!
//! let config = ShipperConfig {
//!     diagnostics: DiagnosticsSink::stderr("warn")?,
//!     ..ShipperConfig::new(Endpoint::new("127.0.0.1", 31311, false))
//! };
//! let shipper = Shipper::setup(config)?;
//! tracing::subscriber::set_global_default(tracing_subscriber::registry().with(shipper.layer()))?;
//!
//! tracing::error!(k = "v", "boom");
//! shipper.shutdown().await;
//! ```

use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::buffer::LogBuffer;
use crate::config::ShipperConfig;
use crate::diagnostics::DiagnosticsSink;
use crate::errors::ConfigurationError;
use crate::flusher::Flusher;
use crate::handler::LogstashHandler;
use crate::layer::LogstashLayer;
use crate::persistence::{BufferMirror, FileMirror, MirrorTask};
use crate::scheduler::{FlushOutcome, UploadScheduler};

/// State shared by every handler of one shipper.
pub(crate) struct ShipperContext {
    pub(crate) buffer: Arc<LogBuffer>,
    pub(crate) scheduler: Arc<UploadScheduler>,
    pub(crate) diagnostics: DiagnosticsSink,
}

struct MirrorHandle {
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

/// Handle to a running log shipper. Cloning it is cheap; all clones share the same buffer
/// and upload loop.
#[derive(Clone)]
pub struct Shipper {
    config: Arc<ShipperConfig>,
    context: Arc<ShipperContext>,
    mirror: Arc<Mutex<Option<MirrorHandle>>>,
}

impl Shipper {
    /// Validates `config` and wires the buffer, the upload loop and, when configured, the
    /// persistence mirror together. Must be called from within a tokio runtime, which the
    /// background tasks are spawned on.
    ///
    /// The upload loop itself starts with the first logged event, or right away when
    /// unsent logs were restored from a previous run.
    pub fn setup(config: ShipperConfig) -> Result<Self, ConfigurationError> {
        let runtime = Handle::try_current().map_err(|_| ConfigurationError::NoRuntime)?;
        config.validate()?;
        let (capacity, max_size) = config.capacities()?;
        let flusher = Flusher::new(&config)?;
        let diagnostics = config.diagnostics.clone();

        let mirror: Option<Arc<dyn BufferMirror>> = config
            .persistence_path
            .as_ref()
            .map(|path| Arc::new(FileMirror::new(path)) as Arc<dyn BufferMirror>);

        let mut buffer = match mirror.as_deref() {
            Some(mirror) => restore_buffer(mirror, capacity, max_size, &diagnostics),
            None => LogBuffer::new(capacity, max_size),
        };
        let changed = Arc::new(Notify::new());
        if mirror.is_some() {
            buffer = buffer.with_change_notifier(Arc::clone(&changed));
        }
        let buffer = Arc::new(buffer);

        let scheduler = Arc::new(UploadScheduler::new(
            Arc::clone(&buffer),
            flusher,
            config.upload_interval,
            runtime.clone(),
            diagnostics.clone(),
        ));

        let mirror = mirror.map(|mirror| {
            let cancel_token = CancellationToken::new();
            let task =
                MirrorTask::new(Arc::clone(&buffer), mirror, changed, cancel_token.clone());
            MirrorHandle {
                cancel_token,
                task: runtime.spawn(diagnostics.instrument(task.run())),
            }
        });

        if !buffer.is_empty() {
            scheduler.start();
        }

        diagnostics.in_scope(|| {
            debug!(
                "Log shipper ready: {} bytes preallocated, {} bytes max",
                capacity, max_size
            );
        });

        Ok(Self {
            config: Arc::new(config),
            context: Arc::new(ShipperContext {
                buffer,
                scheduler,
                diagnostics,
            }),
            mirror: Arc::new(Mutex::new(mirror)),
        })
    }

    /// A new handler stamping `label` on every record.
    #[must_use]
    pub fn handler(&self, label: impl Into<String>) -> LogstashHandler {
        LogstashHandler::new(label, Arc::clone(&self.context))
    }

    /// A `tracing` layer feeding this shipper.
    #[must_use]
    pub fn layer(&self) -> LogstashLayer {
        LogstashLayer::new(self.handler(env!("CARGO_PKG_NAME")))
    }

    #[must_use]
    pub fn config(&self) -> &ShipperConfig {
        &self.config
    }

    #[must_use]
    pub fn buffer(&self) -> &Arc<LogBuffer> {
        &self.context.buffer
    }

    /// Uploads whatever is buffered right now, outside the regular schedule.
    pub async fn flush(&self) -> FlushOutcome {
        let scheduler = Arc::clone(&self.context.scheduler);
        self.context
            .diagnostics
            .instrument(async move { scheduler.tick().await })
            .await
    }

    /// Stops the upload loop, makes a last upload attempt when `flush_on_shutdown` is set, and
    /// writes the final buffer contents to the persistence file.
    pub async fn shutdown(&self) {
        let context = Arc::clone(&self.context);
        let flush_on_shutdown = self.config.flush_on_shutdown;
        let mirror = self.take_mirror();

        let shutdown = async move {
            context.scheduler.shutdown().await;

            if flush_on_shutdown {
                debug!("Final flush of logs");
                if let FlushOutcome::Retained { error } = context.scheduler.tick().await {
                    warn!(
                        "Final log upload failed, {} bytes left unsent: {error}",
                        context.buffer.len()
                    );
                }
            }

            if let Some(mirror) = mirror {
                mirror.cancel_token.cancel();
                if let Err(e) = mirror.task.await {
                    error!("Log buffer mirror failed: {e}");
                }
            }
        };
        self.context.diagnostics.instrument(shutdown).await;
    }

    #[allow(clippy::expect_used)]
    fn take_mirror(&self) -> Option<MirrorHandle> {
        self.mirror.lock().expect("lock poisoned").take()
    }
}

fn restore_buffer(
    mirror: &dyn BufferMirror,
    capacity: usize,
    max_size: usize,
    diagnostics: &DiagnosticsSink,
) -> LogBuffer {
    let contents = match mirror.load() {
        Ok(Some(contents)) => contents,
        Ok(None) => return LogBuffer::new(capacity, max_size),
        Err(e) => {
            diagnostics.in_scope(|| warn!("Could not restore unsent logs: {e}"));
            return LogBuffer::new(capacity, max_size);
        }
    };

    let restored = contents.len();
    match LogBuffer::with_contents(contents, capacity, max_size) {
        Ok(buffer) => {
            diagnostics.in_scope(|| debug!("Restored {restored} bytes of unsent logs"));
            buffer
        }
        Err(e) => {
            diagnostics.in_scope(|| warn!("Discarding persisted logs: {e}"));
            LogBuffer::new(capacity, max_size)
        }
    }
}
