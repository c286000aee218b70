// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic upload of the log buffer.
//!
//! One background loop per shipper sleeps for the upload interval, then runs a [`tick`]:
//! snapshot the buffer, post the snapshot, and on `200 OK` trim exactly the posted bytes.
//! Records appended while the request is in flight are past the snapshot and stay buffered
//! for the next tick. A failed upload trims nothing; the same data goes out again one
//! interval later.
//!
//! [`tick`]: UploadScheduler::tick

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::buffer::LogBuffer;
use crate::diagnostics::DiagnosticsSink;
use crate::errors::DeliveryError;
use crate::flusher::Flusher;

/// Result of a single upload cycle.
#[derive(Debug)]
pub enum FlushOutcome {
    /// Nothing was buffered; no request was made.
    Empty,
    /// Another upload was still running.
    InFlight,
    /// The endpoint accepted the upload and `bytes` were trimmed from the buffer.
    Delivered { bytes: usize },
    /// The upload failed and the buffer was left as is.
    Retained { error: DeliveryError },
}

pub struct UploadScheduler {
    buffer: Arc<LogBuffer>,
    flusher: Flusher,
    interval: Duration,
    runtime: Handle,
    diagnostics: DiagnosticsSink,
    in_flight: AtomicBool,
    cancel_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl UploadScheduler {
    #[must_use]
    pub fn new(
        buffer: Arc<LogBuffer>,
        flusher: Flusher,
        interval: Duration,
        runtime: Handle,
        diagnostics: DiagnosticsSink,
    ) -> Self {
        Self {
            buffer,
            flusher,
            interval,
            runtime,
            diagnostics,
            in_flight: AtomicBool::new(false),
            cancel_token: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    #[allow(clippy::expect_used)]
    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().expect("lock poisoned")
    }

    /// Starts the upload loop. Does nothing if it is already running or after shutdown.
    pub fn start(self: &Arc<Self>) {
        if self.cancel_token.is_cancelled() {
            return;
        }

        let mut task = self.task();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let scheduler = Arc::clone(self);
        let upload_loop = self.diagnostics.instrument(scheduler.run());
        *task = Some(self.runtime.spawn(upload_loop));
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    async fn run(self: Arc<Self>) {
        debug!(
            "Log upload loop started, uploading to {} every {:?}",
            self.flusher.endpoint(),
            self.interval
        );
        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
            self.tick().await;
        }
        debug!("Log upload loop stopped");
    }

    /// Runs one upload cycle.
    pub async fn tick(&self) -> FlushOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Previous log upload still in flight, skipping");
            return FlushOutcome::InFlight;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let snapshot = self.buffer.snapshot();
        if snapshot.is_empty() {
            return FlushOutcome::Empty;
        }

        let bytes = snapshot.len();
        match self.flusher.send(snapshot).await {
            Ok(()) => {
                self.buffer.trim(bytes);
                FlushOutcome::Delivered { bytes }
            }
            Err(error) => {
                warn!("Failed to upload logs, retrying next interval: {error}");
                FlushOutcome::Retained { error }
            }
        }
    }

    /// Stops the upload loop. An upload already in flight runs to completion first.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let handle = self.task().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                self.diagnostics
                    .in_scope(|| error!("Log upload loop failed: {e}"));
            }
        }
    }
}
