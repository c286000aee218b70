// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Optional crash-recovery copy of the log buffer.
//!
//! When enabled, a background task mirrors the buffer to durable storage after every
//! mutation, so that buffered-but-unsent records survive a process restart. Bursts of
//! mutations are coalesced into a single write of the latest contents. Failures are logged
//! and otherwise ignored: the in-memory buffer stays authoritative.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::buffer::LogBuffer;
use crate::errors::PersistenceError;

/// Durable storage for the unsent buffer contents.
pub trait BufferMirror: Send + Sync {
    /// Contents stored by a previous run, if any.
    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Replaces the stored contents.
    fn store(&self, contents: &[u8]) -> Result<(), PersistenceError>;
}

/// Keeps the buffer in a single file, replaced atomically through a rename.
#[derive(Debug, Clone)]
pub struct FileMirror {
    path: PathBuf,
}

impl FileMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        PathBuf::from(staging)
    }

    fn error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl BufferMirror for FileMirror {
    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        match fs::read(&self.path) {
            Ok(contents) if contents.is_empty() => Ok(None),
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.error(e)),
        }
    }

    fn store(&self, contents: &[u8]) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.error(e))?;
            }
        }
        let staging = self.staging_path();
        fs::write(&staging, contents).map_err(|e| self.error(e))?;
        fs::rename(&staging, &self.path).map_err(|e| self.error(e))
    }
}

/// Background task writing the buffer to a [`BufferMirror`] whenever it changes.
pub struct MirrorTask {
    buffer: Arc<LogBuffer>,
    mirror: Arc<dyn BufferMirror>,
    changed: Arc<Notify>,
    cancel_token: CancellationToken,
}

impl MirrorTask {
    #[must_use]
    pub fn new(
        buffer: Arc<LogBuffer>,
        mirror: Arc<dyn BufferMirror>,
        changed: Arc<Notify>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            buffer,
            mirror,
            changed,
            cancel_token,
        }
    }

    pub async fn run(self) {
        debug!("Log buffer mirror started");
        loop {
            let stopping = tokio::select! {
                () = self.changed.notified() => false,
                () = self.cancel_token.cancelled() => true,
            };

            self.write_snapshot().await;

            if stopping {
                break;
            }
        }
        debug!("Log buffer mirror stopped");
    }

    async fn write_snapshot(&self) {
        let contents = self.buffer.snapshot();
        let mirror = Arc::clone(&self.mirror);
        match tokio::task::spawn_blocking(move || mirror.store(&contents)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to mirror log buffer: {e}"),
            Err(e) => error!("Log buffer mirror task failed: {e}"),
        }
    }
}
