// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared, size-capped buffer of newline-framed log records.
//!
//! Application threads append to the buffer while the upload scheduler takes snapshots of it
//! and trims the delivered prefix. Every operation goes through one mutex and only touches
//! memory, so callers never wait on the network.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::constants::RECORD_DELIMITER;
use crate::errors::CapacityExceeded;

#[derive(Debug)]
pub struct LogBuffer {
    data: Mutex<Vec<u8>>,
    max_size: usize,
    // Signalled after every mutation so the persistence mirror can catch up
    changed: Option<Arc<Notify>>,
}

impl LogBuffer {
    /// Creates an empty buffer that preallocates `capacity` bytes and never grows past
    /// `max_size`.
    #[must_use]
    pub fn new(capacity: usize, max_size: usize) -> Self {
        Self {
            data: Mutex::new(Vec::with_capacity(capacity.min(max_size))),
            max_size,
            changed: None,
        }
    }

    /// Seeds the buffer with previously persisted contents. Contents larger than `max_size` are
    /// rejected so the ceiling holds from the start.
    pub fn with_contents(
        contents: Vec<u8>,
        capacity: usize,
        max_size: usize,
    ) -> Result<Self, CapacityExceeded> {
        if contents.len() > max_size {
            return Err(CapacityExceeded {
                needed: contents.len(),
                available: max_size,
                max_size,
            });
        }
        let mut data = Vec::with_capacity(capacity.min(max_size).max(contents.len()));
        data.extend_from_slice(&contents);
        Ok(Self {
            data: Mutex::new(data),
            max_size,
            changed: None,
        })
    }

    #[must_use]
    pub fn with_change_notifier(mut self, changed: Arc<Notify>) -> Self {
        self.changed = Some(changed);
        self
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock().expect("lock poisoned")
    }

    fn notify_changed(&self) {
        if let Some(changed) = &self.changed {
            changed.notify_one();
        }
    }

    /// Appends one encoded record, preceded by the delimiter unless the buffer is empty.
    ///
    /// Empty records are ignored. A record that does not fit leaves the buffer untouched.
    pub fn append(&self, record: &[u8]) -> Result<(), CapacityExceeded> {
        if record.is_empty() {
            return Ok(());
        }

        {
            let mut data = self.lock();
            let framing = usize::from(!data.is_empty());
            let needed = record.len() + framing;
            let available = self.max_size.saturating_sub(data.len());
            if needed > available {
                return Err(CapacityExceeded {
                    needed,
                    available,
                    max_size: self.max_size,
                });
            }
            if framing > 0 {
                data.push(RECORD_DELIMITER);
            }
            data.extend_from_slice(record);
        }

        self.notify_changed();
        Ok(())
    }

    /// Copy of the current contents. The buffer itself is not modified.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// Removes exactly the first `n` bytes, leaving the remainder untouched.
    /// Trimming the whole length (or more) empties the buffer.
    pub fn trim(&self, n: usize) {
        if n == 0 {
            return;
        }

        {
            let mut data = self.lock();
            if n >= data.len() {
                data.clear();
            } else {
                data.drain(..n);
            }
        }

        self.notify_changed();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    #[test]
    fn test_append_frames_records() {
        let buffer = LogBuffer::new(64, 64);
        buffer.append(b"first").unwrap();
        buffer.append(b"second").unwrap();
        assert_eq!(buffer.snapshot(), b"first\nsecond");
        assert_eq!(buffer.len(), 12);
    }

    #[test]
    fn test_append_empty_record_is_noop() {
        let buffer = LogBuffer::new(64, 64);
        buffer.append(b"").unwrap();
        assert!(buffer.is_empty());

        buffer.append(b"a").unwrap();
        buffer.append(b"").unwrap();
        assert_eq!(buffer.snapshot(), b"a");
    }

    #[test]
    fn test_append_exact_fit_succeeds() {
        let buffer = LogBuffer::new(8, 8);
        buffer.append(b"abc").unwrap();
        // 3 bytes + delimiter + 4 bytes == 8
        buffer.append(b"defg").unwrap();
        assert_eq!(buffer.len(), 8);
    }

    #[test]
    fn test_append_over_capacity_leaves_buffer_unchanged() {
        let buffer = LogBuffer::new(8, 8);
        buffer.append(b"abc").unwrap();

        let err = buffer.append(b"defgh").unwrap_err();
        assert_eq!(
            err,
            CapacityExceeded {
                needed: 6,
                available: 5,
                max_size: 8
            }
        );
        assert_eq!(buffer.snapshot(), b"abc");

        let err = LogBuffer::new(4, 4).append(b"12345").unwrap_err();
        assert_eq!(err.needed, 5);
    }

    #[test]
    fn test_trim_full_drain_empties_buffer() {
        let buffer = LogBuffer::new(64, 64);
        buffer.append(b"one").unwrap();
        buffer.append(b"two").unwrap();
        let snapshot = buffer.snapshot();

        buffer.trim(snapshot.len());
        assert!(buffer.is_empty());

        // A fresh append after a full drain is not preceded by a delimiter
        buffer.append(b"three").unwrap();
        assert_eq!(buffer.snapshot(), b"three");
    }

    #[test]
    fn test_trim_partial_drain_keeps_exact_suffix() {
        let buffer = LogBuffer::new(64, 64);
        buffer.append(b"one").unwrap();
        let sent = buffer.snapshot();
        buffer.append(b"two").unwrap();

        buffer.trim(sent.len());
        assert_eq!(buffer.snapshot(), b"\ntwo");
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_trim_zero_and_past_end() {
        let buffer = LogBuffer::new(64, 64);
        buffer.append(b"abc").unwrap();
        buffer.trim(0);
        assert_eq!(buffer.snapshot(), b"abc");
        buffer.trim(100);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_snapshot_survives_later_appends() {
        let buffer = LogBuffer::new(64, 64);
        buffer.append(b"sent").unwrap();
        let snapshot = buffer.snapshot();
        buffer.append(b"late").unwrap();

        assert_eq!(snapshot, b"sent");
        buffer.trim(snapshot.len());
        assert_eq!(buffer.snapshot(), b"\nlate");
    }

    #[test]
    fn test_with_contents_respects_ceiling() {
        let buffer = LogBuffer::with_contents(b"persisted".to_vec(), 4, 16).unwrap();
        assert_eq!(buffer.snapshot(), b"persisted");
        buffer.append(b"next").unwrap();
        assert_eq!(buffer.snapshot(), b"persisted\nnext");

        assert!(LogBuffer::with_contents(vec![b'x'; 17], 4, 16).is_err());
    }

    #[tokio::test]
    async fn test_mutations_notify_mirror() {
        let changed = Arc::new(Notify::new());
        let buffer = LogBuffer::new(64, 64).with_change_notifier(Arc::clone(&changed));

        buffer.append(b"abc").unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), changed.notified())
            .await
            .expect("append should notify");

        buffer.trim(3);
        tokio::time::timeout(std::time::Duration::from_secs(1), changed.notified())
            .await
            .expect("trim should notify");
    }

    #[test]
    fn test_concurrent_appends() {
        let buffer = Arc::new(LogBuffer::new(1 << 16, 1 << 16));
        let writers = 8;
        let per_writer = 50;

        let handles: Vec<_> = (0..writers)
            .map(|writer| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..per_writer {
                        let record = format!("{{\"writer\":{writer},\"seq\":{i}}}");
                        buffer.append(record.as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut expected_len = 0;
        for writer in 0..writers {
            for i in 0..per_writer {
                expected_len += format!("{{\"writer\":{writer},\"seq\":{i}}}").len();
            }
        }
        let records = writers * per_writer;
        expected_len += records - 1;

        let contents = buffer.snapshot();
        assert_eq!(contents.len(), expected_len);

        let lines: Vec<&[u8]> = contents.split(|b| *b == RECORD_DELIMITER).collect();
        assert_eq!(lines.len(), records);
        for line in lines {
            let parsed: serde_json::Value = serde_json::from_slice(line).unwrap();
            assert!(parsed["writer"].is_u64());
        }
    }

    proptest! {
        #[test]
        fn prop_trim_leaves_exact_suffix(
            records in proptest::collection::vec(
                proptest::collection::vec(b'a'..=b'z', 0..16),
                0..12,
            ),
            cut in 0.0f64..=1.0,
        ) {
            let buffer = LogBuffer::new(1024, 4096);
            for record in &records {
                buffer.append(record).unwrap();
            }
            let before = buffer.snapshot();
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
            let k = (before.len() as f64 * cut) as usize;

            buffer.trim(k);
            prop_assert_eq!(buffer.snapshot(), before[k..].to_vec());
        }
    }
}
