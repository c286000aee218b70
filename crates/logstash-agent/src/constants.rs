// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Seconds between two upload attempts.
pub const DEFAULT_UPLOAD_INTERVAL_SECS: f64 = 3.0;

/// Soft minimum size of the log buffer, rounded up to a power of two at setup.
pub const DEFAULT_BUFFER_CAPACITY: usize = 524_288;

/// Hard ceiling of the log buffer, rounded up to a power of two at setup.
/// Must be at least twice the (rounded) buffer capacity.
pub const DEFAULT_MAX_TOTAL_CAPACITY: usize = 4_194_304;

pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Separator written between two records in the buffer.
pub const RECORD_DELIMITER: u8 = b'\n';

/// Metadata key holding the source location of the log call.
pub const LOCATION_METADATA_KEY: &str = "location";

// Keep-alive hint sent with every upload. Short intervals get a timeout of three intervals so the
// connection survives between ticks; anything else falls back to the fixed default.
pub(crate) const KEEP_ALIVE_MAX_REQUESTS: u32 = 100;
pub(crate) const KEEP_ALIVE_DEFAULT_TIMEOUT_SECS: u64 = 30;
pub(crate) const KEEP_ALIVE_SHORT_INTERVAL_LIMIT_SECS: f64 = 10.0;

pub(crate) const POSITIVE_INFINITY_TOKEN: &str = "+inf";
pub(crate) const NEGATIVE_INFINITY_TOKEN: &str = "-inf";
pub(crate) const NAN_TOKEN: &str = "NaN";
