// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process log shipper for Logstash HTTP inputs.
//!
//! Application code hands structured events to a [`handler::LogstashHandler`] (directly or
//! through the [`layer::LogstashLayer`] `tracing` front end). Each event is encoded as one JSON
//! object and appended to a shared, size-capped [`buffer::LogBuffer`]. A background
//! [`scheduler::UploadScheduler`] wakes up every upload interval, posts everything buffered so
//! far to the configured endpoint and trims exactly the delivered bytes once the endpoint
//! answers `200 OK`. Failed uploads leave the data in place for the next tick.
//!
//! Everything is wired together once by [`shipper::Shipper::setup`], which validates the
//! configuration and fails early on anything that would leave the agent in a broken state.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod buffer;
pub mod config;
pub mod constants;
pub mod diagnostics;
pub mod errors;
pub mod flusher;
pub mod handler;
pub mod layer;
pub mod persistence;
pub mod record;
pub mod scheduler;
pub mod shipper;
pub mod value;
