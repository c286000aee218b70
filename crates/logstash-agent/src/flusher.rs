// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use tracing::debug;

use crate::config::ShipperConfig;
use crate::constants::{
    KEEP_ALIVE_DEFAULT_TIMEOUT_SECS, KEEP_ALIVE_MAX_REQUESTS, KEEP_ALIVE_SHORT_INTERVAL_LIMIT_SECS,
};
use crate::errors::{ConfigurationError, DeliveryError};

const KEEP_ALIVE: &str = "keep-alive";
const APPLICATION_JSON: &str = "application/json";

/// Sends buffered log data to the Logstash HTTP input.
#[derive(Debug, Clone)]
pub struct Flusher {
    client: reqwest::Client,
    endpoint: Url,
}

impl Flusher {
    pub fn new(config: &ShipperConfig) -> Result<Self, ConfigurationError> {
        let endpoint = config.endpoint.url()?;
        let headers = default_headers(config.upload_interval)?;

        // Keep-Alive is a connection header, HTTP/2 would drop it
        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .http1_only()
            .timeout(config.flush_timeout);
        if let Some(proxy) = &config.https_proxy {
            let proxy = reqwest::Proxy::https(proxy)
                .map_err(|e| ConfigurationError::HttpClient(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| ConfigurationError::HttpClient(e.to_string()))?;

        Ok(Self { client, endpoint })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Posts one payload. Only `200 OK` counts as delivered.
    pub async fn send(&self, body: Vec<u8>) -> Result<(), DeliveryError> {
        let size = body.len();
        let response = self
            .client
            .post(self.endpoint.clone())
            .body(body)
            .send()
            .await
            .map_err(|source| DeliveryError::Transport {
                endpoint: self.endpoint.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => {
                debug!("Delivered {size} bytes of logs to {}", self.endpoint);
                Ok(())
            }
            status => Err(DeliveryError::Status {
                endpoint: self.endpoint.to_string(),
                status,
            }),
        }
    }
}

/// `Keep-Alive` value for the given upload interval: three intervals for short, non-zero
/// intervals, the fixed default otherwise.
#[must_use]
pub fn keep_alive_header(upload_interval: Duration) -> String {
    let secs = upload_interval.as_secs_f64();
    let timeout = if secs > 0.0 && secs < KEEP_ALIVE_SHORT_INTERVAL_LIMIT_SECS {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let timeout = (secs * 3.0) as u64;
        timeout
    } else {
        KEEP_ALIVE_DEFAULT_TIMEOUT_SECS
    };
    format!("timeout={timeout}, max={KEEP_ALIVE_MAX_REQUESTS}")
}

fn default_headers(upload_interval: Duration) -> Result<HeaderMap, ConfigurationError> {
    let keep_alive = HeaderValue::from_str(&keep_alive_header(upload_interval))
        .map_err(|e| ConfigurationError::HttpClient(e.to_string()))?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
    headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
    headers.insert(KEEP_ALIVE, keep_alive);
    Ok(headers)
}
