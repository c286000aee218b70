// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

use crate::constants::{
    DEFAULT_BUFFER_CAPACITY, DEFAULT_FLUSH_TIMEOUT, DEFAULT_MAX_TOTAL_CAPACITY,
    DEFAULT_UPLOAD_INTERVAL_SECS,
};
use crate::diagnostics::DiagnosticsSink;
use crate::errors::ConfigurationError;

/// Address of the Logstash HTTP input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub use_https: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, use_https: bool) -> Self {
        Self {
            host: host.into(),
            port,
            use_https,
        }
    }

    /// URL every upload is posted to.
    pub fn url(&self) -> Result<Url, ConfigurationError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ConfigurationError::MissingHost);
        }
        if self.port == 0 {
            return Err(ConfigurationError::InvalidPort);
        }

        let scheme = if self.use_https { "https" } else { "http" };
        // Bare IPv6 literals need brackets to be part of a URL
        let url = if host.contains(':') && !host.starts_with('[') {
            format!("{scheme}://[{host}]:{}", self.port)
        } else {
            format!("{scheme}://{host}:{}", self.port)
        };

        let parsed = Url::parse(&url).map_err(|e| ConfigurationError::InvalidEndpoint {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        if parsed.host_str().is_none() || parsed.path() != "/" {
            return Err(ConfigurationError::InvalidEndpoint {
                url,
                reason: "host must not contain a path".to_string(),
            });
        }
        Ok(parsed)
    }
}

impl Default for Endpoint {
    /// An unconfigured endpoint. Setup rejects it until a host and port are filled in.
    fn default() -> Self {
        Self::new("", 0, false)
    }
}

/// Configuration of the log shipper, fixed at setup.
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// Logstash HTTP input receiving the uploads
    pub endpoint: Endpoint,
    /// Time between two upload attempts
    pub upload_interval: Duration,
    /// Memory preallocated for the buffer, rounded up to a power of two
    pub buffer_capacity: usize,
    /// Hard ceiling of the buffer, rounded up to a power of two
    pub max_total_capacity: usize,
    /// Where the agent's own warnings and errors go
    pub diagnostics: DiagnosticsSink,
    /// File mirroring unsent logs across restarts
    pub persistence_path: Option<PathBuf>,
    /// Timeout of a single upload request
    pub flush_timeout: Duration,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Whether shutdown makes one last upload attempt
    pub flush_on_shutdown: bool,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            upload_interval: Duration::from_secs_f64(DEFAULT_UPLOAD_INTERVAL_SECS),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_total_capacity: DEFAULT_MAX_TOTAL_CAPACITY,
            diagnostics: DiagnosticsSink::default(),
            persistence_path: None,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            https_proxy: None,
            flush_on_shutdown: true,
        }
    }
}

impl ShipperConfig {
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let host = env::var("LOGSTASH_HOST").map_err(|_| ConfigurationError::MissingHost)?;
        let port = parse_env::<u16>("LOGSTASH_PORT")?.ok_or(ConfigurationError::InvalidPort)?;
        let use_https = env::var("LOGSTASH_USE_HTTPS")
            .map(|val| matches!(val.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        let upload_interval = match parse_env::<f64>("LOGSTASH_UPLOAD_INTERVAL")? {
            Some(secs) => interval_from_secs(secs)?,
            None => Duration::from_secs_f64(DEFAULT_UPLOAD_INTERVAL_SECS),
        };
        let buffer_capacity =
            parse_env("LOGSTASH_BUFFER_CAPACITY")?.unwrap_or(DEFAULT_BUFFER_CAPACITY);
        let max_total_capacity =
            parse_env("LOGSTASH_MAX_TOTAL_CAPACITY")?.unwrap_or(DEFAULT_MAX_TOTAL_CAPACITY);
        let persistence_path = env::var("LOGSTASH_PERSISTENCE_PATH")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        let flush_timeout = parse_env::<u64>("LOGSTASH_FLUSH_TIMEOUT")?
            .map_or(DEFAULT_FLUSH_TIMEOUT, Duration::from_secs);
        let https_proxy = env::var("LOGSTASH_PROXY_HTTPS")
            .or_else(|_| env::var("HTTPS_PROXY"))
            .ok();

        let config = Self {
            endpoint: Endpoint::new(host, port, use_https),
            upload_interval,
            buffer_capacity,
            max_total_capacity,
            diagnostics: DiagnosticsSink::default(),
            persistence_path,
            flush_timeout,
            https_proxy,
            flush_on_shutdown: true,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.endpoint.url()?;

        if self.upload_interval.is_zero() {
            return Err(ConfigurationError::InvalidUploadInterval(0.0));
        }

        self.capacities()?;
        self.diagnostics.check_feedback_loop()
    }

    /// Buffer capacity and hard ceiling, both rounded up to a power of two.
    ///
    /// The ceiling has to leave room for at least two full buffers.
    pub fn capacities(&self) -> Result<(usize, usize), ConfigurationError> {
        let too_low = || ConfigurationError::MaximumCapacityTooLow {
            buffer_capacity: self.buffer_capacity,
            max_total_capacity: self.max_total_capacity,
        };

        let capacity = self
            .buffer_capacity
            .checked_next_power_of_two()
            .ok_or_else(too_low)?;
        let max_size = self
            .max_total_capacity
            .checked_next_power_of_two()
            .ok_or_else(too_low)?;

        match capacity.checked_mul(2) {
            Some(required) if max_size >= required => Ok((capacity, max_size)),
            _ => Err(too_low()),
        }
    }
}

fn interval_from_secs(secs: f64) -> Result<Duration, ConfigurationError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigurationError::InvalidUploadInterval(secs));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigurationError::InvalidUploadInterval(secs))
}

fn parse_env<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigurationError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigurationError::Env { name, value }),
        Err(_) => Ok(None),
    }
}
