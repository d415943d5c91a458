// src/config.rs

//! Gateway configuration: loading from TOML, defaults, and validation.

use crate::connection::Correlation;
use crate::core::GatewireError;
use crate::core::transport::{TlsAttributes, TransportAddress};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// A named backend endpoint: either a local socket `path`, or `host` and
/// `port`. An optional `tls` table decorates it with TLS when complete.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsAttributes>,
}

impl EndpointConfig {
    /// Builds the transport address this entry describes.
    pub fn to_address(&self) -> Result<TransportAddress, GatewireError> {
        let address = match (&self.path, &self.host, self.port) {
            (Some(path), None, None) => TransportAddress::local(path),
            (None, Some(host), Some(port)) => TransportAddress::tcp(host.clone(), port),
            _ => {
                return Err(GatewireError::InvalidState(
                    "an endpoint needs either 'path' or both 'host' and 'port'".into(),
                ));
            }
        };
        Ok(match &self.tls {
            Some(attributes) => address.with_tls(attributes.clone()),
            None => address,
        })
    }
}

/// The resolved gateway configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How long a request waits for its reply unless the call overrides it.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Sessions unused for longer than this are dropped by the idle sweep.
    #[serde(default = "default_session_idle_timeout", with = "humantime_serde")]
    pub session_idle_timeout: Duration,
    /// A pooled connection is retired after this many timeouts in a row.
    #[serde(default = "default_max_consecutive_timeouts")]
    pub max_consecutive_timeouts: u32,
    #[serde(default = "default_unsolicited_queue_capacity")]
    pub unsolicited_queue_capacity: usize,
    #[serde(default)]
    pub correlation: Correlation,
    #[serde(default)]
    pub endpoints: BTreeMap<String, EndpointConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_session_idle_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}
fn default_max_consecutive_timeouts() -> u32 {
    3
}
fn default_unsolicited_queue_capacity() -> usize {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            session_idle_timeout: default_session_idle_timeout(),
            max_consecutive_timeouts: default_max_consecutive_timeouts(),
            unsolicited_queue_capacity: default_unsolicited_queue_capacity(),
            correlation: Correlation::default(),
            endpoints: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Loads and validates the configuration at `path`.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid configuration in '{path}'"))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(anyhow!("request_timeout cannot be 0"));
        }
        if self.connect_timeout.is_zero() {
            return Err(anyhow!("connect_timeout cannot be 0"));
        }
        if self.max_consecutive_timeouts == 0 {
            return Err(anyhow!("max_consecutive_timeouts cannot be 0"));
        }
        if self.unsolicited_queue_capacity == 0 {
            return Err(anyhow!("unsolicited_queue_capacity cannot be 0"));
        }

        for (name, endpoint) in &self.endpoints {
            if let Some(host) = &endpoint.host
                && host.trim().is_empty()
            {
                return Err(anyhow!("endpoint '{name}': host cannot be empty"));
            }
            if endpoint.port == Some(0) {
                return Err(anyhow!("endpoint '{name}': port cannot be 0"));
            }
            endpoint
                .to_address()
                .map_err(|e| anyhow!("endpoint '{name}': {e}"))?;
        }
        Ok(())
    }
}
