#![allow(clippy::must_use_candidate)]

pub mod env;
mod loader;
pub mod rate_limit;
pub mod telemetry;

use std::{collections::BTreeMap, time::Duration};

use conduit_core::{ApiKey, ProviderConfig, VirtualKeyConfig};
use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

pub use rate_limit::*;
pub use telemetry::TelemetryConfig;

/// Top-level Conduit configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Relational store holding providers, API keys and virtual keys
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// Change-notification listener settings
    #[serde(default)]
    pub listener: ListenerConfig,
    /// Virtual key rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Request path settings
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Per-provider settings keyed by provider name
    ///
    /// Seeds the in-memory config source when no database is configured.
    /// With a database, only `base_url` is used, as the fallback for
    /// providers whose stored record has none.
    #[serde(default)]
    pub providers: IndexMap<String, ProviderSection>,
    /// Virtual keys for the in-memory config source
    #[serde(default)]
    pub virtual_keys: Vec<VirtualKeyConfig>,
    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}

impl Config {
    /// Provider records declared in the file
    pub fn provider_records(&self) -> Vec<ProviderConfig> {
        self.providers
            .iter()
            .map(|(name, section)| ProviderConfig {
                name: name.clone(),
                base_url: section.base_url.clone(),
                custom_headers: section.custom_headers.clone(),
                keys: section.keys.clone(),
            })
            .collect()
    }

    /// Base URL fallbacks keyed by provider name
    pub fn base_url_fallbacks(&self) -> BTreeMap<String, Url> {
        self.providers
            .iter()
            .filter_map(|(name, section)| section.base_url.clone().map(|url| (name.clone(), url)))
            .collect()
    }
}

/// Postgres connection and notification settings
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Connection URL
    pub url: SecretString,
    /// Notification channel carrying `<resource>:<OPERATION>` payloads
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Maximum pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Pool acquire timeout (e.g. "5s")
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: String,
}

impl DatabaseConfig {
    /// Parsed pool acquire timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the timeout is not a valid duration
    pub fn acquire_timeout(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.acquire_timeout)
    }
}

/// Reconnect backoff for the change-notification listener
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// Delay before the first reconnect attempt
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff: String,
    /// Upper bound for the exponential backoff
    #[serde(default = "default_max_backoff")]
    pub max_backoff: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl ListenerConfig {
    /// Parsed `(initial, max)` backoff bounds
    ///
    /// # Errors
    ///
    /// Returns an error if either bound is not a valid duration
    pub fn backoff(&self) -> anyhow::Result<(Duration, Duration)> {
        Ok((parse_duration(&self.initial_backoff)?, parse_duration(&self.max_backoff)?))
    }
}

/// Request path settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Reject requests that carry no virtual key
    #[serde(default = "default_true")]
    pub require_virtual_key: bool,
    /// Capacity of the per-stream chunk queue
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            require_virtual_key: true,
            stream_buffer: default_stream_buffer(),
        }
    }
}

/// One `[providers.<name>]` table
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderSection {
    #[serde(default)]
    pub base_url: Option<Url>,
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub keys: Vec<ApiKey>,
}

/// Parse a human duration such as `"500ms"` or `"1m"`
///
/// # Errors
///
/// Returns an error if the string is not a valid duration
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    duration_str::parse(s).map_err(|e| anyhow::anyhow!("invalid duration '{s}': {e}"))
}

fn default_channel() -> String {
    "config_changes".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> String {
    "5s".to_string()
}

fn default_initial_backoff() -> String {
    "500ms".to_string()
}

fn default_max_backoff() -> String {
    "30s".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_stream_buffer() -> usize {
    64
}
