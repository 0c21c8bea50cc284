use serde::Deserialize;
use url::Url;

/// Virtual key rate limiting configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Counter store backend
    #[serde(default)]
    pub storage: RateLimitStorage,
    /// What to do when the counter store cannot be reached
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

/// Rate limit counter storage backend
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RateLimitStorage {
    /// In-memory storage (single instance only)
    #[default]
    Memory,
    /// Redis-backed storage shared by all gateway instances
    Redis(RedisConfig),
}

/// Redis configuration for rate limiting
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: Url,
    /// Prefix prepended to every counter key
    #[serde(default)]
    pub key_prefix: String,
}

/// Outcome applied when the counter store fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Allow the request
    #[default]
    Open,
    /// Reject the request
    Closed,
}
