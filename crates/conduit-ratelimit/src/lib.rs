#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

mod error;
pub mod storage;

use std::sync::Arc;

use conduit_config::{FailurePolicy, RateLimitConfig, RateLimitStorage};
use conduit_core::RateLimit;

pub use error::RateLimitError;
pub use storage::{CounterStore, memory::MemoryStore, redis::RedisStore};

/// Per virtual key fixed window limiter
///
/// Counters are keyed by the virtual key secret followed by the unit name,
/// so each unit of a key has its own window.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    failure_policy: FailurePolicy,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, failure_policy: FailurePolicy) -> Self {
        Self { store, failure_policy }
    }

    /// Create a limiter from configuration
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        let store: Arc<dyn CounterStore> = match &config.storage {
            RateLimitStorage::Memory => Arc::new(MemoryStore::new()),
            RateLimitStorage::Redis(redis) => Arc::new(RedisStore::new(redis.url.as_str(), redis.key_prefix.clone())?),
        };

        Ok(Self::new(store, config.failure_policy))
    }

    /// Count one request against `rule` and report whether it fits the budget
    ///
    /// Counter store failures resolve through the configured
    /// [`FailurePolicy`].
    pub async fn allow(&self, secret: &str, rule: RateLimit) -> bool {
        let key = counter_key(secret, rule);

        match self.store.increment(&key, rule.unit.window()).await {
            Ok(count) => count <= rule.limit,
            Err(e) => {
                let allowed = self.failure_policy == FailurePolicy::Open;
                tracing::warn!(
                    unit = %rule.unit,
                    allowed,
                    error = %e,
                    "rate limit counter store unavailable, applying failure policy"
                );
                allowed
            }
        }
    }
}

fn counter_key(secret: &str, rule: RateLimit) -> String {
    format!("{secret}{}", rule.unit)
}
