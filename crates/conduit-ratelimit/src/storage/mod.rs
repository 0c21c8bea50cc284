pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::RateLimitError;

/// Shared fixed window counter backend
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key` and return the count in the current window
    ///
    /// The window starts on the first increment and the counter resets
    /// once `window` has elapsed.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, RateLimitError>;
}
