use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;

use super::CounterStore;
use crate::error::RateLimitError;

/// Redis-backed fixed window counters shared by every gateway instance
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    connection: Arc<OnceCell<ConnectionManager>>,
    key_prefix: String,
}

impl RedisStore {
    /// Create a store for the given Redis URL
    ///
    /// No connection is opened until the first increment. The manager
    /// created then is shared by every clone and reconnects on its own.
    pub fn new(url: &str, key_prefix: impl Into<String>) -> Result<Self, RateLimitError> {
        let client =
            redis::Client::open(url).map_err(|e| RateLimitError::Config(format!("invalid Redis URL: {e}")))?;

        Ok(Self {
            client,
            connection: Arc::new(OnceCell::new()),
            key_prefix: key_prefix.into(),
        })
    }

    /// Shared connection, established on first use
    ///
    /// A failed attempt leaves the cell empty so the next call retries.
    async fn connection(&self) -> Result<ConnectionManager, RateLimitError> {
        let manager = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await
            .map_err(|e| RateLimitError::Storage(format!("failed to connect: {e}")))?;

        Ok(manager.clone())
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, RateLimitError> {
        use redis::AsyncCommands;

        let mut conn = self.connection().await?;
        let counter_key = format!("{}{key}", self.key_prefix);

        let count: u64 = conn
            .incr(&counter_key, 1_u64)
            .await
            .map_err(|e| RateLimitError::Storage(format!("INCR failed: {e}")))?;

        // The first hit in a window starts its expiry
        if count == 1 {
            let window_secs = i64::try_from(window.as_secs().max(1)).unwrap_or(i64::MAX);
            let _: () = conn
                .expire(&counter_key, window_secs)
                .await
                .map_err(|e| RateLimitError::Storage(format!("EXPIRE failed: {e}")))?;
        }

        Ok(count)
    }
}
