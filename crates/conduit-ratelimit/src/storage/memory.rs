use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::CounterStore;
use crate::error::RateLimitError;

/// In-process fixed window counters (single instance only)
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<String, Window>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, RateLimitError> {
        let now = Instant::now();

        let mut entry = self.windows.entry(key.to_owned()).or_insert(Window { started: now, count: 0 });

        if now.duration_since(entry.started) >= window {
            *entry = Window { started: now, count: 0 };
        }

        entry.count += 1;

        Ok(entry.count)
    }
}
