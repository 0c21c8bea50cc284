#![allow(dead_code)]

pub mod mock_upstream;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use conduit_config::{FailurePolicy, GatewayConfig};
use conduit_core::{ApiKey, ProviderConfig, RateLimit, VirtualKeyConfig};
use conduit_llm::{Gateway, Router, Transport};
use conduit_ratelimit::{MemoryStore, RateLimiter};
use conduit_store::{ConfigStore, MemorySource};
use secrecy::SecretString;
use url::Url;

/// Upstream key every provider record carries by default
pub const UPSTREAM_KEY: &str = "sk-upstream";

/// Provider record with one default key pointing at `base_url`
pub fn provider(name: &str, base_url: Url) -> ProviderConfig {
    let mut config = ProviderConfig::new(name);
    config.base_url = Some(base_url);
    config.keys = vec![api_key("primary", UPSTREAM_KEY, true)];
    config
}

pub fn api_key(name: &str, value: &str, is_default: bool) -> ApiKey {
    ApiKey {
        name: name.to_owned(),
        value: SecretString::from(value.to_owned()),
        enabled: true,
        is_default,
    }
}

pub fn virtual_key(secret: &str, providers: &[&str], models: &[&str], rate_limits: Vec<RateLimit>) -> VirtualKeyConfig {
    VirtualKeyConfig {
        secret: secret.to_owned(),
        name: format!("{secret}-name"),
        enabled: true,
        allowed_providers: providers.iter().map(|&p| p.to_owned()).collect::<HashSet<_>>(),
        allowed_models: models.iter().map(|&m| m.to_owned()).collect::<HashSet<_>>(),
        rate_limits,
    }
}

/// Gateway over an in-memory config source with the standard middleware chain
pub struct TestGateway {
    pub source: Arc<MemorySource>,
    pub store: Arc<ConfigStore>,
    pub gateway: Gateway,
}

impl TestGateway {
    pub async fn new(providers: Vec<ProviderConfig>, virtual_keys: Vec<VirtualKeyConfig>) -> anyhow::Result<Self> {
        Self::with_config(providers, virtual_keys, &GatewayConfig::default()).await
    }

    pub async fn with_config(
        providers: Vec<ProviderConfig>,
        virtual_keys: Vec<VirtualKeyConfig>,
        config: &GatewayConfig,
    ) -> anyhow::Result<Self> {
        let source = Arc::new(MemorySource::from_records(providers, virtual_keys));
        let store = Arc::new(ConfigStore::load(source.clone()).await?);

        let router = Router::new(Arc::clone(&store), Transport::new(config.stream_buffer));
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), FailurePolicy::Open);
        let gateway = Gateway::standard(router, limiter, config);

        Ok(Self { source, store, gateway })
    }
}

/// Poll `check` until it holds or the timeout passes
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    check().await
}
