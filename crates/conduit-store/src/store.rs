use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use conduit_config::env::expand_value;
use conduit_core::{ApiKey, ProviderConfig, VirtualKeyConfig};
use secrecy::{ExposeSecret, SecretString};
use strum::IntoEnumIterator;
use tokio::sync::RwLock;

use crate::{
    coalesce::ReloadCoalescer,
    error::StoreError,
    event::{ConfigChangeEvent, Operation, ResourceKind},
    listener::ChangeHandler,
    source::{ApiKeyRecord, ConfigSource, ProviderRecord},
};

/// In-memory cache of provider configs and virtual keys
///
/// Readers share one `RwLock`; reloads query the source without holding
/// it and take the write lock only to swap in the result.
pub struct ConfigStore {
    source: Arc<dyn ConfigSource>,
    state: RwLock<Snapshot>,
    coalescer: ReloadCoalescer,
}

#[derive(Default)]
struct Snapshot {
    /// Keyed by lowercased provider name
    providers: HashMap<String, ProviderEntry>,
    /// Keyed by secret
    virtual_keys: HashMap<String, Arc<VirtualKeyConfig>>,
}

#[derive(Clone)]
struct ProviderEntry {
    config: Arc<ProviderConfig>,
    /// `false` for providers known only through their API keys
    has_settings: bool,
}

/// Cached record counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCounts {
    pub providers: usize,
    pub api_keys: usize,
    pub virtual_keys: usize,
}

impl ConfigStore {
    /// Build the store with a full load of all three relations
    ///
    /// # Errors
    ///
    /// Returns the first load failure; there is no previous cache to fall
    /// back to at construction.
    pub async fn load(source: Arc<dyn ConfigSource>) -> Result<Self, StoreError> {
        let store = Self {
            source,
            state: RwLock::new(Snapshot::default()),
            coalescer: ReloadCoalescer::default(),
        };

        for kind in ResourceKind::iter() {
            store.reload(kind).await?;
        }

        Ok(store)
    }

    /// Look up a provider by name, ignoring ASCII case
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ProviderNotFound`] when no such provider is cached
    pub async fn get_provider_config(&self, name: &str) -> Result<Arc<ProviderConfig>, StoreError> {
        let state = self.state.read().await;

        state
            .providers
            .get(&name.to_ascii_lowercase())
            .map(|entry| Arc::clone(&entry.config))
            .ok_or_else(|| StoreError::ProviderNotFound(name.to_owned()))
    }

    /// Look up an enabled virtual key by its secret
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::VirtualKeyNotFound`] for unknown or disabled keys
    pub async fn get_virtual_key(&self, secret: &str) -> Result<Arc<VirtualKeyConfig>, StoreError> {
        let state = self.state.read().await;

        state
            .virtual_keys
            .get(secret)
            .filter(|key| key.enabled)
            .map(Arc::clone)
            .ok_or(StoreError::VirtualKeyNotFound)
    }

    pub async fn counts(&self) -> StoreCounts {
        let state = self.state.read().await;

        StoreCounts {
            providers: state.providers.len(),
            api_keys: state.providers.values().map(|entry| entry.config.keys.len()).sum(),
            virtual_keys: state.virtual_keys.len(),
        }
    }

    /// Reload exactly one resource kind from the source
    ///
    /// # Errors
    ///
    /// Returns the source error; the cache is left untouched in that case
    pub async fn reload(&self, kind: ResourceKind) -> Result<(), StoreError> {
        match kind {
            ResourceKind::Providers => {
                let records = self.source.load_providers().await?;
                let count = records.len();
                self.apply_providers(records).await;
                tracing::debug!(resource = %kind, count, "reloaded configuration");
            }
            ResourceKind::ApiKeys => {
                let records = self.source.load_api_keys().await?;
                let count = records.len();
                self.apply_api_keys(records).await;
                tracing::debug!(resource = %kind, count, "reloaded configuration");
            }
            ResourceKind::VirtualKeys => {
                let keys = self.source.load_virtual_keys().await?;
                let count = keys.len();
                let next = keys
                    .into_iter()
                    .map(|key| (key.secret.clone(), Arc::new(key)))
                    .collect();
                self.state.write().await.virtual_keys = next;
                tracing::debug!(resource = %kind, count, "reloaded configuration");
            }
        }

        Ok(())
    }

    /// Replace provider settings, carrying each provider's keys over
    async fn apply_providers(&self, records: Vec<ProviderRecord>) {
        let mut state = self.state.write().await;
        let mut next = HashMap::with_capacity(records.len());

        for record in records {
            let id = record.name.to_ascii_lowercase();
            let keys = state
                .providers
                .get(&id)
                .map(|entry| entry.config.keys.clone())
                .unwrap_or_default();

            let config = ProviderConfig {
                name: record.name,
                base_url: record.base_url,
                custom_headers: record.custom_headers,
                keys,
            };

            next.insert(
                id,
                ProviderEntry {
                    config: Arc::new(config),
                    has_settings: true,
                },
            );
        }

        // Providers whose settings row is gone stay reachable while they still have keys
        for (id, entry) in &state.providers {
            if !next.contains_key(id) && !entry.config.keys.is_empty() {
                let mut config = ProviderConfig::new(entry.config.name.clone());
                config.keys.clone_from(&entry.config.keys);
                next.insert(
                    id.clone(),
                    ProviderEntry {
                        config: Arc::new(config),
                        has_settings: false,
                    },
                );
            }
        }

        state.providers = next;
    }

    /// Re-merge API keys into existing providers without touching their settings
    async fn apply_api_keys(&self, records: Vec<ApiKeyRecord>) {
        let mut grouped: HashMap<String, (String, Vec<ApiKey>)> = HashMap::new();

        for ApiKeyRecord { provider, mut key } in records {
            match expand_value(key.value.expose_secret()) {
                Ok(value) => key.value = SecretString::from(value),
                Err(e) => {
                    tracing::warn!(provider = %provider, key = %key.name, error = %e, "skipping API key");
                    continue;
                }
            }

            grouped
                .entry(provider.to_ascii_lowercase())
                .or_insert_with(|| (provider.clone(), Vec::new()))
                .1
                .push(key);
        }

        let mut state = self.state.write().await;
        let mut next = HashMap::with_capacity(state.providers.len());

        for (id, entry) in &state.providers {
            let keys = grouped.remove(id).map(|(_, keys)| keys).unwrap_or_default();

            if !entry.has_settings && keys.is_empty() {
                continue;
            }

            let mut config = ProviderConfig::clone(&entry.config);
            config.keys = keys;
            next.insert(
                id.clone(),
                ProviderEntry {
                    config: Arc::new(config),
                    has_settings: entry.has_settings,
                },
            );
        }

        for (id, (name, keys)) in grouped {
            tracing::debug!(provider = %name, "API keys reference a provider with no settings row");
            let mut config = ProviderConfig::new(name);
            config.keys = keys;
            next.insert(
                id,
                ProviderEntry {
                    config: Arc::new(config),
                    has_settings: false,
                },
            );
        }

        state.providers = next;
    }

    /// Reload one kind through the coalescer, logging failures
    async fn reload_coalesced(&self, kind: ResourceKind) {
        if !self.coalescer.request(kind) {
            tracing::debug!(resource = %kind, "reload already in flight, coalesced");
            return;
        }

        loop {
            self.coalescer.start_pass(kind);

            if let Err(e) = self.reload(kind).await {
                tracing::error!(resource = %kind, error = %e, "config reload failed, keeping previous cache");
            }

            if !self.coalescer.finish_pass(kind) {
                break;
            }
        }
    }
}

#[async_trait]
impl ChangeHandler for ConfigStore {
    async fn handle(&self, event: ConfigChangeEvent) {
        tracing::info!(event = %event, "config change received");

        if event.operation == Operation::Reload {
            for kind in ResourceKind::iter() {
                self.reload_coalesced(kind).await;
            }
        } else {
            self.reload_coalesced(event.resource).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};

    use conduit_core::{RateLimit, RateLimitUnit};
    use url::Url;

    use super::*;
    use crate::source::MemorySource;

    fn key(name: &str, value: &str, is_default: bool) -> ApiKey {
        ApiKey {
            name: name.to_owned(),
            value: SecretString::from(value.to_owned()),
            enabled: true,
            is_default,
        }
    }

    fn openai_settings() -> ProviderRecord {
        ProviderRecord {
            name: "OpenAI".to_owned(),
            base_url: Some(Url::parse("https://proxy.internal/v1").unwrap()),
            custom_headers: BTreeMap::from([("x-team".to_owned(), "core".to_owned())]),
        }
    }

    fn virtual_key(secret: &str) -> VirtualKeyConfig {
        VirtualKeyConfig {
            secret: secret.to_owned(),
            name: secret.to_owned(),
            enabled: true,
            allowed_providers: HashSet::from(["OpenAI".to_owned()]),
            allowed_models: HashSet::from(["gpt-4o".to_owned()]),
            rate_limits: vec![RateLimit {
                unit: RateLimitUnit::Minute,
                limit: 10,
            }],
        }
    }

    async fn seeded() -> (Arc<MemorySource>, ConfigStore) {
        let source = Arc::new(MemorySource::new());
        source.set_providers(vec![openai_settings()]);
        source.set_api_keys(vec![ApiKeyRecord {
            provider: "openai".to_owned(),
            key: key("primary", "sk-old", true),
        }]);
        source.set_virtual_keys(vec![virtual_key("sk-test-1")]);

        let store = ConfigStore::load(Arc::clone(&source) as Arc<dyn ConfigSource>).await.unwrap();
        (source, store)
    }

    #[tokio::test]
    async fn construction_loads_everything() {
        let (source, store) = seeded().await;

        let provider = store.get_provider_config("openai").await.unwrap();
        assert_eq!(provider.name, "OpenAI");
        assert_eq!(provider.keys.len(), 1);
        assert!(store.get_virtual_key("sk-test-1").await.is_ok());

        for kind in ResourceKind::iter() {
            assert_eq!(source.load_count(kind), 1);
        }

        assert_eq!(
            store.counts().await,
            StoreCounts {
                providers: 1,
                api_keys: 1,
                virtual_keys: 1
            }
        );
    }

    #[tokio::test]
    async fn lookups_miss_with_not_found() {
        let (_, store) = seeded().await;

        assert!(matches!(
            store.get_provider_config("gemini").await,
            Err(StoreError::ProviderNotFound(name)) if name == "gemini"
        ));
        assert!(matches!(
            store.get_virtual_key("sk-unknown").await,
            Err(StoreError::VirtualKeyNotFound)
        ));
    }

    #[tokio::test]
    async fn api_key_update_keeps_provider_settings() {
        let (source, store) = seeded().await;
        let before = store.get_provider_config("openai").await.unwrap();

        source.set_api_keys(vec![
            ApiKeyRecord {
                provider: "OpenAI".to_owned(),
                key: key("rotated", "sk-new", true),
            },
            ApiKeyRecord {
                provider: "OpenAI".to_owned(),
                key: key("backup", "sk-backup", false),
            },
        ]);

        store
            .handle(ConfigChangeEvent::new(ResourceKind::ApiKeys, Operation::Update))
            .await;

        let after = store.get_provider_config("openai").await.unwrap();
        let names: Vec<&str> = after.keys.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, ["rotated", "backup"]);
        assert_eq!(after.base_url, before.base_url);
        assert_eq!(after.custom_headers, before.custom_headers);

        assert_eq!(source.load_count(ResourceKind::ApiKeys), 2);
        assert_eq!(source.load_count(ResourceKind::Providers), 1);
        assert_eq!(source.load_count(ResourceKind::VirtualKeys), 1);
    }

    #[tokio::test]
    async fn provider_update_keeps_keys() {
        let (source, store) = seeded().await;

        let mut settings = openai_settings();
        settings.base_url = Some(Url::parse("https://other.internal/v1").unwrap());
        source.set_providers(vec![settings]);

        store
            .handle(ConfigChangeEvent::new(ResourceKind::Providers, Operation::Update))
            .await;

        let provider = store.get_provider_config("OPENAI").await.unwrap();
        assert_eq!(provider.base_url.as_ref().unwrap().as_str(), "https://other.internal/v1");
        assert_eq!(provider.keys[0].name, "primary");
    }

    #[tokio::test]
    async fn reload_event_refreshes_all_kinds() {
        let (source, store) = seeded().await;

        source.set_providers(vec![openai_settings(), ProviderRecord {
            name: "Gemini".to_owned(),
            ..ProviderRecord::default()
        }]);
        source.set_api_keys(vec![ApiKeyRecord {
            provider: "Gemini".to_owned(),
            key: key("g", "g-key", true),
        }]);
        source.set_virtual_keys(vec![virtual_key("sk-test-2")]);

        store
            .handle(ConfigChangeEvent::reload(ResourceKind::VirtualKeys))
            .await;

        for kind in ResourceKind::iter() {
            assert_eq!(source.load_count(kind), 2, "{kind}");
        }

        assert_eq!(store.get_provider_config("gemini").await.unwrap().keys.len(), 1);
        assert!(store.get_provider_config("openai").await.unwrap().keys.is_empty());
        assert!(store.get_virtual_key("sk-test-1").await.is_err());
        assert!(store.get_virtual_key("sk-test-2").await.is_ok());
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_cache() {
        let (source, store) = seeded().await;

        source.set_virtual_keys(Vec::new());
        source.set_failing(true);

        store
            .handle(ConfigChangeEvent::new(ResourceKind::VirtualKeys, Operation::Delete))
            .await;

        assert!(store.get_virtual_key("sk-test-1").await.is_ok());
        assert!(store.reload(ResourceKind::Providers).await.is_err());
        assert!(store.get_provider_config("openai").await.is_ok());
    }

    #[tokio::test]
    async fn disabled_virtual_key_resolves_as_unknown() {
        let (source, store) = seeded().await;

        let mut disabled = virtual_key("sk-test-1");
        disabled.enabled = false;
        source.set_virtual_keys(vec![disabled]);
        store.reload(ResourceKind::VirtualKeys).await.unwrap();

        assert!(matches!(
            store.get_virtual_key("sk-test-1").await,
            Err(StoreError::VirtualKeyNotFound)
        ));
    }

    #[tokio::test]
    async fn keys_arriving_before_their_provider_are_kept() {
        let source = Arc::new(MemorySource::new());
        let store = ConfigStore::load(Arc::clone(&source) as Arc<dyn ConfigSource>).await.unwrap();

        source.set_api_keys(vec![ApiKeyRecord {
            provider: "Anthropic".to_owned(),
            key: key("main", "sk-ant", true),
        }]);
        store.reload(ResourceKind::ApiKeys).await.unwrap();

        source.set_providers(vec![ProviderRecord {
            name: "Anthropic".to_owned(),
            base_url: Some(Url::parse("https://anthropic.internal/v1").unwrap()),
            custom_headers: BTreeMap::new(),
        }]);
        store.reload(ResourceKind::Providers).await.unwrap();

        let provider = store.get_provider_config("anthropic").await.unwrap();
        assert_eq!(provider.keys[0].name, "main");
        assert!(provider.base_url.is_some());
    }

    #[tokio::test]
    async fn api_key_values_are_template_expanded() {
        let source = Arc::new(MemorySource::new());
        source.set_api_keys(vec![ApiKeyRecord {
            provider: "openai".to_owned(),
            key: key("env", "{{ env.CONDUIT_STORE_MISSING | default(\"sk-fallback\") }}", true),
        }]);

        let store = ConfigStore::load(source as Arc<dyn ConfigSource>).await.unwrap();
        let provider = store.get_provider_config("openai").await.unwrap();

        assert_eq!(provider.keys[0].value.expose_secret(), "sk-fallback");
    }
}
