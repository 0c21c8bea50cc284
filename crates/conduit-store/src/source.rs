use std::{
    collections::BTreeMap,
    sync::{
        PoisonError, RwLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use conduit_core::{ApiKey, ProviderConfig, VirtualKeyConfig};
use url::Url;

use crate::{error::StoreError, event::ResourceKind};

/// Provider settings row, without credentials
#[derive(Debug, Clone, Default)]
pub struct ProviderRecord {
    pub name: String,
    pub base_url: Option<Url>,
    pub custom_headers: BTreeMap<String, String>,
}

/// API key row tagged with its provider
#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    pub provider: String,
    /// Key with its value still in template form
    pub key: ApiKey,
}

/// Backing store for the three configuration relations
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load_providers(&self) -> Result<Vec<ProviderRecord>, StoreError>;

    async fn load_api_keys(&self) -> Result<Vec<ApiKeyRecord>, StoreError>;

    async fn load_virtual_keys(&self) -> Result<Vec<VirtualKeyConfig>, StoreError>;
}

/// In-process [`ConfigSource`] for embedded use and tests
///
/// Records can be replaced at any time; the store sees them on its next
/// reload of the matching resource kind.
#[derive(Debug, Default)]
pub struct MemorySource {
    providers: RwLock<Vec<ProviderRecord>>,
    api_keys: RwLock<Vec<ApiKeyRecord>>,
    virtual_keys: RwLock<Vec<VirtualKeyConfig>>,
    failing: AtomicBool,
    loads: [AtomicUsize; ResourceKind::COUNT],
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from full provider records, splitting out their keys
    pub fn from_records(providers: Vec<ProviderConfig>, virtual_keys: Vec<VirtualKeyConfig>) -> Self {
        let source = Self::new();
        source.set_provider_configs(providers);
        source.set_virtual_keys(virtual_keys);
        source
    }

    pub fn set_providers(&self, providers: Vec<ProviderRecord>) {
        *self.providers.write().unwrap_or_else(PoisonError::into_inner) = providers;
    }

    pub fn set_api_keys(&self, keys: Vec<ApiKeyRecord>) {
        *self.api_keys.write().unwrap_or_else(PoisonError::into_inner) = keys;
    }

    pub fn set_virtual_keys(&self, keys: Vec<VirtualKeyConfig>) {
        *self.virtual_keys.write().unwrap_or_else(PoisonError::into_inner) = keys;
    }

    /// Replace providers and keys from full provider records
    pub fn set_provider_configs(&self, providers: Vec<ProviderConfig>) {
        let mut records = Vec::with_capacity(providers.len());
        let mut keys = Vec::new();

        for provider in providers {
            keys.extend(provider.keys.into_iter().map(|key| ApiKeyRecord {
                provider: provider.name.clone(),
                key,
            }));
            records.push(ProviderRecord {
                name: provider.name,
                base_url: provider.base_url,
                custom_headers: provider.custom_headers,
            });
        }

        self.set_providers(records);
        self.set_api_keys(keys);
    }

    /// Make every subsequent load fail until reset
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of completed loads for a resource kind
    pub fn load_count(&self, kind: ResourceKind) -> usize {
        self.loads[kind.index()].load(Ordering::SeqCst)
    }

    fn begin_load(&self, kind: ResourceKind) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("memory source refused {kind} load")));
        }

        self.loads[kind.index()].fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ConfigSource for MemorySource {
    async fn load_providers(&self) -> Result<Vec<ProviderRecord>, StoreError> {
        self.begin_load(ResourceKind::Providers)?;
        Ok(self.providers.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    async fn load_api_keys(&self) -> Result<Vec<ApiKeyRecord>, StoreError> {
        self.begin_load(ResourceKind::ApiKeys)?;
        Ok(self.api_keys.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    async fn load_virtual_keys(&self) -> Result<Vec<VirtualKeyConfig>, StoreError> {
        self.begin_load(ResourceKind::VirtualKeys)?;
        Ok(self.virtual_keys.read().unwrap_or_else(PoisonError::into_inner).clone())
    }
}
