//! Postgres-backed config source and notification subscription

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use conduit_config::DatabaseConfig;
use conduit_core::{ApiKey, RateLimit, VirtualKeyConfig};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{
    Row,
    postgres::{PgListener, PgPool, PgPoolOptions, PgRow},
    types::Json,
};
use url::Url;

use crate::{
    error::StoreError,
    listener::NotificationSource,
    source::{ApiKeyRecord, ConfigSource, ProviderRecord},
};

/// Reads providers, API keys and virtual keys from Postgres
#[derive(Debug, Clone)]
pub struct PostgresSource {
    pool: PgPool,
}

impl PostgresSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let acquire_timeout = config
            .acquire_timeout()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(config.url.expose_secret())
            .await?;

        Ok(Self::new(pool))
    }

    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ConfigSource for PostgresSource {
    async fn load_providers(&self) -> Result<Vec<ProviderRecord>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT name, base_url, custom_headers
            FROM provider_configs
            ORDER BY name
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_provider).collect()
    }

    async fn load_api_keys(&self) -> Result<Vec<ApiKeyRecord>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT provider, name, value, enabled, is_default
            FROM api_keys
            ORDER BY provider, created_at, name
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_api_key).collect()
    }

    async fn load_virtual_keys(&self) -> Result<Vec<VirtualKeyConfig>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT secret, name, enabled, allowed_providers, allowed_models, rate_limits
            FROM virtual_keys
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_virtual_key).collect()
    }
}

fn row_to_provider(row: &PgRow) -> Result<ProviderRecord, StoreError> {
    let name: String = row.try_get("name")?;
    let base_url: Option<String> = row.try_get("base_url")?;
    let custom_headers: Option<Json<BTreeMap<String, String>>> = row.try_get("custom_headers")?;

    let base_url = base_url
        .filter(|url| !url.is_empty())
        .map(|url| Url::parse(&url))
        .transpose()
        .map_err(|e| StoreError::InvalidRecord {
            resource: "provider_configs",
            message: format!("provider '{name}' has an invalid base_url: {e}"),
        })?;

    Ok(ProviderRecord {
        name,
        base_url,
        custom_headers: custom_headers.map(|Json(headers)| headers).unwrap_or_default(),
    })
}

fn row_to_api_key(row: &PgRow) -> Result<ApiKeyRecord, StoreError> {
    let value: String = row.try_get("value")?;

    Ok(ApiKeyRecord {
        provider: row.try_get("provider")?,
        key: ApiKey {
            name: row.try_get("name")?,
            value: SecretString::from(value),
            enabled: row.try_get("enabled")?,
            is_default: row.try_get("is_default")?,
        },
    })
}

fn row_to_virtual_key(row: &PgRow) -> Result<VirtualKeyConfig, StoreError> {
    let allowed_providers: Option<Vec<String>> = row.try_get("allowed_providers")?;
    let allowed_models: Option<Vec<String>> = row.try_get("allowed_models")?;
    let rate_limits: Option<Json<Vec<RateLimit>>> = row.try_get("rate_limits")?;

    Ok(VirtualKeyConfig {
        secret: row.try_get("secret")?,
        name: row.try_get("name")?,
        enabled: row.try_get("enabled")?,
        allowed_providers: allowed_providers.unwrap_or_default().into_iter().collect::<HashSet<_>>(),
        allowed_models: allowed_models.unwrap_or_default().into_iter().collect::<HashSet<_>>(),
        rate_limits: rate_limits.map(|Json(limits)| limits).unwrap_or_default(),
    })
}

/// `LISTEN` subscription on one channel
///
/// Each [`NotificationSource::connect`] call opens a fresh listener
/// connection from the pool.
pub struct PgNotifications {
    pool: PgPool,
    channel: String,
    listener: Option<PgListener>,
}

impl PgNotifications {
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
            listener: None,
        }
    }
}

#[async_trait]
impl NotificationSource for PgNotifications {
    async fn connect(&mut self) -> Result<(), StoreError> {
        self.listener = None;

        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(&self.channel).await?;

        tracing::debug!(channel = %self.channel, "subscribed to config change notifications");

        self.listener = Some(listener);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, StoreError> {
        let Some(listener) = self.listener.as_mut() else {
            return Ok(None);
        };

        // `None` means the connection dropped; the next `connect` starts over
        match listener.try_recv().await? {
            Some(notification) => Ok(Some(notification.payload().to_owned())),
            None => {
                self.listener = None;
                Ok(None)
            }
        }
    }
}
