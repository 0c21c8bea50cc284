use std::{
    collections::{BTreeMap, HashSet},
    time::Duration,
};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

/// Resolved settings for one upstream provider
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    /// Provider name, also used to select the adapter
    pub name: String,
    /// Base URL override; the adapter default applies when absent
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Extra headers sent with every upstream call
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,
    /// Credentials in insertion order
    #[serde(default)]
    pub keys: Vec<ApiKey>,
}

impl ProviderConfig {
    /// Create a provider record with no keys or overrides
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Pick the key to use for a dispatch
    ///
    /// A named lookup only matches an enabled key with that name. Without
    /// a name, the enabled default key wins, falling back to the first
    /// enabled key.
    pub fn select_key(&self, name: Option<&str>) -> Option<&ApiKey> {
        let mut enabled = self.keys.iter().filter(|key| key.enabled);

        match name {
            Some(name) => enabled.find(|key| key.name == name),
            None => {
                let candidates: Vec<&ApiKey> = enabled.collect();
                candidates
                    .iter()
                    .find(|key| key.is_default)
                    .or_else(|| candidates.first())
                    .copied()
            }
        }
    }
}

/// A provider credential
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKey {
    pub name: String,
    /// Key material after environment template expansion
    pub value: SecretString,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub is_default: bool,
}

const fn enabled_by_default() -> bool {
    true
}

/// Internal credential that scopes callers to providers, models and limits
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VirtualKeyConfig {
    /// Lookup key presented by callers
    pub secret: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Provider names this key may use; empty means any
    #[serde(default)]
    pub allowed_providers: HashSet<String>,
    /// Model names this key may use; empty means any
    #[serde(default)]
    pub allowed_models: HashSet<String>,
    #[serde(default)]
    pub rate_limits: Vec<RateLimit>,
}

impl VirtualKeyConfig {
    /// Whether requests may target `provider`
    ///
    /// Provider names compare case-insensitively.
    pub fn allows_provider(&self, provider: &str) -> bool {
        self.allowed_providers.is_empty()
            || self
                .allowed_providers
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(provider))
    }

    /// Whether requests may target `model`
    pub fn allows_model(&self, model: &str) -> bool {
        self.allowed_models.is_empty() || self.allowed_models.contains(model)
    }
}

/// A request budget over one fixed window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub unit: RateLimitUnit,
    pub limit: u64,
}

/// Fixed window length for a [`RateLimit`]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RateLimitUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl RateLimitUnit {
    /// Window length
    pub const fn window(self) -> Duration {
        match self {
            Self::Second => Duration::from_secs(1),
            Self::Minute => Duration::from_secs(60),
            Self::Hour => Duration::from_secs(60 * 60),
            Self::Day => Duration::from_secs(24 * 60 * 60),
        }
    }
}
