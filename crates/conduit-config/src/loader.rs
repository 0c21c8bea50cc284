use std::{collections::HashSet, path::Path};

use secrecy::ExposeSecret;

use crate::Config;

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::from_toml(&raw)
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if expansion, parsing, or validation fails
    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error on invalid durations, duplicate default keys,
    /// duplicate virtual key secrets, or zero rate limits
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_database()?;
        self.validate_listener()?;
        self.validate_providers()?;
        self.validate_virtual_keys()?;
        Ok(())
    }

    fn validate_database(&self) -> anyhow::Result<()> {
        let Some(ref database) = self.database else {
            return Ok(());
        };

        if database.url.expose_secret().is_empty() {
            anyhow::bail!("database.url must not be empty");
        }

        if database.channel.is_empty() {
            anyhow::bail!("database.channel must not be empty");
        }

        database.acquire_timeout()?;

        Ok(())
    }

    fn validate_listener(&self) -> anyhow::Result<()> {
        let (initial, max) = self.listener.backoff()?;

        if initial.is_zero() {
            anyhow::bail!("listener.initial_backoff must be greater than 0");
        }

        if initial > max {
            anyhow::bail!("listener.initial_backoff must not exceed listener.max_backoff");
        }

        Ok(())
    }

    fn validate_providers(&self) -> anyhow::Result<()> {
        for (name, provider) in &self.providers {
            let defaults = provider.keys.iter().filter(|key| key.is_default).count();
            if defaults > 1 {
                anyhow::bail!("provider '{name}' has {defaults} default keys, at most one is allowed");
            }
        }

        Ok(())
    }

    fn validate_virtual_keys(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();

        for key in &self.virtual_keys {
            if !seen.insert(key.secret.as_str()) {
                anyhow::bail!("virtual key '{}' is declared more than once", key.name);
            }

            if let Some(rule) = key.rate_limits.iter().find(|rule| rule.limit == 0) {
                anyhow::bail!("virtual key '{}' has a zero limit per {}", key.name, rule.unit);
            }
        }

        Ok(())
    }
}
