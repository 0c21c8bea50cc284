use std::collections::HashMap;

use serde::Deserialize;
use url::Url;

/// Telemetry configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Service name for telemetry metadata
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Additional resource attributes
    #[serde(default)]
    pub resource_attributes: HashMap<String, String>,
    /// OTLP/gRPC metrics exporter
    #[serde(default)]
    pub exporter: Option<ExporterConfig>,
}

/// OTLP exporter configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterConfig {
    /// OTLP endpoint URL
    pub endpoint: Url,
    /// Metric export interval (e.g. "30s")
    #[serde(default = "default_export_interval")]
    pub interval: String,
}

impl ExporterConfig {
    /// Parsed metric export interval
    ///
    /// # Errors
    ///
    /// Returns an error if the interval is not a valid duration
    pub fn interval(&self) -> anyhow::Result<std::time::Duration> {
        crate::parse_duration(&self.interval)
    }
}

fn default_service_name() -> String {
    "conduit".to_string()
}

fn default_export_interval() -> String {
    "30s".to_string()
}
