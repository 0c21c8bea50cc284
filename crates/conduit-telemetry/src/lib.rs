//! Logging and metrics bootstrap for Conduit
//!
//! Without an exporter only the fmt layer is installed. With one, metrics are
//! also pushed over OTLP/gRPC.

mod metadata;
pub mod metrics;

use conduit_config::TelemetryConfig;
use conduit_config::telemetry::ExporterConfig;
use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;

pub use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

/// Flushes and shuts down the meter provider when dropped
pub struct TelemetryGuard {
    meter_provider: Option<SdkMeterProvider>,
}

impl TelemetryGuard {
    /// Push pending metrics now
    ///
    /// # Errors
    ///
    /// Returns an error if the meter provider fails to flush
    pub fn force_flush(&self) -> anyhow::Result<()> {
        if let Some(ref provider) = self.meter_provider {
            provider
                .force_flush()
                .map_err(|e| anyhow::anyhow!("failed to flush metrics: {e}"))?;
        }
        Ok(())
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.meter_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("failed to shutdown meter provider: {e}");
        }
    }
}

/// Install the global subscriber
///
/// `log_filter` is an `EnvFilter` directive; an invalid one falls back to
/// `info`. Hold the returned guard for the lifetime of the process.
///
/// # Errors
///
/// Returns an error if the OTLP exporter cannot be built
pub fn init(config: Option<&TelemetryConfig>, log_filter: &str) -> anyhow::Result<TelemetryGuard> {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_new(log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();

    let mut guard = TelemetryGuard { meter_provider: None };

    let exporter = config.and_then(|config| config.exporter.as_ref().map(|exporter| (config, exporter)));
    if let Some((config, exporter)) = exporter {
        let meter_provider = init_metrics(exporter, metadata::build_resource(config))?;
        global::set_meter_provider(meter_provider.clone());
        guard.meter_provider = Some(meter_provider);

        tracing::debug!(endpoint = %exporter.endpoint, "OTLP metrics export enabled");
    }

    Ok(guard)
}

/// Meter for gateway instruments
///
/// Without an installed meter provider the instruments are no-ops.
pub fn meter() -> Meter {
    global::meter("conduit")
}

fn init_metrics(exporter: &ExporterConfig, resource: opentelemetry_sdk::Resource) -> anyhow::Result<SdkMeterProvider> {
    use opentelemetry_otlp::MetricExporter;
    use opentelemetry_sdk::metrics::PeriodicReader;

    let metric_exporter = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(exporter.endpoint.as_str())
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build metrics exporter: {e}"))?;

    let reader = PeriodicReader::builder(metric_exporter)
        .with_interval(exporter.interval()?)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build())
}
