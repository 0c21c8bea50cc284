//! Metric names and recording helpers

use std::time::Duration;

use opentelemetry::{KeyValue, metrics::Histogram};

/// End-to-end gateway dispatch latency in seconds
pub const GATEWAY_REQUEST_DURATION: &str = "gateway.request.duration";
/// Dispatched requests, labelled by outcome
pub const GATEWAY_REQUEST_COUNT: &str = "gateway.request.count";
/// Rate limit rejections
pub const GATEWAY_RATE_LIMITED: &str = "gateway.rate_limited";

/// Record an elapsed duration in seconds
pub fn record_duration(histogram: &Histogram<f64>, elapsed: Duration, attributes: &[KeyValue]) {
    histogram.record(elapsed.as_secs_f64(), attributes);
}
