//! Ordered request middleware run by the [`Gateway`](crate::Gateway)
//!
//! `before` hooks run in order and may short-circuit with an error. `after`
//! hooks run in reverse for every middleware whose `before` ran, including
//! the one that short-circuited.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use conduit_core::{ClassifiedError, VirtualKeyConfig};
use conduit_ratelimit::RateLimiter;
use conduit_store::ConfigStore;
use conduit_telemetry::{Counter, Histogram, KeyValue, metrics};

use crate::{error::LlmError, types::Request};

/// Per-request state shared by the middleware chain
pub struct RequestContext {
    pub provider: String,
    /// Virtual key secret presented by the caller
    pub virtual_key: Option<String>,
    /// Resolved virtual key, set by [`AuthorizationMiddleware`]
    pub key_config: Option<Arc<VirtualKeyConfig>>,
    pub request: Request,
    pub streaming: bool,
}

impl RequestContext {
    pub fn new(provider: impl Into<String>, virtual_key: Option<String>, request: Request, streaming: bool) -> Self {
        Self {
            provider: provider.into(),
            virtual_key,
            key_config: None,
            request,
            streaming,
        }
    }
}

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inspect or enrich the request; an error stops the chain
    async fn before(&self, ctx: &mut RequestContext) -> Result<(), LlmError>;

    /// Observe the outcome of the request
    async fn after(&self, _ctx: &RequestContext, _outcome: Result<(), &LlmError>, _elapsed: Duration) {}
}

/// Logs request start and finish and records request metrics
pub struct LoggingMiddleware {
    duration: Histogram<f64>,
    count: Counter<u64>,
}

impl LoggingMiddleware {
    pub fn new() -> Self {
        let meter = conduit_telemetry::meter();

        Self {
            duration: meter
                .f64_histogram(metrics::GATEWAY_REQUEST_DURATION)
                .with_unit("s")
                .with_description("Gateway request latency")
                .build(),
            count: meter
                .u64_counter(metrics::GATEWAY_REQUEST_COUNT)
                .with_description("Gateway requests by outcome")
                .build(),
        }
    }
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<(), LlmError> {
        tracing::debug!(
            provider = %ctx.provider,
            model = %ctx.request.model,
            streaming = ctx.streaming,
            "request started"
        );
        Ok(())
    }

    async fn after(&self, ctx: &RequestContext, outcome: Result<(), &LlmError>, elapsed: Duration) {
        let outcome_label = outcome.map_or_else(|e| e.kind().to_string(), |()| "ok".to_owned());
        let attributes = [
            KeyValue::new("provider", ctx.provider.clone()),
            KeyValue::new("model", ctx.request.model.clone()),
            KeyValue::new("streaming", ctx.streaming),
            KeyValue::new("outcome", outcome_label.clone()),
        ];

        metrics::record_duration(&self.duration, elapsed, &attributes);
        self.count.add(1, &attributes);

        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(
            provider = %ctx.provider,
            model = %ctx.request.model,
            outcome = %outcome_label,
            duration_ms,
            "request finished"
        );
    }
}

/// Resolves the virtual key and enforces its allow-lists
pub struct AuthorizationMiddleware {
    store: Arc<ConfigStore>,
    require_virtual_key: bool,
}

impl AuthorizationMiddleware {
    pub const fn new(store: Arc<ConfigStore>, require_virtual_key: bool) -> Self {
        Self {
            store,
            require_virtual_key,
        }
    }
}

#[async_trait]
impl Middleware for AuthorizationMiddleware {
    fn name(&self) -> &'static str {
        "authorization"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<(), LlmError> {
        let Some(secret) = ctx.virtual_key.as_deref() else {
            if self.require_virtual_key {
                return Err(LlmError::Unauthorized("a virtual key is required".to_owned()));
            }
            return Ok(());
        };

        let key = self.store.get_virtual_key(secret).await?;

        if !key.allows_provider(&ctx.provider) {
            tracing::debug!(virtual_key = %key.name, provider = %ctx.provider, "provider not allowed");
            return Err(LlmError::Forbidden(format!(
                "virtual key '{}' may not use provider {}",
                key.name, ctx.provider
            )));
        }

        if !key.allows_model(&ctx.request.model) {
            tracing::debug!(virtual_key = %key.name, model = %ctx.request.model, "model not allowed");
            return Err(LlmError::Forbidden(format!(
                "virtual key '{}' may not use model {}",
                key.name, ctx.request.model
            )));
        }

        ctx.key_config = Some(key);
        Ok(())
    }
}

/// Applies every rate limit rule on the resolved virtual key
///
/// Requests without a resolved key are not limited.
pub struct RateLimitMiddleware {
    limiter: RateLimiter,
    rejected: Counter<u64>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: RateLimiter) -> Self {
        Self {
            limiter,
            rejected: conduit_telemetry::meter()
                .u64_counter(metrics::GATEWAY_RATE_LIMITED)
                .with_description("Requests rejected by virtual key rate limits")
                .build(),
        }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Result<(), LlmError> {
        let Some(key) = &ctx.key_config else {
            return Ok(());
        };

        for rule in &key.rate_limits {
            if !self.limiter.allow(&key.secret, *rule).await {
                self.rejected.add(1, &[KeyValue::new("unit", rule.unit.to_string())]);
                tracing::debug!(virtual_key = %key.name, unit = %rule.unit, limit = rule.limit, "rate limit exceeded");
                return Err(LlmError::RateLimited {
                    unit: rule.unit,
                    limit: rule.limit,
                });
            }
        }

        Ok(())
    }
}
