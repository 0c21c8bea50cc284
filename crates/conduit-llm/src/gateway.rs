//! Entry point for callers: middleware chain plus router

use std::{sync::Arc, time::Instant};

use conduit_config::GatewayConfig;
use conduit_core::VirtualKeyConfig;
use conduit_ratelimit::RateLimiter;

use crate::{
    error::LlmError,
    middleware::{AuthorizationMiddleware, LoggingMiddleware, Middleware, RateLimitMiddleware, RequestContext},
    provider::transport::ChunkStream,
    router::{Credential, Router},
    types::{Request, Response},
};

/// One caller request
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// Target provider name
    pub provider: String,
    /// Virtual key secret, if the caller presented one
    pub virtual_key: Option<String>,
    pub credential: Credential,
    pub request: Request,
}

impl GatewayRequest {
    pub fn new(provider: impl Into<String>, request: Request) -> Self {
        Self {
            provider: provider.into(),
            virtual_key: None,
            credential: Credential::Default,
            request,
        }
    }

    #[must_use]
    pub fn with_virtual_key(mut self, secret: impl Into<String>) -> Self {
        self.virtual_key = Some(secret.into());
        self
    }

    #[must_use]
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }
}

/// Runs requests through the middleware chain and dispatches them
pub struct Gateway {
    router: Router,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Gateway {
    /// Gateway with no middleware
    pub const fn new(router: Router) -> Self {
        Self {
            router,
            middlewares: Vec::new(),
        }
    }

    /// Logging, then virtual key authorization, then rate limiting
    pub fn standard(router: Router, limiter: RateLimiter, config: &GatewayConfig) -> Self {
        let store = Arc::clone(router.store());

        Self::new(router)
            .with_middleware(LoggingMiddleware::new())
            .with_middleware(AuthorizationMiddleware::new(store, config.require_virtual_key))
            .with_middleware(RateLimitMiddleware::new(limiter))
    }

    /// Append a middleware to the end of the chain
    #[must_use]
    pub fn with_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// Resolve a virtual key to its allowed providers, models and limits
    pub async fn resolve(&self, secret: &str) -> Result<Arc<VirtualKeyConfig>, LlmError> {
        Ok(self.router.store().get_virtual_key(secret).await?)
    }

    pub async fn dispatch(&self, request: GatewayRequest) -> Result<Response, LlmError> {
        let GatewayRequest {
            provider,
            virtual_key,
            credential,
            mut request,
        } = request;
        request.stream = false;

        let mut ctx = RequestContext::new(provider, virtual_key, request, false);
        let start = Instant::now();

        let (ran, result) = match self.run_before(&mut ctx).await {
            (ran, Ok(())) => (
                ran,
                self.router.send(&ctx.provider, &credential, &ctx.request).await,
            ),
            (ran, Err(e)) => (ran, Err(e)),
        };

        self.run_after(&ctx, ran, result.as_ref().map(|_| ()), start).await;
        result
    }

    /// Dispatch as a stream
    ///
    /// The after hooks observe the outcome of establishing the stream, not
    /// its end.
    pub async fn dispatch_streaming(&self, request: GatewayRequest) -> Result<ChunkStream, LlmError> {
        let GatewayRequest {
            provider,
            virtual_key,
            credential,
            mut request,
        } = request;
        request.stream = true;

        let mut ctx = RequestContext::new(provider, virtual_key, request, true);
        let start = Instant::now();

        let (ran, result) = match self.run_before(&mut ctx).await {
            (ran, Ok(())) => (
                ran,
                self.router.send_streaming(&ctx.provider, &credential, &ctx.request).await,
            ),
            (ran, Err(e)) => (ran, Err(e)),
        };

        self.run_after(&ctx, ran, result.as_ref().map(|_| ()), start).await;
        result
    }

    /// Run `before` hooks in order; returns how many ran
    async fn run_before(&self, ctx: &mut RequestContext) -> (usize, Result<(), LlmError>) {
        for (index, middleware) in self.middlewares.iter().enumerate() {
            if let Err(e) = middleware.before(ctx).await {
                tracing::debug!(middleware = middleware.name(), error = %e, "middleware rejected request");
                return (index + 1, Err(e));
            }
        }
        (self.middlewares.len(), Ok(()))
    }

    async fn run_after(&self, ctx: &RequestContext, ran: usize, outcome: Result<(), &LlmError>, start: Instant) {
        let elapsed = start.elapsed();
        for middleware in self.middlewares[..ran].iter().rev() {
            middleware.after(ctx, outcome, elapsed).await;
        }
    }
}
