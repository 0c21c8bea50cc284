//! Multi-provider LLM dispatch for Conduit
//!
//! Accepts requests in one canonical protocol, shaped after the `OpenAI`
//! Responses API, and dispatches them to `OpenAI`, Anthropic or Gemini.
//! Responses and streams are normalized back into the canonical protocol.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod convert;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod protocol;
pub mod provider;
pub mod router;
pub mod types;

pub use error::LlmError;
pub use gateway::{Gateway, GatewayRequest};
pub use middleware::{AuthorizationMiddleware, LoggingMiddleware, Middleware, RateLimitMiddleware, RequestContext};
pub use provider::{
    Adapter, AdapterRegistry, Capabilities, ProviderKind,
    transport::{ChunkStream, Transport},
};
pub use router::{Credential, Router};
pub use types::{Request, Response, ResponseChunk};
