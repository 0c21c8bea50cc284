use conduit_core::{ClassifiedError, ErrorKind, RateLimitUnit};
use conduit_store::StoreError;
use thiserror::Error;

use crate::types::ResponseError;

/// Errors raised while dispatching a request to a provider
#[derive(Debug, Error)]
pub enum LlmError {
    /// Canonical request failed validation
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing, unknown or disabled virtual key
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Virtual key is not allowed to use the provider or model
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A rate limit rule on the virtual key is exhausted
    #[error("rate limit exceeded: {limit} per {unit}")]
    RateLimited { unit: RateLimitUnit, limit: u64 },

    /// Provider answered with a non-success status or error envelope
    #[error("provider returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Network failure talking to the provider
    #[error("transport error: {0}")]
    Transport(String),

    /// Provider stream broke or carried a malformed payload
    #[error("streaming error: {0}")]
    Streaming(String),

    /// No adapter or configuration for the named provider
    #[error("provider not found: {provider}")]
    ProviderNotFound { provider: String },

    /// Provider has no usable API key for the requested credential
    #[error("no enabled API key{} for provider {provider}", key.as_deref().map(|k| format!(" '{k}'")).unwrap_or_default())]
    KeyNotFound { provider: String, key: Option<String> },

    /// Adapter does not implement the operation
    #[error("{provider} does not support {operation}")]
    Unsupported { provider: String, operation: &'static str },

    /// Unexpected internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<StoreError> for LlmError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ProviderNotFound(provider) => Self::ProviderNotFound { provider },
            StoreError::VirtualKeyNotFound => Self::Unauthorized("unknown virtual key".to_owned()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl ClassifiedError for LlmError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Unauthorized(_) => ErrorKind::Authentication,
            Self::Forbidden(_) => ErrorKind::PermissionDenied,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Upstream { .. } => ErrorKind::Upstream,
            Self::Transport(_) | Self::Streaming(_) => ErrorKind::Transport,
            Self::ProviderNotFound { .. } | Self::KeyNotFound { .. } => ErrorKind::NotFound,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "an internal error occurred".to_owned(),
            other => other.to_string(),
        }
    }
}

impl From<&LlmError> for ResponseError {
    fn from(e: &LlmError) -> Self {
        Self {
            kind: e.kind(),
            message: e.client_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;

    #[test]
    fn classification_covers_auth_and_upstream() {
        let denied = LlmError::Forbidden("provider 'gemini' not allowed".to_owned());
        assert_eq!(denied.status_code(), StatusCode::FORBIDDEN);

        let limited = LlmError::RateLimited {
            unit: RateLimitUnit::Minute,
            limit: 1,
        };
        assert_eq!(limited.kind(), ErrorKind::RateLimited);
        assert_eq!(limited.to_string(), "rate limit exceeded: 1 per minute");

        let upstream = LlmError::Upstream {
            status: 503,
            message: "overloaded".to_owned(),
        };
        assert_eq!(upstream.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn internal_details_are_hidden_from_clients() {
        let error = LlmError::Internal("lock poisoned".to_owned());
        let response_error = ResponseError::from(&error);

        assert_eq!(response_error.kind, ErrorKind::Internal);
        assert_eq!(response_error.message, "an internal error occurred");
    }

    #[test]
    fn key_not_found_names_the_key() {
        let named = LlmError::KeyNotFound {
            provider: "openai".to_owned(),
            key: Some("backup".to_owned()),
        };
        assert_eq!(named.to_string(), "no enabled API key 'backup' for provider openai");

        let default = LlmError::KeyNotFound {
            provider: "openai".to_owned(),
            key: None,
        };
        assert_eq!(default.to_string(), "no enabled API key for provider openai");
    }

    #[test]
    fn store_not_found_maps_to_provider_not_found() {
        let error = LlmError::from(StoreError::ProviderNotFound("mistral".to_owned()));
        assert!(matches!(error, LlmError::ProviderNotFound { ref provider } if provider == "mistral"));
    }
}
