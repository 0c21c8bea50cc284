use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Caller-visible classification of a gateway failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed canonical request, rejected before any network call
    InvalidRequest,
    /// Unknown or disabled credential
    Authentication,
    /// Credential is valid but not allowed to use the provider or model
    PermissionDenied,
    /// Per-key rate limit exhausted
    RateLimited,
    /// Upstream provider answered with an error envelope or non-2xx status
    Upstream,
    /// Network failure or malformed upstream payload
    Transport,
    /// Unknown provider, API key, or virtual key
    NotFound,
    /// Operation not supported by the selected provider adapter
    Unsupported,
    /// Unexpected internal failure
    Internal,
}

impl ErrorKind {
    /// HTTP status a server shell should use for this kind
    pub const fn status_code(self) -> StatusCode {
        match self {
            Self::InvalidRequest | Self::Unsupported => StatusCode::BAD_REQUEST,
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream | Self::Transport => StatusCode::BAD_GATEWAY,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Trait for domain errors that callers need to classify
///
/// Implemented by each feature crate's error type. Server shells and
/// workflow activities map these onto their own transport without
/// depending on the concrete error enums.
pub trait ClassifiedError: std::error::Error {
    /// Error classification
    fn kind(&self) -> ErrorKind;

    /// HTTP status code for this error
    fn status_code(&self) -> StatusCode {
        self.kind().status_code()
    }

    /// Message safe to expose to API consumers
    fn client_message(&self) -> String;
}
