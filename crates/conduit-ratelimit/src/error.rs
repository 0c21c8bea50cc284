use thiserror::Error;

/// Rate limiting errors
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Configuration error
    #[error("rate limit configuration error: {0}")]
    Config(String),

    /// Counter store unreachable or returned an error
    #[error("rate limit counter store error: {0}")]
    Storage(String),
}
