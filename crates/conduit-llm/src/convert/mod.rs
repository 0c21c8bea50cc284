//! Conversion between canonical types and provider wire formats

pub mod anthropic;
pub mod assembler;
pub mod gemini;
pub mod openai;

pub use assembler::{ChunkAssembler, ContentUnit};

use crate::{
    error::LlmError,
    types::{ResponseChunk, ResponseError},
};

/// Stateful translator from provider stream payloads to canonical chunks
///
/// One converter serves exactly one stream. Implementations classify
/// payloads into [`ContentUnit`]s and leave ordering, numbering and item
/// bookkeeping to their [`ChunkAssembler`].
pub trait StreamConverter: Send {
    /// Convert one SSE `data` payload
    ///
    /// A payload that is not valid JSON for the provider is an error; the
    /// caller ends the stream with [`Self::fail`].
    fn convert(&mut self, payload: &str) -> Result<Vec<ResponseChunk>, LlmError>;

    fn assembler(&self) -> &ChunkAssembler;

    fn assembler_mut(&mut self) -> &mut ChunkAssembler;

    /// Provider stream ended normally
    fn finish(&mut self) -> Vec<ResponseChunk> {
        self.assembler_mut().finish()
    }

    /// Provider stream broke
    fn fail(&mut self, error: &LlmError) -> Vec<ResponseChunk> {
        self.assembler_mut().fail(&ResponseError::from(error))
    }

    fn is_finished(&self) -> bool {
        self.assembler().is_finished()
    }
}

/// Split a `data:` URL into media type and base64 payload
pub(crate) fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let media_type = header.strip_suffix(";base64")?;
    Some((media_type, data))
}

/// Serialized call arguments; empty input becomes an empty string so the
/// assembler applies its `{}` default
pub(crate) fn arguments_string(input: &serde_json::Value) -> String {
    match input {
        serde_json::Value::Null => String::new(),
        serde_json::Value::Object(map) if map.is_empty() => String::new(),
        other => other.to_string(),
    }
}

/// Error reported inside an otherwise successful stream
///
/// The HTTP status was already 200, so the provider's own code is used when it
/// sent one and `502 Bad Gateway` otherwise.
pub(crate) fn in_band_error(code: Option<u16>, message: String) -> LlmError {
    LlmError::Upstream {
        status: code.unwrap_or_else(|| http::StatusCode::BAD_GATEWAY.as_u16()),
        message,
    }
}

/// Readable message from an error body that did not match any envelope
pub(crate) fn fallback_message(status: http::StatusCode, body: &str) -> String {
    const MAX_BODY: usize = 512;

    let body = body.trim();
    if body.is_empty() {
        return status.canonical_reason().unwrap_or("unknown error").to_owned();
    }

    match body.char_indices().nth(MAX_BODY) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_owned(),
    }
}
