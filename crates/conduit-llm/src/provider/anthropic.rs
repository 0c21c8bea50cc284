//! Anthropic Messages API adapter

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::{Adapter, Capabilities, decode_body, encode_body, join_url, secret_header};
use crate::{
    convert::{
        StreamConverter,
        anthropic::{
            AnthropicStreamConverter, anthropic_error, from_anthropic_response, to_anthropic_request,
            uses_code_execution, uses_structured_output,
        },
    },
    error::LlmError,
    types::{Request, Response},
};

/// Default Anthropic API base URL
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Beta flag enabling the hosted code execution tool
const CODE_EXECUTION_BETA: &str = "code-execution-2025-05-22";

/// Beta flag enabling `output_format` JSON schemas
const STRUCTURED_OUTPUTS_BETA: &str = "structured-outputs-2025-11-13";

pub struct AnthropicAdapter;

impl Adapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    fn default_base_url(&self) -> &'static str {
        DEFAULT_BASE_URL
    }

    fn endpoint(&self, base: &Url, _request: &Request) -> Result<Url, LlmError> {
        join_url(base, &["messages"])
    }

    fn auth_headers(&self, key: &SecretString, request: &Request) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("x-api-key"), secret_header(key.expose_secret())?);
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let betas: Vec<&str> = [
            (uses_code_execution(request), CODE_EXECUTION_BETA),
            (uses_structured_output(request), STRUCTURED_OUTPUTS_BETA),
        ]
        .into_iter()
        .filter_map(|(needed, flag)| needed.then_some(flag))
        .collect();

        if !betas.is_empty() {
            let value = HeaderValue::from_str(&betas.join(","))
                .map_err(|_| LlmError::Internal("beta flags are not a valid header value".to_owned()))?;
            headers.insert(HeaderName::from_static("anthropic-beta"), value);
        }

        Ok(headers)
    }

    fn to_provider_request(&self, request: &Request) -> Result<serde_json::Value, LlmError> {
        encode_body(&to_anthropic_request(request))
    }

    fn to_canonical_response(&self, body: &[u8], request: &Request) -> Result<Response, LlmError> {
        Ok(from_anthropic_response(decode_body(self.name(), body)?, &request.model))
    }

    fn parse_error(&self, status: StatusCode, body: &str) -> LlmError {
        anthropic_error(status, body)
    }

    fn stream_converter(&self, request: &Request) -> Result<Box<dyn StreamConverter>, LlmError> {
        Ok(Box::new(AnthropicStreamConverter::new(&request.model)))
    }
}
