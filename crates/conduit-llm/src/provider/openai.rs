//! `OpenAI` Responses API adapter

use http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::{Adapter, Capabilities, decode_body, encode_body, join_url, secret_header};
use crate::{
    convert::{
        StreamConverter,
        openai::{OpenAiStreamConverter, from_openai_response, openai_error, to_openai_request},
    },
    error::LlmError,
    types::{Request, Response},
};

/// Default `OpenAI` API base URL
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiAdapter;

impl Adapter for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    fn default_base_url(&self) -> &'static str {
        DEFAULT_BASE_URL
    }

    fn endpoint(&self, base: &Url, _request: &Request) -> Result<Url, LlmError> {
        join_url(base, &["responses"])
    }

    fn auth_headers(&self, key: &SecretString, _request: &Request) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            secret_header(&format!("Bearer {}", key.expose_secret()))?,
        );
        Ok(headers)
    }

    fn to_provider_request(&self, request: &Request) -> Result<serde_json::Value, LlmError> {
        encode_body(&to_openai_request(request))
    }

    fn to_canonical_response(&self, body: &[u8], request: &Request) -> Result<Response, LlmError> {
        Ok(from_openai_response(decode_body(self.name(), body)?, &request.model))
    }

    fn parse_error(&self, status: StatusCode, body: &str) -> LlmError {
        openai_error(status, body)
    }

    fn stream_converter(&self, request: &Request) -> Result<Box<dyn StreamConverter>, LlmError> {
        Ok(Box::new(OpenAiStreamConverter::new(&request.model)))
    }
}
