//! Google Gemini `generateContent` adapter

use http::{HeaderMap, HeaderName, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::{Adapter, Capabilities, decode_body, encode_body, join_url, secret_header};
use crate::{
    convert::{
        StreamConverter,
        gemini::{GeminiStreamConverter, from_gemini_response, gemini_error, to_gemini_request},
    },
    error::LlmError,
    types::{Request, Response},
};

/// Default Gemini API base URL
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiAdapter;

impl Adapter for GeminiAdapter {
    fn name(&self) -> &str {
        "gemini"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    fn default_base_url(&self) -> &'static str {
        DEFAULT_BASE_URL
    }

    fn endpoint(&self, base: &Url, request: &Request) -> Result<Url, LlmError> {
        // The model is addressed in the path, never in the body
        let method = if request.stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let mut url = join_url(base, &["models", &format!("{}:{method}", request.model)])?;

        if request.stream {
            url.query_pairs_mut().append_pair("alt", "sse");
        }

        Ok(url)
    }

    fn auth_headers(&self, key: &SecretString, _request: &Request) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("x-goog-api-key"), secret_header(key.expose_secret())?);
        Ok(headers)
    }

    fn to_provider_request(&self, request: &Request) -> Result<serde_json::Value, LlmError> {
        encode_body(&to_gemini_request(request))
    }

    fn to_canonical_response(&self, body: &[u8], request: &Request) -> Result<Response, LlmError> {
        Ok(from_gemini_response(decode_body(self.name(), body)?, &request.model))
    }

    fn parse_error(&self, status: StatusCode, body: &str) -> LlmError {
        gemini_error(status, body)
    }

    fn stream_converter(&self, request: &Request) -> Result<Box<dyn StreamConverter>, LlmError> {
        Ok(Box::new(GeminiStreamConverter::new(&request.model)))
    }
}
