//! Provider adapters and the transport that drives them

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod transport;

use std::{collections::HashMap, sync::Arc};

use http::{HeaderMap, HeaderValue, StatusCode};
use secrecy::SecretString;
use url::Url;

use crate::{
    convert::StreamConverter,
    error::LlmError,
    types::{Request, Response},
};

/// Upstream API family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderKind {
    #[strum(to_string = "openai")]
    OpenAi,
    Anthropic,
    #[strum(to_string = "gemini", serialize = "google")]
    Gemini,
}

/// Operations an adapter can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    pub streaming: bool,
    pub tools: bool,
    pub structured_output: bool,
    pub reasoning: bool,
}

impl Capabilities {
    pub const ALL: Self = Self {
        streaming: true,
        tools: true,
        structured_output: true,
        reasoning: true,
    };

    /// First operation `request` needs that is not supported
    pub fn missing_for(self, request: &Request) -> Option<&'static str> {
        if request.stream && !self.streaming {
            Some("streaming")
        } else if request.has_tools() && !self.tools {
            Some("tools")
        } else if request.json_schema().is_some() && !self.structured_output {
            Some("structured output")
        } else if request.reasoning.is_some() && !self.reasoning {
            Some("reasoning")
        } else {
            None
        }
    }
}

/// Translation between the canonical protocol and one provider API
///
/// Adapters are stateless and perform no I/O; [`transport::Transport`]
/// sends what they build. Stream state lives in the converter returned by
/// [`Adapter::stream_converter`].
pub trait Adapter: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Base URL used when neither the provider record nor the file sets one
    fn default_base_url(&self) -> &'static str;

    /// Full endpoint for `request` below `base`
    fn endpoint(&self, base: &Url, request: &Request) -> Result<Url, LlmError>;

    /// Authentication and versioning headers
    fn auth_headers(&self, key: &SecretString, request: &Request) -> Result<HeaderMap, LlmError>;

    /// Provider request body
    fn to_provider_request(&self, request: &Request) -> Result<serde_json::Value, LlmError>;

    /// Canonical response from a successful provider body
    fn to_canonical_response(&self, body: &[u8], request: &Request) -> Result<Response, LlmError>;

    /// Canonical error from a non-success provider answer
    fn parse_error(&self, status: StatusCode, body: &str) -> LlmError;

    /// Fresh converter for one streaming response
    fn stream_converter(&self, _request: &Request) -> Result<Box<dyn StreamConverter>, LlmError> {
        Err(LlmError::Unsupported {
            provider: self.name().to_owned(),
            operation: "streaming",
        })
    }
}

/// Adapter lookup by provider name
///
/// Names compare case-insensitively. The defaults cover every
/// [`ProviderKind`] under its canonical name and aliases.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    /// Registry with no adapters
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Register `adapter` under `name`, replacing any previous entry
    pub fn register(&mut self, name: &str, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(name.to_ascii_lowercase(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(&name.to_ascii_lowercase()).cloned()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        let openai: Arc<dyn Adapter> = Arc::new(openai::OpenAiAdapter);
        let anthropic: Arc<dyn Adapter> = Arc::new(anthropic::AnthropicAdapter);
        let gemini: Arc<dyn Adapter> = Arc::new(gemini::GeminiAdapter);

        registry.register(&ProviderKind::OpenAi.to_string(), openai);
        registry.register(&ProviderKind::Anthropic.to_string(), anthropic);
        registry.register(&ProviderKind::Gemini.to_string(), Arc::clone(&gemini));
        registry.register("google", gemini);
        registry
    }
}

/// Append path segments to a base URL
///
/// Segments are percent-encoded; a trailing slash on the base is ignored.
pub(crate) fn join_url(base: &Url, segments: &[&str]) -> Result<Url, LlmError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| LlmError::Internal(format!("base URL '{base}' cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Header value built from secret material
pub(crate) fn secret_header(value: &str) -> Result<HeaderValue, LlmError> {
    let mut header =
        HeaderValue::from_str(value).map_err(|_| LlmError::Internal("API key is not a valid header value".to_owned()))?;
    header.set_sensitive(true);
    Ok(header)
}

pub(crate) fn decode_body<T: serde::de::DeserializeOwned>(provider: &str, body: &[u8]) -> Result<T, LlmError> {
    serde_json::from_slice(body).map_err(|e| LlmError::Upstream {
        status: StatusCode::OK.as_u16(),
        message: format!("failed to parse {provider} response: {e}"),
    })
}

pub(crate) fn encode_body<T: serde::Serialize>(body: &T) -> Result<serde_json::Value, LlmError> {
    serde_json::to_value(body).map_err(|e| LlmError::Internal(format!("failed to encode provider request: {e}")))
}
