//! Provider dispatch: credential resolution, translation and transport

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

use conduit_core::{ClassifiedError, ProviderConfig};
use conduit_store::ConfigStore;
use http::{HeaderMap, HeaderName, HeaderValue};
use secrecy::SecretString;
use url::Url;

use crate::{
    error::LlmError,
    provider::{
        Adapter, AdapterRegistry,
        transport::{ChunkStream, Transport, UpstreamCall},
    },
    types::{Request, Response},
};

/// Which provider API key a dispatch uses
#[derive(Debug, Clone, Default)]
pub enum Credential {
    /// The provider's default enabled key, else its first enabled key
    #[default]
    Default,
    /// The enabled key with this name
    Named(String),
    /// Caller-supplied key material, bypassing the stored keys
    Raw(SecretString),
}

/// Routes canonical requests to provider adapters
///
/// Each dispatch makes exactly one upstream call. Nothing is retried.
pub struct Router {
    store: Arc<ConfigStore>,
    adapters: AdapterRegistry,
    transport: Transport,
    base_url_fallbacks: BTreeMap<String, Url>,
}

impl Router {
    pub fn new(store: Arc<ConfigStore>, transport: Transport) -> Self {
        Self {
            store,
            adapters: AdapterRegistry::default(),
            transport,
            base_url_fallbacks: BTreeMap::new(),
        }
    }

    /// Replace the adapter registry
    #[must_use]
    pub fn with_adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    /// Base URLs for providers whose record sets none
    #[must_use]
    pub fn with_base_url_fallbacks(mut self, fallbacks: BTreeMap<String, Url>) -> Self {
        self.base_url_fallbacks = fallbacks;
        self
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Dispatch a non-streaming request
    pub async fn dispatch(&self, provider: &str, credential: &Credential, mut request: Request) -> Result<Response, LlmError> {
        request.stream = false;
        self.send(provider, credential, &request).await
    }

    /// Dispatch a streaming request
    ///
    /// Errors before the provider accepts the request are returned here;
    /// later ones arrive as the stream's terminal `error` chunk.
    pub async fn dispatch_streaming(
        &self,
        provider: &str,
        credential: &Credential,
        mut request: Request,
    ) -> Result<ChunkStream, LlmError> {
        request.stream = true;
        self.send_streaming(provider, credential, &request).await
    }

    /// Send `request` and wait for the full response
    pub(crate) async fn send(&self, provider: &str, credential: &Credential, request: &Request) -> Result<Response, LlmError> {
        let start = Instant::now();

        let result = async {
            let (adapter, call) = self.prepare(provider, credential, request).await?;
            self.transport.send(adapter.as_ref(), call, request).await
        }
        .await;

        log_dispatch("dispatch", provider, request, start.elapsed(), result.as_ref().err());
        result
    }

    pub(crate) async fn send_streaming(
        &self,
        provider: &str,
        credential: &Credential,
        request: &Request,
    ) -> Result<ChunkStream, LlmError> {
        let start = Instant::now();

        let result = async {
            let (adapter, call) = self.prepare(provider, credential, request).await?;
            let converter = adapter.stream_converter(request)?;
            self.transport.send_streaming(adapter.as_ref(), call, converter).await
        }
        .await;

        log_dispatch("dispatch_streaming", provider, request, start.elapsed(), result.as_ref().err());
        result
    }

    /// Everything up to the network call
    async fn prepare(
        &self,
        provider: &str,
        credential: &Credential,
        request: &Request,
    ) -> Result<(Arc<dyn Adapter>, UpstreamCall), LlmError> {
        request.validate()?;

        let adapter = self.adapters.get(provider).ok_or_else(|| LlmError::ProviderNotFound {
            provider: provider.to_owned(),
        })?;

        if let Some(operation) = adapter.capabilities().missing_for(request) {
            return Err(LlmError::Unsupported {
                provider: provider.to_owned(),
                operation,
            });
        }

        let config = self.store.get_provider_config(provider).await?;
        let key = resolve_key(&config, credential)?;

        let base = self.base_url(&config, adapter.as_ref())?;
        let url = adapter.endpoint(&base, request)?;

        let mut headers = custom_headers(&config);
        headers.extend(adapter.auth_headers(&key, request)?);

        let body = adapter.to_provider_request(request)?;

        Ok((adapter, UpstreamCall { url, headers, body }))
    }

    fn base_url(&self, config: &ProviderConfig, adapter: &dyn Adapter) -> Result<Url, LlmError> {
        if let Some(url) = &config.base_url {
            return Ok(url.clone());
        }

        let fallback = self
            .base_url_fallbacks
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&config.name))
            .map(|(_, url)| url.clone());

        match fallback {
            Some(url) => Ok(url),
            None => Url::parse(adapter.default_base_url())
                .map_err(|e| LlmError::Internal(format!("invalid default base URL for {}: {e}", adapter.name()))),
        }
    }
}

fn resolve_key(config: &ProviderConfig, credential: &Credential) -> Result<SecretString, LlmError> {
    let name = match credential {
        Credential::Raw(secret) => return Ok(secret.clone()),
        Credential::Named(name) => Some(name.as_str()),
        Credential::Default => None,
    };

    config
        .select_key(name)
        .map(|key| key.value.clone())
        .ok_or_else(|| LlmError::KeyNotFound {
            provider: config.name.clone(),
            key: name.map(str::to_owned),
        })
}

/// Provider custom headers; invalid entries are skipped
fn custom_headers(config: &ProviderConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in &config.custom_headers {
        match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(provider = %config.name, header = %name, "skipping invalid custom header"),
        }
    }

    headers
}

fn log_dispatch(method: &'static str, provider: &str, request: &Request, elapsed: Duration, error: Option<&LlmError>) {
    let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

    match error {
        None => tracing::info!(method, provider, model = %request.model, duration_ms, outcome = "ok", "dispatched request"),
        Some(e) => tracing::info!(
            method,
            provider,
            model = %request.model,
            duration_ms,
            outcome = %e.kind(),
            error = %e,
            "dispatch failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use conduit_core::ApiKey;
    use conduit_store::MemorySource;
    use http::StatusCode;

    use super::*;
    use crate::{
        provider::Capabilities,
        types::{FunctionTool, Tool},
    };

    fn key(name: &str, is_default: bool) -> ApiKey {
        ApiKey {
            name: name.to_owned(),
            value: SecretString::from(format!("secret-{name}")),
            enabled: true,
            is_default,
        }
    }

    fn provider_config() -> ProviderConfig {
        ProviderConfig {
            keys: vec![key("first", false), key("main", true)],
            ..ProviderConfig::new("openai")
        }
    }

    async fn router(records: Vec<ProviderConfig>) -> Router {
        let source = MemorySource::from_records(records, Vec::new());
        let store = ConfigStore::load(Arc::new(source)).await.unwrap();
        Router::new(Arc::new(store), Transport::new(8))
    }

    #[test]
    fn credentials_resolve_against_enabled_keys() {
        use secrecy::ExposeSecret;

        let config = provider_config();
        let default = resolve_key(&config, &Credential::Default).unwrap();
        assert_eq!(default.expose_secret(), "secret-main");

        let named = resolve_key(&config, &Credential::Named("first".to_owned())).unwrap();
        assert_eq!(named.expose_secret(), "secret-first");

        let error = resolve_key(&config, &Credential::Named("missing".to_owned())).unwrap_err();
        assert_eq!(error.to_string(), "no enabled API key 'missing' for provider openai");
    }

    #[test]
    fn invalid_custom_headers_are_skipped() {
        let mut config = provider_config();
        config.custom_headers.insert("x-team".to_owned(), "infra".to_owned());
        config.custom_headers.insert("bad header".to_owned(), "x".to_owned());

        let headers = custom_headers(&config);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["x-team"], "infra");
    }

    #[tokio::test]
    async fn base_url_prefers_record_then_fallback_then_default() {
        let router = router(vec![provider_config()]).await.with_base_url_fallbacks(BTreeMap::from([(
            "OpenAI".to_owned(),
            Url::parse("http://localhost:9000/v1").unwrap(),
        )]));
        let adapter = router.adapters.get("openai").unwrap();

        let mut config = provider_config();
        assert_eq!(
            router.base_url(&config, adapter.as_ref()).unwrap().as_str(),
            "http://localhost:9000/v1"
        );

        config.base_url = Some(Url::parse("https://proxy.internal/v1").unwrap());
        assert_eq!(
            router.base_url(&config, adapter.as_ref()).unwrap().as_str(),
            "https://proxy.internal/v1"
        );

        config.name = "other".to_owned();
        config.base_url = None;
        assert_eq!(
            router.base_url(&config, adapter.as_ref()).unwrap().as_str(),
            "https://api.openai.com/v1"
        );
    }

    #[tokio::test]
    async fn validation_runs_before_lookup() {
        let router = router(Vec::new()).await;
        let error = router
            .dispatch("nowhere", &Credential::Default, Request::new("", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(error, LlmError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn unknown_provider_is_not_found() {
        let router = router(Vec::new()).await;
        let error = router
            .dispatch("mistral", &Credential::Default, Request::new("m", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(error, LlmError::ProviderNotFound { .. }));

        let error = router
            .dispatch("openai", &Credential::Default, Request::new("gpt-4o", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(error, LlmError::ProviderNotFound { .. }));
    }

    #[tokio::test]
    async fn provider_without_keys_fails_before_network() {
        let router = router(vec![ProviderConfig::new("openai")]).await;
        let error = router
            .dispatch("openai", &Credential::Default, Request::new("gpt-4o", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(error, LlmError::KeyNotFound { key: None, .. }));
    }

    struct TextOnly;

    impl Adapter for TextOnly {
        fn name(&self) -> &str {
            "text-only"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                streaming: false,
                tools: false,
                ..Capabilities::ALL
            }
        }

        fn default_base_url(&self) -> &'static str {
            "http://localhost"
        }

        fn endpoint(&self, base: &Url, _request: &Request) -> Result<Url, LlmError> {
            Ok(base.clone())
        }

        fn auth_headers(&self, _key: &SecretString, _request: &Request) -> Result<HeaderMap, LlmError> {
            Ok(HeaderMap::new())
        }

        fn to_provider_request(&self, _request: &Request) -> Result<serde_json::Value, LlmError> {
            Ok(serde_json::Value::Null)
        }

        fn to_canonical_response(&self, _body: &[u8], _request: &Request) -> Result<Response, LlmError> {
            Err(LlmError::Internal("unused".to_owned()))
        }

        fn parse_error(&self, status: StatusCode, body: &str) -> LlmError {
            LlmError::Upstream {
                status: status.as_u16(),
                message: body.to_owned(),
            }
        }
    }

    #[tokio::test]
    async fn unsupported_operations_are_rejected() {
        let mut adapters = AdapterRegistry::empty();
        adapters.register("text-only", Arc::new(TextOnly));
        let router = router(vec![ProviderConfig::new("text-only")])
            .await
            .with_adapters(adapters);

        let error = router
            .dispatch_streaming("text-only", &Credential::Default, Request::new("m", "hi"))
            .await
            .err()
            .unwrap();
        assert!(matches!(error, LlmError::Unsupported { operation: "streaming", .. }));

        let mut request = Request::new("m", "hi");
        request.tools = vec![Tool::Function(FunctionTool {
            name: "f".to_owned(),
            description: None,
            parameters: None,
            strict: None,
        })];
        let error = router
            .dispatch("text-only", &Credential::Default, request)
            .await
            .unwrap_err();
        assert!(matches!(error, LlmError::Unsupported { operation: "tools", .. }));
    }
}
