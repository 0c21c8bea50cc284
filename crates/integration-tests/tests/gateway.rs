//! End-to-end dispatch through the standard middleware chain

mod harness;

use axum::http::StatusCode;
use conduit_core::{RateLimit, RateLimitUnit};
use conduit_llm::types::{Item, ResponseStatus};
use conduit_llm::{GatewayRequest, LlmError, Request};
use harness::mock_upstream::{MockUpstream, Reply};
use harness::{TestGateway, provider, virtual_key};

#[tokio::test]
async fn openai_round_trip_forwards_credentials_and_headers() {
    let upstream = MockUpstream::start().await.unwrap();

    let mut openai = provider("openai", upstream.base_url());
    openai
        .custom_headers
        .insert("x-team".to_owned(), "platform".to_owned());

    let harness = TestGateway::new(
        vec![openai],
        vec![virtual_key("sk-test-1", &["openai"], &["gpt-4o"], Vec::new())],
    )
    .await
    .unwrap();

    let response = harness
        .gateway
        .dispatch(GatewayRequest::new("openai", Request::new("gpt-4o", "Say hello")).with_virtual_key("sk-test-1"))
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::Completed);
    assert_eq!(response.output_text(), "Hello from mock");
    assert_eq!(response.usage.as_ref().map(|u| u.total_tokens), Some(8));

    let requests = upstream.requests();
    assert_eq!(requests.len(), 1);

    let recorded = &requests[0];
    assert_eq!(recorded.uri.path(), "/v1/responses");
    assert_eq!(recorded.headers["authorization"], "Bearer sk-upstream");
    assert_eq!(recorded.headers["x-team"], "platform");
    assert_eq!(recorded.body["model"], "gpt-4o");
    assert!(recorded.body.get("stream").is_none());
}

#[tokio::test]
async fn anthropic_dispatch_uses_messages_api() {
    let upstream = MockUpstream::start().await.unwrap();
    let harness = TestGateway::new(
        vec![provider("anthropic", upstream.base_url())],
        vec![virtual_key("sk-any", &[], &[], Vec::new())],
    )
    .await
    .unwrap();

    let mut request = Request::new("claude-sonnet-4", "Say hello");
    request.instructions = Some("Be brief".to_owned());

    let response = harness
        .gateway
        .dispatch(GatewayRequest::new("anthropic", request).with_virtual_key("sk-any"))
        .await
        .unwrap();

    assert_eq!(response.output_text(), "Hello from mock");
    assert!(matches!(response.output.first(), Some(Item::Message(_))));

    let recorded = &upstream.requests()[0];
    assert_eq!(recorded.uri.path(), "/v1/messages");
    assert_eq!(recorded.headers["x-api-key"], "sk-upstream");
    assert_eq!(recorded.headers["anthropic-version"], "2023-06-01");
    assert_eq!(recorded.body["system"], "Be brief");
    assert!(recorded.body["max_tokens"].as_u64().is_some());
}

#[tokio::test]
async fn gemini_dispatch_uses_generate_content() {
    let upstream = MockUpstream::start().await.unwrap();
    let harness = TestGateway::new(
        vec![provider("gemini", upstream.gemini_base_url())],
        vec![virtual_key("sk-any", &[], &[], Vec::new())],
    )
    .await
    .unwrap();

    let response = harness
        .gateway
        .dispatch(GatewayRequest::new("gemini", Request::new("gemini-2.5-flash", "Say hello")).with_virtual_key("sk-any"))
        .await
        .unwrap();

    assert_eq!(response.output_text(), "Hello from mock");
    assert_eq!(response.model, "gemini-2.5-flash");

    let recorded = &upstream.requests()[0];
    assert_eq!(recorded.uri.path(), "/v1beta/models/gemini-2.5-flash:generateContent");
    assert_eq!(recorded.headers["x-goog-api-key"], "sk-upstream");
    assert_eq!(recorded.body["contents"][0]["role"], "user");
}

#[tokio::test]
async fn disallowed_provider_is_rejected_before_any_upstream_call() {
    let upstream = MockUpstream::start().await.unwrap();
    let harness = TestGateway::new(
        vec![
            provider("openai", upstream.base_url()),
            provider("gemini", upstream.gemini_base_url()),
        ],
        vec![virtual_key("sk-test-1", &["openai"], &["gpt-4o"], Vec::new())],
    )
    .await
    .unwrap();

    let error = harness
        .gateway
        .dispatch(
            GatewayRequest::new("gemini", Request::new("gemini-2.5-flash", "hi")).with_virtual_key("sk-test-1"),
        )
        .await
        .unwrap_err();
    assert!(matches!(error, LlmError::Forbidden(_)), "{error}");

    let error = harness
        .gateway
        .dispatch(GatewayRequest::new("openai", Request::new("gpt-4o-mini", "hi")).with_virtual_key("sk-test-1"))
        .await
        .unwrap_err();
    assert!(matches!(error, LlmError::Forbidden(_)), "{error}");

    assert_eq!(upstream.request_count(), 0);
}

#[tokio::test]
async fn unknown_and_missing_virtual_keys_are_unauthorized() {
    let upstream = MockUpstream::start().await.unwrap();
    let harness = TestGateway::new(vec![provider("openai", upstream.base_url())], Vec::new())
        .await
        .unwrap();

    let error = harness
        .gateway
        .dispatch(GatewayRequest::new("openai", Request::new("gpt-4o", "hi")))
        .await
        .unwrap_err();
    assert!(matches!(error, LlmError::Unauthorized(_)), "{error}");

    let error = harness
        .gateway
        .dispatch(GatewayRequest::new("openai", Request::new("gpt-4o", "hi")).with_virtual_key("sk-nope"))
        .await
        .unwrap_err();
    assert!(matches!(error, LlmError::Unauthorized(_)), "{error}");

    assert_eq!(upstream.request_count(), 0);
}

#[tokio::test]
async fn rate_limit_rejects_over_budget_requests() {
    let upstream = MockUpstream::start().await.unwrap();
    let limit = RateLimit {
        unit: RateLimitUnit::Minute,
        limit: 1,
    };
    let harness = TestGateway::new(
        vec![provider("openai", upstream.base_url())],
        vec![virtual_key("sk-limited", &[], &[], vec![limit])],
    )
    .await
    .unwrap();

    let request = || GatewayRequest::new("openai", Request::new("gpt-4o", "hi")).with_virtual_key("sk-limited");

    harness.gateway.dispatch(request()).await.unwrap();

    let error = harness.gateway.dispatch(request()).await.unwrap_err();
    assert!(
        matches!(
            error,
            LlmError::RateLimited {
                unit: RateLimitUnit::Minute,
                limit: 1
            }
        ),
        "{error}"
    );
    assert_eq!(upstream.request_count(), 1);
}

#[tokio::test]
async fn upstream_error_envelope_keeps_status() {
    let upstream = MockUpstream::start_with(Reply::Error {
        status: StatusCode::TOO_MANY_REQUESTS,
        body: r#"{"error":{"message":"Rate limit reached","type":"requests","code":"rate_limit_exceeded"}}"#.to_owned(),
    })
    .await
    .unwrap();

    let harness = TestGateway::new(
        vec![provider("openai", upstream.base_url())],
        vec![virtual_key("sk-any", &[], &[], Vec::new())],
    )
    .await
    .unwrap();

    let error = harness
        .gateway
        .dispatch(GatewayRequest::new("openai", Request::new("gpt-4o", "hi")).with_virtual_key("sk-any"))
        .await
        .unwrap_err();

    match error {
        LlmError::Upstream { status, message } => {
            assert_eq!(status, 429);
            assert_eq!(message, "rate_limit_exceeded: Rate limit reached");
        }
        other => panic!("expected upstream error, got {other}"),
    }
}

#[tokio::test]
async fn unknown_provider_is_not_found() {
    let harness = TestGateway::new(Vec::new(), vec![virtual_key("sk-any", &[], &[], Vec::new())])
        .await
        .unwrap();

    let error = harness
        .gateway
        .dispatch(GatewayRequest::new("mistral", Request::new("mistral-large", "hi")).with_virtual_key("sk-any"))
        .await
        .unwrap_err();
    assert!(matches!(error, LlmError::ProviderNotFound { .. }), "{error}");
}
