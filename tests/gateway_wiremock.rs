//! Gateway tests against a wiremock OpenRouter endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use quorum_harness::gateway::openrouter::OpenRouterAdapter;
use quorum_harness::gateway::usage::{CallStatus, ProviderCallRecord};
use quorum_harness::gateway::{
    Attribution, ChatModel, ChatRequest, Message, NoopUsageSink, ProviderError, ProviderGateway,
    UsageSink,
};

fn adapter_for(server: &MockServer) -> OpenRouterAdapter {
    OpenRouterAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5), None, None)
        .unwrap()
}

fn request(model: &str) -> ChatRequest {
    ChatRequest::new(
        ChatModel::openrouter(model),
        vec![Message::user("evaluate")],
        Attribution::new("test"),
    )
    .temperature(0.1)
    .max_tokens(200)
}

#[tokio::test]
async fn successful_call_returns_content_and_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "content": "{\"verdict\": \"invest\"}" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 42, "completion_tokens": 17 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = ProviderGateway::new(adapter_for(&server), Arc::new(NoopUsageSink));
    let resp = gateway.chat(request("model/a")).await.unwrap();

    assert_eq!(resp.content, "{\"verdict\": \"invest\"}");
    assert_eq!(resp.input_tokens, 42);
    assert_eq!(resp.output_tokens, 17);
}

#[tokio::test]
async fn provider_error_body_is_surfaced_with_context() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("x-request-id", "req-123")
                .set_body_json(json!({
                    "error": { "message": "rate limited", "code": "rate_limit_exceeded" }
                })),
        )
        .mount(&server)
        .await;

    let gateway = ProviderGateway::new(adapter_for(&server), Arc::new(NoopUsageSink));
    let err = gateway.chat(request("model/a")).await.unwrap_err();

    match &err {
        ProviderError::Provider { message, .. } => assert_eq!(message, "rate limited"),
        other => panic!("expected Provider error, got {other:?}"),
    }
    let ctx = err.context().expect("context is attached");
    assert_eq!(ctx.http_status, Some(429));
    assert_eq!(ctx.provider_code.as_deref(), Some("rate_limit_exceeded"));
    assert_eq!(err.request_id(), Some("req-123"));
}

#[tokio::test]
async fn missing_choices_is_a_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let gateway = ProviderGateway::new(adapter_for(&server), Arc::new(NoopUsageSink));
    let err = gateway.chat(request("model/a")).await.unwrap_err();
    assert!(matches!(err, ProviderError::Provider { .. }));
}

#[tokio::test]
async fn oversized_input_is_rejected_before_sending() {
    // No mock mounted: the request must never reach the server.
    let server = MockServer::start().await;
    let gateway = ProviderGateway::new(adapter_for(&server), Arc::new(NoopUsageSink));

    let big = "x".repeat(600_000);
    let req = ChatRequest::new(
        ChatModel::openrouter("model/a"),
        vec![Message::user(big)],
        Attribution::new("test"),
    );
    let err = gateway.chat(req).await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidRequest { .. }));
}

#[derive(Default)]
struct CapturingSink {
    records: Mutex<Vec<ProviderCallRecord>>,
}

#[async_trait]
impl UsageSink for CapturingSink {
    async fn record(&self, record: ProviderCallRecord) {
        self.records.lock().await.push(record);
    }
}

#[tokio::test]
async fn failed_calls_are_recorded_with_an_error_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let sink = Arc::new(CapturingSink::default());
    let gateway = ProviderGateway::new(adapter_for(&server), sink.clone());
    let _ = gateway.chat(request("model/a")).await;

    let records = sink.records.lock().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, CallStatus::Error);
    assert_eq!(records[0].error_code.as_deref(), Some("provider_error"));
    assert_eq!(records[0].model, "model/a");
    assert_eq!(records[0].caller, "test");
}
