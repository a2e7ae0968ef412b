//! Single backend invocation with a hard per-backend timeout.

use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest, ProviderError};

use super::types::{BackendDescriptor, CallOutcome, ErrorKind, TaskPayload};

/// Output cap for a scoring response. Large enough for a full decision
/// package, small enough to cut off a runaway generation.
const MAX_OUTPUT_TOKENS: u32 = 2000;

/// Low temperature: the panel is scoring, not brainstorming.
const TEMPERATURE: f32 = 0.1;

/// Invokes one backend with one task and converts every possible failure
/// into a failed [`CallOutcome`].
///
/// `call` never errors and never blocks past the backend's timeout plus
/// scheduling overhead. It performs no retries; re-running the pipeline is
/// the outer caller's decision.
#[derive(Clone)]
pub struct BackendCaller {
    gateway: Arc<dyn ChatGateway>,
    attribution: Attribution,
}

impl BackendCaller {
    pub fn new(gateway: Arc<dyn ChatGateway>, attribution: Attribution) -> Self {
        Self {
            gateway,
            attribution,
        }
    }

    pub async fn call(&self, backend: &BackendDescriptor, task: &TaskPayload) -> CallOutcome {
        let request = ChatRequest::new(
            ChatModel::openrouter(&backend.id),
            task.to_messages(),
            self.attribution.clone(),
        )
        .temperature(TEMPERATURE)
        .max_tokens(MAX_OUTPUT_TOKENS);

        let started = Instant::now();
        let result = tokio::time::timeout(backend.timeout, self.gateway.chat(request)).await;
        let elapsed = started.elapsed();

        match result {
            Err(_) => {
                warn!(
                    backend_id = %backend.id,
                    timeout_ms = backend.timeout.as_millis() as u64,
                    "Backend timed out"
                );
                CallOutcome::failed(backend, ErrorKind::Timeout, elapsed)
            }
            Ok(Err(err)) => {
                let kind = classify(&err);
                warn!(
                    backend_id = %backend.id,
                    kind = kind.as_str(),
                    error = %err,
                    "Backend call failed"
                );
                CallOutcome::failed(backend, kind, elapsed)
            }
            Ok(Ok(response)) => CallOutcome::succeeded(backend, response.content, elapsed),
        }
    }
}

fn classify(err: &ProviderError) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::Timeout
    } else {
        ErrorKind::NetworkError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ChatResponse, FinishReason};
    use async_trait::async_trait;
    use std::time::Duration;

    struct EchoGateway;

    #[async_trait]
    impl ChatGateway for EchoGateway {
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: format!("model={}", req.model.model_id()),
                input_tokens: 1,
                output_tokens: 1,
                latency: Duration::from_millis(1),
                finish_reason: FinishReason::Stop,
            })
        }
    }

    struct HangingGateway;

    #[async_trait]
    impl ChatGateway for HangingGateway {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("the per-backend timeout fires first")
        }
    }

    struct FailingGateway;

    #[async_trait]
    impl ChatGateway for FailingGateway {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse, ProviderError> {
            Err(ProviderError::provider("openrouter", "HTTP 503"))
        }
    }

    fn backend(id: &str, timeout: Duration) -> BackendDescriptor {
        BackendDescriptor::new(id, 0.5, timeout)
    }

    #[tokio::test]
    async fn successful_call_carries_raw_text() {
        let caller = BackendCaller::new(Arc::new(EchoGateway), Attribution::new("test"));
        let outcome = caller
            .call(&backend("m1", Duration::from_secs(5)), &TaskPayload::new("t"))
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.raw_text.as_deref(), Some("model=m1"));
        assert_eq!(outcome.backend_id, "m1");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_yields_timeout_outcome() {
        let caller = BackendCaller::new(Arc::new(HangingGateway), Attribution::new("test"));
        let outcome = caller
            .call(
                &backend("slow", Duration::from_millis(50)),
                &TaskPayload::new("t"),
            )
            .await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.error, Some(ErrorKind::Timeout));
        assert!(outcome.raw_text.is_none());
    }

    #[tokio::test]
    async fn provider_error_yields_network_outcome() {
        let caller = BackendCaller::new(Arc::new(FailingGateway), Attribution::new("test"));
        let outcome = caller
            .call(&backend("bad", Duration::from_secs(5)), &TaskPayload::new("t"))
            .await;
        assert_eq!(outcome.error, Some(ErrorKind::NetworkError));
    }
}
