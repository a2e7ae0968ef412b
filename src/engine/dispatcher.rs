//! Bounded-concurrency fan-out of one task to every backend in the roster.

use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::info;

use super::caller::BackendCaller;
use super::types::{BackendDescriptor, CallOutcome, TaskPayload};

/// Ceiling on concurrent backend calls, whatever the roster size.
pub const MAX_DISPATCH_CONCURRENCY: usize = 8;

/// Fans a task out to all registered backends concurrently and collects every
/// outcome.
///
/// Constructed once and reused across invocations. Guarantees:
/// - exactly one [`CallOutcome`] per backend, failures included
/// - output order equals roster registration order, whatever the completion
///   order (each worker writes its own slot exactly once)
/// - no short-circuiting and no cross-worker cancellation; every worker is
///   bounded only by its own backend's timeout
#[derive(Clone)]
pub struct Dispatcher {
    caller: BackendCaller,
    max_concurrency: Option<usize>,
}

impl Dispatcher {
    pub fn new(caller: BackendCaller, max_concurrency: Option<usize>) -> Self {
        Self {
            caller,
            max_concurrency,
        }
    }

    fn concurrency_for(&self, roster_len: usize) -> usize {
        self.max_concurrency
            .unwrap_or(roster_len)
            .clamp(1, MAX_DISPATCH_CONCURRENCY)
    }

    pub async fn dispatch(
        &self,
        task: &TaskPayload,
        backends: &[BackendDescriptor],
    ) -> Vec<CallOutcome> {
        let n = backends.len();
        let limit = self.concurrency_for(n);
        let started = Instant::now();

        let completed: Vec<(usize, CallOutcome)> =
            stream::iter(backends.iter().enumerate().map(|(slot, backend)| {
                let caller = self.caller.clone();
                async move { (slot, caller.call(backend, task).await) }
            }))
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut slots: Vec<Option<CallOutcome>> = Vec::with_capacity(n);
        slots.resize_with(n, || None);
        for (slot, outcome) in completed {
            debug_assert!(slots[slot].is_none(), "slot {slot} written twice");
            slots[slot] = Some(outcome);
        }

        let outcomes: Vec<CallOutcome> = slots
            .into_iter()
            .map(|slot| slot.expect("every backend slot is written exactly once"))
            .collect();

        let successes = outcomes.iter().filter(|o| o.is_success()).count();
        info!(
            successes,
            total = n,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Dispatch complete"
        );

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::ErrorKind;
    use crate::gateway::{
        Attribution, ChatGateway, ChatRequest, ChatResponse, FinishReason, ProviderError,
    };
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    /// Answers per model id: `Some(delay)` sleeps before responding,
    /// `None` hangs until the caller's timeout fires.
    struct ScriptedGateway {
        delays: Vec<(&'static str, Option<Duration>)>,
    }

    #[async_trait]
    impl ChatGateway for ScriptedGateway {
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
            let model = req.model.model_id().to_string();
            let delay = self
                .delays
                .iter()
                .find(|(id, _)| *id == model)
                .and_then(|(_, d)| *d);
            match delay {
                Some(d) => {
                    tokio::time::sleep(d).await;
                    Ok(ChatResponse {
                        content: format!("{{\"from\":\"{model}\"}}"),
                        input_tokens: 1,
                        output_tokens: 1,
                        latency: d,
                        finish_reason: FinishReason::Stop,
                    })
                }
                None => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ProviderError::provider("openrouter", "unreachable"))
                }
            }
        }
    }

    fn backend(id: &str) -> super::super::types::BackendDescriptor {
        super::super::types::BackendDescriptor::new(id, 0.5, Duration::from_millis(500))
    }

    fn dispatcher(gateway: ScriptedGateway) -> Dispatcher {
        Dispatcher::new(
            BackendCaller::new(Arc::new(gateway), Attribution::new("test")),
            None,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn slowest_backend_first_keeps_registration_order() {
        // "slow" completes last but is registered first; its outcome must
        // still come back first.
        let gateway = ScriptedGateway {
            delays: vec![
                ("slow", Some(Duration::from_millis(300))),
                ("fast", Some(Duration::from_millis(1))),
                ("mid", Some(Duration::from_millis(100))),
            ],
        };
        let outcomes = dispatcher(gateway)
            .dispatch(
                &TaskPayload::new("t"),
                &[backend("slow"), backend("fast"), backend("mid")],
            )
            .await;

        let ids: Vec<&str> = outcomes.iter().map(|o| o.backend_id.as_str()).collect();
        assert_eq!(ids, vec!["slow", "fast", "mid"]);
        assert!(outcomes.iter().all(|o| o.is_success()));
    }

    #[tokio::test(start_paused = true)]
    async fn every_backend_yields_an_outcome_even_when_some_hang() {
        let gateway = ScriptedGateway {
            delays: vec![
                ("a", Some(Duration::from_millis(1))),
                ("hangs", None),
                ("b", Some(Duration::from_millis(1))),
            ],
        };
        let outcomes = dispatcher(gateway)
            .dispatch(
                &TaskPayload::new("t"),
                &[backend("a"), backend("hangs"), backend("b")],
            )
            .await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_success());
        assert_eq!(outcomes[1].error, Some(ErrorKind::Timeout));
        assert!(outcomes[2].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn one_failure_never_aborts_siblings() {
        let gateway = ScriptedGateway {
            delays: vec![("ok", Some(Duration::from_millis(200)))],
        };
        // "missing" hangs (no script entry), "ok" succeeds after it times out
        // in wall-clock terms under its own timeout.
        let outcomes = dispatcher(gateway)
            .dispatch(&TaskPayload::new("t"), &[backend("missing"), backend("ok")])
            .await;
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].is_success());
        assert!(outcomes[1].is_success());
    }

    #[test]
    fn concurrency_defaults_to_roster_size_with_ceiling() {
        let gateway = ScriptedGateway { delays: vec![] };
        let d = dispatcher(gateway);
        assert_eq!(d.concurrency_for(3), 3);
        assert_eq!(d.concurrency_for(20), MAX_DISPATCH_CONCURRENCY);
        assert_eq!(d.concurrency_for(0), 1);
    }

    #[test]
    fn explicit_concurrency_is_clamped() {
        let gateway = ScriptedGateway { delays: vec![] };
        let d = Dispatcher::new(
            BackendCaller::new(Arc::new(gateway), Attribution::new("test")),
            Some(64),
        );
        assert_eq!(d.concurrency_for(5), MAX_DISPATCH_CONCURRENCY);
    }
}
