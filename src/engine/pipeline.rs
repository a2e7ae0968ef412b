//! The fallback-chain controller and public entry point.
//!
//! One invocation moves through a fixed sequence of stages:
//!
//! 1. **Dispatching**: fan the task out to every roster backend; always
//!    yields one outcome per backend.
//! 2. **Aggregating**: parse every outcome, then ask the authority backend
//!    to combine the successes.
//! 3. **Terminal**: a `primary_aggregator` decision, a degraded
//!    `fallback_best_single` decision, or a hard failure when nothing parsed.
//!
//! Terminal states are final; the engine never retries on its own. A caller
//! that wants retries re-invokes the whole pipeline.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::gateway::{Attribution, ChatGateway};

use super::aggregator::{aggregate, parse_outcomes};
use super::caller::BackendCaller;
use super::dispatcher::Dispatcher;
use super::types::{
    validate_roster, AggregationInput, BackendDescriptor, EngineError, FinalDecision, TaskPayload,
};

/// Engine configuration, fixed at construction.
///
/// There is deliberately no mutable module-level state: API keys live in the
/// gateway, everything else lives here.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The backend asked to combine the panel's answers. Typically a
    /// higher-capability model than the pool members; may also be one of them.
    pub authority: BackendDescriptor,
    /// Cap on concurrent backend calls. Defaults to the roster size, bounded
    /// by [`super::dispatcher::MAX_DISPATCH_CONCURRENCY`].
    pub max_concurrency: Option<usize>,
    /// Sub-field worth salvaging on its own when a response envelope is
    /// beyond repair.
    pub expected_field: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            authority: BackendDescriptor::new(
                "meta-llama/llama-4-maverick",
                1.0,
                Duration::from_secs(30),
            ),
            max_concurrency: None,
            expected_field: None,
        }
    }
}

/// The default scoring panel: five weighted models with 30s timeouts.
pub fn default_roster() -> Vec<BackendDescriptor> {
    let timeout = Duration::from_secs(30);
    vec![
        BackendDescriptor::new("meta-llama/llama-4-maverick", 0.30, timeout),
        BackendDescriptor::new("meta-llama/llama-3.3-70b-instruct", 0.14, timeout),
        BackendDescriptor::new("google/gemma-3-27b-it", 0.16, timeout),
        BackendDescriptor::new("mistralai/mistral-small-3.2-24b-instruct", 0.18, timeout),
        BackendDescriptor::new("meta-llama/llama-4-scout", 0.22, timeout),
    ]
}

/// The aggregation engine. Construct once, reuse across queries.
pub struct QueryEngine {
    caller: BackendCaller,
    dispatcher: Dispatcher,
    config: EngineConfig,
}

impl QueryEngine {
    pub fn new(gateway: Arc<dyn ChatGateway>, config: EngineConfig) -> Self {
        let caller = BackendCaller::new(gateway, Attribution::new("engine::query"));
        let dispatcher = Dispatcher::new(caller.clone(), config.max_concurrency);
        Self {
            caller,
            dispatcher,
            config,
        }
    }

    /// Run one task against a backend roster and return a single decision.
    ///
    /// Returns `Ok` with provenance describing how the decision was derived,
    /// or [`EngineError::NoValidResponses`] carrying every backend's failure
    /// kind when nothing usable came back.
    pub async fn run_aggregated_query(
        &self,
        task: TaskPayload,
        backends: &[BackendDescriptor],
    ) -> Result<FinalDecision, EngineError> {
        validate_roster(backends)?;

        debug!(backends = backends.len(), "Dispatching task to panel");
        let outcomes = self.dispatcher.dispatch(&task, backends).await;

        let results = parse_outcomes(outcomes, self.config.expected_field.as_deref());
        let parsed_ok = results.iter().filter(|r| r.is_success()).count();
        info!(
            parsed_ok,
            total = results.len(),
            "Panel responses parsed; aggregating"
        );

        let decision = aggregate(
            &self.caller,
            &self.config.authority,
            AggregationInput { results, task },
            self.config.expected_field.as_deref(),
        )
        .await?;

        info!(
            method = ?decision.provenance.method,
            contributing = decision.provenance.contributing_backends.len(),
            "Decision reached"
        );
        Ok(decision)
    }
}
