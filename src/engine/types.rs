//! Core types for the aggregation engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::gateway::Message;

// =============================================================================
// Roster
// =============================================================================

/// One scoring backend in the panel.
///
/// Registered at startup and never mutated. Weights are relative importance
/// in (0, 1]; they need not sum to 1 because the authority backend receives
/// them raw and performs its own weighting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Backend identifier, also the model id handed to the gateway.
    pub id: String,
    /// Relative importance in (0, 1].
    pub weight: f64,
    /// Per-backend call timeout.
    pub timeout: Duration,
}

impl BackendDescriptor {
    pub fn new(id: impl Into<String>, weight: f64, timeout: Duration) -> Self {
        Self {
            id: id.into(),
            weight,
            timeout,
        }
    }
}

/// Validate a backend roster before dispatching to it.
pub fn validate_roster(backends: &[BackendDescriptor]) -> Result<(), EngineError> {
    if backends.is_empty() {
        return Err(EngineError::InvalidRequest(
            "backend roster must not be empty".into(),
        ));
    }

    let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
    for backend in backends {
        if !backend.weight.is_finite() || backend.weight <= 0.0 || backend.weight > 1.0 {
            return Err(EngineError::InvalidRequest(format!(
                "backend weight must be in (0, 1] (backend_id={}, weight={})",
                backend.id, backend.weight
            )));
        }
        if backend.timeout.is_zero() {
            return Err(EngineError::InvalidRequest(format!(
                "backend timeout must be non-zero (backend_id={})",
                backend.id
            )));
        }
        if !seen.insert(backend.id.as_str()) {
            return Err(EngineError::InvalidRequest(format!(
                "duplicate backend id: {}",
                backend.id
            )));
        }
    }

    Ok(())
}

// =============================================================================
// Task payload
// =============================================================================

/// The task handed to every backend in the panel.
///
/// Built by an external task/prompt builder; the engine forwards it without
/// inspecting its content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Optional system framing.
    pub system: Option<String>,
    /// The task body.
    pub user: String,
}

impl TaskPayload {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            system: None,
            user: user.into(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(&self.user));
        messages
    }
}

// =============================================================================
// Error taxonomy
// =============================================================================

/// Every way a backend call or its aggregation can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport failure: connection error, non-2xx response, bad wire body.
    NetworkError,
    /// The backend did not answer within its configured timeout.
    Timeout,
    /// The response text could not be parsed or repaired into JSON.
    MalformedResponse,
    /// The response text was empty or whitespace-only.
    EmptyResponse,
    /// Aggregation-level: no backend produced usable data.
    NoValidResponses,
    /// The designated authority backend failed or returned unusable output.
    AuthorityUnavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NetworkError => "network_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::EmptyResponse => "empty_response",
            ErrorKind::NoValidResponses => "no_valid_responses",
            ErrorKind::AuthorityUnavailable => "authority_unavailable",
        }
    }
}

/// One backend's failure, for hard-failure diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendFailure {
    pub backend_id: String,
    pub kind: ErrorKind,
}

/// Errors surfaced by the engine's public entry point.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Terminal hard failure: every backend failed or returned garbage, so
    /// there is nothing to aggregate and nothing to fall back on.
    #[error("no backend produced a usable response")]
    NoValidResponses { backend_errors: Vec<BackendFailure> },
}

// =============================================================================
// Call outcomes
// =============================================================================

/// The raw result of one backend invocation.
///
/// Exactly one outcome exists per registered backend per dispatch, created
/// once and never mutated; a backend that times out still yields an outcome.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub backend_id: String,
    pub weight: f64,
    /// Response text, present only on success.
    pub raw_text: Option<String>,
    /// Failure kind, present only on failure.
    pub error: Option<ErrorKind>,
    /// Wall-clock time the call took, including a timed-out wait.
    pub elapsed: Duration,
}

impl CallOutcome {
    pub fn succeeded(backend: &BackendDescriptor, raw_text: String, elapsed: Duration) -> Self {
        Self {
            backend_id: backend.id.clone(),
            weight: backend.weight,
            raw_text: Some(raw_text),
            error: None,
            elapsed,
        }
    }

    pub fn failed(backend: &BackendDescriptor, kind: ErrorKind, elapsed: Duration) -> Self {
        Self {
            backend_id: backend.id.clone(),
            weight: backend.weight,
            raw_text: None,
            error: Some(kind),
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A call outcome pushed through the response parser. One per outcome.
#[derive(Debug, Clone)]
pub struct ParsedResult {
    pub outcome: CallOutcome,
    /// Structured payload, when the call succeeded and its text parsed.
    pub payload: Option<Value>,
    /// Parse failure kind, when the call succeeded but its text did not parse.
    pub parse_error: Option<ErrorKind>,
}

impl ParsedResult {
    /// Usable for aggregation: the call succeeded and the text parsed.
    pub fn is_success(&self) -> bool {
        self.outcome.is_success() && self.parse_error.is_none() && self.payload.is_some()
    }

    /// The failure kind to report for this result, if any.
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        self.outcome.error.or(self.parse_error)
    }
}

/// Everything the aggregator needs: parsed results in registration order,
/// plus the original task for the authority's context.
#[derive(Debug, Clone)]
pub struct AggregationInput {
    pub results: Vec<ParsedResult>,
    pub task: TaskPayload,
}

// =============================================================================
// Final decision
// =============================================================================

/// How the final decision was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMethod {
    /// The authority backend combined the panel's answers.
    PrimaryAggregator,
    /// The authority was unavailable; the highest-weighted single answer was
    /// promoted instead. Degraded confidence.
    FallbackBestSingle,
}

/// Where a decision came from, for caller-side observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    /// Backends whose answers contributed, in registration order.
    pub contributing_backends: Vec<String>,
    pub method: DecisionMethod,
}

/// The single decision returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalDecision {
    pub payload: Value,
    pub provenance: Provenance,
}
