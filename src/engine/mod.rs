//! Concurrent multi-backend query/aggregation engine.
//!
//! Wires together:
//! - BackendCaller (one invocation, one timeout, no retries)
//! - Dispatcher (bounded fan-out, order-stable collection)
//! - the response repairer (`crate::repair`)
//! - the weighted aggregator and its best-single fallback
//!
//! Entry point: [`QueryEngine::run_aggregated_query`].

pub mod aggregator;
pub mod caller;
pub mod dispatcher;
pub mod pipeline;
pub mod types;

pub use aggregator::{build_authority_task, parse_outcomes, select_best_single};
pub use caller::BackendCaller;
pub use dispatcher::{Dispatcher, MAX_DISPATCH_CONCURRENCY};
pub use pipeline::{default_roster, EngineConfig, QueryEngine};
pub use types::{
    validate_roster, AggregationInput, BackendDescriptor, BackendFailure, CallOutcome,
    DecisionMethod, EngineError, ErrorKind, FinalDecision, ParsedResult, Provenance, TaskPayload,
};
