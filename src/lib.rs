#![forbid(unsafe_code)]

//! # quorum-harness
//!
//! Fan one scoring task out to a weighted panel of independent LLM backends,
//! collect every answer under per-backend timeouts, and combine them into a
//! single decision with explicit provenance.
//!
//! The pipeline is deliberately failure-tolerant: a backend that errors or
//! times out never aborts its siblings, a malformed response is repaired or
//! downgraded to a typed parse error, and when the designated authority
//! backend (the one asked to merge the panel's answers) is itself unavailable
//! the engine degrades to the highest-weighted single answer, tagged as such
//! in the decision's provenance rather than silently substituted.

pub mod engine;
pub mod gateway;
pub mod repair;

pub use engine::{
    default_roster, BackendDescriptor, CallOutcome, DecisionMethod, EngineConfig, EngineError,
    ErrorKind, FinalDecision, QueryEngine, TaskPayload,
};
pub use gateway::{Attribution, ChatGateway, ProviderGateway, UsageSink};
