//! Per-call usage records.
//!
//! Every gateway call, successful or not, produces one [`ProviderCallRecord`]
//! handed to a [`UsageSink`]. The sink is a seam: a service embedding the
//! engine persists records wherever it likes, the CLI prints them to stderr,
//! tests discard them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }
}

/// One provider call, with enough detail to reconstruct spend and latency
/// per model, per caller, per task.
#[derive(Debug, Clone)]
pub struct ProviderCallRecord {
    pub provider: &'static str,
    pub endpoint: &'static str,
    pub model: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub user_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub latency_ms: i32,
    pub status: CallStatus,
    /// Stable error code when status is Error.
    pub error_code: Option<String>,
    /// Code path that made the call.
    pub caller: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl ProviderCallRecord {
    pub fn new(
        provider: &'static str,
        endpoint: &'static str,
        model: impl Into<String>,
        caller: &'static str,
    ) -> Self {
        Self {
            provider,
            endpoint,
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            user_id: None,
            task_id: None,
            latency_ms: 0,
            status: CallStatus::Success,
            error_code: None,
            caller,
            timestamp: Utc::now(),
        }
    }

    pub fn tokens(mut self, input: i32, output: i32) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn user(mut self, user_id: Option<Uuid>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn task(mut self, task_id: Option<Uuid>) -> Self {
        self.task_id = task_id;
        self
    }

    pub fn latency(mut self, ms: i32) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn error(mut self, code: impl Into<String>) -> Self {
        self.status = CallStatus::Error;
        self.error_code = Some(code.into());
        self
    }
}

/// Destination for call records. Recording is fire-and-forget; a sink that
/// fails internally must swallow the failure rather than propagate it.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, record: ProviderCallRecord);
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: ProviderCallRecord) {}
}

/// One JSON line per call on stderr, for CLI runs that want to see what
/// they spent.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrUsageSink;

#[async_trait]
impl UsageSink for StderrUsageSink {
    async fn record(&self, record: ProviderCallRecord) {
        eprintln!(
            "{{\"ts\":\"{}\",\"provider\":\"{}\",\"model\":\"{}\",\"caller\":\"{}\",\"status\":\"{}\",\"input_tokens\":{},\"output_tokens\":{},\"latency_ms\":{}{}}}",
            record.timestamp.to_rfc3339(),
            record.provider,
            record.model,
            record.caller,
            record.status.as_str(),
            record.input_tokens,
            record.output_tokens,
            record.latency_ms,
            record
                .error_code
                .as_deref()
                .map(|c| format!(",\"error_code\":\"{c}\""))
                .unwrap_or_default(),
        );
    }
}
