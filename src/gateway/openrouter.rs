//! HTTP adapter for the OpenRouter chat-completions endpoint.
//!
//! This is transport only: it speaks the wire format, enforces size caps,
//! and turns every non-success into a [`ProviderError`] carrying whatever
//! context the provider gave back. Timeouts here are a transport backstop;
//! the engine applies its own tighter per-backend deadline on top.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::types::{ChatRequest, ChatResponse, FinishReason, Message, Role};

/// Response bodies larger than this are refused mid-stream.
const RESPONSE_BYTE_CAP: usize = 1_024 * 1_024;

/// Combined message length cap, roughly 125k tokens.
const INPUT_CHAR_CAP: usize = 500_000;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Clone)]
pub struct OpenRouterAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl OpenRouterAdapter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, Duration::from_secs(120), None, None)
    }

    /// Build from `OPENROUTER_*` environment variables. Only the API key is
    /// required; everything else has a default.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ProviderError::config("OPENROUTER_API_KEY not set"))?;

        let base_url =
            std::env::var("OPENROUTER_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());

        let timeout = std::env::var("OPENROUTER_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(120));

        Self::with_config(
            api_key,
            base_url,
            timeout,
            std::env::var("OPENROUTER_REFERER").ok(),
            std::env::var("OPENROUTER_APP_TITLE").ok(),
        )
    }

    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        referer: Option<String>,
        app_title: Option<String>,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let bearer = format!("Bearer {}", api_key.into());
        let auth = HeaderValue::from_str(&bearer)
            .map_err(|_| ProviderError::config("API key contains invalid header characters"))?;
        headers.insert(AUTHORIZATION, auth);

        // Optional attribution headers OpenRouter uses for app rankings.
        if let Some(v) = referer.as_deref().and_then(|r| HeaderValue::from_str(r).ok()) {
            headers.insert("HTTP-Referer", v);
        }
        if let Some(v) = app_title.as_deref().and_then(|t| HeaderValue::from_str(t).ok()) {
            headers.insert("X-Title", v);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("HTTP client construction failed: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let input_chars: usize = req.messages.iter().map(|m| m.content.len()).sum();
        if input_chars > INPUT_CHAR_CAP {
            return Err(ProviderError::invalid_request(format!(
                "input of {input_chars} chars exceeds the {INPUT_CHAR_CAP} cap"
            )));
        }

        let wire_messages: Vec<WireMessage> = req.messages.iter().map(WireMessage::from).collect();
        let wire_req = WireRequest {
            model: req.model.model_id(),
            messages: &wire_messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            response_format: req.json_mode.then_some(JsonObjectFormat {
                format_type: "json_object",
            }),
        };

        let started = Instant::now();
        let mut response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&wire_req)
            .send()
            .await?;

        let status = response.status();
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Read the body in chunks so an oversized response is cut off early
        // instead of buffered whole.
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > RESPONSE_BYTE_CAP {
                return Err(ProviderError::provider(
                    "openrouter",
                    format!("response exceeds the {RESPONSE_BYTE_CAP} byte cap"),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&bytes);

        if !status.is_success() {
            return Err(http_failure(status.as_u16(), &body, request_id));
        }

        let wire: WireResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::provider("openrouter", format!("unparseable body: {e}")))?;

        if let Some(err) = wire.error {
            return Err(ProviderError::provider(
                "openrouter",
                err.message.unwrap_or_default(),
            ));
        }

        let choice = wire
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| ProviderError::provider("openrouter", "response carried no choices"))?;

        let content = choice.message.and_then(|m| m.content).unwrap_or_default();

        // Token counts feed the usage sink, not the decision pipeline, so a
        // provider that omits them is tolerated.
        let (input_tokens, output_tokens) = wire
            .usage
            .map(|u| (u.prompt_tokens.unwrap_or(0), u.completion_tokens.unwrap_or(0)))
            .unwrap_or((0, 0));

        Ok(ChatResponse {
            content,
            input_tokens,
            output_tokens,
            latency: started.elapsed(),
            finish_reason: FinishReason::from(choice.finish_reason),
        })
    }
}

/// Map a non-2xx response to an error, surfacing the provider's own message
/// and code when the body carries them.
fn http_failure(status: u16, body: &str, request_id: Option<String>) -> ProviderError {
    let mut ctx = ErrorContext::new().with_status(status);
    if let Some(id) = request_id {
        ctx = ctx.with_request_id(id);
    }

    if let Ok(wire) = serde_json::from_str::<WireResponse>(body) {
        if let Some(err) = wire.error {
            if let Some(code) = err.code {
                ctx = ctx.with_code(code);
            }
            return ProviderError::provider_with_context(
                "openrouter",
                err.message.unwrap_or_default(),
                ctx,
            );
        }
    }

    ProviderError::provider_with_context("openrouter", format!("HTTP {status}"), ctx)
}

// Wire format.

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<JsonObjectFormat>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

impl From<&Message> for WireMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: m.content.clone(),
        }
    }
}

#[derive(Serialize)]
struct JsonObjectFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Option<Vec<WireChoice>>,
    usage: Option<WireUsage>,
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: Option<WireChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct WireError {
    message: Option<String>,
    code: Option<String>,
}
