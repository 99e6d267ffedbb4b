//! The provider capability: one uniform `complete` call per vendor.
//!
//! Adapters own wire-format translation and failure classification; the
//! engine never branches on vendor identity. The classification — not the
//! raw HTTP status — is what drives the retry state machine.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::api::{ChatMessage, ChatRequest, ChatResponse, ResponseFormat, ToolCall, ToolDefinition};
use crate::utils::url::construct_api_url;

/// How an attempt failed, reduced to the categories the retry state
/// machine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Credential rejected (401/403). Excluded for the rest of the
    /// invocation.
    InvalidCredential,
    /// Per-account throttling (429). Another credential may still work.
    RateLimited,
    /// Upstream 5xx. Treated like rate limiting.
    ServerUnavailable,
    /// The model identifier itself was rejected; no credential will fix it.
    BadModel,
    /// Any other request rejection. Not retryable.
    BadRequest,
    /// Content-policy or safety rejection. Never retried.
    ContentPolicy,
    /// Network failure or timeout.
    Transport,
}

#[derive(Debug, Clone)]
pub struct ClassifiedFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ClassifiedFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        ClassifiedFailure {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transport, message)
    }
}

impl fmt::Display for ClassifiedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FailureKind::InvalidCredential => "invalid credential",
            FailureKind::RateLimited => "rate limited",
            FailureKind::ServerUnavailable => "server unavailable",
            FailureKind::BadModel => "unknown model",
            FailureKind::BadRequest => "bad request",
            FailureKind::ContentPolicy => "content policy rejection",
            FailureKind::Transport => "transport error",
        };
        write!(f, "{}: {}", kind, self.message)
    }
}

impl std::error::Error for ClassifiedFailure {}

/// One immutable attempt: everything needed for a single HTTP completion
/// call against a chosen (model, credential) pair.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub credential: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub tools: Option<Vec<ToolDefinition>>,
    pub json_only: bool,
}

/// What a successful attempt yielded: final text, or pending tool calls
/// that must be satisfied before final text exists.
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    Text(String),
    ToolCalls {
        /// The assistant turn carrying the pending calls, preserved so it
        /// can be appended to the working conversation as-is.
        assistant: ChatMessage,
        calls: Vec<ToolCall>,
    },
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionOutcome, ClassifiedFailure>;
}

/// Adapter for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
}

/// Vision and audio payloads can take a while; keep the request timeout
/// generous and treat anything that hangs past it as a transport failure.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

impl OpenAiCompatProvider {
    pub fn new(base_url: &str) -> Result<Self, ClassifiedFailure> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ClassifiedFailure::transport(err.to_string()))?;
        Ok(OpenAiCompatProvider {
            client,
            base_url: base_url.to_string(),
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionOutcome, ClassifiedFailure> {
        let payload = ChatRequest {
            model: request.model.clone(),
            messages: request.messages.clone(),
            temperature: request.temperature,
            max_tokens: Some(request.max_tokens),
            tools: request.tools.clone(),
            tool_choice: request.tools.as_ref().map(|_| "auto".to_string()),
            response_format: request.json_only.then(ResponseFormat::json_object),
        };

        let url = construct_api_url(&self.base_url, "chat/completions");
        debug!(model = %request.model, url = %url, "sending completion request");

        let mut http_request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if !request.credential.is_empty() {
            http_request =
                http_request.header("Authorization", format!("Bearer {}", request.credential));
        }

        let response = http_request
            .json(&payload)
            .send()
            .await
            .map_err(|err| ClassifiedFailure::transport(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ClassifiedFailure::transport(err.to_string()))?;

        if !status.is_success() {
            return Err(classify_http_failure(status.as_u16(), &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|err| {
            ClassifiedFailure::new(
                FailureKind::BadRequest,
                format!("unparseable response: {err}"),
            )
        })?;

        if let Some(error) = parsed.error {
            return Err(classify_error_message(&error.message, error.code.as_deref()));
        }

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| {
                ClassifiedFailure::new(FailureKind::BadRequest, "response carried no choices")
            })?;

        if let Some(calls) = message.tool_calls.filter(|calls| !calls.is_empty()) {
            let assistant = ChatMessage {
                role: "assistant".to_string(),
                content: message.content.clone(),
                name: None,
                tool_call_id: None,
                tool_calls: Some(calls.clone()),
            };
            return Ok(CompletionOutcome::ToolCalls { assistant, calls });
        }

        match message.content {
            Some(content) if !content.is_blank() => Ok(CompletionOutcome::Text(content.as_text())),
            _ => Err(ClassifiedFailure::new(
                FailureKind::BadRequest,
                "response carried neither content nor tool calls",
            )),
        }
    }
}

/// Map an HTTP error status plus body to a classified failure.
pub fn classify_http_failure(status: u16, body: &str) -> ClassifiedFailure {
    let message = summarize_error_body(body);
    if looks_like_policy_rejection(&message) {
        return ClassifiedFailure::new(FailureKind::ContentPolicy, message);
    }
    match status {
        401 | 403 => ClassifiedFailure::new(FailureKind::InvalidCredential, message),
        429 => ClassifiedFailure::new(FailureKind::RateLimited, message),
        500..=599 => ClassifiedFailure::new(FailureKind::ServerUnavailable, message),
        400 | 404 | 422 => {
            if looks_like_bad_model(&message) {
                ClassifiedFailure::new(FailureKind::BadModel, message)
            } else {
                ClassifiedFailure::new(FailureKind::BadRequest, message)
            }
        }
        other => ClassifiedFailure::new(FailureKind::BadRequest, format!("HTTP {other}: {message}")),
    }
}

/// Classify an error object embedded in a 200 response body.
fn classify_error_message(message: &str, code: Option<&str>) -> ClassifiedFailure {
    let combined = match code {
        Some(code) => format!("{code}: {message}"),
        None => message.to_string(),
    };
    if looks_like_policy_rejection(&combined) {
        ClassifiedFailure::new(FailureKind::ContentPolicy, combined)
    } else if looks_like_bad_model(&combined) {
        ClassifiedFailure::new(FailureKind::BadModel, combined)
    } else {
        ClassifiedFailure::new(FailureKind::BadRequest, combined)
    }
}

fn looks_like_bad_model(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("model")
        && (lowered.contains("not found")
            || lowered.contains("does not exist")
            || lowered.contains("unknown")
            || lowered.contains("unsupported")
            || lowered.contains("invalid model")
            || lowered.contains("decommissioned"))
}

fn looks_like_policy_rejection(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("content policy")
        || lowered.contains("content management policy")
        || lowered.contains("safety system")
        || lowered.contains("flagged as potentially violating")
}

/// Pull the human-readable message out of a JSON error body, falling back
/// to the collapsed raw text.
fn summarize_error_body(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let summary = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .or_else(|| value.get("message").and_then(|v| v.as_str()))
            .or_else(|| value.get("error").and_then(|v| v.as_str()));
        if let Some(text) = summary {
            return text.to_string();
        }
    }
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        "<empty error body>".to_string()
    } else {
        collapsed
    }
}
