//! Provider abstraction shared by the OpenAI and OpenRouter backends.
//!
//! Uses blocking HTTP via `ureq`; every call is one suspension point of a
//! workflow step.

use redline_core::config::{ProviderKind, ProviderSettings, ReasoningEffort, Verbosity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Errors from provider calls.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("HTTP request failed: {0}")]
    Transport(String),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("response parse error: {0}")]
    Parse(String),
    #[error("empty response content from {model}")]
    EmptyContent { model: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Build the opening transcript: the system prompt (only if non-empty), then the user prompt.
pub fn opening_messages(system_prompt: &str, prompt: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if !system_prompt.trim().is_empty() {
        messages.push(ChatMessage::system(system_prompt));
    }
    messages.push(ChatMessage::user(prompt));
    messages
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    /// Cut off by the output-length limit.
    Length,
    Other(String),
    Missing,
}

impl FinishReason {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("stop") => Self::Stop,
            Some("length") => Self::Length,
            Some(other) => Self::Other(other.to_string()),
            None => Self::Missing,
        }
    }

    pub fn is_truncated(&self) -> bool {
        *self == Self::Length
    }
}

/// Token counts from a response's `usage` block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A completed chat response.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Raw message content of the first choice (may be empty).
    pub text: String,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
    /// Upstream response id, when reported.
    pub id: Option<String>,
}

/// Which timeout budget a call runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    SingleShot,
    Continuation,
}

/// Per-kind HTTP timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub single_shot: Duration,
    pub continuation: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            single_shot: Duration::from_secs(60),
            continuation: Duration::from_secs(300),
        }
    }
}

/// Sampling and length settings applied to every request, filtered per model
/// through the capability table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestOptions {
    pub temperature: f64,
    pub reasoning_effort: ReasoningEffort,
    pub verbosity: Verbosity,
    pub max_tokens: u32,
}

impl RequestOptions {
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self {
            temperature: settings.temperature,
            reasoning_effort: settings.reasoning_effort,
            verbosity: settings.verbosity,
            max_tokens: settings.max_tokens,
        }
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::from_settings(&ProviderSettings::default())
    }
}

/// Abstraction over chat-completion backends.
pub trait ChatProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// The model name (for display/logging/pricing).
    fn model(&self) -> &str;

    /// Whether a non-empty API key is configured.
    fn has_api_key(&self) -> bool;

    /// Send one chat-completion request with the given transcript.
    fn chat(&self, messages: &[ChatMessage], kind: CallKind) -> Result<Completion, ProviderError>;
}

/// HTTP agents for the two timeout budgets.
#[derive(Debug, Clone)]
pub(crate) struct Agents {
    single_shot: ureq::Agent,
    continuation: ureq::Agent,
}

impl Agents {
    pub(crate) fn new(timeouts: Timeouts) -> Self {
        Self {
            single_shot: build_agent(timeouts.single_shot),
            continuation: build_agent(timeouts.continuation),
        }
    }

    pub(crate) fn for_kind(&self, kind: CallKind) -> &ureq::Agent {
        match kind {
            CallKind::SingleShot => &self.single_shot,
            CallKind::Continuation => &self.continuation,
        }
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::new_with_config(
        ureq::config::Config::builder()
            .timeout_global(Some(timeout))
            // Error payloads carry the upstream message; read them instead of failing on status.
            .http_status_as_error(false)
            .build(),
    )
}

/// POST a JSON body with Bearer auth and return `(status, parsed body)`.
pub(crate) fn post_json(
    agent: &ureq::Agent,
    url: &str,
    api_key: &str,
    body: &Value,
) -> Result<(u16, Value), ProviderError> {
    let mut response = agent
        .post(url)
        .header("Authorization", &format!("Bearer {}", api_key))
        .header("content-type", "application/json")
        .send_json(body)
        .map_err(|e| ProviderError::Transport(e.to_string()))?;

    let status = response.status().as_u16();
    let text = response
        .body_mut()
        .read_to_string()
        .map_err(|e| ProviderError::Transport(e.to_string()))?;
    parse_body(status, &text)
}

/// GET with Bearer auth and return `(status, parsed body)`.
pub(crate) fn get_json(
    agent: &ureq::Agent,
    url: &str,
    api_key: &str,
    query: &[(&str, &str)],
) -> Result<(u16, Value), ProviderError> {
    let mut request = agent
        .get(url)
        .header("Authorization", &format!("Bearer {}", api_key));
    for (key, value) in query {
        request = request.query(*key, *value);
    }
    let mut response = request
        .call()
        .map_err(|e| ProviderError::Transport(e.to_string()))?;

    let status = response.status().as_u16();
    let text = response
        .body_mut()
        .read_to_string()
        .map_err(|e| ProviderError::Transport(e.to_string()))?;
    parse_body(status, &text)
}

fn parse_body(status: u16, text: &str) -> Result<(u16, Value), ProviderError> {
    match serde_json::from_str::<Value>(text) {
        Ok(json) => Ok((status, json)),
        Err(_) if !(200..300).contains(&status) => Err(ProviderError::Api {
            status,
            message: truncate_for_error(text),
        }),
        Err(e) => Err(ProviderError::Parse(e.to_string())),
    }
}

fn truncate_for_error(text: &str) -> String {
    const LIMIT: usize = 2000;
    if text.len() <= LIMIT {
        return text.to_string();
    }
    let mut end = LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Extract the first choice, finish reason and usage from a chat-completion body.
///
/// A body without a non-empty `choices` array is an API error: the message comes
/// from `error.message` when present, otherwise the body is dumped.
pub fn parse_completion(status: u16, body: &Value) -> Result<Completion, ProviderError> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first());

    let Some(choice) = choice else {
        let message = body
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .map(String::from)
            .unwrap_or_else(|| {
                format!(
                    "Unexpected API response: {}",
                    truncate_for_error(&body.to_string())
                )
            });
        return Err(ProviderError::Api { status, message });
    };

    let text = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();

    let finish_reason =
        FinishReason::parse(choice.get("finish_reason").and_then(|f| f.as_str()));

    Ok(Completion {
        text,
        finish_reason,
        usage: parse_usage(body),
        id: body.get("id").and_then(|i| i.as_str()).map(String::from),
    })
}

fn parse_usage(body: &Value) -> TokenUsage {
    let field = |name: &str| {
        body.get("usage")
            .and_then(|u| u.get(name))
            .and_then(|t| t.as_u64())
    };
    let prompt_tokens = field("prompt_tokens").unwrap_or(0);
    let completion_tokens = field("completion_tokens").unwrap_or(0);
    TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: field("total_tokens").unwrap_or(prompt_tokens + completion_tokens),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_opening_messages_skip_empty_system() {
        let messages = opening_messages("  ", "hello");
        assert_eq!(messages, vec![ChatMessage::user("hello")]);

        let messages = opening_messages("be terse", "hello");
        assert_eq!(messages[0], ChatMessage::system("be terse"));
        assert_eq!(messages[1], ChatMessage::user("hello"));
    }

    #[test]
    fn test_parse_completion_extracts_text_and_usage() {
        let body = json!({
            "id": "chatcmpl-1",
            "choices": [{
                "message": {"role": "assistant", "content": "Edited."},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        });
        let completion = parse_completion(200, &body).unwrap();
        assert_eq!(completion.text, "Edited.");
        assert_eq!(completion.finish_reason, FinishReason::Stop);
        assert_eq!(completion.usage.prompt_tokens, 12);
        assert_eq!(completion.usage.completion_tokens, 3);
        assert_eq!(completion.usage.total_tokens, 15);
        assert_eq!(completion.id.as_deref(), Some("chatcmpl-1"));
    }

    #[test]
    fn test_parse_completion_uses_error_message() {
        let body = json!({"error": {"message": "Incorrect API key provided", "type": "auth"}});
        match parse_completion(401, &body) {
            Err(ProviderError::Api { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_completion_dumps_unexpected_body() {
        let body = json!({"choices": [], "weird": true});
        match parse_completion(200, &body) {
            Err(ProviderError::Api { message, .. }) => {
                assert!(message.starts_with("Unexpected API response: "));
                assert!(message.contains("weird"));
            }
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_completion_missing_content_is_empty_text() {
        let body = json!({"choices": [{"message": {"role": "assistant"}, "finish_reason": "content_filter"}]});
        let completion = parse_completion(200, &body).unwrap();
        assert_eq!(completion.text, "");
        assert_eq!(
            completion.finish_reason,
            FinishReason::Other("content_filter".to_string())
        );
        assert_eq!(completion.usage, TokenUsage::default());
    }

    #[test]
    fn test_total_tokens_defaults_to_sum() {
        let body = json!({
            "choices": [{"message": {"content": "x"}}],
            "usage": {"prompt_tokens": 4, "completion_tokens": 6}
        });
        let completion = parse_completion(200, &body).unwrap();
        assert_eq!(completion.usage.total_tokens, 10);
        assert_eq!(completion.finish_reason, FinishReason::Missing);
    }

    #[test]
    fn test_non_json_error_body_is_api_error() {
        match parse_body(502, "<html>Bad gateway</html>") {
            Err(ProviderError::Api { status, message }) => {
                assert_eq!(status, 502);
                assert!(message.contains("Bad gateway"));
            }
            other => panic!("expected API error, got {:?}", other),
        }
        assert!(matches!(
            parse_body(200, "not json"),
            Err(ProviderError::Parse(_))
        ));
    }
}
