//! OpenAI Chat Completions backend.

use crate::models::capabilities;
use crate::provider::{
    Agents, CallKind, ChatMessage, ChatProvider, Completion, ProviderError, RequestOptions,
    Timeouts, parse_completion, post_json,
};
use redline_core::config::{ProviderKind, ReasoningEffort, Verbosity};
use serde_json::{Value, json};

pub struct OpenAiProvider {
    api_key: Option<String>,
    model: String,
    base_url: String,
    options: RequestOptions,
    agents: Agents,
}

impl OpenAiProvider {
    pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

    pub fn new(
        api_key: Option<String>,
        model: impl Into<String>,
        base_url: Option<String>,
        options: RequestOptions,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.into(),
            base_url: base_url.unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string()),
            options,
            agents: Agents::new(timeouts),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Shape the request body for this model's family.
    pub fn request_body(&self, messages: &[ChatMessage]) -> Value {
        let caps = capabilities(&self.model);
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });

        if caps.temperature {
            body["temperature"] = json!(self.options.temperature);
        }
        // Medium is the API default for both hints; omit it.
        if caps.reasoning_hints {
            if self.options.reasoning_effort != ReasoningEffort::Medium {
                body["reasoning_effort"] = json!(self.options.reasoning_effort.as_str());
            }
            if self.options.verbosity != Verbosity::Medium {
                body["verbosity"] = json!(self.options.verbosity.as_str());
            }
        }
        body[caps.token_param.field()] = json!(self.options.max_tokens);
        body
    }
}

impl ChatProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn chat(&self, messages: &[ChatMessage], kind: CallKind) -> Result<Completion, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ProviderError::Config("OpenAI API key is not configured (OPENAI_API_KEY)".to_string())
        })?;

        tracing::debug!(model = %self.model, messages = messages.len(), "openai request");
        let body = self.request_body(messages);
        let (status, json) = post_json(self.agents.for_kind(kind), &self.endpoint(), api_key, &body)?;
        parse_completion(status, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(model: &str, options: RequestOptions) -> OpenAiProvider {
        OpenAiProvider::new(
            Some("sk-test".to_string()),
            model,
            None,
            options,
            Timeouts::default(),
        )
    }

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage::system("sys"), ChatMessage::user("hello")]
    }

    #[test]
    fn test_default_family_sends_temperature_and_max_tokens() {
        let body = provider("gpt-4o", RequestOptions::default()).request_body(&messages());
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["temperature"], 1.0);
        assert_eq!(body["max_tokens"], 16_384);
        assert!(body.get("max_completion_tokens").is_none());
        assert!(body.get("reasoning_effort").is_none());
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
    }

    #[test]
    fn test_gpt5_omits_temperature_and_medium_hints() {
        let options = RequestOptions {
            reasoning_effort: ReasoningEffort::Medium,
            verbosity: Verbosity::Medium,
            ..RequestOptions::default()
        };
        let body = provider("gpt-5-mini", options).request_body(&messages());
        assert!(body.get("temperature").is_none());
        assert!(body.get("reasoning_effort").is_none());
        assert!(body.get("verbosity").is_none());
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["max_completion_tokens"], 16_384);
    }

    #[test]
    fn test_gpt5_sends_non_default_hints() {
        let options = RequestOptions {
            reasoning_effort: ReasoningEffort::Minimal,
            verbosity: Verbosity::Low,
            ..RequestOptions::default()
        };
        let body = provider("gpt-5", options).request_body(&messages());
        assert_eq!(body["reasoning_effort"], "minimal");
        assert_eq!(body["verbosity"], "low");
    }

    #[test]
    fn test_o4_mini_uses_completion_tokens_with_temperature() {
        let body = provider("o4-mini", RequestOptions::default()).request_body(&messages());
        assert_eq!(body["max_completion_tokens"], 16_384);
        assert_eq!(body["temperature"], 1.0);
        assert!(body.get("reasoning_effort").is_none());
    }

    #[test]
    fn test_missing_key_fails_before_network() {
        let provider = OpenAiProvider::new(
            Some("  ".to_string()),
            "gpt-4o",
            // Unroutable: a request attempt would surface as a transport error.
            Some("http://127.0.0.1:9".to_string()),
            RequestOptions::default(),
            Timeouts::default(),
        );
        assert!(!provider.has_api_key());
        let err = provider.chat(&messages(), CallKind::SingleShot).unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)), "{err}");
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let provider = OpenAiProvider::new(
            None,
            "gpt-4o",
            Some("https://proxy.local/v1/".to_string()),
            RequestOptions::default(),
            Timeouts::default(),
        );
        assert_eq!(provider.endpoint(), "https://proxy.local/v1/chat/completions");
    }
}
