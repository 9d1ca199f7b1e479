//! OpenRouter backend (OpenAI-compatible chat completions for many vendors).

use crate::models::capabilities;
use crate::provider::{
    Agents, CallKind, ChatMessage, ChatProvider, Completion, ProviderError, RequestOptions,
    Timeouts, get_json, parse_completion, post_json,
};
use redline_core::config::ProviderKind;
use serde_json::{Value, json};

/// Usage and cost as reported by OpenRouter's generation lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationStats {
    pub id: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_cost: f64,
}

pub struct OpenRouterProvider {
    api_key: Option<String>,
    model: String,
    base_url: String,
    options: RequestOptions,
    agents: Agents,
}

impl OpenRouterProvider {
    pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

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

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn require_key(&self) -> Result<&str, ProviderError> {
        self.api_key.as_deref().ok_or_else(|| {
            ProviderError::Config(
                "OpenRouter API key is not configured (OPENROUTER_API_KEY)".to_string(),
            )
        })
    }

    /// OpenRouter normalizes the output limit, so `max_tokens` is always sent.
    pub fn request_body(&self, messages: &[ChatMessage]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.options.max_tokens,
        });
        if capabilities(&self.model).temperature {
            body["temperature"] = json!(self.options.temperature);
        }
        body
    }

    /// Look up the usage OpenRouter billed for a finished generation.
    ///
    /// Stats can lag behind the completion by a few seconds, so a missing
    /// `data` block is reported as an API error rather than zeros.
    pub fn generation_stats(&self, generation_id: &str) -> Result<GenerationStats, ProviderError> {
        let api_key = self.require_key()?;
        if generation_id.trim().is_empty() {
            return Err(ProviderError::Config("empty generation id".to_string()));
        }

        let (status, body) = get_json(
            self.agents.for_kind(CallKind::SingleShot),
            &self.url("generation"),
            api_key,
            &[("id", generation_id)],
        )?;
        parse_generation_stats(status, generation_id, &body)
    }
}

fn parse_generation_stats(
    status: u16,
    generation_id: &str,
    body: &Value,
) -> Result<GenerationStats, ProviderError> {
    let Some(data) = body.get("data").filter(|d| d.is_object()) else {
        let message = body
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("no stats data in response")
            .to_string();
        return Err(ProviderError::Api { status, message });
    };

    Ok(GenerationStats {
        id: generation_id.to_string(),
        prompt_tokens: data
            .get("tokens_prompt")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        completion_tokens: data
            .get("tokens_completion")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        total_cost: data
            .get("total_cost")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
    })
}

impl ChatProvider for OpenRouterProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenRouter
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn chat(&self, messages: &[ChatMessage], kind: CallKind) -> Result<Completion, ProviderError> {
        let api_key = self.require_key()?;

        tracing::debug!(model = %self.model, messages = messages.len(), "openrouter request");
        let body = self.request_body(messages);
        let (status, json) = post_json(
            self.agents.for_kind(kind),
            &self.url("chat/completions"),
            api_key,
            &body,
        )?;
        parse_completion(status, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(model: &str) -> OpenRouterProvider {
        OpenRouterProvider::new(
            Some("sk-or-test".to_string()),
            model,
            None,
            RequestOptions::default(),
            Timeouts::default(),
        )
    }

    #[test]
    fn test_request_body_sends_temperature_and_max_tokens() {
        let body = provider("anthropic/claude-sonnet-4").request_body(&[ChatMessage::user("hi")]);
        assert_eq!(body["model"], "anthropic/claude-sonnet-4");
        assert_eq!(body["temperature"], 1.0);
        assert_eq!(body["max_tokens"], 16_384);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_request_body_respects_temperature_capability() {
        let body = provider("openai/gpt-5-mini").request_body(&[ChatMessage::user("hi")]);
        assert!(body.get("temperature").is_none());
        assert_eq!(body["max_tokens"], 16_384);
    }

    #[test]
    fn test_urls() {
        let p = provider("perplexity/sonar");
        assert_eq!(
            p.url("chat/completions"),
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert_eq!(p.url("generation"), "https://openrouter.ai/api/v1/generation");
    }

    #[test]
    fn test_parse_generation_stats() {
        let body = json!({
            "data": {"tokens_prompt": 120, "tokens_completion": 80, "total_cost": 0.0042}
        });
        let stats = parse_generation_stats(200, "gen-1", &body).unwrap();
        assert_eq!(stats.id, "gen-1");
        assert_eq!(stats.prompt_tokens, 120);
        assert_eq!(stats.completion_tokens, 80);
        assert!((stats.total_cost - 0.0042).abs() < 1e-12);
    }

    #[test]
    fn test_generation_stats_without_data_is_error() {
        let body = json!({"error": {"message": "Generation not found"}});
        match parse_generation_stats(404, "gen-2", &body) {
            Err(ProviderError::Api { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "Generation not found");
            }
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let p = OpenRouterProvider::new(
            None,
            "perplexity/sonar",
            None,
            RequestOptions::default(),
            Timeouts::default(),
        );
        assert!(matches!(
            p.chat(&[ChatMessage::user("x")], CallKind::SingleShot),
            Err(ProviderError::Config(_))
        ));
        assert!(matches!(
            p.generation_stats("gen-1"),
            Err(ProviderError::Config(_))
        ));
    }
}
