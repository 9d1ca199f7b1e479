//! The generation client: one top-level call at a time, with usage tracking.

use crate::models::provider_for;
use crate::offline::OfflineProvider;
use crate::openai::OpenAiProvider;
use crate::openrouter::OpenRouterProvider;
use crate::pricing::{CostTracker, Price, price_for};
use crate::provider::{
    CallKind, ChatMessage, ChatProvider, ProviderError, RequestOptions, Timeouts,
    opening_messages,
};
use redline_core::config::{ContinuationSettings, ProviderKind, RedlineConfig};
use redline_core::usage::CallUsage;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Appended to the text when continuation runs out of rounds.
pub const INCOMPLETE_WARNING: &str =
    "\n\nWarning: Response may be incomplete due to length limitations.";

/// Everything needed to talk to one model, resolved once per step.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub options: RequestOptions,
    /// `None` when the model is unpriced.
    pub price: Option<Price>,
    pub timeouts: Timeouts,
}

impl ProviderConfig {
    pub fn resolve(config: &RedlineConfig) -> Self {
        let kind = provider_for(config.provider.model.trim(), config.provider.provider);
        Self::resolve_as(config, kind)
    }

    /// Resolve against a specific provider, ignoring model routing.
    pub fn resolve_as(config: &RedlineConfig, kind: ProviderKind) -> Self {
        let settings = &config.provider;
        let model = settings.model.trim().to_string();
        let base_url = match kind {
            ProviderKind::OpenAi => settings.openai_base_url.clone(),
            ProviderKind::OpenRouter => settings.openrouter_base_url.clone(),
        };
        Self {
            kind,
            api_key: settings.api_key_for(kind).map(String::from),
            price: price_for(&model, &config.pricing),
            base_url,
            options: RequestOptions::from_settings(settings),
            timeouts: Timeouts {
                single_shot: Duration::from_secs(config.timeouts.single_shot_secs),
                continuation: Duration::from_secs(config.timeouts.continuation_secs),
            },
            model,
        }
    }

    /// Build the HTTP backend this configuration routes to.
    pub fn build_provider(&self) -> Arc<dyn ChatProvider> {
        match self.kind {
            ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(
                self.api_key.clone(),
                self.model.clone(),
                Some(self.base_url.clone()),
                self.options,
                self.timeouts,
            )),
            ProviderKind::OpenRouter => Arc::new(self.openrouter()),
        }
    }

    /// An OpenRouter backend with this configuration's key and base URL.
    /// Resolve with [`ProviderConfig::resolve_as`] to get the OpenRouter ones.
    pub fn openrouter(&self) -> OpenRouterProvider {
        OpenRouterProvider::new(
            self.api_key.clone(),
            self.model.clone(),
            Some(self.base_url.clone()),
            self.options,
            self.timeouts,
        )
    }
}

/// Limits for re-prompting after a truncated reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationPolicy {
    pub max_rounds: usize,
    /// Accumulated `char`s (not bytes) treated as complete regardless of
    /// finish reason.
    pub max_chars: usize,
    pub directive: String,
}

impl ContinuationPolicy {
    pub fn from_settings(settings: &ContinuationSettings) -> Self {
        Self {
            max_rounds: settings.max_rounds.max(1),
            max_chars: settings.max_chars,
            directive: settings.directive.clone(),
        }
    }
}

impl Default for ContinuationPolicy {
    fn default() -> Self {
        Self::from_settings(&ContinuationSettings::default())
    }
}

/// Drives a [`ChatProvider`] for one top-level call at a time and keeps the
/// usage of the most recent call.
pub struct LlmClient {
    provider: Arc<dyn ChatProvider>,
    tracker: CostTracker,
    continuation: ContinuationPolicy,
}

impl LlmClient {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        price: Option<Price>,
        continuation: ContinuationPolicy,
    ) -> Self {
        let tracker = CostTracker::new(provider.model(), price);
        Self {
            provider,
            tracker,
            continuation,
        }
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    /// Usage of the most recent top-level call, including one that failed
    /// after the provider answered.
    pub fn last_usage(&self) -> CallUsage {
        self.tracker.to_usage()
    }

    fn begin(&mut self) -> Result<(), ProviderError> {
        self.tracker.reset();
        if !self.provider.has_api_key() {
            return Err(ProviderError::Config(format!(
                "API key not set for {} (model {})",
                self.provider.kind(),
                self.provider.model()
            )));
        }
        Ok(())
    }

    fn empty_content(&self) -> ProviderError {
        ProviderError::EmptyContent {
            model: self.provider.model().to_string(),
        }
    }

    /// One request, one reply. The reply is trimmed; an empty reply is an error.
    pub fn generate(&mut self, system_prompt: &str, prompt: &str) -> Result<String, ProviderError> {
        self.begin()?;
        info!(model = %self.model(), provider = %self.kind(), "generating");

        let messages = opening_messages(system_prompt, prompt);
        let completion = self.provider.chat(&messages, CallKind::SingleShot)?;
        self.tracker.record(completion.usage);

        let text = completion.text.trim();
        if text.is_empty() {
            return Err(self.empty_content());
        }
        Ok(text.to_string())
    }

    /// Keep asking for more while the provider reports a length cut-off.
    ///
    /// Stops when the finish reason is anything but `length` or the
    /// accumulated text reaches the character ceiling. After the round cap the
    /// partial text is returned with [`INCOMPLETE_WARNING`] appended.
    pub fn generate_continuous(
        &mut self,
        system_prompt: &str,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        self.begin()?;
        info!(
            model = %self.model(),
            provider = %self.kind(),
            max_rounds = self.continuation.max_rounds,
            "generating with continuation"
        );

        let mut messages = opening_messages(system_prompt, prompt);
        let mut full = String::new();

        for round in 1..=self.continuation.max_rounds {
            debug!(round, messages = messages.len(), "continuation round");
            let completion = self.provider.chat(&messages, CallKind::Continuation)?;
            self.tracker.record(completion.usage);

            if completion.text.trim().is_empty() {
                return Err(self.empty_content());
            }
            full.push_str(&completion.text);

            let chars = full.chars().count();
            if chars >= self.continuation.max_chars || !completion.finish_reason.is_truncated() {
                debug!(round, chars, "continuation complete");
                return Ok(full.trim().to_string());
            }

            messages.push(ChatMessage::assistant(completion.text));
            if round < self.continuation.max_rounds {
                messages.push(ChatMessage::user(self.continuation.directive.clone()));
            }
        }

        warn!(
            model = %self.model(),
            rounds = self.continuation.max_rounds,
            "continuation round cap reached, returning partial text"
        );
        Ok(format!("{}{}", full.trim(), INCOMPLETE_WARNING))
    }
}

/// Build a client for the configured model.
///
/// A missing API key is not an error here; the first call reports it.
pub fn create_client(config: &RedlineConfig) -> LlmClient {
    let resolved = ProviderConfig::resolve(config);
    if resolved.price.is_none() {
        warn!(model = %resolved.model, "no price known for model, usage is recorded at zero cost");
    }
    LlmClient::new(
        resolved.build_provider(),
        resolved.price,
        ContinuationPolicy::from_settings(&config.continuation),
    )
}

/// Build a client that echoes prompts instead of calling a provider.
pub fn create_offline_client(config: &RedlineConfig) -> LlmClient {
    let resolved = ProviderConfig::resolve(config);
    LlmClient::new(
        Arc::new(OfflineProvider::new(resolved.model.clone()).with_kind(resolved.kind)),
        resolved.price,
        ContinuationPolicy::from_settings(&config.continuation),
    )
}
