//! Model routing and per-family request capabilities.
//!
//! Request shaping is data-driven: a model id is matched against a prefix
//! table (longest prefix wins) after stripping any `vendor/` namespace, so
//! `openai/gpt-5-mini` behaves like `gpt-5-mini`.

use redline_core::config::ProviderKind;

/// Name of the output-length parameter a model family accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenParam {
    MaxTokens,
    MaxCompletionTokens,
}

impl TokenParam {
    pub fn field(self) -> &'static str {
        match self {
            Self::MaxTokens => "max_tokens",
            Self::MaxCompletionTokens => "max_completion_tokens",
        }
    }
}

/// What a model family accepts in a chat-completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelCapabilities {
    /// Whether `temperature` may be sent.
    pub temperature: bool,
    /// Whether `reasoning_effort` / `verbosity` may be sent.
    pub reasoning_hints: bool,
    pub token_param: TokenParam,
}

const DEFAULT_CAPABILITIES: ModelCapabilities = ModelCapabilities {
    temperature: true,
    reasoning_hints: false,
    token_param: TokenParam::MaxTokens,
};

const REASONING: ModelCapabilities = ModelCapabilities {
    temperature: true,
    reasoning_hints: false,
    token_param: TokenParam::MaxCompletionTokens,
};

const CAPABILITY_TABLE: &[(&str, ModelCapabilities)] = &[
    (
        "gpt-5",
        ModelCapabilities {
            temperature: false,
            reasoning_hints: true,
            token_param: TokenParam::MaxCompletionTokens,
        },
    ),
    ("o1", REASONING),
    ("o3", REASONING),
    ("o4-mini", REASONING),
];

/// Models served directly by OpenAI.
pub const OPENAI_MODELS: &[&str] = &[
    "gpt-4o-2024-11-20",
    "gpt-4o",
    "gpt-4o-mini",
    "chatgpt-4o-latest",
    "gpt-4.1",
    "gpt-4.1-mini",
    "o4-mini",
    "gpt-5",
    "gpt-5-mini",
];

/// Models routed through OpenRouter.
pub const OPENROUTER_MODELS: &[&str] = &[
    "openai/o3-mini",
    "anthropic/claude-3.5-sonnet",
    "anthropic/claude-3.7-sonnet",
    "anthropic/claude-sonnet-4",
    "google/gemini-2.0-flash-001",
    "google/gemini-2.5-flash-preview",
    "google/gemini-2.5-flash-preview-05-20",
    "google/gemini-2.5-flash",
    "google/gemini-2.5-pro-preview-03-25",
    "perplexity/sonar",
    "perplexity/sonar-pro",
];

fn base_name(model: &str) -> &str {
    model.rsplit_once('/').map_or(model, |(_, name)| name)
}

/// Look up the request capabilities for a model id.
pub fn capabilities(model: &str) -> ModelCapabilities {
    let name = base_name(model.trim());
    CAPABILITY_TABLE
        .iter()
        .filter(|(prefix, _)| name.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map_or(DEFAULT_CAPABILITIES, |(_, caps)| *caps)
}

/// Pick the backend for a model.
///
/// A forced provider always wins. Otherwise known models use their listed
/// backend; unknown `vendor/model` ids go to OpenRouter and anything else
/// falls back to OpenAI.
pub fn provider_for(model: &str, forced: Option<ProviderKind>) -> ProviderKind {
    if let Some(kind) = forced {
        return kind;
    }
    let model = model.trim();
    if OPENAI_MODELS.contains(&model) {
        ProviderKind::OpenAi
    } else if OPENROUTER_MODELS.contains(&model) || model.contains('/') {
        ProviderKind::OpenRouter
    } else {
        ProviderKind::OpenAi
    }
}
