//! Configuration for providers, prompts and the editing workflow.
//!
//! Load order: `.redline/config.toml` → environment variables → defaults.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level redline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedlineConfig {
    pub provider: ProviderSettings,
    pub prompts: PromptSettings,
    pub workflow: WorkflowSettings,
    pub continuation: ContinuationSettings,
    pub timeouts: TimeoutSettings,
    /// Per-model price overrides in USD per million tokens, keyed by model id.
    /// Entries here win over the built-in pricing table.
    pub pricing: BTreeMap<String, PriceOverride>,
}

/// Which chat-completion backend serves a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    OpenRouter,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::OpenRouter => "openrouter",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "openrouter" => Ok(Self::OpenRouter),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Reasoning effort hint for models that accept it instead of a temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    #[default]
    Minimal,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Output verbosity hint for models that accept it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Low,
    #[default]
    Medium,
    High,
}

impl Verbosity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Model and request settings for the chat-completion providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Model identifier, e.g. `gpt-4o` or `anthropic/claude-sonnet-4`.
    pub model: String,
    /// Force a backend instead of looking the model up in the routing table.
    pub provider: Option<ProviderKind>,
    /// Sampling temperature. Ignored for model families that reject it.
    pub temperature: f64,
    pub reasoning_effort: ReasoningEffort,
    pub verbosity: Verbosity,
    /// Output-length limit sent with every request.
    pub max_tokens: u32,
    pub openai_base_url: String,
    pub openrouter_base_url: String,
    /// Read from `OPENAI_API_KEY`; never written back to disk.
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    /// Read from `OPENROUTER_API_KEY`; never written back to disk.
    #[serde(skip_serializing)]
    pub openrouter_api_key: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            provider: None,
            temperature: 1.0,
            reasoning_effort: ReasoningEffort::default(),
            verbosity: Verbosity::default(),
            max_tokens: 16_384,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openrouter_base_url: "https://openrouter.ai/api/v1".to_string(),
            openai_api_key: None,
            openrouter_api_key: None,
        }
    }
}

impl ProviderSettings {
    /// The API key configured for the given backend, if any.
    pub fn api_key_for(&self, kind: ProviderKind) -> Option<&str> {
        let key = match kind {
            ProviderKind::OpenAi => self.openai_api_key.as_deref(),
            ProviderKind::OpenRouter => self.openrouter_api_key.as_deref(),
        };
        key.filter(|k| !k.trim().is_empty())
    }
}

/// Named editing style; each selects a system prompt and user-prompt prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStyle {
    #[default]
    Strict,
    Loose,
    Looser,
}

impl std::str::FromStr for PromptStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "loose" => Ok(Self::Loose),
            "looser" => Ok(Self::Looser),
            other => Err(format!("unknown prompt style '{}'", other)),
        }
    }
}

/// Editing prompt selection. The prompt text itself is opaque configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSettings {
    pub style: PromptStyle,
    /// Replaces the style's system prompt when set.
    pub system: Option<String>,
    /// Replaces the style's user-prompt prefix when set.
    pub user_prefix: Option<String>,
}

/// Step-machine bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Upper bound on edited sections per job.
    pub max_sections: usize,
    /// Seconds a completed job stays pollable before it is purged.
    pub grace_secs: u64,
    /// Fail documents without any underline heading instead of editing them
    /// as a single intro block.
    pub require_sections: bool,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_sections: 16,
            grace_secs: 180,
            require_sections: true,
        }
    }
}

/// Truncation re-prompting limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuationSettings {
    /// Edit through the continuation loop instead of single-shot calls.
    pub enabled: bool,
    pub max_rounds: usize,
    /// Accumulated output length treated as complete, counted in Unicode
    /// scalar values (`char`s), not bytes.
    pub max_chars: usize,
    /// User turn appended after a truncated assistant reply.
    pub directive: String,
}

impl Default for ContinuationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_rounds: 5,
            max_chars: 40_000,
            directive: "[system: Please continue your response from exactly where you left off, \
                        maintaining the same context and format. Your response will be \
                        concatenated with the previous part.]"
                .to_string(),
        }
    }
}

/// HTTP timeouts for provider calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub single_shot_secs: u64,
    pub continuation_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            single_shot_secs: 60,
            continuation_secs: 300,
        }
    }
}

/// Price entry in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceOverride {
    pub input: f64,
    pub output: f64,
}

/// One year.
const MAX_GRACE_SECS: u64 = 365 * 24 * 60 * 60;

/// Helper to parse an env var and apply it to a config field.
fn env_override<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(v) = std::env::var(var)
        && let Ok(n) = v.parse()
    {
        *target = n;
    }
}

fn env_secret(var: &str, target: &mut Option<String>) {
    if let Ok(v) = std::env::var(var)
        && !v.trim().is_empty()
    {
        *target = Some(v.trim().to_string());
    }
}

impl RedlineConfig {
    /// Load config from `.redline/config.toml` in the project root, with env var overrides.
    /// Falls back to defaults if no config file exists.
    pub fn load(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(".redline").join("config.toml");

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides on top of file/default values.
    pub fn apply_env(&mut self) {
        env_secret("OPENAI_API_KEY", &mut self.provider.openai_api_key);
        env_secret("OPENROUTER_API_KEY", &mut self.provider.openrouter_api_key);
        env_override("REDLINE_MODEL", &mut self.provider.model);
        env_override("REDLINE_TEMPERATURE", &mut self.provider.temperature);
        env_override("REDLINE_PROMPT_STYLE", &mut self.prompts.style);
        env_override("REDLINE_MAX_SECTIONS", &mut self.workflow.max_sections);
        env_override("REDLINE_GRACE_SECS", &mut self.workflow.grace_secs);

        if let Ok(v) = std::env::var("REDLINE_PROVIDER")
            && let Ok(kind) = v.parse()
        {
            self.provider.provider = Some(kind);
        }
    }

    /// Reject settings that would make the workflow misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.provider.model.trim().is_empty() {
            anyhow::bail!("provider.model must not be empty");
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            anyhow::bail!(
                "provider.temperature ({}) must be between 0 and 2",
                self.provider.temperature
            );
        }
        if self.provider.max_tokens == 0 {
            anyhow::bail!("provider.max_tokens must be greater than 0");
        }
        if self.workflow.max_sections == 0 {
            anyhow::bail!("workflow.max_sections must be greater than 0");
        }
        if self.workflow.grace_secs > MAX_GRACE_SECS {
            anyhow::bail!(
                "workflow.grace_secs ({}) must not exceed {}",
                self.workflow.grace_secs,
                MAX_GRACE_SECS
            );
        }
        if self.continuation.max_rounds == 0 {
            anyhow::bail!("continuation.max_rounds must be greater than 0");
        }
        for (model, price) in &self.pricing {
            if price.input < 0.0 || price.output < 0.0 {
                anyhow::bail!("pricing for '{}' must not be negative", model);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RedlineConfig::default();
        assert_eq!(config.provider.model, "gpt-4o");
        assert_eq!(config.provider.max_tokens, 16_384);
        assert_eq!(config.workflow.max_sections, 16);
        assert_eq!(config.workflow.grace_secs, 180);
        assert!(config.workflow.require_sections);
        assert_eq!(config.continuation.max_rounds, 5);
        assert_eq!(config.continuation.max_chars, 40_000);
        assert_eq!(config.timeouts.single_shot_secs, 60);
        assert_eq!(config.timeouts.continuation_secs, 300);
        assert_eq!(config.prompts.style, PromptStyle::Strict);
        assert!(config.pricing.is_empty());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[provider]
model = "gpt-5-mini"
reasoning_effort = "low"
verbosity = "high"

[prompts]
style = "looser"

[workflow]
max_sections = 4

[pricing."my-model"]
input = 1.5
output = 3.0
"#;
        let config: RedlineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.provider.model, "gpt-5-mini");
        assert_eq!(config.provider.reasoning_effort, ReasoningEffort::Low);
        assert_eq!(config.provider.verbosity, Verbosity::High);
        assert_eq!(config.prompts.style, PromptStyle::Looser);
        assert_eq!(config.workflow.max_sections, 4);
        assert_eq!(
            config.pricing.get("my-model"),
            Some(&PriceOverride {
                input: 1.5,
                output: 3.0
            })
        );
        // Defaults for unspecified fields
        assert_eq!(config.workflow.grace_secs, 180);
        assert_eq!(config.provider.temperature, 1.0);
    }

    #[test]
    fn test_forced_provider_from_toml() {
        let config: RedlineConfig = toml::from_str(
            r#"
[provider]
model = "my-proxy-model"
provider = "openrouter"
"#,
        )
        .unwrap();
        assert_eq!(config.provider.provider, Some(ProviderKind::OpenRouter));
    }

    #[test]
    fn test_config_load_nonexistent() {
        let config = RedlineConfig::load(Path::new("/nonexistent/path")).unwrap();
        assert_eq!(config.workflow.max_sections, 16);
    }

    #[test]
    fn test_load_reads_project_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".redline");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("config.toml"),
            r#"
[continuation]
max_rounds = 3
"#,
        )
        .unwrap();

        let config = RedlineConfig::load(tmp.path()).unwrap();
        assert_eq!(config.continuation.max_rounds, 3);
        assert_eq!(config.continuation.max_chars, 40_000);
    }

    #[test]
    fn test_validate_rejects_zero_sections() {
        let mut config = RedlineConfig::default();
        config.workflow.max_sections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_temperature_out_of_range() {
        let mut config = RedlineConfig::default();
        config.provider.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_blank_api_key_is_absent() {
        let mut settings = ProviderSettings::default();
        settings.openai_api_key = Some("   ".to_string());
        assert_eq!(settings.api_key_for(ProviderKind::OpenAi), None);
        settings.openrouter_api_key = Some("sk-or".to_string());
        assert_eq!(settings.api_key_for(ProviderKind::OpenRouter), Some("sk-or"));
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("OpenRouter".parse::<ProviderKind>(), Ok(ProviderKind::OpenRouter));
        assert!("anthropic".parse::<ProviderKind>().is_err());
    }
}
