//! Editing prompt selection.

use redline_core::config::{PromptSettings, PromptStyle};

const STRICT_SYSTEM: &str = "You are an expert US-English copy editor. \
Correct only sentences that contain grammar, punctuation, spelling or clear word-choice errors \
and leave every correct sentence verbatim. Keep headings and their underlines intact. \
Return only the edited text.";

const LOOSE_SYSTEM: &str = "You are an expert US-English copy editor and stylist. \
Fix all errors and smooth awkward phrasing while preserving the author's meaning, voice and \
structure. Keep headings and their underlines intact. Return only the edited text.";

const LOOSER_SYSTEM: &str = "You are an expert US-English editor and stylist. \
Fix all errors and rewrite sentences freely for clarity and flow while preserving meaning and \
structure. Keep headings and their underlines intact. Return only the edited text.";

const USER_PREFIX: &str = "Text to edit:\n\n";

/// System prompt plus the prefix placed before each chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user_prefix: String,
}

impl PromptPair {
    pub fn for_style(style: PromptStyle) -> Self {
        let system = match style {
            PromptStyle::Strict => STRICT_SYSTEM,
            PromptStyle::Loose => LOOSE_SYSTEM,
            PromptStyle::Looser => LOOSER_SYSTEM,
        };
        Self {
            system: system.to_string(),
            user_prefix: USER_PREFIX.to_string(),
        }
    }

    /// The configured style, with any explicit overrides applied.
    pub fn resolve(settings: &PromptSettings) -> Self {
        let mut pair = Self::for_style(settings.style);
        if let Some(system) = &settings.system {
            pair.system.clone_from(system);
        }
        if let Some(prefix) = &settings.user_prefix {
            pair.user_prefix.clone_from(prefix);
        }
        pair
    }

    pub fn user_prompt(&self, chunk: &str) -> String {
        format!("{}{}", self.user_prefix, chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_styles_have_distinct_system_prompts() {
        let strict = PromptPair::for_style(PromptStyle::Strict);
        let loose = PromptPair::for_style(PromptStyle::Loose);
        let looser = PromptPair::for_style(PromptStyle::Looser);
        assert_ne!(strict.system, loose.system);
        assert_ne!(loose.system, looser.system);
    }

    #[test]
    fn test_overrides_replace_style_text() {
        let settings = PromptSettings {
            style: PromptStyle::Loose,
            system: Some("custom system".to_string()),
            user_prefix: None,
        };
        let pair = PromptPair::resolve(&settings);
        assert_eq!(pair.system, "custom system");
        assert_eq!(pair.user_prompt("chunk"), "Text to edit:\n\nchunk");
    }
}
