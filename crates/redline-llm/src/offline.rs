//! A provider that never touches the network.
//!
//! Replies come from a scripted queue; once the queue is empty the provider
//! echoes the last user turn back, with token counts estimated at roughly four
//! characters per token. Every transcript it receives is recorded.

use crate::provider::{
    CallKind, ChatMessage, ChatProvider, Completion, FinishReason, ProviderError, Role, TokenUsage,
};
use redline_core::config::ProviderKind;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// One recorded request.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub messages: Vec<ChatMessage>,
    pub kind: CallKind,
}

pub struct OfflineProvider {
    model: String,
    kind: ProviderKind,
    has_key: bool,
    script: Mutex<VecDeque<Result<Completion, ProviderError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

fn estimate_tokens(text: &str) -> u64 {
    text.chars().count().div_ceil(4) as u64
}

impl OfflineProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            kind: ProviderKind::OpenAi,
            has_key: true,
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Report no API key, so clients fail with a configuration error.
    pub fn without_key(mut self) -> Self {
        self.has_key = false;
        self
    }

    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    /// Queue a reply.
    pub fn push(&self, reply: Result<Completion, ProviderError>) -> &Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
        self
    }

    /// Queue a text reply with the given finish reason and token counts.
    pub fn push_text(
        &self,
        text: impl Into<String>,
        finish_reason: FinishReason,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) -> &Self {
        self.push(Ok(Completion {
            text: text.into(),
            finish_reason,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            id: None,
        }))
    }

    /// Every request received so far, oldest first.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn echo(messages: &[ChatMessage]) -> Completion {
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let prompt_tokens: u64 = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
        let completion_tokens = estimate_tokens(&prompt);
        Completion {
            text: prompt,
            finish_reason: FinishReason::Stop,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            id: None,
        }
    }
}

impl ChatProvider for OfflineProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn has_api_key(&self) -> bool {
        self.has_key
    }

    fn chat(&self, messages: &[ChatMessage], kind: CallKind) -> Result<Completion, ProviderError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                messages: messages.to_vec(),
                kind,
            });

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        scripted.unwrap_or_else(|| Ok(Self::echo(messages)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_replies_come_first() {
        let provider = OfflineProvider::new("gpt-4o");
        provider.push_text("scripted", FinishReason::Length, 1, 2);
        let first = provider
            .chat(&[ChatMessage::user("hi")], CallKind::SingleShot)
            .unwrap();
        assert_eq!(first.text, "scripted");
        assert_eq!(first.finish_reason, FinishReason::Length);

        let second = provider
            .chat(&[ChatMessage::user("echo me")], CallKind::Continuation)
            .unwrap();
        assert_eq!(second.text, "echo me");
        assert_eq!(second.finish_reason, FinishReason::Stop);
        assert_eq!(provider.call_count(), 2);
        assert_eq!(provider.calls()[1].kind, CallKind::Continuation);
    }

    #[test]
    fn test_echo_estimates_tokens() {
        let provider = OfflineProvider::new("gpt-4o");
        let reply = provider
            .chat(
                &[ChatMessage::system("abcd"), ChatMessage::user("abcdefgh")],
                CallKind::SingleShot,
            )
            .unwrap();
        assert_eq!(reply.usage.prompt_tokens, 3);
        assert_eq!(reply.usage.completion_tokens, 2);
        assert_eq!(reply.usage.total_tokens, 5);
    }
}
