//! Chat-completion clients for redline.
//!
//! Two backends share one contract: an OpenAI-style client and an OpenRouter-style
//! client. Both shape requests from a model capability table, extract text and
//! token usage, and price the call from a per-model table.
//!
//! # Architecture
//!
//! - **provider**: `ChatProvider` trait, message/completion types, response parsing
//! - **models**: model-prefix capability flags and model → backend routing
//! - **pricing**: built-in price tables and the per-call cost tracker
//! - **openai** / **openrouter**: the two HTTP backends (blocking `ureq`)
//! - **offline**: canned or echoed completions without network access
//! - **client**: `LlmClient` with single-shot and continuation generation

pub mod client;
pub mod models;
pub mod offline;
pub mod openai;
pub mod openrouter;
pub mod pricing;
pub mod provider;

pub use client::{
    ContinuationPolicy, INCOMPLETE_WARNING, LlmClient, ProviderConfig, create_client,
    create_offline_client,
};
pub use models::{ModelCapabilities, TokenParam, capabilities, provider_for};
pub use offline::OfflineProvider;
pub use openrouter::GenerationStats;
pub use pricing::{CostTracker, Price, price_for};
pub use provider::{
    CallKind, ChatMessage, ChatProvider, Completion, FinishReason, ProviderError, RequestOptions,
    Timeouts, TokenUsage,
};
