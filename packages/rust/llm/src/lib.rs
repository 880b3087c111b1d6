//! Language-model client abstraction.
//!
//! The pipeline talks to providers through the [`LlmClient`] trait: one
//! operation, `complete`, plus a provider identifier. The OpenAI-compatible
//! adapter in [`openai`] implements it and encapsulates the reasoning-model
//! request quirks; [`retry`] layers deadlines and backoff on top.

pub mod openai;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use docgrab_shared::Result;

pub use openai::OpenAiClient;
pub use retry::{complete_with_retry, RetryPolicy};

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system` or `user`.
    pub role: String,
    /// Message content.
    pub content: String,
}

impl ChatMessage {
    /// Build a system-role message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    /// Build a user-role message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// A completion request as the pipeline expresses it.
///
/// Adapters may transform the request on the wire (e.g. merging messages for
/// reasoning models) but never change its meaning.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Ordered chat messages.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature; omitted from the wire when unsupported.
    pub temperature: Option<f32>,
    /// Completion token cap; omitted from the wire when unsupported.
    pub max_tokens: Option<u32>,
}

/// Token accounting for one call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// A completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// The assistant message content.
    pub content: String,
    /// Token usage reported by the provider (zeroes when absent).
    pub usage: TokenUsage,
}

// ---------------------------------------------------------------------------
// Client trait
// ---------------------------------------------------------------------------

/// A language-model provider client.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// The provider/model identifier this client targets, e.g.
    /// `openai/gpt-4o`.
    fn provider_id(&self) -> &str;

    /// Execute one completion call.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}
