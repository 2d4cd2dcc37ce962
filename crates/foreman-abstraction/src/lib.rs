//! Model abstraction layer for Foreman.
//!
//! This module defines the capability interface every language-model backend
//! implements, together with the request/response types shared by the
//! provider adapters and the orchestration engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fraction of the output ceiling at which a response is considered cut off.
pub const TRUNCATION_RATIO: f64 = 0.99;

/// Represents an error that can occur when interacting with an AI model.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelError {
    /// An error occurred during the API request (e.g., network issues, invalid request).
    #[error("Request Error: {0}")]
    RequestError(String),

    /// The model returned an error status that is not a rate limit.
    #[error("Model Response Error: {0}")]
    ModelResponseError(String),

    /// An error occurred during serialization or deserialization.
    #[error("Serialization Error: {0}")]
    SerializationError(String),

    /// The model provider is not supported or configured.
    #[error("Unsupported Model Provider: {0}")]
    UnsupportedModelProvider(String),

    /// The backend refused the call because of rate limiting or exhausted quota.
    #[error("Provider '{provider}' rate limited{}", message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
    RateLimited {
        /// The provider name (e.g., "anthropic", "gemini").
        provider: String,
        /// Optional error message from the provider.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// The backend answered but produced no usable text (safety filter or similar).
    #[error("Provider '{provider}' returned no text (finish reason: {})", finish_reason.as_deref().unwrap_or("unknown"))]
    Blocked {
        /// The provider name.
        provider: String,
        /// Finish reason reported by the backend, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
        /// Safety ratings reported by the backend, rendered as text.
        #[serde(skip_serializing_if = "Option::is_none")]
        safety_ratings: Option<String>,
        /// Prompt feedback reported by the backend, rendered as text.
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt_feedback: Option<String>,
    },

    /// Credentials were rejected or could not be obtained.
    #[error("Authentication Failed: {0}")]
    AuthenticationFailed(String),

    /// Other unexpected errors.
    #[error("Other Model Error: {0}")]
    Other(String),
}

/// Represents a message in a conversation with a chat model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message sender (e.g., "user", "assistant", "system").
    pub role: String,
    /// The content of the message.
    pub content: String,
}

impl ChatMessage {
    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// Parameters for controlling the model's generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelParameters {
    /// What sampling temperature to use, between 0 and 2.
    pub temperature: Option<f32>,

    /// Nucleus sampling probability mass.
    pub top_p: Option<f32>,

    /// The maximum number of tokens to generate.
    pub max_tokens: Option<u32>,

    /// Sequences where the API will stop generating further tokens.
    pub stop_sequences: Option<Vec<String>>,
}

impl ModelParameters {
    /// Parameters that only set an output ceiling.
    #[must_use]
    pub fn with_max_tokens(max_tokens: u32) -> Self {
        Self { max_tokens: Some(max_tokens), ..Self::default() }
    }
}

/// The response from a text generation or chat completion model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// The generated content.
    pub content: String,

    /// Optional: The ID of the model used to generate the response.
    pub model_id: Option<String>,

    /// Optional: Usage statistics for the request.
    pub usage: Option<ModelUsage>,

    /// Optional: Why the backend stopped generating (provider vocabulary).
    pub finish_reason: Option<String>,
}

/// Usage statistics for a model request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,

    /// Number of tokens in the completion.
    pub completion_tokens: u32,

    /// Total number of tokens used.
    pub total_tokens: u32,
}

/// Returns true when `completion_tokens` reached [`TRUNCATION_RATIO`] of `max_tokens`.
pub fn reached_ceiling(completion_tokens: u32, max_tokens: u32) -> bool {
    max_tokens > 0 && f64::from(completion_tokens) >= f64::from(max_tokens) * TRUNCATION_RATIO
}

/// The capability interface implemented by every model backend.
///
/// The orchestration engine depends only on this trait. Backends differ in
/// request shape (single prompt vs. role-tagged conversation), in how they
/// signal rate limiting and in how they report that output was cut off.
///
/// All models must be `Send + Sync` to allow concurrent use across threads.
#[async_trait]
pub trait Model: Send + Sync {
    /// Generates a text completion based on the given prompt.
    ///
    /// # Errors
    /// Returns a `ModelError` if generation fails.
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError>;

    /// Generates a chat completion based on the given conversation history.
    ///
    /// # Errors
    /// Returns a `ModelError` if generation fails.
    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError>;

    /// Returns the ID of the model.
    fn model_id(&self) -> &str;

    /// Whether the backend accepts role-tagged conversations (system + user).
    fn supports_conversation(&self) -> bool {
        true
    }

    /// Whether `error` is a transient rate-limit condition worth waiting out.
    fn is_rate_limited(&self, error: &ModelError) -> bool {
        matches!(error, ModelError::RateLimited { .. })
    }

    /// Whether `response` stopped because it ran out of output budget.
    ///
    /// Uses reported completion tokens when available and falls back to the
    /// backend's finish reason otherwise.
    fn is_truncated(&self, response: &ModelResponse, max_tokens: u32) -> bool {
        match response.usage {
            Some(usage) => reached_ceiling(usage.completion_tokens, max_tokens),
            None => matches!(
                response.finish_reason.as_deref(),
                Some("max_tokens" | "MAX_TOKENS" | "length")
            ),
        }
    }
}
