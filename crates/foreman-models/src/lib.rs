//! Model implementations for Foreman.
//!
//! This crate provides concrete implementations of the `Model` trait.
//!
//! # Supported Providers
//!
//! - **Mock**: Scripted responses for testing and dry runs
//! - **Claude**: Anthropic's Claude models (API key required)
//! - **Gemini**: Google's Gemini models (API key required)
//! - **Gateway**: OpenAI-compatible chat completions behind an OAuth2
//!   client-credentials token

pub mod claude;
pub mod credential;
pub mod factory;
pub mod gateway;
pub mod gemini;

use async_trait::async_trait;
use foreman_abstraction::{
    ChatMessage, Model, ModelError, ModelParameters, ModelResponse, ModelUsage,
};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

pub use claude::ClaudeModel;
pub use credential::{ClientCredentials, GatewayCredential};
pub use factory::{ModelFactory, ModelType, ProviderConfig};
pub use gateway::GatewayModel;
pub use gemini::GeminiModel;

/// One scripted outcome for a [`MockModel`] call.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return `content`; `completion_tokens` overrides the word-count estimate.
    Text {
        /// Response text.
        content: String,
        /// Reported completion tokens, if fixed by the script.
        completion_tokens: Option<u32>,
    },
    /// Fail the call with the given error.
    Error(ModelError),
}

/// A mock implementation of the `Model` trait for testing and demonstration.
///
/// Replies are taken from a FIFO script; once the script is empty the model
/// echoes the prompt. Every prompt it receives is recorded.
#[derive(Debug, Default)]
pub struct MockModel {
    id: String,
    conversation: bool,
    script: Mutex<VecDeque<MockReply>>,
    prompts: Mutex<Vec<String>>,
}

impl MockModel {
    /// Creates a new `MockModel` with the given ID.
    #[must_use]
    pub fn new(id: String) -> Self {
        Self { id, conversation: true, ..Self::default() }
    }

    /// Queues a plain text reply.
    #[must_use]
    pub fn with_reply(self, content: impl Into<String>) -> Self {
        self.push(MockReply::Text { content: content.into(), completion_tokens: None });
        self
    }

    /// Queues a text reply that reports a fixed number of completion tokens.
    #[must_use]
    pub fn with_sized_reply(self, content: impl Into<String>, completion_tokens: u32) -> Self {
        self.push(MockReply::Text {
            content: content.into(),
            completion_tokens: Some(completion_tokens),
        });
        self
    }

    /// Queues a failing call.
    #[must_use]
    pub fn with_error(self, error: ModelError) -> Self {
        self.push(MockReply::Error(error));
        self
    }

    /// Makes the model behave like a single-prompt backend.
    #[must_use]
    pub fn without_conversation(mut self) -> Self {
        self.conversation = false;
        self
    }

    /// Appends a reply to the script.
    pub fn push(&self, reply: MockReply) {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).push_back(reply);
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn respond(&self, prompt: String) -> Result<ModelResponse, ModelError> {
        let prompt_tokens = count_tokens(&prompt);
        let reply = self.script.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).push(prompt.clone());

        let (content, completion_tokens) = match reply {
            Some(MockReply::Error(error)) => return Err(error),
            Some(MockReply::Text { content, completion_tokens }) => {
                let tokens = completion_tokens.unwrap_or_else(|| count_tokens(&content));
                (content, tokens)
            }
            None => {
                let content = format!("Mock response for: {prompt}\nModel ID: {}", self.id);
                let tokens = count_tokens(&content);
                (content, tokens)
            }
        };

        Ok(ModelResponse {
            content,
            model_id: Some(self.id.clone()),
            usage: Some(ModelUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
            finish_reason: None,
        })
    }
}

#[async_trait]
impl Model for MockModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.id,
            prompt_len = prompt.len(),
            parameters = ?parameters,
            "MockModel generating text"
        );
        self.respond(prompt.to_string())
    }

    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.id,
            message_count = messages.len(),
            parameters = ?parameters,
            "MockModel generating chat completion"
        );

        // Only the user turns are recorded, so tests can assert on prompt text.
        let prompt = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        self.respond(prompt)
    }

    fn model_id(&self) -> &str {
        &self.id
    }

    fn supports_conversation(&self) -> bool {
        self.conversation
    }
}

/// Count tokens in a string (simplified: word count).
fn count_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_replays_script_then_echoes() {
        let model = MockModel::new("mock".to_string())
            .with_reply("first")
            .with_sized_reply("second", 4096);

        let first = model.generate_text("a", None).await.unwrap();
        assert_eq!(first.content, "first");
        assert_eq!(first.usage.unwrap().completion_tokens, 1);

        let second = model.generate_text("b", None).await.unwrap();
        assert_eq!(second.usage.unwrap().completion_tokens, 4096);

        let third = model.generate_text("c", None).await.unwrap();
        assert!(third.content.starts_with("Mock response for: c"));
        assert_eq!(model.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_mock_scripted_error() {
        let model = MockModel::new("mock".to_string()).with_error(ModelError::RateLimited {
            provider: "mock".to_string(),
            message: None,
        });
        let result = model.generate_text("x", None).await;
        assert!(matches!(result, Err(ModelError::RateLimited { .. })));
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_chat_records_user_turns_only() {
        let model = MockModel::new("mock".to_string()).with_reply("ok");
        let messages = vec![ChatMessage::system("persona"), ChatMessage::user("question")];
        model.generate_chat_completion(&messages, None).await.unwrap();
        assert_eq!(model.prompts(), vec!["question"]);
    }

    #[test]
    fn test_without_conversation() {
        let model = MockModel::new("mock".to_string()).without_conversation();
        assert!(!model.supports_conversation());
    }
}
