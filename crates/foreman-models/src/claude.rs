//! Claude (Anthropic) model implementation.
//!
//! This module provides an implementation of the `Model` trait for Anthropic's
//! messages API. System messages are sent through the dedicated `system`
//! field rather than inline in the message list.

use async_trait::async_trait;
use foreman_abstraction::{
    ChatMessage, Model, ModelError, ModelParameters, ModelResponse, ModelUsage,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, error};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Claude model implementation.
#[derive(Debug, Clone)]
pub struct ClaudeModel {
    /// The model ID (e.g., "claude-3-opus-20240229").
    model_id: String,
    /// The API key for authentication.
    api_key: String,
    /// The base URL for the Claude API.
    base_url: String,
    /// HTTP client for making requests.
    client: Client,
}

impl ClaudeModel {
    /// Creates a new `ClaudeModel`, reading the key from `ANTHROPIC_API_KEY`.
    ///
    /// # Errors
    /// Returns a `ModelError` if the API key is not found in environment variables.
    pub fn new(model_id: String) -> Result<Self, ModelError> {
        let api_key = env::var("ANTHROPIC_API_KEY").map_err(|_| {
            ModelError::UnsupportedModelProvider(
                "ANTHROPIC_API_KEY environment variable not set".to_string(),
            )
        })?;

        Ok(Self::with_api_key(model_id, api_key))
    }

    /// Creates a new `ClaudeModel` with a custom API key.
    #[must_use]
    pub fn with_api_key(model_id: String, api_key: String) -> Self {
        Self { model_id, api_key, base_url: DEFAULT_BASE_URL.to_string(), client: Client::new() }
    }

    /// Overrides the API base URL (proxies, tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn to_claude_message(msg: &ChatMessage) -> ClaudeMessage {
        ClaudeMessage {
            role: if msg.role == "assistant" { "assistant" } else { "user" }.to_string(),
            content: msg.content.clone(),
        }
    }

    /// Returns the first system message, which Claude takes as its `system` field.
    fn extract_system_prompt(messages: &[ChatMessage]) -> Option<String> {
        messages.iter().find(|msg| msg.role == "system").map(|msg| msg.content.clone())
    }

    /// Whether an error body names one of Anthropic's transient error types.
    fn is_rate_limit_body(error_text: &str) -> bool {
        let error_type = serde_json::from_str::<serde_json::Value>(error_text).ok().and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("type"))
                .or_else(|| v.get("type"))
                .and_then(|t| t.as_str())
                .map(str::to_string)
        });

        match error_type {
            Some(t) => matches!(t.as_str(), "rate_limit_error" | "overloaded_error"),
            None => error_text.to_lowercase().contains("rate limit"),
        }
    }
}

#[async_trait]
impl Model for ClaudeModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.model_id,
            prompt_len = prompt.len(),
            "ClaudeModel generating text"
        );

        let messages = vec![ChatMessage::user(prompt)];
        self.generate_chat_completion(&messages, parameters).await
    }

    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.model_id,
            message_count = messages.len(),
            parameters = ?parameters,
            "ClaudeModel generating chat completion"
        );

        let url = format!("{}/messages", self.base_url);
        let system = Self::extract_system_prompt(messages);
        let claude_messages: Vec<ClaudeMessage> = messages
            .iter()
            .filter(|msg| msg.role != "system")
            .map(Self::to_claude_message)
            .collect();

        let mut request_body = ClaudeRequest {
            model: self.model_id.clone(),
            messages: claude_messages,
            max_tokens: DEFAULT_MAX_TOKENS,
            system,
            temperature: None,
            top_p: None,
            stop_sequences: None,
        };

        if let Some(params) = parameters {
            request_body.temperature = params.temperature;
            request_body.top_p = params.top_p;
            if let Some(max_tokens) = params.max_tokens {
                request_body.max_tokens = max_tokens;
            }
            request_body.stop_sequences = params.stop_sequences;
        }

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to send request to Claude API");
                ModelError::RequestError(format!("Network error: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                status = %status,
                error = %error_text,
                "Claude API returned error status"
            );

            // 529 is Anthropic's "overloaded" status.
            if status == StatusCode::TOO_MANY_REQUESTS
                || status.as_u16() == 529
                || Self::is_rate_limit_body(&error_text)
            {
                return Err(ModelError::RateLimited {
                    provider: "anthropic".to_string(),
                    message: Some(error_text),
                });
            }

            if status == StatusCode::UNAUTHORIZED {
                return Err(ModelError::AuthenticationFailed(error_text));
            }

            return Err(ModelError::ModelResponseError(format!(
                "API error ({}): {}",
                status, error_text
            )));
        }

        let claude_response: ClaudeResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse Claude API response");
            ModelError::SerializationError(format!("Failed to parse response: {}", e))
        })?;

        let content = claude_response
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        if content.is_empty() {
            error!(stop_reason = ?claude_response.stop_reason, "No text content in Claude API response");
            return Err(ModelError::Blocked {
                provider: "anthropic".to_string(),
                finish_reason: claude_response.stop_reason,
                safety_ratings: None,
                prompt_feedback: None,
            });
        }

        let usage = Some(ModelUsage {
            prompt_tokens: claude_response.usage.input_tokens,
            completion_tokens: claude_response.usage.output_tokens,
            total_tokens: claude_response.usage.input_tokens + claude_response.usage.output_tokens,
        });

        Ok(ModelResponse {
            content,
            model_id: Some(self.model_id.clone()),
            usage,
            finish_reason: claude_response.stop_reason,
        })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// Claude API request/response structures

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    messages: Vec<ClaudeMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
    usage: ClaudeUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claude_model_creation_with_api_key() {
        let model = ClaudeModel::with_api_key("claude-3-opus-20240229".to_string(), "test-key".to_string());
        assert_eq!(model.model_id(), "claude-3-opus-20240229");
        assert!(model.supports_conversation());
    }

    #[test]
    fn test_system_prompt_extraction() {
        let messages = vec![ChatMessage::system("You are helpful"), ChatMessage::user("Hello")];
        let system = ClaudeModel::extract_system_prompt(&messages);
        assert_eq!(system, Some("You are helpful".to_string()));
    }

    #[test]
    fn test_rate_limit_body_detection() {
        assert!(ClaudeModel::is_rate_limit_body(
            r#"{"error":{"type":"rate_limit_error","message":"Rate limit exceeded"}}"#
        ));
        assert!(ClaudeModel::is_rate_limit_body(r#"{"type":"overloaded_error"}"#));
        assert!(!ClaudeModel::is_rate_limit_body(
            r#"{"error":{"type":"invalid_request_error","message":"bad"}}"#
        ));
        assert!(ClaudeModel::is_rate_limit_body("Rate limit hit, slow down"));
    }

    #[tokio::test]
    async fn test_generate_text_parses_usage_and_stop_reason() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "content": [{"type": "text", "text": "Hello there"}],
                    "usage": {"input_tokens": 12, "output_tokens": 3},
                    "stop_reason": "end_turn"
                }"#,
            )
            .create_async()
            .await;

        let model = ClaudeModel::with_api_key("claude-test".to_string(), "test-key".to_string())
            .with_base_url(format!("{}/v1", server.url()));
        let response = model.generate_text("Say hello", None).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.content, "Hello there");
        assert_eq!(response.usage.unwrap().completion_tokens, 3);
        assert_eq!(response.finish_reason.as_deref(), Some("end_turn"));
    }

    #[tokio::test]
    async fn test_429_maps_to_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/messages")
            .with_status(429)
            .with_body(r#"{"error":{"type":"rate_limit_error","message":"slow down"}}"#)
            .create_async()
            .await;

        let model = ClaudeModel::with_api_key("claude-test".to_string(), "k".to_string())
            .with_base_url(format!("{}/v1", server.url()));
        let err = model.generate_text("x", None).await.unwrap_err();
        assert!(model.is_rate_limited(&err));
    }

    #[tokio::test]
    async fn test_empty_content_is_blocked() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(r#"{"content": [], "usage": {"input_tokens": 1, "output_tokens": 0}, "stop_reason": "refusal"}"#)
            .create_async()
            .await;

        let model = ClaudeModel::with_api_key("claude-test".to_string(), "k".to_string())
            .with_base_url(format!("{}/v1", server.url()));
        let err = model.generate_text("x", None).await.unwrap_err();
        assert!(matches!(err, ModelError::Blocked { finish_reason: Some(ref r), .. } if r == "refusal"));
    }
}
