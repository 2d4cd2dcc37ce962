//! Gateway model implementation.
//!
//! Talks to an OpenAI-compatible `chat/completions` endpoint that sits behind
//! an OAuth2 client-credentials token (see [`GatewayCredential`]). Every
//! request carries a correlation id so gateway-side logs can be joined with
//! a run.

use async_trait::async_trait;
use foreman_abstraction::{
    ChatMessage, Model, ModelError, ModelParameters, ModelResponse, ModelUsage,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::credential::{ClientCredentials, GatewayCredential};

/// Gateway model implementation.
#[derive(Debug, Clone)]
pub struct GatewayModel {
    /// The model ID served by the gateway (e.g., "igpt4-turbo").
    model_id: String,
    /// Base URL of the gateway, without the `/chat/completions` suffix.
    base_url: String,
    /// Shared bearer-token source.
    credential: Arc<GatewayCredential>,
    /// Sent as `x-correlation-id` on every request.
    correlation_id: Option<String>,
    /// HTTP client for making requests.
    client: Client,
}

impl GatewayModel {
    /// Creates a gateway model from `GATEWAY_BASE_URL` and the `GATEWAY_*`
    /// client credentials.
    ///
    /// # Errors
    /// Returns a `ModelError` if any variable is missing.
    pub fn new(model_id: String) -> Result<Self, ModelError> {
        let base_url = env::var("GATEWAY_BASE_URL").map_err(|_| {
            ModelError::UnsupportedModelProvider(
                "GATEWAY_BASE_URL environment variable not set".to_string(),
            )
        })?;
        let credential = Arc::new(GatewayCredential::new(ClientCredentials::from_env()?));
        Ok(Self::with_credential(model_id, base_url, credential))
    }

    /// Creates a gateway model with an explicit credential.
    #[must_use]
    pub fn with_credential(
        model_id: String,
        base_url: String,
        credential: Arc<GatewayCredential>,
    ) -> Self {
        Self { model_id, base_url, credential, correlation_id: None, client: Client::new() }
    }

    /// Sets the correlation id sent with each request.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    async fn send(
        &self,
        request_body: &GatewayRequest,
    ) -> Result<reqwest::Response, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let token = self.credential.bearer().await?;

        let mut request = self.client.post(&url).bearer_auth(token).json(request_body);
        if let Some(id) = &self.correlation_id {
            request = request.header("x-correlation-id", id);
        }

        request.send().await.map_err(|e| {
            error!(error = %e, "Failed to send request to gateway");
            ModelError::RequestError(format!("Network error: {}", e))
        })
    }
}

#[async_trait]
impl Model for GatewayModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.model_id,
            prompt_len = prompt.len(),
            "GatewayModel generating text"
        );

        let messages = vec![ChatMessage::user(prompt)];
        self.generate_chat_completion(&messages, parameters).await
    }

    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        let content_len: usize = messages.iter().map(|m| m.content.len()).sum();
        debug!(
            model_id = %self.model_id,
            message_count = messages.len(),
            content_len,
            "GatewayModel generating chat completion"
        );

        let mut request_body = GatewayRequest {
            model: self.model_id.clone(),
            messages: messages
                .iter()
                .map(|m| GatewayMessage { role: m.role.clone(), content: Some(m.content.clone()) })
                .collect(),
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
        };

        if let Some(params) = parameters {
            request_body.temperature = params.temperature;
            request_body.top_p = params.top_p;
            request_body.max_tokens = params.max_tokens;
            request_body.stop = params.stop_sequences;
        }

        let mut response = self.send(&request_body).await?;

        // An expired token gets exactly one refresh before giving up.
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(model_id = %self.model_id, "Gateway token rejected, refreshing");
            self.credential.invalidate().await;
            response = self.send(&request_body).await?;
        }

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                status = %status,
                error = %error_text,
                "Gateway returned error status"
            );

            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => ModelError::RateLimited {
                    provider: "gateway".to_string(),
                    message: Some(error_text),
                },
                StatusCode::UNAUTHORIZED => ModelError::AuthenticationFailed(error_text),
                _ => ModelError::ModelResponseError(format!(
                    "Gateway Generate Error ({}): {}",
                    status, error_text
                )),
            });
        }

        let gateway_response: GatewayResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse gateway response");
            ModelError::SerializationError(format!("Failed to parse response: {}", e))
        })?;

        let choice = gateway_response.choices.into_iter().next();
        let finish_reason = choice.as_ref().and_then(|c| c.finish_reason.clone());
        let content = choice.and_then(|c| c.message.content).unwrap_or_default();

        if content.is_empty() {
            error!(finish_reason = ?finish_reason, "No content in gateway response");
            return Err(ModelError::Blocked {
                provider: "gateway".to_string(),
                finish_reason,
                safety_ratings: None,
                prompt_feedback: None,
            });
        }

        let usage = gateway_response.usage.map(|u| ModelUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ModelResponse { content, model_id: Some(self.model_id.clone()), usage, finish_reason })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// Gateway request/response structures (OpenAI chat completions shape)

#[derive(Debug, Serialize)]
struct GatewayRequest {
    model: String,
    messages: Vec<GatewayMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GatewayMessage {
    role: String,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    #[serde(default)]
    choices: Vec<GatewayChoice>,
    usage: Option<GatewayUsage>,
}

#[derive(Debug, Deserialize)]
struct GatewayChoice {
    message: GatewayMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)] // Matches API naming
struct GatewayUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN_BODY: &str = r#"{"access_token": "tok", "expires_in": 3600}"#;
    const CHAT_BODY: &str = r#"{
        "choices": [{"message": {"role": "assistant", "content": "done"}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
    }"#;

    fn model_for(server: &mockito::Server) -> GatewayModel {
        let credential = Arc::new(GatewayCredential::new(ClientCredentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            auth_url: format!("{}/oauth/token", server.url()),
        }));
        GatewayModel::with_credential("igpt4-turbo".to_string(), server.url(), credential)
            .with_correlation_id("run-42")
    }

    #[tokio::test]
    async fn test_chat_completion_sends_bearer_and_correlation_id() {
        let mut server = mockito::Server::new_async().await;
        let _token = server.mock("POST", "/oauth/token").with_body(TOKEN_BODY).create_async().await;
        let chat = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer tok")
            .match_header("x-correlation-id", "run-42")
            .with_status(200)
            .with_body(CHAT_BODY)
            .create_async()
            .await;

        let model = model_for(&server);
        let messages = vec![ChatMessage::system("persona"), ChatMessage::user("task")];
        let response = model.generate_chat_completion(&messages, None).await.unwrap();

        chat.assert_async().await;
        assert_eq!(response.content, "done");
        assert_eq!(response.usage.unwrap().total_tokens, 6);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_once() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/oauth/token")
            .with_body(TOKEN_BODY)
            .expect(2)
            .create_async()
            .await;
        let rejected = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("Token has expired")
            .expect(2)
            .create_async()
            .await;

        let err = model_for(&server).generate_text("task", None).await.unwrap_err();

        assert!(matches!(err, ModelError::AuthenticationFailed(ref m) if m.contains("expired")));
        token.assert_async().await;
        rejected.assert_async().await;
    }

    #[tokio::test]
    async fn test_429_is_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        let _token = server.mock("POST", "/oauth/token").with_body(TOKEN_BODY).create_async().await;
        let _chat = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("slow down")
            .create_async()
            .await;

        let model = model_for(&server);
        let err = model.generate_text("task", None).await.unwrap_err();
        assert!(model.is_rate_limited(&err));
    }
}
