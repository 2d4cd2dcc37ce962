//! Model factory for creating model instances from configuration.
//!
//! This module resolves a provider identifier (explicit, or inferred from the
//! model id) to a concrete backend and loads credentials from the
//! environment when they are not supplied explicitly.

use crate::{ClaudeModel, ClientCredentials, GatewayCredential, GatewayModel, GeminiModel, MockModel};
use foreman_abstraction::{Model, ModelError};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

/// Model type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Scripted mock model for tests and dry runs.
    Mock,
    /// Anthropic Claude model.
    Claude,
    /// Google Gemini model.
    Gemini,
    /// OpenAI-compatible gateway behind OAuth2 client credentials.
    Gateway,
}

impl FromStr for ModelType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "claude" | "anthropic" => Ok(Self::Claude),
            "gemini" | "google" => Ok(Self::Gemini),
            "gateway" | "igpt" => Ok(Self::Gateway),
            _ => Err(()),
        }
    }
}

impl ModelType {
    /// Infers the provider family from a model id such as
    /// `claude-3-opus-20240229` or `gemini-1.5-pro-latest`.
    ///
    /// Plain `gpt*` ids are not inferred: there is no direct OpenAI backend.
    pub fn infer(model_id: &str) -> Option<Self> {
        let id = model_id.to_lowercase();
        if id.starts_with("mock") {
            Some(Self::Mock)
        } else if id.contains("claude") {
            Some(Self::Claude)
        } else if id.contains("gemini") {
            Some(Self::Gemini)
        } else if id.contains("igpt") || id.starts_with("gateway") {
            Some(Self::Gateway)
        } else {
            None
        }
    }

    /// Resolves an optional explicit provider name, falling back to inference.
    ///
    /// # Errors
    /// Returns `UnsupportedModelProvider` if neither resolves.
    pub fn resolve(provider: Option<&str>, model_id: &str) -> Result<Self, ModelError> {
        match provider {
            Some(name) => Self::from_str(name).map_err(|()| {
                error!(provider = %name, "Unrecognized model provider");
                ModelError::UnsupportedModelProvider(format!("Unrecognized model provider: {}", name))
            }),
            None => Self::infer(model_id).ok_or_else(|| {
                error!(model_id = %model_id, "Cannot infer model provider");
                ModelError::UnsupportedModelProvider(format!("Unsupported model: {}", model_id))
            }),
        }
    }
}

/// Provider configuration for a single model instance.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// The type of model to create.
    pub model_type: ModelType,
    /// The model ID (e.g., "claude-3-opus-20240229").
    pub model_id: String,
    /// Optional API key (if not provided, will be loaded from environment).
    pub api_key: Option<String>,
    /// Optional base URL override.
    pub base_url: Option<String>,
    /// Gateway client credentials (if not provided, loaded from environment).
    pub credentials: Option<ClientCredentials>,
    /// Correlation id forwarded by backends that support one.
    pub correlation_id: Option<String>,
}

impl ProviderConfig {
    /// Creates a new `ProviderConfig` with the given type and model ID.
    #[must_use]
    pub fn new(model_type: ModelType, model_id: String) -> Self {
        Self {
            model_type,
            model_id,
            api_key: None,
            base_url: None,
            credentials: None,
            correlation_id: None,
        }
    }

    /// Sets the API key for this configuration.
    #[must_use]
    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Sets the base URL for this configuration.
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Sets the gateway client credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: ClientCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Factory for creating model instances.
pub struct ModelFactory;

impl ModelFactory {
    /// Creates a model instance from the given configuration.
    ///
    /// No network request is made here.
    ///
    /// # Errors
    /// Returns a `ModelError` if model creation fails (e.g., missing API key).
    pub fn create(config: ProviderConfig) -> Result<Arc<dyn Model>, ModelError> {
        debug!(
            model_type = ?config.model_type,
            model_id = %config.model_id,
            "Creating model instance"
        );

        match config.model_type {
            ModelType::Mock => Ok(Arc::new(MockModel::new(config.model_id))),
            ModelType::Claude => {
                let mut model = match config.api_key {
                    Some(api_key) => ClaudeModel::with_api_key(config.model_id, api_key),
                    None => ClaudeModel::new(config.model_id)?,
                };
                if let Some(base_url) = config.base_url {
                    model = model.with_base_url(base_url);
                }
                Ok(Arc::new(model))
            }
            ModelType::Gemini => {
                let mut model = match config.api_key {
                    Some(api_key) => GeminiModel::with_api_key(config.model_id, api_key),
                    None => GeminiModel::new(config.model_id)?,
                };
                if let Some(base_url) = config.base_url {
                    model = model.with_base_url(base_url);
                }
                Ok(Arc::new(model))
            }
            ModelType::Gateway => {
                let mut model = match (config.base_url, config.credentials) {
                    (Some(base_url), Some(credentials)) => GatewayModel::with_credential(
                        config.model_id,
                        base_url,
                        Arc::new(GatewayCredential::new(credentials)),
                    ),
                    (Some(base_url), None) => GatewayModel::with_credential(
                        config.model_id,
                        base_url,
                        Arc::new(GatewayCredential::new(ClientCredentials::from_env()?)),
                    ),
                    (None, _) => GatewayModel::new(config.model_id)?,
                };
                if let Some(id) = config.correlation_id {
                    model = model.with_correlation_id(id);
                }
                Ok(Arc::new(model))
            }
        }
    }

    /// Creates a model instance from a provider string and model ID.
    ///
    /// # Errors
    /// Returns a `ModelError` if the provider is unrecognized or creation fails.
    pub fn create_from_str(
        model_type_str: &str,
        model_id: String,
    ) -> Result<Arc<dyn Model>, ModelError> {
        let model_type = ModelType::resolve(Some(model_type_str), &model_id)?;
        Self::create(ProviderConfig::new(model_type, model_id))
    }
}
