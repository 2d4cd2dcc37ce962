//! Role dispatch: the uniform call contract over the configured backends.
//!
//! A call never fails from the loop's point of view. Rate limits are retried
//! by the [`RetryPolicy`]; anything that still goes wrong becomes placeholder
//! text so a long run keeps moving.

use foreman_abstraction::{ChatMessage, Model, ModelError, ModelParameters, ModelResponse};
use foreman_models::ModelFactory;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::{ModelConfig, Role};
use crate::error::Result;
use crate::events::{RunEvent, TraceLog};
use crate::retry::{RetryError, RetryPolicy};

/// Substituted when every attempt was rate limited.
pub const RATE_LIMIT_PLACEHOLDER: &str = "Rate limit error: the backend did not answer after retrying.";

/// Substituted when a backend returned no usable text or failed outright.
pub const EMPTY_RESPONSE_PLACEHOLDER: &str = "come again?";

/// One backend per role.
#[derive(Clone)]
pub struct RoleModels {
    orchestrator: Arc<dyn Model>,
    subagent: Arc<dyn Model>,
    refiner: Arc<dyn Model>,
}

impl RoleModels {
    /// Uses the given backends.
    pub fn new(
        orchestrator: Arc<dyn Model>,
        subagent: Arc<dyn Model>,
        refiner: Arc<dyn Model>,
    ) -> Self {
        Self { orchestrator, subagent, refiner }
    }

    /// Builds every role's backend through the [`ModelFactory`]. No network
    /// request is made; unknown providers and missing credentials fail here.
    pub fn from_config(config: &ModelConfig, correlation_id: Option<&str>) -> Result<Self> {
        let build = |role: Role| -> Result<Arc<dyn Model>> {
            let provider = config.role(role).provider_config(correlation_id)?;
            Ok(ModelFactory::create(provider)?)
        };

        Ok(Self {
            orchestrator: build(Role::Orchestrator)?,
            subagent: build(Role::Subagent)?,
            refiner: build(Role::Refiner)?,
        })
    }

    /// Backend for `role`.
    pub fn get(&self, role: Role) -> &Arc<dyn Model> {
        match role {
            Role::Orchestrator => &self.orchestrator,
            Role::Subagent => &self.subagent,
            Role::Refiner => &self.refiner,
        }
    }
}

/// Text returned for one dispatched call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Response text, or a placeholder.
    pub text: String,
    /// Whether the response stopped at the role's output ceiling.
    pub truncated: bool,
    /// Whether `text` is a placeholder.
    pub degraded: bool,
}

impl Reply {
    fn placeholder(text: &str) -> Self {
        Self { text: text.to_string(), truncated: false, degraded: true }
    }
}

/// Sends role prompts to their backends.
pub struct Dispatcher {
    models: RoleModels,
    config: ModelConfig,
    retry: RetryPolicy,
    trace: TraceLog,
}

impl Dispatcher {
    /// Creates a dispatcher; retry settings are taken from `config`.
    pub fn new(models: RoleModels, config: ModelConfig, trace: TraceLog) -> Self {
        let retry = RetryPolicy::from(config.retry);
        Self { models, config, retry, trace }
    }

    /// Output ceiling for `role`.
    pub fn max_tokens(&self, role: Role) -> u32 {
        self.config.role(role).max_tokens
    }

    /// Sends `prompt` to the backend assigned to `role`.
    pub async fn call(&self, role: Role, prompt: &str) -> Reply {
        let model = self.models.get(role);
        let role_config = self.config.role(role);
        let max_tokens = role_config.max_tokens;

        debug!(
            role = %role,
            model_id = %model.model_id(),
            prompt_len = prompt.len(),
            "Dispatching prompt"
        );

        let messages = if model.supports_conversation() {
            vec![ChatMessage::system(role_config.persona_for(role)), ChatMessage::user(prompt)]
        } else {
            Vec::new()
        };

        let result = self
            .retry
            .execute(
                |err| model.is_rate_limited(err),
                |attempt| {
                    self.trace.emit(RunEvent::RateLimited {
                        role,
                        attempt,
                        wait_secs: self.retry.interval().as_secs(),
                    });
                },
                || Self::send(model.as_ref(), &messages, prompt, max_tokens),
            )
            .await;

        match result {
            Ok(response) => {
                let usage = response.usage;
                self.trace.emit(RunEvent::ModelCall {
                    role,
                    model_id: model.model_id().to_string(),
                    prompt_len: prompt.len(),
                    prompt_tokens: usage.map(|u| u.prompt_tokens),
                    completion_tokens: usage.map(|u| u.completion_tokens),
                });
                debug!(
                    role = %role,
                    prompt_tokens = ?usage.map(|u| u.prompt_tokens),
                    completion_tokens = ?usage.map(|u| u.completion_tokens),
                    "Received response"
                );

                let truncated = model.is_truncated(&response, max_tokens);
                Reply { text: response.content, truncated, degraded: false }
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(role = %role, attempts, error = %last, "Giving up after rate limits");
                self.degrade(role, &last.to_string(), RATE_LIMIT_PLACEHOLDER)
            }
            Err(RetryError::NotRetryable(err)) => {
                if let ModelError::Blocked { provider, finish_reason, safety_ratings, prompt_feedback } =
                    &err
                {
                    error!(
                        role = %role,
                        provider = %provider,
                        finish_reason = ?finish_reason,
                        safety_ratings = ?safety_ratings,
                        prompt_feedback = ?prompt_feedback,
                        "Backend returned no text"
                    );
                } else {
                    error!(role = %role, error = %err, "Backend call failed");
                }
                self.degrade(role, &err.to_string(), EMPTY_RESPONSE_PLACEHOLDER)
            }
        }
    }

    async fn send(
        model: &dyn Model,
        messages: &[ChatMessage],
        prompt: &str,
        max_tokens: u32,
    ) -> std::result::Result<ModelResponse, ModelError> {
        let parameters = Some(ModelParameters::with_max_tokens(max_tokens));
        if messages.is_empty() {
            model.generate_text(prompt, parameters).await
        } else {
            model.generate_chat_completion(messages, parameters).await
        }
    }

    fn degrade(&self, role: Role, reason: &str, placeholder: &str) -> Reply {
        self.trace.emit(RunEvent::Degraded { role, reason: reason.to_string() });
        Reply::placeholder(placeholder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_models::MockModel;
    use std::time::Duration;

    fn config() -> ModelConfig {
        let mut config = ModelConfig::new("mock-o", "mock-s", "mock-r");
        config.retry.interval_secs = 0;
        config.subagent = config.subagent.with_max_tokens(100);
        config
    }

    fn dispatcher(subagent: Arc<MockModel>) -> (Dispatcher, TraceLog) {
        let trace = TraceLog::new();
        let models = RoleModels::new(
            Arc::new(MockModel::new("mock-o".to_string())),
            subagent,
            Arc::new(MockModel::new("mock-r".to_string())),
        );
        (Dispatcher::new(models, config(), trace.clone()), trace)
    }

    fn limited() -> ModelError {
        ModelError::RateLimited { provider: "mock".to_string(), message: None }
    }

    #[tokio::test]
    async fn test_call_reports_truncation() {
        let model = Arc::new(
            MockModel::new("mock-s".to_string()).with_sized_reply("long", 99).with_sized_reply("short", 10),
        );
        let (dispatcher, trace) = dispatcher(model);

        let first = dispatcher.call(Role::Subagent, "task").await;
        assert!(first.truncated);
        assert!(!first.degraded);

        let second = dispatcher.call(Role::Subagent, "task").await;
        assert!(!second.truncated);

        assert!(matches!(
            trace.events()[0],
            RunEvent::ModelCall { role: Role::Subagent, completion_tokens: Some(99), .. }
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_yields_placeholder() {
        let model = Arc::new(
            MockModel::new("mock-s".to_string())
                .with_error(limited())
                .with_error(limited())
                .with_error(limited()),
        );
        let (dispatcher, trace) = dispatcher(Arc::clone(&model));

        let reply = dispatcher.call(Role::Subagent, "task").await;

        assert_eq!(reply.text, RATE_LIMIT_PLACEHOLDER);
        assert!(reply.degraded);
        assert_eq!(model.call_count(), 3);
        let retries = trace
            .events()
            .into_iter()
            .filter(|e| matches!(e, RunEvent::RateLimited { .. }))
            .count();
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_blocked_response_yields_placeholder() {
        let model = Arc::new(MockModel::new("mock-s".to_string()).with_error(ModelError::Blocked {
            provider: "gemini".to_string(),
            finish_reason: Some("SAFETY".to_string()),
            safety_ratings: None,
            prompt_feedback: None,
        }));
        let (dispatcher, trace) = dispatcher(Arc::clone(&model));

        let reply = dispatcher.call(Role::Subagent, "task").await;

        assert_eq!(reply.text, EMPTY_RESPONSE_PLACEHOLDER);
        assert_eq!(model.call_count(), 1);
        assert!(matches!(&trace.events()[0], RunEvent::Degraded { reason, .. } if reason.contains("SAFETY")));
    }

    #[tokio::test]
    async fn test_single_prompt_backend_gets_bare_prompt() {
        let model = Arc::new(MockModel::new("mock-s".to_string()).without_conversation());
        let (dispatcher, _) = dispatcher(Arc::clone(&model));

        dispatcher.call(Role::Subagent, "bare task").await;

        assert_eq!(model.prompts(), vec!["bare task"]);
    }

    #[test]
    fn test_from_config_rejects_unknown_provider() {
        let config = ModelConfig::new("mock", "gpt-4", "mock");
        assert!(RoleModels::from_config(&config, None).is_err());
        assert_eq!(RetryPolicy::from(config.retry).interval(), Duration::from_secs(60));
    }
}
