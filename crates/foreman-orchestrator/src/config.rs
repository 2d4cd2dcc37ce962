// Run configuration
//
// Role assignments, prompt templates, output ceilings and iteration bounds for
// one orchestration run. Loaded from TOML and validated before any backend is
// contacted.

use foreman_models::{ModelType, ProviderConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{OrchestrationError, Result};

/// Default orchestrator instruction text.
pub const DEFAULT_ORCHESTRATOR_PROMPT: &str = "\
Assess if the Objective has been fully achieved and if not, break down the next subtask.
Please select the next subtask that most advances the objective and create a clear,
encouraging and comprehensive prompt for a subagent to execute that subtask.
ALWAYS CHECK CODE FOR ERRORS, USE THE BEST PRACTICES FOR CODING TASKS AND INCLUDE FIXES FOR THE NEXT SUBTASK.
If you have any suggestions on how code can be improved or refactored, please include them in the next subtask prompt.
";

/// Default subagent instruction text, appended after the task context.
pub const DEFAULT_SUBAGENT_PROMPT: &str =
    "ONLY INCLUDE THE CONCISE AND COMPLETE RESPONSE TO THE SUBTASK IN THIS STEP!!";

/// Default refiner instruction text.
pub const DEFAULT_REFINER_PROMPT: &str = "\
Please review the sub-task and baseline results and refine them into a cohesive final output.
Add any missing documentation or details as needed.
";

/// A named responsibility in the run, mapped to one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Plans the next subtask and decides when the objective is complete.
    Orchestrator,
    /// Executes a single subtask.
    Subagent,
    /// Consolidates an era's results into the deliverable.
    Refiner,
}

impl Role {
    /// Persona sent as a system message to conversation-capable backends.
    pub fn default_persona(self) -> &'static str {
        match self {
            Self::Orchestrator => "You are an expert at creating prompts for AI sub-agents.",
            Self::Subagent => {
                "You are an expert sub-agent who completes a single well-defined task thoroughly."
            }
            Self::Refiner => "You are a master software architect.",
        }
    }

    /// Instruction text used when the role has no prompt configured.
    pub fn default_prompt(self) -> &'static str {
        match self {
            Self::Orchestrator => DEFAULT_ORCHESTRATOR_PROMPT,
            Self::Subagent => DEFAULT_SUBAGENT_PROMPT,
            Self::Refiner => DEFAULT_REFINER_PROMPT,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Orchestrator => write!(f, "orchestrator"),
            Self::Subagent => write!(f, "subagent"),
            Self::Refiner => write!(f, "refiner"),
        }
    }
}

/// Backend assignment for one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Model id (e.g., "claude-3-opus-20240229").
    pub model: String,
    /// Explicit provider; inferred from `model` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Instruction text; the role default is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Output ceiling per call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// System persona; the role default is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Base URL override for the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl RoleConfig {
    /// A role assignment with every other field at its default.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            provider: None,
            prompt: None,
            max_tokens: default_max_tokens(),
            system: None,
            base_url: None,
        }
    }

    /// Sets the output ceiling.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets an explicit provider.
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the instruction text.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Configured instruction text, or the role default.
    pub fn prompt_for(&self, role: Role) -> &str {
        self.prompt.as_deref().unwrap_or_else(|| role.default_prompt())
    }

    /// Configured persona, or the role default.
    pub fn persona_for(&self, role: Role) -> &str {
        self.system.as_deref().unwrap_or_else(|| role.default_persona())
    }

    /// Resolves the backend family without contacting it.
    pub fn model_type(&self) -> Result<ModelType> {
        Ok(ModelType::resolve(self.provider.as_deref(), &self.model)?)
    }

    /// Factory input for this role.
    pub fn provider_config(&self, correlation_id: Option<&str>) -> Result<ProviderConfig> {
        let mut config = ProviderConfig::new(self.model_type()?, self.model.clone());
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url.clone());
        }
        if let Some(id) = correlation_id {
            config = config.with_correlation_id(id.to_string());
        }
        Ok(config)
    }
}

/// Rate-limit retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts per call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed wait between attempts, in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_attempts: default_max_attempts(), interval_secs: default_interval_secs() }
    }
}

impl RetrySettings {
    /// Wait between attempts.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Web search settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Search provider name. Only "tavily" is supported.
    #[serde(default = "default_search_provider")]
    pub provider: String,
    /// API key; read from `TAVILY_API_KEY` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Endpoint override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { provider: default_search_provider(), api_key: None, base_url: None }
    }
}

/// Immutable per-run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Descriptive label; does not alter control flow.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Subtasks per era.
    #[serde(default = "default_task_iter")]
    pub task_iter: usize,
    /// Maximum eras.
    #[serde(default = "default_refine_iter")]
    pub refine_iter: usize,
    /// Planner role.
    pub orchestrator: RoleConfig,
    /// Executor role.
    pub subagent: RoleConfig,
    /// Consolidator role.
    pub refiner: RoleConfig,
    /// Rate-limit retry settings.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Maximum continuation rounds for a truncated response.
    #[serde(default = "default_continuation_rounds")]
    pub continuation_rounds: usize,
    /// Web search settings.
    #[serde(default)]
    pub search: SearchSettings,
    /// Where archives and Markdown copies are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl ModelConfig {
    /// Creates a configuration with the given models and default settings.
    pub fn new(
        orchestrator: impl Into<String>,
        subagent: impl Into<String>,
        refiner: impl Into<String>,
    ) -> Self {
        Self {
            strategy: default_strategy(),
            task_iter: default_task_iter(),
            refine_iter: default_refine_iter(),
            orchestrator: RoleConfig::new(orchestrator),
            subagent: RoleConfig::new(subagent),
            refiner: RoleConfig::new(refiner),
            retry: RetrySettings::default(),
            continuation_rounds: default_continuation_rounds(),
            search: SearchSettings::default(),
            output_dir: default_output_dir(),
        }
    }

    /// Sets the iteration bounds.
    #[must_use]
    pub fn with_iterations(mut self, task_iter: usize, refine_iter: usize) -> Self {
        self.task_iter = task_iter;
        self.refine_iter = refine_iter;
        self
    }

    /// Assignment for `role`.
    pub fn role(&self, role: Role) -> &RoleConfig {
        match role {
            Role::Orchestrator => &self.orchestrator,
            Role::Subagent => &self.subagent,
            Role::Refiner => &self.refiner,
        }
    }

    /// Rejects settings that would make the loop meaningless and role
    /// assignments that cannot be mapped to a backend.
    pub fn validate(&self) -> Result<()> {
        if self.task_iter == 0 {
            return Err(OrchestrationError::Config("task_iter must be at least 1".to_string()));
        }
        if self.refine_iter == 0 {
            return Err(OrchestrationError::Config("refine_iter must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(OrchestrationError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.search.provider != "tavily" {
            return Err(OrchestrationError::Config(format!(
                "Unsupported search provider: {}",
                self.search.provider
            )));
        }

        for role in [Role::Orchestrator, Role::Subagent, Role::Refiner] {
            let assignment = self.role(role);
            if assignment.max_tokens == 0 {
                return Err(OrchestrationError::Config(format!(
                    "{role}.max_tokens must be at least 1"
                )));
            }
            assignment.model_type().map_err(|e| {
                OrchestrationError::Config(format!("{role} model '{}': {e}", assignment.model))
            })?;
        }

        Ok(())
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_from_toml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from TOML string
    ///
    /// The content may be a bare configuration or carry it in a `[foreman]` section.
    ///
    /// # Errors
    /// Returns error if TOML cannot be parsed
    pub fn from_toml_str(toml_content: &str) -> Result<Self> {
        let toml: toml::Value = toml::from_str(toml_content)?;

        let config_value = match toml.get("foreman") {
            Some(section) => section.clone(),
            None => toml,
        };

        let config: Self = config_value.try_into()?;
        Ok(config)
    }
}

fn default_strategy() -> String {
    "orchestrator-subagent-refiner".to_string()
}

fn default_task_iter() -> usize {
    5
}

fn default_refine_iter() -> usize {
    3
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_attempts() -> u32 {
    3
}

fn default_interval_secs() -> u64 {
    60
}

fn default_continuation_rounds() -> usize {
    3
}

fn default_search_provider() -> String {
    "tavily".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}
