//! Mutable state of one orchestration run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::config::ModelConfig;

/// State owned by the orchestration loop for the lifetime of one run.
///
/// Era indices are dense and start at 0. Query and result lists are only
/// ever appended to. The struct is serialisable so that an external store can
/// snapshot it before and after a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    /// Run identifier; also the correlation id sent to backends.
    pub id: Uuid,
    /// Human-readable run name, used as the fallback project name.
    pub name: String,
    /// Goal text.
    pub objective: String,
    /// Subtask prompts per era.
    #[serde(default)]
    pub subtask_queries: BTreeMap<usize, Vec<String>>,
    /// Subtask results per era.
    #[serde(default)]
    pub subtask_results: BTreeMap<usize, Vec<String>>,
    /// One consolidated output per refined era.
    #[serde(default)]
    pub era_results: Vec<String>,
    /// Auxiliary input files, name to content.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    /// Whether the orchestrator is asked for a search query.
    #[serde(default)]
    pub use_search: bool,
    /// Whether file content is injected into the next plan prompt.
    #[serde(default)]
    pub include_files: bool,
    /// Run configuration.
    pub model: ModelConfig,
}

impl AgentRun {
    /// Creates a run with a fresh id.
    pub fn new(name: impl Into<String>, objective: impl Into<String>, model: ModelConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            objective: objective.into(),
            subtask_queries: BTreeMap::new(),
            subtask_results: BTreeMap::new(),
            era_results: Vec::new(),
            files: BTreeMap::new(),
            use_search: false,
            include_files: false,
            model,
        }
    }

    /// Adds auxiliary files.
    #[must_use]
    pub fn with_files(mut self, files: impl IntoIterator<Item = (String, String)>) -> Self {
        self.files.extend(files);
        self
    }

    /// Enables or disables web search.
    #[must_use]
    pub fn with_search(mut self, use_search: bool) -> Self {
        self.use_search = use_search;
        self
    }

    /// Run id as text.
    pub fn run_id(&self) -> String {
        self.id.to_string()
    }

    /// Opens era `era` with empty query and result lists.
    pub fn begin_era(&mut self, era: usize) {
        self.subtask_queries.insert(era, Vec::new());
        self.subtask_results.insert(era, Vec::new());
    }

    /// Appends a subtask prompt and its result to era `era`.
    pub fn record_subtask(&mut self, era: usize, query: String, result: String) {
        self.subtask_queries.entry(era).or_default().push(query);
        self.subtask_results.entry(era).or_default().push(result);
    }

    /// Results recorded so far in era `era`.
    pub fn results(&self, era: usize) -> &[String] {
        self.subtask_results.get(&era).map(Vec::as_slice).unwrap_or_default()
    }

    /// Consolidated output of the most recent era, if any.
    pub fn baseline(&self) -> Option<&str> {
        self.era_results.last().map(String::as_str)
    }
}
