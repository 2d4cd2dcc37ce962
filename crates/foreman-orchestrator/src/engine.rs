// Orchestration loop
//
// Drives one run through its eras: the orchestrator plans a subtask, the
// subagent executes it, and once the task slots are used up the refiner
// consolidates the era into a new baseline. The loop ends when the
// orchestrator reports the objective complete or the era ceiling is reached,
// and the deliverable is packaged into an archive.

use std::sync::Arc;
use tracing::{info, warn};

use crate::artifact::{Extraction, ExtractionIssue};
use crate::config::{ModelConfig, Role};
use crate::continuation::{Checkpoint, ContinuationController, ContinuedReply};
use crate::dispatch::{Dispatcher, RoleModels};
use crate::error::{OrchestrationError, Result};
use crate::events::{RunEvent, TraceLog};
use crate::prompt::{self, PromptAssembler};
use crate::run::AgentRun;
use crate::search::{SearchAdapter, TavilyProvider};
use crate::store::{ArchiveStore, StoredArchive};

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Zip archive bytes.
    pub archive: Vec<u8>,
    /// Extracted project name, or the run name when none was given.
    pub project_name: String,
    /// Consolidated text the archive was built from.
    pub deliverable: String,
    /// Structured-output problems found during extraction.
    pub issues: Vec<ExtractionIssue>,
    /// Whether the orchestrator declared the objective complete.
    pub completed: bool,
    /// Eras entered.
    pub eras: usize,
    /// Whether the deliverable is partial because its refinement was still
    /// truncated when the continuation rounds ran out.
    pub truncated: bool,
    /// Files written, when the orchestrator has a store.
    pub stored: Option<StoredArchive>,
}

/// Runs the era/task loop for one [`AgentRun`] at a time.
pub struct Orchestrator {
    dispatcher: Dispatcher,
    search: Option<SearchAdapter>,
    store: Option<ArchiveStore>,
    trace: TraceLog,
    continuation_rounds: usize,
}

impl Orchestrator {
    /// Uses the given backends; settings are taken from `config`.
    pub fn new(models: RoleModels, config: &ModelConfig, trace: TraceLog) -> Self {
        Self {
            dispatcher: Dispatcher::new(models, config.clone(), trace.clone()),
            search: None,
            store: None,
            trace,
            continuation_rounds: config.continuation_rounds,
        }
    }

    /// Validates the run's configuration and builds every backend it names,
    /// the search provider when search is enabled, and a store under the
    /// configured output directory. Nothing is sent over the network.
    pub fn for_run(run: &AgentRun, trace: TraceLog) -> Result<Self> {
        run.model.validate()?;

        let run_id = run.run_id();
        let models = RoleModels::from_config(&run.model, Some(&run_id))?;
        let mut orchestrator = Self::new(models, &run.model, trace)
            .with_store(ArchiveStore::new(run.model.output_dir.clone()));

        if run.use_search {
            let provider = TavilyProvider::from_settings(&run.model.search)?;
            let adapter = SearchAdapter::new(Arc::new(provider), orchestrator.trace.clone());
            orchestrator = orchestrator.with_search(adapter);
        }

        Ok(orchestrator)
    }

    /// Enables web search.
    #[must_use]
    pub fn with_search(mut self, search: SearchAdapter) -> Self {
        self.search = Some(search);
        self
    }

    /// Persists checkpoints and the final archive to `store`.
    #[must_use]
    pub fn with_store(mut self, store: ArchiveStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Event log shared with the dispatcher and search adapter.
    pub fn trace(&self) -> &TraceLog {
        &self.trace
    }

    /// Runs `run` to completion and packages its deliverable.
    ///
    /// Fails only for invalid configuration, before any backend is called, or
    /// when the archive cannot be written.
    pub async fn run(&self, run: &mut AgentRun) -> Result<RunOutput> {
        run.model.validate()?;
        if run.use_search && self.search.is_none() {
            return Err(OrchestrationError::Config(
                "search is enabled but no search provider is configured".to_string(),
            ));
        }

        let config = &run.model;
        info!(
            run_id = %run.id,
            strategy = %config.strategy,
            orchestrator = %config.orchestrator.model,
            subagent = %config.subagent.model,
            refiner = %config.refiner.model,
            "Starting orchestration loop"
        );
        self.trace.emit(RunEvent::RunStarted {
            run_id: run.run_id(),
            strategy: config.strategy.clone(),
            orchestrator: config.orchestrator.model.clone(),
            subagent: config.subagent.model.clone(),
            refiner: config.refiner.model.clone(),
        });

        let task_iter = config.task_iter;
        let refine_iter = config.refine_iter;
        let mut completed = false;
        let mut eras = 0;
        let mut truncated = false;

        for era in 0..refine_iter {
            run.begin_era(era);
            eras = era + 1;
            info!(era = era + 1, refine_iter, "Starting era");
            self.trace.emit(RunEvent::EraStarted { era });

            completed = self.run_tasks(run, era, task_iter).await;
            if completed {
                break;
            }

            let refined = self.refine(run, era).await;
            self.trace.emit(RunEvent::EraRefined { era, output_len: refined.text.len() });
            truncated = refined.partial;
            run.era_results.push(refined.text);
        }

        let deliverable = if completed {
            // The terminal era is always consolidated, even with no new results.
            let final_era = eras - 1;
            let refined = self.refine(run, final_era).await;
            self.trace.emit(RunEvent::EraRefined { era: final_era, output_len: refined.text.len() });
            truncated = refined.partial;
            run.era_results.push(refined.text.clone());
            refined.text
        } else {
            run.baseline().unwrap_or_default().to_string()
        };
        if truncated {
            warn!("Deliverable is partial: refinement output stayed truncated");
        }

        self.package(run, deliverable, completed, eras, truncated)
    }

    /// Fills the task slots of `era`. Returns true when the orchestrator
    /// declared the objective complete.
    async fn run_tasks(&self, run: &mut AgentRun, era: usize, task_iter: usize) -> bool {
        let controller =
            ContinuationController::new(&self.dispatcher, &self.trace, self.continuation_rounds);

        for task in 0..task_iter {
            info!(era = era + 1, task = task + 1, "Querying orchestrator for next subtask");

            run.include_files = era == 0 && task == 0;
            let plan_prompt = PromptAssembler::new(run).plan(era);
            run.include_files = false;

            let plan = self.dispatcher.call(Role::Orchestrator, &plan_prompt).await;
            if prompt::is_complete(&plan.text) {
                info!(era = era + 1, task = task + 1, "Objective complete");
                self.trace.emit(RunEvent::ObjectiveComplete { era, task });
                return true;
            }

            let search_results = match (&self.search, run.use_search) {
                (Some(search), true) => match prompt::extract_search_query(&plan.text) {
                    Some(query) => Some(search.lookup(&query).await),
                    None => None,
                },
                _ => None,
            };

            let query = PromptAssembler::new(run).execute(&plan.text, search_results.as_deref(), era, task);
            let result = controller.run(Role::Subagent, &query, None).await;
            run.record_subtask(era, query, result.text);
        }

        false
    }

    /// Consolidates `era`, checkpointing partial output while it is truncated.
    async fn refine(&self, run: &AgentRun, era: usize) -> ContinuedReply {
        info!(era = era + 1, results = run.results(era).len(), "Refining era results");

        let refine_prompt = PromptAssembler::new(run).refine(era);
        let controller =
            ContinuationController::new(&self.dispatcher, &self.trace, self.continuation_rounds);

        let writer = self.store.as_ref().map(|store| CheckpointWriter {
            store,
            trace: &self.trace,
            run_id: run.run_id(),
            fallback_name: run.name.as_str(),
        });
        let checkpoint = writer.as_ref().map(|w| w as &dyn Checkpoint);

        controller.run(Role::Refiner, &refine_prompt, checkpoint).await
    }

    fn package(
        &self,
        run: &AgentRun,
        deliverable: String,
        completed: bool,
        eras: usize,
        truncated: bool,
    ) -> Result<RunOutput> {
        let extraction = Extraction::parse(&deliverable);
        for issue in &extraction.issues {
            warn!(issue = %issue, "Extraction issue");
            self.trace.emit(RunEvent::ExtractionIssue { message: issue.to_string() });
        }

        let project_name = extraction.project_name.clone().unwrap_or_else(|| run.name.clone());
        self.trace.emit(RunEvent::RunFinished { project_name: project_name.clone(), completed, eras });

        let archive = extraction.to_archive(&deliverable, &self.trace.to_jsonl()?)?;
        let stored = match &self.store {
            Some(store) => {
                Some(store.store_final(&project_name, &run.run_id(), &archive, &deliverable)?)
            }
            None => None,
        };

        info!(
            project = %project_name,
            completed,
            eras,
            files = extraction.files.len(),
            issues = extraction.issues.len(),
            "Run finished"
        );

        Ok(RunOutput {
            archive,
            project_name,
            deliverable,
            issues: extraction.issues,
            completed,
            eras,
            truncated,
            stored,
        })
    }
}

/// Writes a best-effort archive of partial refiner output.
struct CheckpointWriter<'a> {
    store: &'a ArchiveStore,
    trace: &'a TraceLog,
    run_id: String,
    fallback_name: &'a str,
}

impl CheckpointWriter<'_> {
    fn write(&self, partial: &str, round: usize) -> Result<String> {
        let extraction = Extraction::parse(partial);
        let project_name = extraction.project_name.as_deref().unwrap_or(self.fallback_name);
        let archive = extraction.to_archive(partial, &self.trace.to_jsonl()?)?;
        let path = self.store.store_checkpoint(project_name, &self.run_id, round, &archive)?;
        Ok(path.display().to_string())
    }
}

impl Checkpoint for CheckpointWriter<'_> {
    fn checkpoint(&self, partial: &str, round: usize) {
        match self.write(partial, round) {
            Ok(archive) => {
                info!(round, archive = %archive, "Wrote checkpoint archive");
                self.trace.emit(RunEvent::Checkpoint { round, archive });
            }
            Err(err) => warn!(round, error = %err, "Failed to write checkpoint archive"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_models::MockModel;

    fn config(task_iter: usize, refine_iter: usize) -> ModelConfig {
        let mut config =
            ModelConfig::new("mock-o", "mock-s", "mock-r").with_iterations(task_iter, refine_iter);
        config.retry.interval_secs = 0;
        config
    }

    fn orchestrator(
        config: &ModelConfig,
        orch: &Arc<MockModel>,
        sub: &Arc<MockModel>,
        refiner: &Arc<MockModel>,
    ) -> Orchestrator {
        let models = RoleModels::new(orch.clone(), sub.clone(), refiner.clone());
        Orchestrator::new(models, config, TraceLog::new())
    }

    #[tokio::test]
    async fn test_exhausted_eras_use_last_baseline() {
        let config = config(2, 2);
        let orch = Arc::new(
            MockModel::new("mock-o".to_string())
                .with_reply("plan 1")
                .with_reply("plan 2")
                .with_reply("plan 3")
                .with_reply("plan 4"),
        );
        let sub = Arc::new(MockModel::new("mock-s".to_string()));
        let refiner = Arc::new(
            MockModel::new("mock-r".to_string())
                .with_reply("era one")
                .with_reply("<project_name>two</project_name> era two"),
        );
        let engine = orchestrator(&config, &orch, &sub, &refiner);

        let mut run = AgentRun::new("demo", "objective", config.clone());
        let output = engine.run(&mut run).await.unwrap();

        assert!(!output.completed);
        assert_eq!(output.eras, 2);
        assert_eq!(orch.call_count(), 4);
        assert_eq!(sub.call_count(), 4);
        assert_eq!(refiner.call_count(), 2);
        assert_eq!(run.era_results, vec!["era one", "<project_name>two</project_name> era two"]);
        assert_eq!(output.project_name, "two");
        assert_eq!(run.results(0).len(), 2);
        assert_eq!(run.results(1).len(), 2);
    }

    #[tokio::test]
    async fn test_completion_in_later_era_runs_final_refinement() {
        let config = config(2, 3);
        let orch = Arc::new(
            MockModel::new("mock-o".to_string())
                .with_reply("subtask a")
                .with_reply("subtask b")
                .with_reply("Objective Complete: looks done"),
        );
        let sub = Arc::new(MockModel::new("mock-s".to_string()));
        let refiner = Arc::new(
            MockModel::new("mock-r".to_string()).with_reply("baseline").with_reply("final"),
        );
        let engine = orchestrator(&config, &orch, &sub, &refiner);

        let mut run = AgentRun::new("demo", "objective", config.clone());
        let output = engine.run(&mut run).await.unwrap();

        assert!(output.completed);
        assert_eq!(output.eras, 2);
        assert_eq!(output.deliverable, "final");
        assert_eq!(run.era_results, vec!["baseline", "final"]);
        assert!(run.results(1).is_empty());
        // The final refinement sees the previous era's baseline.
        assert!(refiner.prompts()[1].contains("**Baseline result:**\nbaseline"));
        assert_eq!(output.project_name, "demo");
        assert!(output.issues.contains(&ExtractionIssue::MissingProjectName));
    }

    #[tokio::test]
    async fn test_files_are_injected_once() {
        let config = config(2, 1);
        let orch = Arc::new(
            MockModel::new("mock-o".to_string()).with_reply("plan 1").with_reply("plan 2"),
        );
        let sub = Arc::new(
            MockModel::new("mock-s".to_string()).with_reply("result 1").with_reply("result 2"),
        );
        let refiner = Arc::new(MockModel::new("mock-r".to_string()));
        let engine = orchestrator(&config, &orch, &sub, &refiner);

        let mut run = AgentRun::new("demo", "objective", config.clone())
            .with_files([("data.csv".to_string(), "UNIQUE-FILE-BODY".to_string())]);
        engine.run(&mut run).await.unwrap();

        let orch_prompts = orch.prompts();
        assert!(orch_prompts[0].contains("UNIQUE-FILE-BODY"));
        assert!(!orch_prompts[1].contains("UNIQUE-FILE-BODY"));

        let sub_prompts = sub.prompts();
        assert!(sub_prompts[0].contains("UNIQUE-FILE-BODY"));
        assert!(!sub_prompts[1].contains("UNIQUE-FILE-BODY"));
        assert!(sub_prompts[1].contains("**Task Result 0**\nresult 1"));
        assert!(orch_prompts[1].contains("**Subtask 0 Results**\nresult 1"));
        assert!(!run.include_files);
    }

    #[tokio::test]
    async fn test_search_without_provider_is_config_error() {
        let config = config(1, 1);
        let orch = Arc::new(MockModel::new("mock-o".to_string()));
        let engine = orchestrator(&config, &orch, &orch, &orch);

        let mut run = AgentRun::new("demo", "objective", config.clone()).with_search(true);
        let result = engine.run(&mut run).await;

        assert!(matches!(result, Err(OrchestrationError::Config(_))));
        assert_eq!(orch.call_count(), 0);
    }

    #[tokio::test]
    async fn test_for_run_rejects_unknown_provider_before_any_call() {
        let config = ModelConfig::new("mock", "gpt-4", "mock");
        let run = AgentRun::new("demo", "objective", config);
        let result = Orchestrator::for_run(&run, TraceLog::new());
        assert!(matches!(result, Err(OrchestrationError::Config(_))));
    }
}
