//! Run command implementation.

use anyhow::{Context, bail};
use colored::Colorize;
use foreman_orchestrator::{AgentRun, ModelConfig, Orchestrator, RunOutput, TraceLog};
use serde_json::json;
use std::path::{Path, PathBuf};

/// Options for the run command.
#[derive(Debug)]
pub struct RunOptions {
    pub config: Option<PathBuf>,
    pub objective: Option<String>,
    pub objective_file: Option<PathBuf>,
    pub files: Vec<PathBuf>,
    pub search: bool,
    pub name: String,
    pub output_dir: Option<PathBuf>,
    pub json: bool,
}

/// Execute the run command.
pub async fn execute(options: RunOptions) -> anyhow::Result<()> {
    let mut config = match &options.config {
        Some(path) => ModelConfig::load_from_toml(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ModelConfig::new("mock", "mock", "mock"),
    };
    if let Some(dir) = options.output_dir {
        config.output_dir = dir;
    }

    let objective = match (options.objective, &options.objective_file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read objective from {}", path.display()))?,
        (None, None) => bail!("an objective is required (--objective or --objective-file)"),
    };
    if objective.trim().is_empty() {
        bail!("the objective is empty");
    }

    let files = options.files.iter().map(|path| read_input(path)).collect::<anyhow::Result<Vec<_>>>()?;

    let mut run = AgentRun::new(options.name, objective, config)
        .with_files(files)
        .with_search(options.search);

    let orchestrator = Orchestrator::for_run(&run, TraceLog::new())?;
    let output = orchestrator.run(&mut run).await.context("run failed")?;

    if options.json {
        print_json(&run, &output)?;
    } else {
        print_summary(&run, &output);
    }
    Ok(())
}

/// Reads an auxiliary file, keyed by its file name.
fn read_input(path: &Path) -> anyhow::Result<(String, String)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read input file {}", path.display()))?;
    let name = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned());
    Ok((name, content))
}

fn print_summary(run: &AgentRun, output: &RunOutput) {
    let status = if output.completed { "complete".green() } else { "iteration limit".yellow() };

    println!("{}", "Run finished".bold().cyan());
    println!("  {} {}", "Run:".bold(), run.id);
    println!("  {} {}", "Project:".bold(), output.project_name);
    println!("  {} {status} after {} era(s)", "Status:".bold(), output.eras);
    if output.truncated {
        println!("  {}", "Deliverable is partial: the refiner output was still truncated".yellow());
    }

    if let Some(stored) = &output.stored {
        println!("  {} {}", "Archive:".bold(), stored.project_archive.display());
        println!("  {} {}", "Run archive:".bold(), stored.run_archive.display());
        println!("  {} {}", "Markdown:".bold(), stored.markdown.display());
    }

    if !output.issues.is_empty() {
        println!();
        println!("{}", "Extraction issues:".yellow());
        for issue in &output.issues {
            println!("  - {issue}");
        }
    }
}

fn print_json(run: &AgentRun, output: &RunOutput) -> anyhow::Result<()> {
    let stored = output.stored.as_ref().map(|stored| {
        json!({
            "project_archive": stored.project_archive,
            "run_archive": stored.run_archive,
            "markdown": stored.markdown,
        })
    });
    let summary = json!({
        "run_id": run.run_id(),
        "project_name": output.project_name,
        "completed": output.completed,
        "eras": output.eras,
        "truncated": output.truncated,
        "issues": output.issues.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "stored": stored,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
