//! Check command implementation.

use anyhow::Context;
use colored::Colorize;
use foreman_orchestrator::{ModelConfig, Role};
use std::path::Path;

/// Execute the check command.
///
/// Loads and validates the configuration, then lists the backend resolved
/// for each role. Nothing is sent over the network.
pub fn execute(path: &Path) -> anyhow::Result<()> {
    let config = ModelConfig::load_from_toml(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    config.validate().context("invalid configuration")?;

    println!("{}", "Configuration is valid".bold().green());
    println!("  {} {}", "Strategy:".bold(), config.strategy);
    println!("  {} {} task(s) x {} era(s)", "Iterations:".bold(), config.task_iter, config.refine_iter);

    for role in [Role::Orchestrator, Role::Subagent, Role::Refiner] {
        let assignment = config.role(role);
        let backend = assignment.model_type()?;
        println!(
            "  {:<14} {} ({backend:?}, max_tokens {})",
            format!("{role}:"),
            assignment.model,
            assignment.max_tokens
        );
    }

    println!("  {} {}", "Output:".bold(), config.output_dir.display());
    Ok(())
}
