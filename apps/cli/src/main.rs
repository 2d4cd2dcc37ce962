//! Foreman CLI - runs an orchestrator/subagent/refiner loop from the terminal
//!
//! This CLI provides a `foreman` command that loads a run configuration,
//! drives one run to completion and reports where its archive was written.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use commands::{check, run};

/// Foreman - break an objective into subtasks and package the result
#[derive(Parser, Debug)]
#[command(name = "foreman", author, version, about = "Foreman - orchestrated objective runner")]
struct Args {
    /// Log level used when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an objective through the orchestration loop
    ///
    /// Without a config file every role uses the offline mock backend.
    Run {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Objective text
        #[arg(short, long, conflicts_with = "objective_file")]
        objective: Option<String>,

        /// Read the objective from a file
        #[arg(long)]
        objective_file: Option<PathBuf>,

        /// Auxiliary input file (repeatable)
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,

        /// Ask the orchestrator for web search queries
        #[arg(long)]
        search: bool,

        /// Run name, used when the output names no project
        #[arg(short, long, default_value = "foreman-run")]
        name: String,

        /// Output directory (overrides the config)
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a configuration file and show the resolved backends
    Check {
        /// TOML configuration file
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    if args.log_json {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    match args.command {
        Command::Run { config, objective, objective_file, files, search, name, output_dir, json } => {
            run::execute(run::RunOptions {
                config,
                objective,
                objective_file,
                files,
                search,
                name,
                output_dir,
                json,
            })
            .await
        }
        Command::Check { config } => check::execute(&config),
    }
}
