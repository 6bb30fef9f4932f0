//! Stagegate CLI
//!
//! The `stagegate` command drives a topic through the six-stage pipeline.
//!
//! ## Commands
//!
//! - `run`: Execute a workflow and print its outcome as JSON
//! - `validate-dag`: Check a task dependency file
//! - `stages`: Show stage order, thresholds and perspectives

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, Level};

use stagegate_core::{
    perspectives_for, validate_dag, AgentCaller, Collaborators, CommandAgentCaller, DagReport,
    FsArtifactStore, JsonlAuditLog, PipelineConfig, RunOptions, Stage, StageGateController, Task,
    WorkflowMode, WorkflowOutcome, WorkflowRun, WorkflowStatus,
};

#[derive(Parser)]
#[command(name = "stagegate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Six-stage quality-gated development pipeline", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow for a topic
    Run(RunArgs),

    /// Validate a task dependency graph (JSON array or {"tasks": [...]})
    ValidateDag {
        /// Path to the tasks file
        tasks: PathBuf,
    },

    /// List stages with their thresholds and perspectives
    Stages {
        /// Workflow mode to show perspectives for
        #[arg(long, default_value = "normal")]
        mode: WorkflowMode,
    },
}

#[derive(clap::Args, Debug, Clone)]
struct RunArgs {
    /// What the workflow is about
    topic: String,

    /// quick, normal or deep
    #[arg(long, default_value = "normal")]
    mode: WorkflowMode,

    /// Stage to begin at
    #[arg(long)]
    start_from: Option<Stage>,

    /// Stage to skip (repeatable)
    #[arg(long)]
    skip: Vec<Stage>,

    /// Pipeline config file (default: <memory-dir>/../config.toml)
    #[arg(long, env = "STAGEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Root of workflow state
    #[arg(long, env = "STAGEGATE_MEMORY_DIR", default_value = ".stagegate/memory")]
    memory_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    stagegate_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run(args) => cmd_run(&args).await,
        Commands::ValidateDag { tasks } => cmd_validate_dag(&tasks),
        Commands::Stages { mode } => cmd_stages(mode),
    }
}

fn load_config(args: &RunArgs) -> Result<PipelineConfig> {
    if let Some(path) = &args.config {
        return PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config: {:?}", path));
    }
    let path = args
        .memory_dir
        .parent()
        .map(|p| p.join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    PipelineConfig::load_or_default(&path)
        .with_context(|| format!("Failed to load config: {:?}", path))
}

async fn cmd_run(args: &RunArgs) -> Result<ExitCode> {
    let config = load_config(args)?;
    let agent = Arc::new(CommandAgentCaller::new(
        config.command_config(),
        config.retry_policy(),
    ));
    let outcome = run_workflow(args, &config, agent).await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(ExitCode::from(exit_code(outcome.final_status)))
}

/// Set up the workflow directory and drive the run to completion.
async fn run_workflow(
    args: &RunArgs,
    config: &PipelineConfig,
    agent: Arc<dyn AgentCaller>,
) -> Result<WorkflowOutcome> {
    let run = WorkflowRun::new(args.topic.clone(), args.mode);
    let workflow_dir = args.memory_dir.join("workflows").join(&run.id);

    let store = FsArtifactStore::new(&workflow_dir)
        .with_context(|| format!("Failed to create workflow directory: {:?}", workflow_dir))?;
    let audit = JsonlAuditLog::new(workflow_dir.join("logs").join("actions.jsonl"));

    info!(workflow_id = %run.id, dir = %workflow_dir.display(), "starting workflow");

    let mut controller = StageGateController::new(
        run,
        config,
        Collaborators {
            agent,
            store: Arc::new(store),
            audit: Arc::new(audit),
        },
    )
    .context("Invalid pipeline configuration")?;

    let options = RunOptions {
        start_from: args.start_from,
        skip: args.skip.iter().copied().collect::<BTreeSet<_>>(),
        iteration: None,
    };
    Ok(controller.run(options).await)
}

fn exit_code(status: WorkflowStatus) -> u8 {
    match status {
        WorkflowStatus::Completed => 0,
        WorkflowStatus::HumanIntervention => 2,
        _ => 1,
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TasksFile {
    Bare(Vec<Task>),
    Wrapped { tasks: Vec<Task> },
}

fn load_tasks(path: &Path) -> Result<Vec<Task>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tasks file: {:?}", path))?;
    let file: TasksFile = serde_json::from_str(&content)
        .with_context(|| format!("Tasks file is not a task list: {:?}", path))?;
    Ok(match file {
        TasksFile::Bare(tasks) | TasksFile::Wrapped { tasks } => tasks,
    })
}

fn cmd_validate_dag(path: &Path) -> Result<ExitCode> {
    let tasks = load_tasks(path)?;
    let report: DagReport = validate_dag(&tasks);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if report.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_stages(mode: WorkflowMode) -> Result<ExitCode> {
    let config = PipelineConfig::default();
    let gate = config.quality_gate()?;

    println!("Stages ({mode} mode):");
    for stage in Stage::ALL {
        let ids: Vec<&str> = perspectives_for(stage, mode).iter().map(|p| p.id).collect();
        println!(
            "  {}. {:<10} threshold {:>3.0}  [{}]",
            stage.index() + 1,
            stage.as_str(),
            gate.threshold(stage),
            ids.join(", ")
        );
    }
    Ok(ExitCode::SUCCESS)
}
