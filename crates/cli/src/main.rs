//! `workflow-lab` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`   — validate a workflow JSON file and print its execution order.
//! - `run`        — execute a workflow file with the built-in node handlers.
//! - `node-types` — list the registered node types.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use engine::{Engine, EngineConfig, EngineEvent, ExecutionStatus, Workflow};
use nodes::HandlerRegistry;

#[derive(Parser)]
#[command(
    name = "workflow-lab",
    about = "Validate and execute DAG workflows",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Execute a workflow definition JSON file.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Maximum number of executions running at once.
        #[arg(long, env = "WORKFLOW_LAB_CONCURRENCY", default_value_t = queue_default())]
        concurrency: usize,
        /// Number of executions of the workflow to submit.
        #[arg(long, default_value_t = 1)]
        runs: usize,
    },
    /// List the node types the built-in registry provides.
    NodeTypes,
}

fn queue_default() -> usize {
    EngineConfig::default().concurrency_limit
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let workflow = load_workflow(&path)?;
            match engine::validate(&workflow) {
                Ok(()) => {
                    let order = engine::compute_order(&workflow)?;
                    println!("✅ Workflow is valid. Execution order: {order:?}");
                }
                Err(errors) => {
                    eprintln!("❌ Validation failed:");
                    for e in &errors {
                        eprintln!("  - {e}");
                    }
                    std::process::exit(1);
                }
            }
        }
        Command::Run { path, concurrency, runs } => {
            let workflow = load_workflow(&path)?;
            run(workflow, concurrency, runs).await?;
        }
        Command::NodeTypes => {
            for node_type in HandlerRegistry::with_builtins().node_types() {
                println!("{node_type}");
            }
        }
    }

    Ok(())
}

fn load_workflow(path: &Path) -> anyhow::Result<Workflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
}

async fn run(workflow: Workflow, concurrency: usize, runs: usize) -> anyhow::Result<()> {
    let engine = Engine::new(
        EngineConfig { concurrency_limit: concurrency },
        HandlerRegistry::with_builtins(),
    )?;

    // Log sink: every lifecycle event goes to the tracing output.
    let mut events = engine.subscribe();
    let sink = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    let mut ids = Vec::with_capacity(runs);
    for _ in 0..runs {
        ids.push(engine.submit(&workflow)?);
    }
    info!("submitted {} execution(s); queue: {:?}", ids.len(), engine.queue_status());

    let mut failed = 0;
    for id in ids {
        let execution = engine.wait(id).await?;
        if execution.status != ExecutionStatus::Completed {
            failed += 1;
        }
        println!("{}", serde_json::to_string_pretty(&execution)?);
    }

    drop(engine);
    sink.abort();

    if failed > 0 {
        bail!("{failed} execution(s) did not complete");
    }
    Ok(())
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::ExecutionFailed { execution_id, node_id, error, .. } => warn!(
            "execution {} failed at {:?}: {}",
            execution_id, node_id, error
        ),
        EngineEvent::NodeFailed { execution_id, node_id, error, .. } => {
            warn!("execution {}: node '{}' failed: {}", execution_id, node_id, error)
        }
        other => match serde_json::to_string(other) {
            Ok(json) => info!("event {}", json),
            Err(e) => warn!("unserializable event: {}", e),
        },
    }
}
