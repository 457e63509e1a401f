//! agentmesh CLI — load markdown agents into the VFS and run a mode

use agentmesh_llm::{AiProvider, AnthropicProvider, ScriptedProvider, ScriptedStep};
use agentmesh_runtime::{RunController, RuntimeConfig, WorkflowOutcome};
use agentmesh_store::WriteMeta;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "agentmesh", about = "Multi-agent orchestration over markdown-defined agents")]
struct Cli {
    /// Directory of agent/workflow markdown files mirrored into the VFS
    #[arg(short, long, default_value = "workspace")]
    workspace: PathBuf,

    /// Config file (TOML); defaults apply when absent
    #[arg(short, long, default_value = "agentmesh.toml")]
    config: PathBuf,

    /// Use the scripted echo provider instead of a real API (for smoke runs)
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Single-shot: run one agent with an input and drain the queue
    Run {
        /// Agent path inside the workspace, e.g. agents/lead.md
        agent: String,
        /// The activation input
        input: String,
    },
    /// Autonomous: cycle-bounded mission run
    Auto {
        agent: String,
        mission: String,
    },
    /// Execute a workflow file
    Workflow {
        /// Workflow path inside the workspace, e.g. workflows/pipeline.md
        file: String,
        /// Initial variables as key=value pairs
        #[arg(short, long)]
        var: Vec<String>,
    },
    /// List registered agents in the workspace
    Agents,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentmesh=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = RuntimeConfig::load(&cli.config);
    if config.api_key.is_none() {
        config.api_key = std::env::var("ANTHROPIC_API_KEY").ok();
    }
    if config.search_api_key.is_none() {
        config.search_api_key = std::env::var("BRAVE_API_KEY").ok();
    }

    let provider: Arc<dyn AiProvider> = if cli.mock {
        Arc::new(ScriptedProvider::constant(ScriptedStep::text(
            "(mock provider reply)",
            1,
        )))
    } else {
        if config.api_key.is_none() {
            bail!("no API key: set ANTHROPIC_API_KEY or api_key in {}", cli.config.display());
        }
        Arc::new(AnthropicProvider::new())
    };

    let controller = RunController::new(provider, config);
    load_workspace(&controller, &cli.workspace)?;

    match cli.command {
        Command::Run { agent, input } => {
            let stats = controller.run(&agent, &input).await?;
            println!(
                "run complete: {} sessions, {} tokens",
                stats.completed_sessions, stats.total_tokens
            );
            print_session_output(&controller);
        }
        Command::Auto { agent, mission } => {
            let report = controller.run_autonomous(&agent, &mission).await?;
            println!(
                "mission over after {} cycle(s), {} tokens{}",
                report.cycles_run,
                report.total_tokens,
                if report.stopped_early { " (wrapped up early)" } else { "" }
            );
            for (i, summary) in report.summaries.iter().enumerate() {
                println!("cycle {}: {}", i + 1, summary);
            }
        }
        Command::Workflow { file, var } => {
            let variables = parse_vars(&var)?;
            match controller.run_workflow(&file, variables).await? {
                WorkflowOutcome::Completed { output_path, per_step_tokens, .. } => {
                    let total: usize = per_step_tokens.values().sum();
                    println!("workflow complete ({} tokens), report at {}", total, output_path);
                    if let Some(report) = controller.vfs().read(&output_path) {
                        println!("\n{}", report);
                    }
                }
                WorkflowOutcome::Failed { failed_step, reason, .. } => {
                    warn!("workflow failed at '{}': {}", failed_step, reason);
                    println!("workflow failed at step '{}': {}", failed_step, reason);
                    println!("a resume payload was recorded in the event log");
                }
            }
        }
        Command::Agents => {
            let mut agents = controller.registry().list_all();
            agents.sort_by(|a, b| a.path.cmp(&b.path));
            for profile in agents {
                println!(
                    "{}  name={} model={}",
                    profile.path,
                    profile.name,
                    profile.model.as_deref().unwrap_or("(default)")
                );
            }
        }
    }

    Ok(())
}

/// Mirror the workspace directory into the VFS. Agent files register as they
/// land through the VFS subscription.
fn load_workspace(controller: &RunController, root: &Path) -> anyhow::Result<()> {
    if !root.exists() {
        warn!("workspace {} does not exist; starting empty", root.display());
        return Ok(());
    }
    let mut loaded = 0usize;
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .context("path under workspace root")?
            .to_string_lossy()
            .replace('\\', "/");
        let content = std::fs::read_to_string(entry.path())
            .with_context(|| format!("reading {}", entry.path().display()))?;
        controller
            .vfs()
            .write(&rel, content, WriteMeta::author("loader"));
        loaded += 1;
    }
    info!(
        files = loaded,
        agents = controller.registry().len(),
        "workspace loaded"
    );
    Ok(())
}

fn parse_vars(pairs: &[String]) -> anyhow::Result<HashMap<String, serde_json::Value>> {
    let mut vars = HashMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("--var expects key=value, got '{}'", pair);
        };
        vars.insert(key.to_string(), serde_json::Value::String(value.to_string()));
    }
    Ok(vars)
}

fn print_session_output(controller: &RunController) {
    for entry in controller.event_log().entries() {
        if entry.kind == agentmesh_core::EventKind::Complete {
            if let Some(agent) = &entry.agent_path {
                println!("[{}] completed ({})", agent, entry.data);
            }
        }
    }
}
