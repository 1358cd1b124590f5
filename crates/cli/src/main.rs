mod commands;
mod config;
mod signal;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::monitor::MonitorArgs;
use commands::vm::VmCommand;
use dagwatch_core::WorkflowDefinition;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dagwatch")]
#[command(about = "Monitor workflow invocations and manage their VM", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "dagwatch.toml", env = "DAGWATCH_CONFIG")]
    config: PathBuf,

    /// Workflow definition (JSON)
    #[arg(short, long, env = "DAGWATCH_WORKFLOW")]
    workflow: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow an invocation until it completes, fails or times out
    Monitor(MonitorArgs),

    /// Manage the workflow VM
    Vm {
        #[command(subcommand)]
        command: VmCommand,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dagwatch=info,action_log=info".into()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let args = Args::parse();

    let settings = config::DagwatchConfig::load(&args.config)?;
    let definition = WorkflowDefinition::load(&args.workflow)
        .with_context(|| format!("Failed to load workflow {}", args.workflow.display()))?;

    tracing::info!(
        "Loaded workflow {} ({} actions)",
        definition.workflow_name,
        definition.action_list.len()
    );

    let success = match args.command {
        Command::Monitor(monitor_args) => {
            commands::monitor::run(definition, &settings, monitor_args).await?
        }
        Command::Vm { command } => commands::vm::run(definition, &settings, command).await?,
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
