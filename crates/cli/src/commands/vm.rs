use super::print_json;
use crate::config::DagwatchConfig;
use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use dagwatch_core::workflow::WorkflowDag;
use dagwatch_core::WorkflowDefinition;
use dagwatch_vm::{
    ci_token_from_env, ComputeProvider, Ec2Provider, RunnerRegistry, VmConfig, VmLifecycle,
    VmOrchestrator, CI_TOKEN_ENV,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Subcommand, Debug)]
pub enum VmCommand {
    /// Start the VM and wait until it is ready
    Start,
    /// Stop the VM
    Stop,
    /// Wait for the VM and its CI runner to come up
    Poll {
        /// Action about to run (defaults to the workflow's FunctionInvoke)
        #[arg(long)]
        action: Option<String>,
    },
    /// Start or stop the VM around an action
    Orchestrate {
        /// Action being executed (defaults to the workflow's FunctionInvoke)
        #[arg(long)]
        action: Option<String>,

        #[arg(long, value_enum, default_value_t = Phase::Both)]
        phase: Phase,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Post,
    Both,
}

pub async fn run(
    definition: WorkflowDefinition,
    settings: &DagwatchConfig,
    command: VmCommand,
) -> Result<bool> {
    let orchestrator = build_orchestrator(definition.clone(), settings)?;
    let current = |action: Option<String>| action.unwrap_or_else(|| definition.function_invoke.clone());

    match command {
        VmCommand::Start => {
            print_json(&orchestrator.start().await?)?;
            Ok(true)
        }
        VmCommand::Stop => {
            print_json(&orchestrator.stop().await)?;
            Ok(true)
        }
        VmCommand::Poll { action } => {
            let report = orchestrator.poll_ready(&current(action)).await?;
            print_json(&json!({
                "vm_ready": report.vm_ready,
                "runner": report.runner.as_ref().map(ToString::to_string),
                "ready": report.is_ready(),
            }))?;
            Ok(report.is_ready())
        }
        VmCommand::Orchestrate { action, phase } => {
            let action = current(action);
            match phase {
                Phase::Pre => print_json(&orchestrator.pre_execution(&action).await?)?,
                Phase::Post => print_json(&orchestrator.post_execution(&action).await)?,
                Phase::Both => print_json(&orchestrator.orchestrate(&action).await?)?,
            }
            Ok(true)
        }
    }
}

fn build_orchestrator(definition: WorkflowDefinition, settings: &DagwatchConfig) -> Result<VmOrchestrator> {
    let vm_settings = definition
        .vm_config
        .clone()
        .context("Workflow has no VMConfig section")?;
    let config = VmConfig::from_settings(&vm_settings).with_env_credentials();

    let provider: Arc<dyn ComputeProvider> = match &settings.vm.ec2_endpoint {
        Some(endpoint) => {
            info!("Using EC2 endpoint {}", endpoint);
            Arc::new(Ec2Provider::with_endpoint(endpoint)?)
        }
        None => Arc::new(Ec2Provider::new()?),
    };
    let lifecycle = VmLifecycle::new(provider).with_policy(settings.readiness_policy());

    let dag = Arc::new(WorkflowDag::from_definition(&definition).context("Invalid workflow")?);
    let mut orchestrator = VmOrchestrator::new(Arc::new(definition), dag, config, lifecycle);

    match ci_token_from_env() {
        Some(token) => {
            let registry = RunnerRegistry::with_api_base(&settings.vm.github_api_url, &token)?;
            orchestrator = orchestrator.with_runner_registry(registry, settings.runner_policy());
        }
        None => debug!("{} not set, runner registration will not be checked", CI_TOKEN_ENV),
    }

    Ok(orchestrator)
}
