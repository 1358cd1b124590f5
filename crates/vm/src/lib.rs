//! # dagwatch-vm
//!
//! Starts and stops the VM that backs a workflow's self-hosted CI runner,
//! around the actions that need it.
//!
//! ```rust,no_run
//! use dagwatch_core::{workflow::WorkflowDag, WorkflowDefinition};
//! use dagwatch_vm::{Ec2Provider, VmConfig, VmLifecycle, VmOrchestrator, VmResult};
//! use std::sync::Arc;
//!
//! # async fn example(definition: WorkflowDefinition) -> VmResult<()> {
//! let settings = definition.vm_config.clone().unwrap_or_default();
//! let config = VmConfig::from_settings(&settings).with_env_credentials();
//! let dag = Arc::new(WorkflowDag::from_definition(&definition).expect("valid DAG"));
//!
//! let lifecycle = VmLifecycle::new(Arc::new(Ec2Provider::new()?));
//! let orchestrator = VmOrchestrator::new(Arc::new(definition), dag, config, lifecycle);
//!
//! orchestrator.pre_execution("train").await?;
//! orchestrator.post_execution("train").await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod ec2;
pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod provider;
pub mod runner;
pub mod sigv4;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{
    ci_token_from_env, Credentials, Provider, ReadinessPolicy, RunnerPollPolicy, Strategy,
    VmConfig, CI_TOKEN_ENV,
};
pub use ec2::Ec2Provider;
pub use error::{VmError, VmResult};
pub use lifecycle::VmLifecycle;
pub use orchestrator::{OrchestrationReport, PhaseOutcome, ReadyReport, VmOrchestrator};
pub use provider::{ComputeProvider, InstanceState, StatusChecks, VmDetails, VmStatus};
pub use runner::{RunnerCheck, RunnerRegistry, DEFAULT_GITHUB_API};
