//! Strategy dispatch and the per-action orchestration entry points.

use crate::config::{RunnerPollPolicy, Strategy, VmConfig};
use crate::error::VmResult;
use crate::lifecycle::VmLifecycle;
use crate::provider::VmDetails;
use crate::runner::{RunnerCheck, RunnerRegistry};
use dagwatch_core::workflow::{ResourceIndex, WorkflowDag};
use dagwatch_core::WorkflowDefinition;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What one orchestration phase did to the VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PhaseOutcome {
    NotNeeded,
    Started { details: VmDetails, ready: bool },
    Stopped,
    AlreadyStopped,
    /// Stop failed; logged and otherwise ignored
    StopFailed { error: String },
}

/// Both phases of [`VmOrchestrator::orchestrate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestrationReport {
    pub pre: PhaseOutcome,
    pub post: PhaseOutcome,
}

/// Outcome of [`VmOrchestrator::poll_ready`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyReport {
    /// The instance passed its status checks before the ceiling
    pub vm_ready: bool,
    /// Registry lookup result, when a CI token and runner details were available
    pub runner: Option<RunnerCheck>,
}

impl ReadyReport {
    /// A runner that was checked must be online; a slow VM is tolerated
    pub fn is_ready(&self) -> bool {
        self.runner.as_ref().map_or(true, RunnerCheck::is_online)
    }
}

/// Starts and stops the workflow VM around the actions that need it.
pub struct VmOrchestrator {
    definition: Arc<WorkflowDefinition>,
    index: ResourceIndex,
    config: VmConfig,
    lifecycle: VmLifecycle,
    runner: Option<RunnerRegistry>,
    runner_policy: RunnerPollPolicy,
}

impl VmOrchestrator {
    pub fn new(
        definition: Arc<WorkflowDefinition>,
        dag: Arc<WorkflowDag>,
        config: VmConfig,
        lifecycle: VmLifecycle,
    ) -> Self {
        let index = ResourceIndex::new(&definition, dag);
        Self {
            definition,
            index,
            config,
            lifecycle,
            runner: None,
            runner_policy: RunnerPollPolicy::default(),
        }
    }

    /// Verify runner registration through `registry` in [`Self::poll_ready`]
    pub fn with_runner_registry(mut self, registry: RunnerRegistry, policy: RunnerPollPolicy) -> Self {
        self.runner = Some(registry);
        self.runner_policy = policy;
        self
    }

    pub fn index(&self) -> &ResourceIndex {
        &self.index
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// The strategy in effect. Only `simple_start_end` is implemented; any
    /// other name falls back to it.
    pub fn strategy(&self) -> Strategy {
        match &self.config.strategy {
            Strategy::SimpleStartEnd => {}
            Strategy::Unknown(name) => {
                warn!("Unknown VM strategy: {}, using 'simple_start_end'", name)
            }
            other => warn!(
                "Strategy '{}' not yet implemented, using 'simple_start_end'",
                other
            ),
        }
        Strategy::SimpleStartEnd
    }

    /// Before `action` runs: start the VM if `action` is the first VM user,
    /// or if it hands off to one.
    pub async fn pre_execution(&self, action: &str) -> VmResult<PhaseOutcome> {
        let strategy = self.strategy();
        let starts_here = self.index.is_first_resource_user(action);
        let warms_next = self
            .index
            .next_resource_users(action)
            .any(|next| self.index.is_first_resource_user(next));

        if !starts_here && !warms_next {
            debug!(strategy = %strategy, "Action {} needs no VM start", action);
            return Ok(PhaseOutcome::NotNeeded);
        }

        self.config.validate()?;
        if starts_here {
            info!("Action {} is first VM-requiring function - starting VM", action);
            self.start_for(action).await
        } else {
            info!("Action {} invokes the first VM-requiring function - starting VM", action);
            let next = self
                .index
                .next_resource_users(action)
                .find(|next| self.index.is_first_resource_user(next))
                .unwrap_or(action)
                .to_string();
            self.start_for(&next).await
        }
    }

    /// After `action` ran: stop the VM if it was the last VM user. Never fails.
    pub async fn post_execution(&self, action: &str) -> PhaseOutcome {
        let strategy = self.strategy();

        if !self.index.is_last_resource_user(action) {
            debug!(
                strategy = %strategy,
                "Action {} is not the last VM-requiring function - keeping VM running",
                action
            );
            return PhaseOutcome::NotNeeded;
        }

        info!(
            "Action {} is last VM-requiring function - stopping VM after completion",
            action
        );
        self.stop().await
    }

    /// Start and stop around a VM-requiring action running on the VM itself
    pub async fn orchestrate(&self, action: &str) -> VmResult<OrchestrationReport> {
        if !self.index.requires_resource(action) {
            debug!("Action {} does not require VM resources", action);
            return Ok(OrchestrationReport {
                pre: PhaseOutcome::NotNeeded,
                post: PhaseOutcome::NotNeeded,
            });
        }

        self.strategy();
        self.config.validate()?;

        let pre = if self.index.is_first_resource_user(action) {
            info!("Action {} is first VM-requiring function - starting VM", action);
            self.start_for(action).await?
        } else {
            info!(
                "Action {} is not the first VM-requiring function - VM already running",
                action
            );
            PhaseOutcome::NotNeeded
        };

        let post = self.post_execution(action).await;
        Ok(OrchestrationReport { pre, post })
    }

    /// Start the VM unconditionally and wait for it to become ready
    pub async fn start(&self) -> VmResult<PhaseOutcome> {
        let action = self
            .index
            .resource_users()
            .find(|user| self.index.is_first_resource_user(user))
            .unwrap_or(self.definition.function_invoke.as_str())
            .to_string();
        self.start_for(&action).await
    }

    /// Start the VM and wait for it and for the runner serving `action`.
    ///
    /// With a runner registry the fixed warm-up is replaced by registry polling.
    async fn start_for(&self, action: &str) -> VmResult<PhaseOutcome> {
        let details = self.lifecycle.start(&self.config).await?;
        let vm_ready = if details.healthy {
            true
        } else {
            self.lifecycle
                .wait_ready(&self.config, Some(&details), self.runner.is_some())
                .await?
        };

        let runner = match &self.runner {
            Some(_) => self.verify_runner(action).await,
            None => None,
        };
        let report = ReadyReport { vm_ready, runner };
        let ready = report.vm_ready && report.is_ready();

        if ready {
            info!("VM started and ready for the self-hosted runner");
        } else {
            warn!("VM or runner did not report ready in time, continuing");
        }
        Ok(PhaseOutcome::Started { details, ready })
    }

    /// Stop the VM unconditionally, swallowing failures
    pub async fn stop(&self) -> PhaseOutcome {
        match self.lifecycle.stop(&self.config).await {
            Ok(true) => {
                info!("VM stopped");
                PhaseOutcome::Stopped
            }
            Ok(false) => PhaseOutcome::AlreadyStopped,
            Err(e) => {
                error!("Failed to stop VM: {}", e);
                warn!("VM stop failed but workflow will complete");
                PhaseOutcome::StopFailed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Wait for the VM, then for the runner serving `action` to come online.
    ///
    /// With a runner registry the fixed warm-up is skipped in favour of
    /// polling the registry.
    pub async fn poll_ready(&self, action: &str) -> VmResult<ReadyReport> {
        self.config.validate()?;

        let vm_ready = self
            .lifecycle
            .wait_ready(&self.config, None, self.runner.is_some())
            .await?;

        let runner = self.verify_runner(action).await;
        Ok(ReadyReport { vm_ready, runner })
    }

    /// Poll the registry until the runner serving `action` is online.
    ///
    /// `None` when no registry is configured or the repository or runner
    /// name is unknown.
    async fn verify_runner(&self, action: &str) -> Option<RunnerCheck> {
        let Some(registry) = &self.runner else {
            warn!("No CI token available - cannot verify runner status");
            return None;
        };

        let repository = self.definition.server_for(action).and_then(|server| {
            Some((
                server.user_name.as_deref()?,
                server.action_repo_name.as_deref()?,
            ))
        });
        let runner_name = self.config.runner_name.as_deref();
        if runner_name.is_none() {
            warn!("RunnerName not specified in VMConfig - cannot verify runner status");
        }

        match (repository, runner_name) {
            (Some((owner, repo)), Some(runner_name)) => {
                info!("Verifying runner {} in {}/{}", runner_name, owner, repo);
                let check = registry
                    .wait_for_runner(owner, repo, runner_name, &self.runner_policy)
                    .await;
                if check.is_online() {
                    info!("Runner verified online - action can proceed");
                } else {
                    error!("Runner not available: {}", check);
                }
                Some(check)
            }
            _ => {
                warn!("Missing repository or runner info - cannot verify");
                None
            }
        }
    }
}
