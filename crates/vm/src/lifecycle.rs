//! Start, readiness wait and stop of the workflow VM.

use crate::config::{ReadinessPolicy, VmConfig};
use crate::error::VmResult;
use crate::provider::{ComputeProvider, VmDetails};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Drives one instance through
/// `Stopped -> Starting -> Running -> Running(healthy) -> Stopping -> Stopped`.
///
/// Every operation validates the config before touching the provider.
#[derive(Clone)]
pub struct VmLifecycle {
    provider: Arc<dyn ComputeProvider>,
    policy: ReadinessPolicy,
}

impl VmLifecycle {
    pub fn new(provider: Arc<dyn ComputeProvider>) -> Self {
        Self {
            provider,
            policy: ReadinessPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReadinessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &ReadinessPolicy {
        &self.policy
    }

    /// Start the instance unless it is already running
    pub async fn start(&self, config: &VmConfig) -> VmResult<VmDetails> {
        let provider = config.validate()?;

        match self.provider.status(config).await {
            Ok(status) if status.is_running() => {
                info!("Instance {} is already running", config.instance_id);
                return Ok(VmDetails {
                    instance_id: config.instance_id.clone(),
                    provider: provider.to_string(),
                    state: status.state,
                    already_running: true,
                    healthy: status.is_healthy(),
                });
            }
            Ok(status) => debug!("Instance {} is {}", config.instance_id, status.state),
            Err(e) if e.is_config() => return Err(e),
            Err(e) => warn!("Could not check VM status: {}, will attempt start", e),
        }

        info!(
            "Starting VM instance {} in {}",
            config.instance_id, config.region
        );
        let state = self.provider.start_instance(config).await?;
        info!(
            "Instance {} starting. Current state: {}",
            config.instance_id, state
        );

        Ok(VmDetails {
            instance_id: config.instance_id.clone(),
            provider: provider.to_string(),
            state,
            already_running: false,
            healthy: false,
        })
    }

    /// Poll until the instance passes its status checks or the ceiling passes.
    ///
    /// Returns false on timeout; callers proceed either way. Unless
    /// `skip_runner_wait` is set, a healthy instance is given the runner
    /// warm-up period, counted from the start of the wait, to register its
    /// runner agent.
    pub async fn wait_ready(
        &self,
        config: &VmConfig,
        started: Option<&VmDetails>,
        skip_runner_wait: bool,
    ) -> VmResult<bool> {
        config.validate()?;

        if let Some(details) = started {
            if details.already_running && details.healthy {
                info!("VM is already running and healthy");
                return Ok(true);
            }
        }

        info!("Waiting for VM to be ready...");
        let begun = Instant::now();

        loop {
            let elapsed = begun.elapsed();
            if elapsed > self.policy.ceiling {
                warn!("VM wait timeout reached - proceeding (runner may not be ready)");
                return Ok(false);
            }

            match self.provider.status(config).await {
                Ok(status) if status.is_healthy() => {
                    info!("VM is running and healthy after {} seconds", elapsed.as_secs());

                    if !skip_runner_wait && elapsed < self.policy.runner_warmup {
                        let remaining = self.policy.runner_warmup - elapsed;
                        info!(
                            "Waiting additional {} seconds for runner service...",
                            remaining.as_secs()
                        );
                        tokio::time::sleep(remaining).await;
                    }

                    info!("VM and runner service should be ready");
                    return Ok(true);
                }
                Ok(status) => debug!(
                    state = %status.state,
                    checks_passed = status.checks.passed(),
                    "VM not ready yet"
                ),
                Err(e) if e.is_config() => return Err(e),
                Err(e) => debug!("Status check failed: {}", e),
            }

            tokio::time::sleep(self.policy.poll_interval).await;
        }
    }

    /// Stop the instance; true if a stop command was issued
    pub async fn stop(&self, config: &VmConfig) -> VmResult<bool> {
        config.validate()?;

        match self.provider.describe_state(config).await {
            Ok(state) if state.is_down() => {
                info!("VM instance {} is already {}", config.instance_id, state);
                return Ok(false);
            }
            Ok(_) => {}
            Err(e) if e.is_config() => return Err(e),
            Err(e) => warn!("Could not check VM status: {}, will attempt stop anyway", e),
        }

        info!("Stopping VM instance {}", config.instance_id);
        let state = self.provider.stop_instance(config).await?;
        info!(
            "Instance {} stopping. Current state: {}",
            config.instance_id, state
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VmError;
    use crate::provider::InstanceState;
    use crate::testing::{vm_config, FakeProvider};
    use std::time::Duration;

    fn lifecycle(provider: &Arc<FakeProvider>) -> VmLifecycle {
        VmLifecycle::new(provider.clone())
    }

    #[tokio::test]
    async fn test_start_running_healthy_vm_is_noop() {
        let provider = Arc::new(FakeProvider::healthy());

        let details = lifecycle(&provider).start(&vm_config()).await.unwrap();

        assert!(details.already_running);
        assert!(details.healthy);
        assert_eq!(details.state, InstanceState::Running);
        assert_eq!(provider.count("start"), 0);
    }

    #[tokio::test]
    async fn test_start_stopped_vm() {
        let provider = Arc::new(FakeProvider::stopped());

        let details = lifecycle(&provider).start(&vm_config()).await.unwrap();

        assert!(!details.already_running);
        assert_eq!(details.state, InstanceState::Pending);
        assert_eq!(details.provider, "AWS");
        assert_eq!(provider.count("start"), 1);
    }

    #[tokio::test]
    async fn test_missing_region_fails_before_any_call() {
        let provider = Arc::new(FakeProvider::stopped());
        let config = VmConfig {
            region: String::new(),
            ..vm_config()
        };

        let err = lifecycle(&provider).start(&config).await.unwrap_err();

        assert!(matches!(err, VmError::Config(ref msg) if msg.contains("Region")));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_includes_runner_warmup() {
        let provider = Arc::new(FakeProvider::stopped());
        let lifecycle = lifecycle(&provider);
        let config = vm_config();

        let details = lifecycle.start(&config).await.unwrap();
        let begun = Instant::now();
        assert!(lifecycle.wait_ready(&config, Some(&details), false).await.unwrap());

        assert!(begun.elapsed() >= Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_skips_warmup() {
        let provider = Arc::new(FakeProvider::healthy());
        let lifecycle = lifecycle(&provider);

        let begun = Instant::now();
        assert!(lifecycle.wait_ready(&vm_config(), None, true).await.unwrap());

        assert!(begun.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_timeout_is_not_an_error() {
        let provider = Arc::new(FakeProvider::stopped());
        let lifecycle = lifecycle(&provider);

        let begun = Instant::now();
        assert!(!lifecycle.wait_ready(&vm_config(), None, false).await.unwrap());

        assert!(begun.elapsed() >= Duration::from_secs(300));
        assert!(provider.count("describe") > 1);
    }

    #[tokio::test]
    async fn test_stop_already_stopped_is_noop() {
        let provider = Arc::new(FakeProvider::stopped());

        assert!(!lifecycle(&provider).stop(&vm_config()).await.unwrap());
        assert_eq!(provider.count("stop"), 0);
    }

    #[tokio::test]
    async fn test_stop_running_vm() {
        let provider = Arc::new(FakeProvider::healthy());

        assert!(lifecycle(&provider).stop(&vm_config()).await.unwrap());
        assert_eq!(provider.count("stop"), 1);
    }

    #[tokio::test]
    async fn test_stop_failure_is_reported() {
        let provider = Arc::new(FakeProvider::healthy().failing_stop());

        let err = lifecycle(&provider).stop(&vm_config()).await.unwrap_err();
        assert!(!err.is_config());
    }
}
