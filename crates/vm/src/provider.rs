//! Cloud compute provider abstraction.

use crate::config::VmConfig;
use crate::error::VmResult;
use async_trait::async_trait;
use serde::Serialize;

/// Instance lifecycle state as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    Unknown,
}

impl InstanceState {
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "shutting-down" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
            InstanceState::Unknown => "unknown",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, InstanceState::Running)
    }

    /// Stopped, or on its way there
    pub fn is_down(&self) -> bool {
        matches!(
            self,
            InstanceState::Stopping
                | InstanceState::Stopped
                | InstanceState::ShuttingDown
                | InstanceState::Terminated
        )
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the provider's instance and system reachability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatusChecks {
    pub instance_ok: bool,
    pub system_ok: bool,
}

impl StatusChecks {
    pub fn passed(&self) -> bool {
        self.instance_ok && self.system_ok
    }
}

/// Observed state plus health of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VmStatus {
    pub state: InstanceState,
    pub checks: StatusChecks,
}

impl VmStatus {
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Running with both status checks passing
    pub fn is_healthy(&self) -> bool {
        self.state.is_running() && self.checks.passed()
    }
}

/// What `start` observed or caused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmDetails {
    pub instance_id: String,
    pub provider: String,
    pub state: InstanceState,
    /// No start command was issued
    pub already_running: bool,
    pub healthy: bool,
}

/// Operations on one compute instance, keyed by the config's instance,
/// region and credentials.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Issue a start command, returning the transitional state
    async fn start_instance(&self, config: &VmConfig) -> VmResult<InstanceState>;

    /// Issue a stop command, returning the transitional state
    async fn stop_instance(&self, config: &VmConfig) -> VmResult<InstanceState>;

    async fn describe_state(&self, config: &VmConfig) -> VmResult<InstanceState>;

    async fn describe_checks(&self, config: &VmConfig) -> VmResult<StatusChecks>;

    /// State, plus status checks when the instance is running.
    ///
    /// A failing status check call counts as checks not yet passed.
    async fn status(&self, config: &VmConfig) -> VmResult<VmStatus> {
        let state = self.describe_state(config).await?;
        let checks = if state.is_running() {
            match self.describe_checks(config).await {
                Ok(checks) => checks,
                Err(e) => {
                    tracing::debug!("Status check call failed: {}", e);
                    StatusChecks::default()
                }
            }
        } else {
            StatusChecks::default()
        };

        Ok(VmStatus { state, checks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_state_names() {
        assert_eq!(InstanceState::from_name("running"), InstanceState::Running);
        assert_eq!(
            InstanceState::from_name("shutting-down"),
            InstanceState::ShuttingDown
        );
        assert_eq!(InstanceState::from_name("rebooting"), InstanceState::Unknown);
        assert_eq!(InstanceState::Stopped.to_string(), "stopped");
        assert!(InstanceState::Stopping.is_down());
        assert!(!InstanceState::Pending.is_down());
    }

    #[test]
    fn test_health_requires_both_checks() {
        let status = VmStatus {
            state: InstanceState::Running,
            checks: StatusChecks {
                instance_ok: true,
                system_ok: false,
            },
        };
        assert!(status.is_running());
        assert!(!status.is_healthy());

        let stopped = VmStatus {
            state: InstanceState::Stopped,
            checks: StatusChecks {
                instance_ok: true,
                system_ok: true,
            },
        };
        assert!(!stopped.is_healthy());
    }
}
