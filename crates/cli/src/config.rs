use anyhow::{Context, Result};
use dagwatch_core::MonitorConfig;
use dagwatch_vm::{ReadinessPolicy, RunnerPollPolicy, DEFAULT_GITHUB_API};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Runtime settings read from `dagwatch.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DagwatchConfig {
    #[serde(default)]
    pub monitor: MonitorSection,

    #[serde(default)]
    pub vm: VmSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSection {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    #[serde(default = "default_true")]
    pub stream_logs: bool,

    #[serde(default = "default_cleanup_timeout_secs")]
    pub cleanup_timeout_secs: u64,

    #[serde(default = "default_tail_wait_secs")]
    pub tail_wait_secs: u64,

    #[serde(default)]
    pub resolve_not_invoked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmSection {
    #[serde(default = "default_ready_poll_secs")]
    pub ready_poll_secs: u64,

    #[serde(default = "default_ceiling_secs")]
    pub ready_ceiling_secs: u64,

    #[serde(default = "default_runner_warmup_secs")]
    pub runner_warmup_secs: u64,

    #[serde(default = "default_runner_poll_secs")]
    pub runner_poll_secs: u64,

    #[serde(default = "default_ceiling_secs")]
    pub runner_ceiling_secs: u64,

    /// Send EC2 calls here instead of the regional endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec2_endpoint: Option<String>,

    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_check_interval_secs() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

fn default_cleanup_timeout_secs() -> u64 {
    30
}

fn default_tail_wait_secs() -> u64 {
    3
}

fn default_ready_poll_secs() -> u64 {
    20
}

fn default_ceiling_secs() -> u64 {
    300
}

fn default_runner_warmup_secs() -> u64 {
    90
}

fn default_runner_poll_secs() -> u64 {
    10
}

fn default_github_api_url() -> String {
    DEFAULT_GITHUB_API.to_string()
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            check_interval_secs: default_check_interval_secs(),
            stream_logs: true,
            cleanup_timeout_secs: default_cleanup_timeout_secs(),
            tail_wait_secs: default_tail_wait_secs(),
            resolve_not_invoked: false,
        }
    }
}

impl Default for VmSection {
    fn default() -> Self {
        Self {
            ready_poll_secs: default_ready_poll_secs(),
            ready_ceiling_secs: default_ceiling_secs(),
            runner_warmup_secs: default_runner_warmup_secs(),
            runner_poll_secs: default_runner_poll_secs(),
            runner_ceiling_secs: default_ceiling_secs(),
            ec2_endpoint: None,
            github_api_url: default_github_api_url(),
        }
    }
}

impl DagwatchConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        // Load config file if it exists, otherwise use defaults
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")
        } else {
            tracing::info!("Configuration file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn monitor_config(&self, invocation_folder: impl Into<String>) -> MonitorConfig {
        MonitorConfig {
            timeout: Duration::from_secs(self.monitor.timeout_secs),
            check_interval: Duration::from_secs(self.monitor.check_interval_secs.max(1)),
            stream_logs: self.monitor.stream_logs,
            tail_wait: Duration::from_secs(self.monitor.tail_wait_secs),
            resolve_not_invoked: self.monitor.resolve_not_invoked,
            ..MonitorConfig::new(invocation_folder)
        }
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.monitor.cleanup_timeout_secs)
    }

    pub fn readiness_policy(&self) -> ReadinessPolicy {
        ReadinessPolicy {
            poll_interval: Duration::from_secs(self.vm.ready_poll_secs),
            ceiling: Duration::from_secs(self.vm.ready_ceiling_secs),
            runner_warmup: Duration::from_secs(self.vm.runner_warmup_secs),
        }
    }

    pub fn runner_policy(&self) -> RunnerPollPolicy {
        RunnerPollPolicy {
            interval: Duration::from_secs(self.vm.runner_poll_secs),
            ceiling: Duration::from_secs(self.vm.runner_ceiling_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = DagwatchConfig::load(&temp_dir.path().join("dagwatch.toml")).unwrap();

        let monitor = config.monitor_config("FaaSrLog/run-1");
        assert_eq!(monitor.invocation_folder, "FaaSrLog/run-1");
        assert_eq!(monitor.timeout, Duration::from_secs(120));
        assert_eq!(monitor.check_interval, Duration::from_secs(1));
        assert!(monitor.stream_logs);
        assert!(!monitor.resolve_not_invoked);
        assert_eq!(config.cleanup_timeout(), Duration::from_secs(30));

        let ready = config.readiness_policy();
        assert_eq!(ready.ceiling, Duration::from_secs(300));
        assert_eq!(ready.runner_warmup, Duration::from_secs(90));
        assert_eq!(config.vm.github_api_url, "https://api.github.com");
    }

    #[test]
    fn test_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dagwatch.toml");
        std::fs::write(
            &path,
            r#"
[monitor]
timeout_secs = 600
stream_logs = false

[vm]
ec2_endpoint = "http://localhost:4566"
runner_poll_secs = 5
"#,
        )
        .unwrap();

        let config = DagwatchConfig::load(&path).unwrap();

        assert_eq!(config.monitor.timeout_secs, 600);
        assert!(!config.monitor.stream_logs);
        assert_eq!(config.monitor.tail_wait_secs, 3);
        assert_eq!(config.vm.ec2_endpoint.as_deref(), Some("http://localhost:4566"));
        assert_eq!(config.runner_policy().interval, Duration::from_secs(5));
        assert_eq!(config.runner_policy().ceiling, Duration::from_secs(300));
    }

    #[test]
    fn test_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dagwatch.toml");
        std::fs::write(&path, "[monitor]\ntimeout_secs = \"soon\"\n").unwrap();

        assert!(DagwatchConfig::load(&path).is_err());
    }
}
