//! VM configuration, credentials and polling policies.

use crate::error::{VmError, VmResult};
use dagwatch_core::VmSettings;
use std::time::Duration;

/// Environment variable holding the CI access token
pub const CI_TOKEN_ENV: &str = "GH_PAT";

/// Supported cloud compute providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Aws,
}

impl Provider {
    pub fn parse(name: &str) -> VmResult<Self> {
        if name.eq_ignore_ascii_case("aws") {
            Ok(Self::Aws)
        } else {
            Err(VmError::UnsupportedProvider(name.to_string()))
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Aws => f.write_str("AWS"),
        }
    }
}

/// When the VM is started and stopped relative to the DAG.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Start before the first VM user, stop after the last
    #[default]
    SimpleStartEnd,
    PerFunction,
    Optimized,
    Unknown(String),
}

impl Strategy {
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "" | "simple_start_end" => Self::SimpleStartEnd,
            "per_function" => Self::PerFunction,
            "optimized" => Self::Optimized,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Strategy::SimpleStartEnd => "simple_start_end",
            Strategy::PerFunction => "per_function",
            Strategy::Optimized => "optimized",
            Strategy::Unknown(name) => name,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access key pair for the cloud API. Never logged or persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Read `<vm_name>_AccessKey` and `<vm_name>_SecretKey` through `lookup`
    pub fn from_lookup(vm_name: &str, lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let access_key = lookup(&format!("{}_AccessKey", vm_name)).filter(|v| !v.is_empty())?;
        let secret_key = lookup(&format!("{}_SecretKey", vm_name)).filter(|v| !v.is_empty())?;
        Some(Self::new(access_key, secret_key))
    }

    pub fn from_env(vm_name: &str) -> Option<Self> {
        Self::from_lookup(vm_name, |key| std::env::var(key).ok())
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// CI access token from the environment, if set
pub fn ci_token_from_env() -> Option<String> {
    std::env::var(CI_TOKEN_ENV).ok().filter(|token| !token.is_empty())
}

/// In-memory VM configuration for one invocation.
#[derive(Debug, Clone, Default)]
pub struct VmConfig {
    pub name: String,
    pub provider: String,
    pub instance_id: String,
    pub region: String,
    pub strategy: Strategy,
    pub runner_name: Option<String>,
    pub credentials: Option<Credentials>,
}

impl VmConfig {
    /// Build from the `VMConfig` section of a workflow definition
    pub fn from_settings(settings: &VmSettings) -> Self {
        Self {
            name: settings.name.clone(),
            provider: settings.provider.clone(),
            instance_id: settings.instance_id.clone(),
            region: settings.region.clone(),
            strategy: settings
                .strategy
                .as_deref()
                .map(Strategy::parse)
                .unwrap_or_default(),
            runner_name: settings.runner_name.clone().filter(|n| !n.is_empty()),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Attach credentials read from `<Name>_AccessKey`/`<Name>_SecretKey`
    pub fn with_env_credentials(self) -> Self {
        self.with_credentials_from(|key| std::env::var(key).ok())
    }

    pub fn with_credentials_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.name.is_empty() {
            tracing::warn!("VMConfig has no Name, cannot look up VM credentials");
            return self;
        }

        self.credentials = Credentials::from_lookup(&self.name, lookup);
        if self.credentials.is_none() {
            tracing::warn!(
                "VM credentials not found: {}_AccessKey, {}_SecretKey",
                self.name,
                self.name
            );
        }
        self
    }

    /// Check every field a provider call needs
    pub fn validate(&self) -> VmResult<Provider> {
        if self.provider.trim().is_empty() {
            return Err(VmError::missing_field("Provider"));
        }
        if self.instance_id.trim().is_empty() {
            return Err(VmError::missing_field("InstanceId"));
        }
        if self.region.trim().is_empty() {
            return Err(VmError::missing_field("Region"));
        }
        match &self.credentials {
            None => return Err(VmError::missing_field("AccessKey")),
            Some(c) if c.access_key.is_empty() => return Err(VmError::missing_field("AccessKey")),
            Some(c) if c.secret_key.is_empty() => return Err(VmError::missing_field("SecretKey")),
            Some(_) => {}
        }

        Provider::parse(&self.provider)
    }
}

/// Bounds of the VM health wait.
#[derive(Debug, Clone)]
pub struct ReadinessPolicy {
    pub poll_interval: Duration,
    pub ceiling: Duration,
    /// Minimum time since the wait began before the runner agent is assumed registered
    pub runner_warmup: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(20),
            ceiling: Duration::from_secs(300),
            runner_warmup: Duration::from_secs(90),
        }
    }
}

/// Bounds of the CI runner registration wait.
#[derive(Debug, Clone)]
pub struct RunnerPollPolicy {
    pub interval: Duration,
    pub ceiling: Duration,
}

impl Default for RunnerPollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            ceiling: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings() -> VmSettings {
        VmSettings {
            name: "gpu".to_string(),
            provider: "AWS".to_string(),
            instance_id: "i-0abc".to_string(),
            region: "us-east-1".to_string(),
            strategy: None,
            runner_name: Some("gpu-runner".to_string()),
        }
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_credentials_from_lookup() {
        let config = VmConfig::from_settings(&settings())
            .with_credentials_from(lookup(&[("gpu_AccessKey", "AKID"), ("gpu_SecretKey", "shh")]));

        let credentials = config.credentials.as_ref().unwrap();
        assert_eq!(credentials.access_key(), "AKID");
        assert_eq!(credentials.secret_key(), "shh");
        assert_eq!(config.validate().unwrap(), Provider::Aws);
    }

    #[test]
    fn test_missing_secret_key() {
        let config = VmConfig::from_settings(&settings())
            .with_credentials_from(lookup(&[("gpu_AccessKey", "AKID"), ("gpu_SecretKey", "")]));

        assert!(config.credentials.is_none());
        let err = config.validate().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("AccessKey"));
    }

    #[test]
    fn test_missing_region_is_config_error() {
        let mut vm = settings();
        vm.region = String::new();
        let config =
            VmConfig::from_settings(&vm).with_credentials(Credentials::new("AKID", "shh"));

        let err = config.validate().unwrap_err();
        assert!(matches!(err, VmError::Config(_)));
        assert!(err.to_string().contains("Region"));
    }

    #[test]
    fn test_unsupported_provider() {
        let mut vm = settings();
        vm.provider = "GCP".to_string();
        let config =
            VmConfig::from_settings(&vm).with_credentials(Credentials::new("AKID", "shh"));

        assert!(matches!(
            config.validate(),
            Err(VmError::UnsupportedProvider(name)) if name == "GCP"
        ));
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let config = VmConfig::from_settings(&settings())
            .with_credentials(Credentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI"));

        let printed = format!("{:?}", config);
        assert!(!printed.contains("AKIDEXAMPLE"));
        assert!(!printed.contains("wJalrXUtnFEMI"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(Strategy::parse(""), Strategy::SimpleStartEnd);
        assert_eq!(Strategy::parse("per_function"), Strategy::PerFunction);
        assert_eq!(
            Strategy::parse("round_robin"),
            Strategy::Unknown("round_robin".to_string())
        );
        assert_eq!(Strategy::parse("optimized").to_string(), "optimized");
    }

    #[test]
    fn test_policy_defaults() {
        let ready = ReadinessPolicy::default();
        assert_eq!(ready.poll_interval, Duration::from_secs(20));
        assert_eq!(ready.ceiling, Duration::from_secs(300));
        assert_eq!(ready.runner_warmup, Duration::from_secs(90));

        let runner = RunnerPollPolicy::default();
        assert_eq!(runner.interval, Duration::from_secs(10));
        assert_eq!(runner.ceiling, Duration::from_secs(300));
    }
}
