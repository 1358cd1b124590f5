//! In-memory [`ComputeProvider`] for lifecycle and orchestrator tests.

use crate::config::{Credentials, VmConfig};
use crate::error::{VmError, VmResult};
use crate::provider::{ComputeProvider, InstanceState, StatusChecks};
use async_trait::async_trait;
use std::sync::Mutex;

pub struct FakeProvider {
    state: Mutex<InstanceState>,
    checks_ok: Mutex<bool>,
    calls: Mutex<Vec<&'static str>>,
    fail_stop: bool,
}

impl FakeProvider {
    pub fn new(state: InstanceState, checks_ok: bool) -> Self {
        Self {
            state: Mutex::new(state),
            checks_ok: Mutex::new(checks_ok),
            calls: Mutex::new(Vec::new()),
            fail_stop: false,
        }
    }

    pub fn stopped() -> Self {
        Self::new(InstanceState::Stopped, false)
    }

    pub fn healthy() -> Self {
        Self::new(InstanceState::Running, true)
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

pub fn vm_config() -> VmConfig {
    VmConfig {
        name: "gpu".to_string(),
        provider: "AWS".to_string(),
        instance_id: "i-0abc".to_string(),
        region: "us-east-1".to_string(),
        runner_name: Some("gpu-runner".to_string()),
        ..Default::default()
    }
    .with_credentials(Credentials::new("AKID", "secret"))
}

#[async_trait]
impl ComputeProvider for FakeProvider {
    async fn start_instance(&self, _config: &VmConfig) -> VmResult<InstanceState> {
        self.record("start");
        *self.state.lock().unwrap() = InstanceState::Running;
        *self.checks_ok.lock().unwrap() = true;
        Ok(InstanceState::Pending)
    }

    async fn stop_instance(&self, _config: &VmConfig) -> VmResult<InstanceState> {
        self.record("stop");
        if self.fail_stop {
            return Err(VmError::Api {
                status: 500,
                code: "InternalError".to_string(),
                message: "stop failed".to_string(),
            });
        }
        *self.state.lock().unwrap() = InstanceState::Stopped;
        Ok(InstanceState::Stopping)
    }

    async fn describe_state(&self, _config: &VmConfig) -> VmResult<InstanceState> {
        self.record("describe");
        Ok(*self.state.lock().unwrap())
    }

    async fn describe_checks(&self, _config: &VmConfig) -> VmResult<StatusChecks> {
        self.record("checks");
        let ok = *self.checks_ok.lock().unwrap();
        Ok(StatusChecks {
            instance_ok: ok,
            system_ok: ok,
        })
    }
}
