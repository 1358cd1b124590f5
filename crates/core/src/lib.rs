// Core types and functionality for dagwatch workflow monitoring

pub mod monitor;
pub mod storage;
pub mod types;
pub mod workflow;

pub use monitor::{ActionStatus, MonitorConfig, MonitorOutcome, WorkflowMonitor};
pub use types::*;
