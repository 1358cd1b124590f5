use crate::config::DagwatchConfig;
use crate::signal::wait_for_shutdown;
use anyhow::{Context, Result};
use clap::Args;
use dagwatch_core::storage::{BlobStore, FilesystemBlobStore, ObjectStoreBlobStore};
use dagwatch_core::workflow::WorkflowDag;
use dagwatch_core::{MonitorOutcome, WorkflowDefinition, WorkflowMonitor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Invocation folder (defaults to <LogFolder>/<InvocationID> of the workflow)
    #[arg(long)]
    pub folder: Option<String>,

    /// Read logs from a local directory instead of the workflow's data store
    #[arg(long)]
    pub local_dir: Option<PathBuf>,

    /// Inactivity timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Seconds between scans
    #[arg(long)]
    pub check_interval_secs: Option<u64>,

    /// Do not stream action log lines
    #[arg(long)]
    pub quiet: bool,

    /// Treat actions whose invokers all finished without naming them as not invoked
    #[arg(long)]
    pub resolve_not_invoked: bool,
}

pub async fn run(
    definition: WorkflowDefinition,
    settings: &DagwatchConfig,
    args: MonitorArgs,
) -> Result<bool> {
    let dag = Arc::new(WorkflowDag::from_definition(&definition).context("Invalid workflow")?);

    let folder = args
        .folder
        .clone()
        .or_else(|| definition.invocation_folder())
        .context("No invocation folder: set InvocationID in the workflow or pass --folder")?;

    let mut config = settings.monitor_config(folder);
    if let Some(secs) = args.timeout_secs {
        config.timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = args.check_interval_secs {
        config.check_interval = Duration::from_secs(secs.max(1));
    }
    if args.quiet {
        config.stream_logs = false;
    }
    if args.resolve_not_invoked {
        config.resolve_not_invoked = true;
    }

    let store = open_store(&definition, args.local_dir)?;
    let monitor = WorkflowMonitor::new(definition.workflow_name.clone(), dag, store, config);
    monitor.start();

    let outcome = tokio::select! {
        outcome = monitor.wait_for_completion(None) => outcome.unwrap_or(MonitorOutcome::Shutdown),
        res = wait_for_shutdown() => {
            res?;
            info!("Shutdown requested, stopping monitor");
            if !monitor.cleanup(settings.cleanup_timeout()).await {
                warn!("Monitor did not stop in time and was forced down");
            }
            MonitorOutcome::Shutdown
        }
    };

    for (instance, status) in monitor.statuses() {
        info!("{}: {}", instance, status);
    }
    info!("Workflow {} finished monitoring: {}", definition.workflow_name, outcome);

    Ok(outcome.is_success())
}

/// Local directory when given, otherwise the workflow's default data store.
///
/// Store credentials come from `<STORE>_ACCESSKEY` and `<STORE>_SECRETKEY`.
fn open_store(definition: &WorkflowDefinition, local_dir: Option<PathBuf>) -> Result<Arc<dyn BlobStore>> {
    if let Some(dir) = local_dir {
        info!("Reading invocation logs from {}", dir.display());
        return Ok(Arc::new(FilesystemBlobStore::new(dir)?));
    }

    let name = definition.default_store_name();
    let data_store = definition
        .default_store()
        .with_context(|| format!("Data store {} not found in workflow", name))?;

    let prefix = name.to_uppercase();
    let access_key = std::env::var(format!("{}_ACCESSKEY", prefix))
        .with_context(|| format!("{}_ACCESSKEY is not set", prefix))?;
    let secret_key = std::env::var(format!("{}_SECRETKEY", prefix))
        .with_context(|| format!("{}_SECRETKEY is not set", prefix))?;

    Ok(Arc::new(ObjectStoreBlobStore::from_data_store(
        data_store,
        &access_key,
        &secret_key,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const WORKFLOW: &str = r#"{
        "WorkflowName": "demo",
        "FunctionInvoke": "fetch",
        "InvocationID": "run-1",
        "ActionList": {
            "fetch": {"FaaSServer": "gh", "InvokeNext": ["publish"]},
            "publish": {"FaaSServer": "gh"}
        }
    }"#;

    fn quick_args(dir: &TempDir) -> MonitorArgs {
        MonitorArgs {
            folder: None,
            local_dir: Some(dir.path().to_path_buf()),
            timeout_secs: Some(2),
            check_interval_secs: Some(1),
            quiet: true,
            resolve_not_invoked: false,
        }
    }

    async fn write(dir: &TempDir, folder: &str, name: &str, content: &str) {
        let store = FilesystemBlobStore::new(dir.path().to_path_buf()).unwrap();
        store
            .put(folder, name, content.to_string().into())
            .await
            .unwrap();
    }

    const FOLDER: &str = "FaaSrLog/run-1";
    const MARKERS: &str = "FaaSrLog/run-1/function_completions";

    #[tokio::test]
    async fn test_monitor_completed_invocation() {
        let dir = TempDir::new().unwrap();
        write(&dir, FOLDER, "fetch.txt", "[1.0] [INFO] Successfully invoked: demo-publish").await;
        write(&dir, MARKERS, "fetch.done", "").await;
        write(&dir, FOLDER, "publish.txt", "[2.0] [INFO] done").await;
        write(&dir, MARKERS, "publish.done", "").await;

        let definition = WorkflowDefinition::from_json(WORKFLOW).unwrap();
        let ok = run(definition, &DagwatchConfig::default(), quick_args(&dir))
            .await
            .unwrap();

        assert!(ok);
    }

    #[tokio::test]
    async fn test_monitor_failed_invocation() {
        let dir = TempDir::new().unwrap();
        write(&dir, FOLDER, "fetch.txt", "[1.0] [ERROR] download failed").await;

        let definition = WorkflowDefinition::from_json(WORKFLOW).unwrap();
        let ok = run(definition, &DagwatchConfig::default(), quick_args(&dir))
            .await
            .unwrap();

        assert!(!ok);
    }

    #[tokio::test]
    async fn test_missing_invocation_folder() {
        let dir = TempDir::new().unwrap();
        let mut definition = WorkflowDefinition::from_json(WORKFLOW).unwrap();
        definition.invocation_id = None;

        let err = run(definition, &DagwatchConfig::default(), quick_args(&dir))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("invocation folder"));
    }
}
