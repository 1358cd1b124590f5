//! Workflow execution monitor.
//!
//! Actions run elsewhere; the monitor only observes the artifacts they leave
//! in the blob store. Each action instance moves through
//! `Pending -> Invoked -> Running -> Completed | Failed`, driven by:
//!
//! - an invocation marker in a completed predecessor's log (`Invoked`)
//! - the existence of `<folder>/<instance>.txt` (`Running`)
//! - an error line in that log (`Failed`)
//! - the existence of `<folder>/function_completions/<action>.done` (`Completed`)
//!
//! One monitor task scans every action per pass from a consistent status
//! snapshot. Log objects are read by short-lived tailing tasks, at most one
//! live task per action instance.

pub mod logs;
pub mod markers;
pub mod status;

pub use logs::LogBuffers;
pub use status::{ActionStatus, StatusBoard};

use crate::storage::BlobStore;
use crate::workflow::WorkflowDag;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Sub-folder of an invocation folder holding completion markers
pub const COMPLETIONS_FOLDER: &str = "function_completions";

/// Runtime settings of a monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Folder the actions of this invocation write to
    pub invocation_folder: String,
    /// Give up after this long without any status transition
    pub timeout: Duration,
    pub check_interval: Duration,
    /// Emit newly read log lines under the `action_log` target
    pub stream_logs: bool,
    /// How long a scan waits for an unfinished tailing round before skipping it
    pub tail_wait: Duration,
    /// Settle never-invoked branches as `NotInvoked` instead of timing out
    pub resolve_not_invoked: bool,
}

impl MonitorConfig {
    pub fn new(invocation_folder: impl Into<String>) -> Self {
        Self {
            invocation_folder: invocation_folder.into(),
            timeout: Duration::from_secs(120),
            check_interval: Duration::from_secs(1),
            stream_logs: true,
            tail_wait: Duration::from_secs(3),
            resolve_not_invoked: false,
        }
    }
}

/// How a monitoring run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorOutcome {
    /// Every action completed (or was settled as not invoked)
    Completed,
    /// An action failed; pending actions were skipped
    Failed,
    /// No status changed within the inactivity timeout
    TimedOut,
    Shutdown,
}

impl MonitorOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MonitorOutcome::Completed)
    }
}

impl std::fmt::Display for MonitorOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MonitorOutcome::Completed => "completed",
            MonitorOutcome::Failed => "failed",
            MonitorOutcome::TimedOut => "timed_out",
            MonitorOutcome::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// One monitored instance of an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredAction {
    /// `name`, or `name(k)` for instance k of a ranked action
    pub instance: String,
    pub action: String,
    pub index: Option<u32>,
}

impl MonitoredAction {
    fn for_dag(dag: &WorkflowDag) -> Vec<Self> {
        let mut actions = Vec::new();
        for action in dag.topological_order() {
            let rank = dag.rank(&action);
            if rank <= 1 {
                actions.push(Self {
                    instance: action.clone(),
                    action,
                    index: None,
                });
            } else {
                actions.extend((1..=rank).map(|k| Self {
                    instance: format!("{}({})", action, k),
                    action: action.clone(),
                    index: Some(k),
                }));
            }
        }
        actions
    }

    /// Name of the log object
    pub fn log_name(&self) -> String {
        format!("{}.txt", self.instance)
    }

    /// Name of the completion marker object
    pub fn marker_name(&self) -> String {
        match self.index {
            Some(k) => format!("{}.{}.done", self.action, k),
            None => format!("{}.done", self.action),
        }
    }
}

#[derive(Debug, Default)]
struct ScanPass {
    changed: bool,
    failed: bool,
}

struct Shared {
    workflow_name: String,
    dag: Arc<WorkflowDag>,
    store: Arc<dyn BlobStore>,
    config: MonitorConfig,
    actions: Vec<MonitoredAction>,
    board: StatusBoard,
    logs: LogBuffers,
    tailers: Mutex<HashMap<String, JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    done_tx: watch::Sender<Option<MonitorOutcome>>,
}

/// Observes a single workflow invocation until it completes, fails, times
/// out or is shut down.
pub struct WorkflowMonitor {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<MonitorOutcome>>>,
}

impl WorkflowMonitor {
    pub fn new(
        workflow_name: impl Into<String>,
        dag: Arc<WorkflowDag>,
        store: Arc<dyn BlobStore>,
        config: MonitorConfig,
    ) -> Self {
        let actions = MonitoredAction::for_dag(&dag);
        let initial: BTreeMap<String, ActionStatus> = actions
            .iter()
            .map(|a| {
                let status = if a.action == dag.start_action() {
                    ActionStatus::Invoked
                } else {
                    ActionStatus::Pending
                };
                (a.instance.clone(), status)
            })
            .collect();
        let logs = LogBuffers::new(actions.iter().map(|a| a.instance.as_str()));

        let (shutdown_tx, _) = watch::channel(false);
        let (done_tx, _) = watch::channel(None);

        Self {
            shared: Arc::new(Shared {
                workflow_name: workflow_name.into(),
                dag,
                store,
                config,
                actions,
                board: StatusBoard::new(initial),
                logs,
                tailers: Mutex::new(HashMap::new()),
                shutdown_tx,
                done_tx,
            }),
            task: Mutex::new(None),
        }
    }

    /// Spawn the monitor task. Must be called within a tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap();
        if task.is_some() || self.shared.outcome().is_some() {
            tracing::warn!("Workflow monitor already started");
            return;
        }

        tracing::info!(
            "Starting monitor for workflow {} ({} action instances) in {}",
            self.shared.workflow_name,
            self.shared.actions.len(),
            self.shared.config.invocation_folder
        );
        *task = Some(tokio::spawn(run(Arc::clone(&self.shared))));
    }

    /// Start monitoring and wait until it ends
    pub async fn run_to_completion(&self) -> MonitorOutcome {
        self.start();
        self.wait_for_completion(None)
            .await
            .unwrap_or(MonitorOutcome::Shutdown)
    }

    /// Monitored instances, invokers first
    pub fn actions(&self) -> &[MonitoredAction] {
        &self.shared.actions
    }

    pub fn statuses(&self) -> BTreeMap<String, ActionStatus> {
        self.shared.board.snapshot()
    }

    pub fn status(&self, instance: &str) -> Option<ActionStatus> {
        self.shared.board.get(instance)
    }

    /// Log lines read so far for an action instance
    pub fn logs(&self, instance: &str) -> Vec<String> {
        self.shared.logs.lines(instance)
    }

    pub fn is_monitoring_complete(&self) -> bool {
        self.shared.board.is_complete()
    }

    pub fn outcome(&self) -> Option<MonitorOutcome> {
        self.shared.outcome()
    }

    /// Wait for the monitor to finish; `None` if `timeout` elapses first
    pub async fn wait_for_completion(&self, timeout: Option<Duration>) -> Option<MonitorOutcome> {
        let mut done_rx = self.shared.done_tx.subscribe();
        let wait = async move {
            done_rx
                .wait_for(|outcome| outcome.is_some())
                .await
                .ok()
                .and_then(|outcome| *outcome)
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.ok().flatten(),
            None => wait.await,
        }
    }

    /// Request a graceful stop and join the monitor and tailing tasks.
    ///
    /// Returns false if they did not all exit within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        tracing::info!("Shutting down workflow monitor");
        self.shared.shutdown_tx.send_replace(true);
        let deadline = Instant::now() + timeout;

        let task = self.task.lock().unwrap().take();
        match task {
            Some(handle) => match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::error!("Monitor task ended abnormally: {}", e);
                    self.shared.close(MonitorOutcome::Shutdown);
                }
                Err(_) => {
                    tracing::warn!("Monitor task did not stop within {:?}", timeout);
                    return false;
                }
            },
            None => self.shared.close(MonitorOutcome::Shutdown),
        }

        let tailers: Vec<(String, JoinHandle<()>)> =
            self.shared.tailers.lock().unwrap().drain().collect();
        let mut joined = true;
        for (instance, handle) in tailers {
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                tracing::warn!("Log tailing for {} did not stop in time", instance);
                joined = false;
            }
        }

        joined
    }

    /// Mark monitoring complete without waiting for background tasks.
    ///
    /// Tasks are not aborted; a tailing round still in flight may append to
    /// its log buffer afterwards.
    pub fn force_shutdown(&self) {
        tracing::warn!("Forcing workflow monitor shutdown");
        self.shared.shutdown_tx.send_replace(true);
        self.shared.board.mark_complete();
        self.shared.publish(MonitorOutcome::Shutdown);
    }

    /// Graceful shutdown, falling back to a forced one
    pub async fn cleanup(&self, timeout: Duration) -> bool {
        if self.shutdown(timeout).await {
            true
        } else {
            self.force_shutdown();
            false
        }
    }
}

impl Drop for WorkflowMonitor {
    fn drop(&mut self) {
        self.shared.shutdown_tx.send_replace(true);
    }
}

async fn run(shared: Arc<Shared>) -> MonitorOutcome {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    let mut last_change = Instant::now();

    let outcome = loop {
        if *shutdown_rx.borrow_and_update() {
            break MonitorOutcome::Shutdown;
        }
        if last_change.elapsed() >= shared.config.timeout {
            tracing::warn!(
                "No action changed status in {:?}, giving up on workflow {}",
                shared.config.timeout,
                shared.workflow_name
            );
            break MonitorOutcome::TimedOut;
        }

        let pass = shared.scan().await;
        if pass.changed {
            last_change = Instant::now();
        }
        if pass.failed {
            for instance in shared.board.skip_pending() {
                tracing::info!("Action {}: pending -> skipped", instance);
            }
            break MonitorOutcome::Failed;
        }
        if shared.is_finished() {
            break MonitorOutcome::Completed;
        }

        tokio::select! {
            _ = tokio::time::sleep(shared.config.check_interval) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break MonitorOutcome::Shutdown;
                }
            }
        }
    };

    shared.close(outcome);
    tracing::info!("Workflow {} monitoring ended: {}", shared.workflow_name, outcome);
    outcome
}

impl Shared {
    fn outcome(&self) -> Option<MonitorOutcome> {
        *self.done_tx.borrow()
    }

    fn publish(&self, outcome: MonitorOutcome) {
        self.done_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(outcome);
                true
            } else {
                false
            }
        });
    }

    /// Settle leftover statuses, mark complete and publish the outcome
    fn close(&self, outcome: MonitorOutcome) {
        if matches!(outcome, MonitorOutcome::TimedOut | MonitorOutcome::Shutdown) {
            let requested = outcome == MonitorOutcome::Shutdown;
            for (instance, status) in self.board.finalize(requested) {
                tracing::info!("Action {}: -> {}", instance, status);
            }
        }
        self.board.mark_complete();
        self.publish(outcome);
    }

    fn is_finished(&self) -> bool {
        let allow_not_invoked = self.config.resolve_not_invoked;
        self.board.all_match(|status| {
            status == ActionStatus::Completed
                || (allow_not_invoked && status == ActionStatus::NotInvoked)
        })
    }

    fn completions_folder(&self) -> String {
        format!(
            "{}/{}",
            self.config.invocation_folder.trim_end_matches('/'),
            COMPLETIONS_FOLDER
        )
    }

    async fn scan(self: &Arc<Self>) -> ScanPass {
        let snapshot = self.board.snapshot();
        let mut pass = ScanPass::default();

        for action in &self.actions {
            let Some(status) = snapshot.get(&action.instance).copied() else {
                continue;
            };

            // Finished actions got a final read when they settled
            if status.has_log() && !status.is_final() {
                self.ensure_tailer(action).await;
            }

            let next = match status {
                ActionStatus::Pending => self.resolve_pending(action, &snapshot),
                ActionStatus::Invoked => self.check_started(action).await,
                ActionStatus::Running => self.check_running(action).await,
                _ => None,
            };

            if let Some(next) = next {
                if self.board.transition(&action.instance, status, next) {
                    tracing::info!("Action {}: {} -> {}", action.instance, status, next);
                    pass.changed = true;
                    pass.failed |= next == ActionStatus::Failed;
                }
            }
        }

        pass
    }

    /// Invoked once a completed predecessor names this action
    fn resolve_pending(
        &self,
        action: &MonitoredAction,
        snapshot: &BTreeMap<String, ActionStatus>,
    ) -> Option<ActionStatus> {
        let predecessors = self.dag.predecessors(&action.action).ok()?;
        let mut settled = true;

        for predecessor in predecessors {
            for instance in self.dag.instances(predecessor) {
                match snapshot.get(&instance) {
                    Some(ActionStatus::Completed) => {
                        let named = self
                            .logs
                            .with_text(&instance, |text| {
                                markers::invoked_actions(text, &self.workflow_name)
                                    .contains(&action.action)
                            })
                            .unwrap_or(false);
                        if named {
                            return Some(ActionStatus::Invoked);
                        }
                    }
                    Some(ActionStatus::NotInvoked) => {}
                    _ => settled = false,
                }
            }
        }

        (self.config.resolve_not_invoked && settled).then_some(ActionStatus::NotInvoked)
    }

    async fn check_started(&self, action: &MonitoredAction) -> Option<ActionStatus> {
        match self
            .store
            .head(&self.config.invocation_folder, &action.log_name())
            .await
        {
            Ok(true) => Some(ActionStatus::Running),
            Ok(false) => None,
            Err(e) => {
                tracing::warn!("Failed to check log of {}: {:#}", action.instance, e);
                None
            }
        }
    }

    async fn check_running(&self, action: &MonitoredAction) -> Option<ActionStatus> {
        if self.has_error(action) {
            return Some(ActionStatus::Failed);
        }

        match self
            .store
            .head(&self.completions_folder(), &action.marker_name())
            .await
        {
            Ok(true) => {
                // Catch error lines written just before the marker
                if let Err(e) = self.refresh_log(action, true).await {
                    tracing::warn!("Failed to read log of {}: {:#}", action.instance, e);
                }
                if self.has_error(action) {
                    Some(ActionStatus::Failed)
                } else {
                    Some(ActionStatus::Completed)
                }
            }
            Ok(false) => None,
            Err(e) => {
                tracing::warn!(
                    "Failed to check completion marker of {}: {:#}",
                    action.instance,
                    e
                );
                None
            }
        }
    }

    fn has_error(&self, action: &MonitoredAction) -> bool {
        self.logs
            .with_text(&action.instance, markers::has_error_line)
            .unwrap_or(false)
    }

    /// Spawn a tailing round unless the previous one is still running
    async fn ensure_tailer(self: &Arc<Self>, action: &MonitoredAction) {
        let previous = self.tailers.lock().unwrap().remove(&action.instance);
        if let Some(mut handle) = previous {
            if !handle.is_finished()
                && tokio::time::timeout(self.config.tail_wait, &mut handle)
                    .await
                    .is_err()
            {
                tracing::warn!(
                    "Log tailing for {} still running, skipping this round",
                    action.instance
                );
                self.tailers
                    .lock()
                    .unwrap()
                    .insert(action.instance.clone(), handle);
                return;
            }
        }

        let shared = Arc::clone(self);
        let tailed = action.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = shared.refresh_log(&tailed, false).await {
                tracing::warn!("Failed to tail log of {}: {:#}", tailed.instance, e);
            }
        });
        self.tailers
            .lock()
            .unwrap()
            .insert(action.instance.clone(), handle);
    }

    /// Read the whole log object into the buffer, streaming lines not seen
    /// before. `finished` marks the read as final, so an unterminated last
    /// line is streamed too.
    async fn refresh_log(&self, action: &MonitoredAction, finished: bool) -> Result<()> {
        let Some(data) = self
            .store
            .get(&self.config.invocation_folder, &action.log_name())
            .await?
        else {
            return Ok(());
        };

        let raw = String::from_utf8_lossy(&data);
        let complete = finished || raw.ends_with('\n');
        let text = raw.trim();
        if text.is_empty() {
            return Ok(());
        }

        let fetched = text
            .split('\n')
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect();
        let fresh = self.logs.update(&action.instance, fetched, complete);

        if self.config.stream_logs {
            for line in fresh {
                tracing::info!(target: "action_log", action = %action.instance, "{}", line);
            }
        }

        Ok(())
    }
}
