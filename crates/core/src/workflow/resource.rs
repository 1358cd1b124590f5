use super::dag::WorkflowDag;
use crate::types::{WorkflowDefinition, GITHUB_ACTIONS};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Which actions need the provisioned VM, and where they sit in the graph.
///
/// First/last classification is a whole-graph structural check: an action
/// is the first VM user unless some *other* VM-requiring action has no
/// predecessors at all. It does not look at reachability from the start
/// action, so disjoint branches can be misclassified. The results are
/// computed once per DAG build, since the definition never changes.
#[derive(Debug, Clone)]
pub struct ResourceIndex {
    dag: Arc<WorkflowDag>,
    requires: BTreeSet<String>,
    first_users: BTreeSet<String>,
    last_users: BTreeSet<String>,
    workflow_requires: bool,
}

impl ResourceIndex {
    pub fn new(definition: &WorkflowDefinition, dag: Arc<WorkflowDag>) -> Self {
        let requires: BTreeSet<String> = definition
            .action_list
            .iter()
            .filter(|(name, action)| action.requires_vm && dag.contains(name))
            .map(|(name, _)| name.clone())
            .collect();

        let structurally_first: BTreeSet<&String> = requires
            .iter()
            .filter(|name| dag.position(name).map(|p| p.is_first).unwrap_or(false))
            .collect();
        let structurally_last: BTreeSet<&String> = requires
            .iter()
            .filter(|name| dag.position(name).map(|p| p.is_last).unwrap_or(false))
            .collect();

        let first_users = requires
            .iter()
            .filter(|name| {
                structurally_first.contains(name)
                    || !structurally_first.iter().any(|other| *other != *name)
            })
            .cloned()
            .collect();
        let last_users = requires
            .iter()
            .filter(|name| {
                structurally_last.contains(name)
                    || !structurally_last.iter().any(|other| *other != *name)
            })
            .cloned()
            .collect();

        let start_on_github = definition
            .server_for(&definition.function_invoke)
            .map(|server| server.faas_type == GITHUB_ACTIONS)
            .unwrap_or(false);
        let workflow_requires =
            start_on_github && definition.vm_config.is_some() && !requires.is_empty();

        Self {
            dag,
            requires,
            first_users,
            last_users,
            workflow_requires,
        }
    }

    pub fn dag(&self) -> &WorkflowDag {
        &self.dag
    }

    /// Direct lookup of the action's flag; unknown actions never require it
    pub fn requires_resource(&self, action: &str) -> bool {
        self.requires.contains(action)
    }

    pub fn resource_users(&self) -> impl Iterator<Item = &str> {
        self.requires.iter().map(String::as_str)
    }

    pub fn is_first_resource_user(&self, action: &str) -> bool {
        self.first_users.contains(action)
    }

    pub fn is_last_resource_user(&self, action: &str) -> bool {
        self.last_users.contains(action)
    }

    /// True iff any immediate successor requires the VM
    pub fn next_requires_resource(&self, action: &str) -> bool {
        self.next_resource_users(action).next().is_some()
    }

    /// Immediate successors that require the VM
    pub fn next_resource_users<'a>(&'a self, action: &str) -> impl Iterator<Item = &'a str> {
        self.dag
            .successors(action)
            .ok()
            .into_iter()
            .flatten()
            .filter(|name| self.requires.contains(*name))
            .map(String::as_str)
    }

    /// The workflow runs on GitHub Actions, has a VM section and at least
    /// one action needs the VM
    pub fn workflow_requires_resource(&self) -> bool {
        self.workflow_requires
    }
}
