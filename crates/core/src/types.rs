use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default root folder that invocation logs are written under
pub const DEFAULT_LOG_FOLDER: &str = "FaaSrLog";

/// Compute server type whose runners can be backed by a provisioned VM
pub const GITHUB_ACTIONS: &str = "GitHubActions";

/// A workflow definition document. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub workflow_name: String,

    /// Name of the designated start action
    pub function_invoke: String,

    pub action_list: BTreeMap<String, ActionConfig>,

    #[serde(default)]
    pub compute_servers: BTreeMap<String, ComputeServer>,

    #[serde(default)]
    pub data_stores: BTreeMap<String, DataStore>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_data_store: Option<String>,

    #[serde(rename = "VMConfig", default, skip_serializing_if = "Option::is_none")]
    pub vm_config: Option<VmSettings>,

    #[serde(rename = "InvocationID", default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_timestamp: Option<String>,

    #[serde(alias = "FaaSrLog", default, skip_serializing_if = "Option::is_none")]
    pub log_folder: Option<String>,
}

impl WorkflowDefinition {
    /// Parse a definition from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse workflow definition")
    }

    /// Load a definition from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file {}", path.display()))?;
        Self::from_json(&content)
    }

    pub fn action(&self, name: &str) -> Option<&ActionConfig> {
        self.action_list.get(name)
    }

    /// Compute server bound to an action, if both exist
    pub fn server_for(&self, action: &str) -> Option<&ComputeServer> {
        let server = &self.action(action)?.faas_server;
        self.compute_servers.get(server)
    }

    /// Name of the data store actions write logs to
    pub fn default_store_name(&self) -> &str {
        self.default_data_store.as_deref().unwrap_or("My_S3_Bucket")
    }

    pub fn default_store(&self) -> Option<&DataStore> {
        self.data_stores.get(self.default_store_name())
    }

    /// Folder holding the log objects and completion markers of this invocation
    pub fn invocation_folder(&self) -> Option<String> {
        let root = self.log_folder.as_deref().unwrap_or(DEFAULT_LOG_FOLDER);
        self.invocation_id
            .as_ref()
            .map(|id| format!("{}/{}", root.trim_end_matches('/'), id))
    }
}

/// One entry of the action table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,

    #[serde(rename = "FaaSServer", default)]
    pub faas_server: String,

    #[serde(default)]
    pub invoke_next: InvokeNext,

    #[serde(rename = "RequiresVM", default)]
    pub requires_vm: bool,
}

/// Successors of an action, as written in the definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InvokeNext {
    Single(String),
    List(Vec<InvokeEntry>),
    Conditional(ConditionalInvoke),
}

impl Default for InvokeNext {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InvokeEntry {
    Name(String),
    Conditional(ConditionalInvoke),
}

/// Branches taken depending on the boolean result of an action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalInvoke {
    #[serde(rename = "True", default)]
    pub on_true: Vec<String>,
    #[serde(rename = "False", default)]
    pub on_false: Vec<String>,
}

impl InvokeNext {
    /// Every successor this action could invoke, both branch outcomes included
    pub fn targets(&self) -> Vec<InvokeTarget> {
        let names: Vec<&String> = match self {
            InvokeNext::Single(name) => vec![name],
            InvokeNext::List(entries) => entries
                .iter()
                .flat_map(|entry| match entry {
                    InvokeEntry::Name(name) => vec![name],
                    InvokeEntry::Conditional(branches) => branches.names().collect(),
                })
                .collect(),
            InvokeNext::Conditional(branches) => branches.names().collect(),
        };

        names
            .into_iter()
            .filter(|name| !name.trim().is_empty())
            .map(|name| InvokeTarget::parse(name))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.targets().is_empty()
    }
}

impl ConditionalInvoke {
    fn names(&self) -> impl Iterator<Item = &String> {
        self.on_true.iter().chain(self.on_false.iter())
    }
}

/// A successor reference, optionally ranked as `name(N)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvokeTarget {
    pub action: String,
    pub rank: u32,
}

impl InvokeTarget {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(open) = raw.find('(') {
            if let Some(digits) = raw[open + 1..].strip_suffix(')') {
                if let Ok(rank) = digits.trim().parse::<u32>() {
                    return Self {
                        action: raw[..open].to_string(),
                        rank: rank.max(1),
                    };
                }
            }
        }
        Self {
            action: raw.to_string(),
            rank: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ComputeServer {
    #[serde(rename = "FaaSType", default)]
    pub faas_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_repo_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DataStore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    pub bucket: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// VM section of the definition. Credentials never live here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VmSettings {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub provider: String,

    #[serde(default)]
    pub instance_id: String,

    #[serde(default)]
    pub region: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_name: Option<String>,
}
