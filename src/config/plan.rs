use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::updater::UpdateRequest;

use super::settings::UpdaterSettings;

/// Credentials used to reach nodes over ssh
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthConfig {
    pub ssh_user: String,
    pub ssh_private_key: String,
}

/// Container the node's commands run in, when the cluster is dockerized
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DockerConfig {
    pub container_name: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_rsync_helper() -> String {
    "kubectl-rsync.sh".to_string()
}

/// How commands reach the nodes
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transport {
    #[default]
    Ssh,
    Kubernetes {
        #[serde(default = "default_namespace")]
        namespace: String,
        /// rsync wrapper that tunnels through `kubectl exec`.
        #[serde(default = "default_rsync_helper")]
        rsync_helper: String,
    },
}

/// A node known to the static provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeEntry {
    pub id: String,
    #[serde(default)]
    pub external_ip: Option<String>,
    #[serde(default)]
    pub internal_ip: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Everything needed to update a set of nodes, loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePlan {
    pub cluster_name: String,
    pub runtime_hash: String,
    pub auth: AuthConfig,
    #[serde(default)]
    pub use_internal_ip: bool,
    #[serde(default)]
    pub docker: Option<DockerConfig>,
    #[serde(default)]
    pub transport: Transport,
    /// Remote path -> local path.
    #[serde(default)]
    pub file_mounts: BTreeMap<String, String>,
    #[serde(default)]
    pub initialization_commands: Vec<String>,
    #[serde(default)]
    pub setup_commands: Vec<String>,
    #[serde(default)]
    pub start_commands: Vec<String>,
    #[serde(default)]
    pub settings: UpdaterSettings,
    #[serde(default)]
    pub nodes: Vec<NodeEntry>,
}

impl UpdatePlan {
    /// Load a plan from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let plan: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        if plan.nodes.is_empty() {
            return Err(ConfigError::NoNodes);
        }
        Ok(plan)
    }

    /// The per-node update request shared by every node in the plan.
    pub fn update_request(&self) -> UpdateRequest {
        UpdateRequest {
            cluster_name: self.cluster_name.clone(),
            runtime_hash: self.runtime_hash.clone(),
            auth: self.auth.clone(),
            use_internal_ip: self.use_internal_ip,
            docker: self.docker.clone(),
            file_mounts: self.file_mounts.clone(),
            initialization_commands: self.initialization_commands.clone(),
            setup_commands: self.setup_commands.clone(),
            start_commands: self.start_commands.clone(),
        }
    }
}
