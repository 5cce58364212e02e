//! Node status values and the tag keys they are stored under.

use std::fmt;
use std::str::FromStr;

/// Tag holding the node's [`NodeStatus`].
pub const TAG_NODE_STATUS: &str = "node-status";

/// Tag holding the runtime config hash last applied to the node.
pub const TAG_RUNTIME_CONFIG: &str = "runtime-config";

/// Where a node is in its update sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    WaitingForSsh,
    SyncingFiles,
    SettingUp,
    UpToDate,
    UpdateFailed,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::WaitingForSsh => "waiting-for-ssh",
            NodeStatus::SyncingFiles => "syncing-files",
            NodeStatus::SettingUp => "setting-up",
            NodeStatus::UpToDate => "up-to-date",
            NodeStatus::UpdateFailed => "update-failed",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting-for-ssh" => Ok(NodeStatus::WaitingForSsh),
            "syncing-files" => Ok(NodeStatus::SyncingFiles),
            "setting-up" => Ok(NodeStatus::SettingUp),
            "up-to-date" => Ok(NodeStatus::UpToDate),
            "update-failed" => Ok(NodeStatus::UpdateFailed),
            other => Err(format!("unknown node status '{}'", other)),
        }
    }
}
