use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_node_start_wait() -> u64 {
    300
}

fn default_ip_poll_interval() -> u64 {
    10
}

fn default_ready_check_interval() -> u64 {
    5
}

fn default_ready_check_timeout() -> u64 {
    5
}

fn default_command_timeout() -> u64 {
    120
}

/// Wait deadlines and poll intervals, as written in an update plan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdaterSettings {
    /// How long to wait for a node to get an IP and answer a liveness probe.
    #[serde(default = "default_node_start_wait")]
    pub node_start_wait_secs: u64,
    #[serde(default = "default_ip_poll_interval")]
    pub ip_poll_interval_secs: u64,
    #[serde(default = "default_ready_check_interval")]
    pub ready_check_interval_secs: u64,
    #[serde(default = "default_ready_check_timeout")]
    pub ready_check_timeout_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub rsync_timeout_secs: u64,
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        Self {
            node_start_wait_secs: default_node_start_wait(),
            ip_poll_interval_secs: default_ip_poll_interval(),
            ready_check_interval_secs: default_ready_check_interval(),
            ready_check_timeout_secs: default_ready_check_timeout(),
            command_timeout_secs: default_command_timeout(),
            rsync_timeout_secs: default_command_timeout(),
        }
    }
}

/// Runtime form of [`UpdaterSettings`] handed to the engine and runners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub node_start_wait: Duration,
    pub ip_poll_interval: Duration,
    pub ready_check_interval: Duration,
    pub ready_check_timeout: Duration,
    pub command: Duration,
    pub rsync: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from(&UpdaterSettings::default())
    }
}

impl From<&UpdaterSettings> for Timeouts {
    fn from(settings: &UpdaterSettings) -> Self {
        Self {
            node_start_wait: Duration::from_secs(settings.node_start_wait_secs),
            ip_poll_interval: Duration::from_secs(settings.ip_poll_interval_secs),
            ready_check_interval: Duration::from_secs(settings.ready_check_interval_secs),
            ready_check_timeout: Duration::from_secs(settings.ready_check_timeout_secs),
            command: Duration::from_secs(settings.command_timeout_secs),
            rsync: Duration::from_secs(settings.rsync_timeout_secs),
        }
    }
}
