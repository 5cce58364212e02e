//! `-o` option set handed to every ssh and rsync invocation.

use std::path::Path;
use std::time::Duration;

/// ssh client options, kept in insertion order so argument vectors are stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    ssh_key: String,
    options: Vec<(String, String)>,
}

impl SshOptions {
    /// Base options for freshly provisioned nodes, without multiplexing.
    pub fn new(ssh_key: impl Into<String>) -> Self {
        let mut opts = Self {
            ssh_key: ssh_key.into(),
            options: Vec::new(),
        };
        // Nodes are new and their IPs get recycled, so host keys are never
        // recorded or checked.
        opts.set("StrictHostKeyChecking", "no");
        opts.set("UserKnownHostsFile", null_device());
        opts.set("IdentitiesOnly", "yes");
        opts.set("ExitOnForwardFailure", "yes");
        // Drop dead connections quickly instead of hanging.
        opts.set("ServerAliveInterval", "5");
        opts.set("ServerAliveCountMax", "3");
        opts
    }

    /// Base options plus connection multiplexing through `control_path`.
    pub fn with_control_path(ssh_key: impl Into<String>, control_path: &Path) -> Self {
        let mut opts = Self::new(ssh_key);
        opts.set("ControlMaster", "auto");
        opts.set(
            "ControlPath",
            format!("{}/%C", control_path.display()),
        );
        opts.set("ControlPersist", "10s");
        opts
    }

    /// Set or replace an option, keeping its original position.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.options.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.options.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn ssh_key(&self) -> &str {
        &self.ssh_key
    }

    /// Arguments for ssh with the connect timeout applied.
    pub fn to_args(&self, timeout: Duration) -> Vec<String> {
        let mut args = vec!["-i".to_string(), self.ssh_key.clone()];
        let connect_timeout = format!("{}s", timeout.as_secs().max(1));
        let options = self
            .options
            .iter()
            .filter(|(k, _)| k != "ConnectTimeout")
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(std::iter::once(("ConnectTimeout", connect_timeout.as_str())));
        for (key, value) in options {
            args.push("-o".to_string());
            args.push(format!("{}={}", key, value));
        }
        args
    }
}

fn null_device() -> &'static str {
    if cfg!(windows) { "NUL" } else { "/dev/null" }
}
