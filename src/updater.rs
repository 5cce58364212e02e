//! The per-node update state machine.
//!
//! A [`NodeUpdater`] takes one node from "just booted" to "running the worker
//! process with the desired configuration":
//!
//! 1. tag `waiting-for-ssh` and wait until the node answers a liveness probe
//! 2. unless the node already carries the target runtime hash, tag
//!    `syncing-files` and push the file mounts, then tag `setting-up` and run
//!    the initialization and setup commands
//! 3. run the start commands (always)
//! 4. tag `up-to-date` together with the new runtime hash
//!
//! Any failure tags the node `update-failed`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::config::paths::expand_tilde;
use crate::config::{AuthConfig, DockerConfig, Timeouts};
use crate::error::UpdateError;
use crate::log_timer::LogTimer;
use crate::process::ProcessRunner;
use crate::provider::NodeProvider;
use crate::runner::{CommandRunner, CommandRunnerArgs, RunEnv, RunOptions, SshOptions};
use crate::status::{NodeStatus, TAG_NODE_STATUS, TAG_RUNTIME_CONFIG};

/// Command used to check that a node accepts remote commands.
const LIVENESS_CMD: &str = "uptime";

/// What a node should look like once updated
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub cluster_name: String,
    pub runtime_hash: String,
    pub auth: AuthConfig,
    pub use_internal_ip: bool,
    pub docker: Option<DockerConfig>,
    /// Remote path -> local path.
    pub file_mounts: BTreeMap<String, String>,
    pub initialization_commands: Vec<String>,
    pub setup_commands: Vec<String>,
    pub start_commands: Vec<String>,
}

pub struct NodeUpdater {
    node_id: String,
    log_prefix: String,
    provider: Arc<dyn NodeProvider>,
    runner: Box<dyn CommandRunner>,
    file_mounts: BTreeMap<String, PathBuf>,
    initialization_commands: Vec<String>,
    setup_commands: Vec<String>,
    start_commands: Vec<String>,
    runtime_hash: String,
    auth: AuthConfig,
    timeouts: Timeouts,
}

impl NodeUpdater {
    pub fn new(
        node_id: impl Into<String>,
        provider: Arc<dyn NodeProvider>,
        request: UpdateRequest,
        timeouts: Timeouts,
        process_runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        let node_id = node_id.into();
        let log_prefix = format!("NodeUpdater: {}: ", node_id);
        let runner = provider.command_runner(CommandRunnerArgs {
            log_prefix: log_prefix.clone(),
            node_id: node_id.clone(),
            auth: request.auth.clone(),
            cluster_name: request.cluster_name.clone(),
            use_internal_ip: request.use_internal_ip,
            docker: request.docker.clone(),
            provider: provider.clone(),
            process_runner,
            timeouts,
        });
        let file_mounts = request
            .file_mounts
            .into_iter()
            .map(|(remote, local)| (remote, expand_tilde(&local)))
            .collect();

        Self {
            node_id,
            log_prefix,
            provider,
            runner,
            file_mounts,
            initialization_commands: request.initialization_commands,
            setup_commands: request.setup_commands,
            start_commands: request.start_commands,
            runtime_hash: request.runtime_hash,
            auth: request.auth,
            timeouts,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn remote_shell_command_str(&self) -> String {
        self.runner.remote_shell_command_str()
    }

    /// Run the full update, recording the outcome in the node's tags.
    pub async fn run(&mut self) -> Result<(), UpdateError> {
        info!(node_id = %self.node_id, "{}Updating to {}", self.log_prefix, self.runtime_hash);
        let timer = LogTimer::new(format!(
            "{}Applied config {}",
            self.log_prefix, self.runtime_hash
        ));

        if let Err(e) = self.do_update().await {
            drop(timer);
            error!(
                node_id = %self.node_id,
                exit_code = e.exit_code(),
                "{}Error executing: {}",
                self.log_prefix,
                e
            );
            if let Err(tag_err) = self.set_status(NodeStatus::UpdateFailed).await {
                error!("{}Could not record failed status: {}", self.log_prefix, tag_err);
            }
            return Err(e);
        }

        // Status and hash go out in one call so no reader sees "up-to-date"
        // next to the previous hash.
        let tags = HashMap::from([
            (
                TAG_NODE_STATUS.to_string(),
                NodeStatus::UpToDate.to_string(),
            ),
            (TAG_RUNTIME_CONFIG.to_string(), self.runtime_hash.clone()),
        ]);
        self.provider.set_node_tags(&self.node_id, tags).await?;
        timer.succeeded();
        Ok(())
    }

    async fn do_update(&mut self) -> Result<(), UpdateError> {
        self.set_status(NodeStatus::WaitingForSsh).await?;
        self.wait_ready().await?;

        let node_tags = self.provider.node_tags(&self.node_id).await?;
        debug!("{}Node tags: {:?}", self.log_prefix, node_tags);

        if node_tags.get(TAG_RUNTIME_CONFIG) == Some(&self.runtime_hash) {
            info!(
                "{}{} already up-to-date, skip to start commands",
                self.log_prefix, self.node_id
            );
        } else {
            self.set_status(NodeStatus::SyncingFiles).await?;
            self.sync_file_mounts().await?;

            self.set_status(NodeStatus::SettingUp).await?;
            // Initialization runs on the host with only the base key, before
            // any multiplexed session exists.
            let init_opts = RunOptions::default()
                .timeout(self.timeouts.command)
                .ssh_options(SshOptions::new(&self.auth.ssh_private_key))
                .run_env(RunEnv::Host);
            run_commands(
                self.runner.as_mut(),
                &format!("{}Initialization commands", self.log_prefix),
                &self.initialization_commands,
                init_opts,
            )
            .await?;

            run_commands(
                self.runner.as_mut(),
                &format!("{}Setup commands", self.log_prefix),
                &self.setup_commands,
                RunOptions::default().timeout(self.timeouts.command),
            )
            .await?;
        }

        // The worker process does not survive an update, so it is restarted
        // even when nothing else changed.
        run_commands(
            self.runner.as_mut(),
            &format!("{}Start commands", self.log_prefix),
            &self.start_commands,
            RunOptions::default().timeout(self.timeouts.command),
        )
        .await
    }

    async fn set_status(&self, status: NodeStatus) -> Result<(), UpdateError> {
        debug!(node_id = %self.node_id, %status, "{}Status -> {}", self.log_prefix, status);
        let tags = HashMap::from([(TAG_NODE_STATUS.to_string(), status.to_string())]);
        self.provider.set_node_tags(&self.node_id, tags).await?;
        Ok(())
    }

    /// Probe the node until it runs a command, the node is terminated, or the
    /// start deadline passes.
    async fn wait_ready(&mut self) -> Result<(), UpdateError> {
        let timer = LogTimer::new(format!("{}Got remote shell", self.log_prefix));
        info!("{}Waiting for remote shell...", self.log_prefix);

        let deadline = Instant::now() + self.timeouts.node_start_wait;
        let mut terminated = false;
        while Instant::now() < deadline {
            if self.provider.is_terminated(&self.node_id).await? {
                terminated = true;
                break;
            }
            debug!("{}Waiting for remote shell...", self.log_prefix);

            let probe = RunOptions::default()
                .timeout(self.timeouts.ready_check_timeout)
                .run_env(RunEnv::Host);
            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt =
                tokio::time::timeout(remaining, self.runner.run(LIVENESS_CMD, probe)).await;

            match attempt {
                Ok(Ok(_)) => {
                    debug!("{}Uptime succeeded.", self.log_prefix);
                    timer.succeeded();
                    return Ok(());
                }
                Ok(Err(e)) => {
                    debug!("{}Node not up, retrying: {}", self.log_prefix, e);
                }
                Err(_) => {
                    debug!("{}Liveness probe timed out", self.log_prefix);
                }
            }
            tokio::time::sleep(self.timeouts.ready_check_interval).await;
        }

        let reason = if terminated {
            "node was terminated while waiting for it"
        } else {
            "unable to connect to node before the start deadline"
        };
        Err(UpdateError::NodeUnreachable {
            node_id: self.node_id.clone(),
            reason: reason.to_string(),
        })
    }

    async fn sync_file_mounts(&mut self) -> Result<(), UpdateError> {
        let mounts: Vec<(String, PathBuf)> = self
            .file_mounts
            .iter()
            .map(|(remote, local)| (remote.clone(), local.clone()))
            .collect();

        for (remote, local) in mounts {
            if !local.exists() {
                return Err(UpdateError::MissingSource(local));
            }
            let (local, remote) = normalize_mount(&local, &remote);

            let timer = LogTimer::new(format!(
                "{}Synced {} to {}",
                self.log_prefix, local, remote
            ));
            if let Some(parent) = remote_parent(&remote) {
                let opts = RunOptions::default()
                    .timeout(self.timeouts.command)
                    .run_env(RunEnv::Host);
                self.runner
                    .run(&format!("mkdir -p {}", parent), opts)
                    .await?;
            }
            self.rsync_up(&local, &remote).await?;
            timer.succeeded();
        }
        Ok(())
    }

    /// Push a local path onto the node.
    pub async fn rsync_up(&mut self, source: &str, target: &str) -> Result<(), UpdateError> {
        info!("{}Syncing {} to {}...", self.log_prefix, source, target);
        self.runner.run_rsync_up(source, target).await
    }

    /// Pull a node path to the local machine.
    pub async fn rsync_down(&mut self, source: &str, target: &str) -> Result<(), UpdateError> {
        info!("{}Syncing {} from {}...", self.log_prefix, source, target);
        self.runner.run_rsync_down(source, target).await
    }
}

async fn run_commands(
    runner: &mut dyn CommandRunner,
    phase: &str,
    commands: &[String],
    opts: RunOptions,
) -> Result<(), UpdateError> {
    let timer = LogTimer::new(phase).with_status();
    for cmd in commands {
        runner.run(cmd, opts.clone()).await?;
    }
    timer.succeeded();
    Ok(())
}

/// Slash-terminate both sides of a directory mount so rsync copies the
/// directory's contents rather than the directory itself.
pub fn normalize_mount(local: &Path, remote: &str) -> (String, String) {
    let mut local_str = local.to_string_lossy().into_owned();
    let mut remote_str = remote.to_string();
    if local.is_dir() {
        if !local_str.ends_with('/') {
            local_str.push('/');
        }
        if !remote_str.ends_with('/') {
            remote_str.push('/');
        }
    }
    (local_str, remote_str)
}

/// Parent directory of a remote path, `None` for a bare file name.
fn remote_parent(path: &str) -> Option<String> {
    let idx = path.rfind('/')?;
    let head = &path[..=idx];
    let trimmed = head.trim_end_matches('/');
    let parent = if trimmed.is_empty() { head } else { trimmed };
    Some(parent.to_string())
}
