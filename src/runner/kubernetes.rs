//! `kubectl` backend for nodes that are pods.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::UpdateError;
use crate::process::ProcessRunner;

use super::{CommandRunner, RunOptions, display_argv, with_interactive};

/// Home directory assumed inside pods.
const POD_HOME: &str = "/root";

pub struct KubernetesCommandRunner {
    log_prefix: String,
    namespace: String,
    node_id: String,
    rsync_helper: String,
    process_runner: Arc<dyn ProcessRunner>,
}

impl KubernetesCommandRunner {
    pub fn new(
        log_prefix: String,
        namespace: String,
        node_id: String,
        rsync_helper: String,
        process_runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            log_prefix,
            namespace,
            node_id,
            rsync_helper,
            process_runner,
        }
    }

    fn kubectl(&self) -> Vec<String> {
        vec!["kubectl".to_string(), "-n".to_string(), self.namespace.clone()]
    }

    /// `pod@namespace:path`, the address form the rsync helper understands.
    fn rsync_remote(&self, path: &str) -> String {
        format!("{}@{}:{}", self.node_id, self.namespace, path)
    }

    /// `namespace/pod:path`, the address form `kubectl cp` understands.
    fn cp_remote(&self, path: &str) -> String {
        format!("{}/{}:{}", self.namespace, self.node_id, path)
    }

    async fn port_forward(&self, opts: &RunOptions) -> Result<Vec<u8>, UpdateError> {
        let mut argv = self.kubectl();
        argv.push("port-forward".to_string());
        argv.push(self.node_id.clone());
        argv.extend(
            opts.port_forward
                .iter()
                .map(|fwd| format!("{}:{}", fwd.local, fwd.remote)),
        );
        tracing::info!("{}Port forwarding with: {}", self.log_prefix, argv.join(" "));

        // A healthy forward never returns; getting past this call means the
        // forward died (usually because the local port could not be bound).
        let err = match self.process_runner.check_call(&argv).await {
            Ok(()) => UpdateError::CommandFailed {
                command: format!("{} exited", argv.join(" ")),
                exit_code: -1,
            },
            Err(e) => e.into(),
        };
        Err(self.failure(&argv, err, opts.exit_on_fail))
    }

    /// Turn a failed invocation into the error handed back to the caller,
    /// logging it first when the caller asked for `exit_on_fail`.
    fn failure(&self, argv: &[String], err: UpdateError, exit_on_fail: bool) -> UpdateError {
        if !exit_on_fail {
            return err;
        }
        let command = display_argv(argv);
        tracing::error!(
            node_id = %self.node_id,
            exit_code = err.exit_code(),
            "{}Command failed: \n\n  {}\n ({})",
            self.log_prefix,
            command,
            err
        );
        UpdateError::Reported { command }
    }

    /// Sync with the helper script, falling back to `kubectl cp` on any error.
    async fn transfer(
        &self,
        direction: Direction,
        local: &str,
        remote: &str,
    ) -> Result<(), UpdateError> {
        let (rsync_from, rsync_to, cp_from, cp_to) = match direction {
            Direction::Up => (
                local.to_string(),
                self.rsync_remote(remote),
                local.to_string(),
                self.cp_remote(remote),
            ),
            Direction::Down => (
                self.rsync_remote(remote),
                local.to_string(),
                self.cp_remote(remote),
                local.to_string(),
            ),
        };

        let rsync = vec![
            self.rsync_helper.clone(),
            "-avz".to_string(),
            rsync_from.clone(),
            rsync_to.clone(),
        ];
        let primary = match self.process_runner.check_call(&rsync).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        tracing::warn!(
            "{}rsync failed: '{}'. Falling back to 'kubectl cp'",
            self.log_prefix,
            primary
        );

        let mut cp = self.kubectl();
        cp.extend(["cp".to_string(), cp_from, cp_to]);
        self.process_runner
            .check_call(&cp)
            .await
            .map_err(|fallback| UpdateError::TransferFailed {
                from: rsync_from,
                to: rsync_to,
                detail: format!("rsync: {}; kubectl cp: {}", primary, fallback),
            })
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

/// Rewrite a leading `~` to the pod's home directory.
fn expand_pod_home(path: &str) -> String {
    match path.strip_prefix('~') {
        Some(rest) => format!("{}{}", POD_HOME, rest),
        None => path.to_string(),
    }
}

#[async_trait]
impl CommandRunner for KubernetesCommandRunner {
    async fn run(&mut self, cmd: &str, opts: RunOptions) -> Result<Vec<u8>, UpdateError> {
        opts.check_exclusive(cmd)?;
        if !opts.port_forward.is_empty() {
            return self.port_forward(&opts).await;
        }

        let mut argv = self.kubectl();
        argv.extend([
            "exec".to_string(),
            "-it".to_string(),
            self.node_id.clone(),
            "--".to_string(),
        ]);
        argv.extend(with_interactive(cmd, false));
        tracing::info!("{}Running {}", self.log_prefix, display_argv(&argv));

        let result = if opts.with_output {
            self.process_runner.check_output(&argv).await
        } else {
            self.process_runner.check_call(&argv).await.map(|()| Vec::new())
        };

        result.map_err(|e| self.failure(&argv, e.into(), opts.exit_on_fail))
    }

    async fn run_rsync_up(&mut self, source: &str, target: &str) -> Result<(), UpdateError> {
        let target = expand_pod_home(target);
        self.transfer(Direction::Up, source, &target).await
    }

    async fn run_rsync_down(&mut self, source: &str, target: &str) -> Result<(), UpdateError> {
        let source = expand_pod_home(source);
        self.transfer(Direction::Down, target, &source).await
    }

    fn remote_shell_command_str(&self) -> String {
        format!("{} exec -it {} bash", self.kubectl().join(" "), self.node_id)
    }
}
