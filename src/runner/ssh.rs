//! Direct ssh backend.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::paths;
use crate::config::{AuthConfig, Timeouts};
use crate::error::UpdateError;
use crate::log_timer::LogTimer;
use crate::process::{ProcessRunner, shell_quote};
use crate::provider::NodeProvider;

use super::{
    CommandRunner, CommandRunnerArgs, RunOptions, SshOptions, display_argv, with_interactive,
};

/// Keeps a forward-only session open. `-N` is not used because some ssh
/// versions still start a shell with it when `ControlMaster` is set.
const HOLD_OPEN_CMD: &str = "while true; do sleep 86400; done";

pub struct SshCommandRunner {
    log_prefix: String,
    node_id: String,
    provider: Arc<dyn NodeProvider>,
    process_runner: Arc<dyn ProcessRunner>,
    auth: AuthConfig,
    use_internal_ip: bool,
    control_path: PathBuf,
    base_options: SshOptions,
    timeouts: Timeouts,
    /// Resolved lazily; a node's IP is assumed not to change once assigned.
    ssh_ip: Option<String>,
}

impl SshCommandRunner {
    pub fn new(args: CommandRunnerArgs) -> Self {
        let control_path = paths::ssh_control_path(&args.cluster_name, &paths::local_user());
        let base_options =
            SshOptions::with_control_path(&args.auth.ssh_private_key, &control_path);
        Self {
            log_prefix: args.log_prefix,
            node_id: args.node_id,
            provider: args.provider,
            process_runner: args.process_runner,
            auth: args.auth,
            use_internal_ip: args.use_internal_ip,
            control_path,
            base_options,
            timeouts: args.timeouts,
            ssh_ip: None,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn ssh_ip(&self) -> Option<&str> {
        self.ssh_ip.as_deref()
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn control_path(&self) -> &std::path::Path {
        &self.control_path
    }

    /// Poll the provider until the node has an IP, is terminated, or the
    /// bootstrap deadline passes.
    async fn wait_for_ip(&self) -> Result<Option<String>, UpdateError> {
        let deadline = tokio::time::Instant::now() + self.timeouts.node_start_wait;
        while tokio::time::Instant::now() < deadline
            && !self.provider.is_terminated(&self.node_id).await?
        {
            tracing::info!("{}Waiting for IP...", self.log_prefix);
            let ip = self
                .provider
                .node_ip(&self.node_id, self.use_internal_ip)
                .await?;
            if ip.is_some() {
                return Ok(ip);
            }
            tokio::time::sleep(self.timeouts.ip_poll_interval).await;
        }
        Ok(None)
    }

    async fn ensure_ip(&mut self) -> Result<String, UpdateError> {
        if let Some(ip) = &self.ssh_ip {
            return Ok(ip.clone());
        }

        let timer = LogTimer::new(format!("{}Got IP", self.log_prefix));
        let ip = self
            .wait_for_ip()
            .await?
            .ok_or_else(|| UpdateError::NodeUnreachable {
                node_id: self.node_id.clone(),
                reason: "unable to find IP of node".into(),
            })?;
        timer.succeeded();

        // Must exist before the first ssh call so the master connection can
        // create its socket.
        if let Err(e) = paths::create_private_dir(&self.control_path) {
            tracing::warn!(
                "{}Could not create ssh control directory {}: {}",
                self.log_prefix,
                self.control_path.display(),
                e
            );
        }

        self.ssh_ip = Some(ip.clone());
        Ok(ip)
    }

    fn rsync_shell(&self) -> String {
        let mut rsh = vec!["ssh".to_string()];
        rsh.extend(
            self.base_options
                .to_args(self.timeouts.rsync)
                .iter()
                .map(|a| shell_quote(a)),
        );
        rsh.join(" ")
    }

    async fn rsync(&mut self, source: String, target: String) -> Result<(), UpdateError> {
        let argv = vec![
            "rsync".to_string(),
            "--rsh".to_string(),
            self.rsync_shell(),
            "-avz".to_string(),
            source,
            target,
        ];
        self.process_runner.check_call(&argv).await?;
        Ok(())
    }

    fn remote(&self, ip: &str, path: &str) -> String {
        format!("{}@{}:{}", self.auth.ssh_user, ip, path)
    }
}

#[async_trait]
impl CommandRunner for SshCommandRunner {
    async fn run(&mut self, cmd: &str, opts: RunOptions) -> Result<Vec<u8>, UpdateError> {
        opts.check_exclusive(cmd)?;
        let ip = self.ensure_ip().await?;

        let ssh_options = opts
            .ssh_options_override
            .as_ref()
            .unwrap_or(&self.base_options);

        let mut argv = vec!["ssh".to_string(), "-tt".to_string()];
        for fwd in &opts.port_forward {
            tracing::info!(
                "{}Forwarding {} -> localhost:{}",
                self.log_prefix,
                fwd.local,
                fwd.remote
            );
            argv.push("-L".to_string());
            argv.push(format!("{}:localhost:{}", fwd.local, fwd.remote));
        }
        argv.extend(ssh_options.to_args(opts.timeout));
        argv.push(format!("{}@{}", self.auth.ssh_user, ip));
        if cmd.is_empty() {
            argv.push(shell_quote(HOLD_OPEN_CMD));
        } else {
            argv.extend(with_interactive(cmd, true));
            tracing::info!("{}Running {}", self.log_prefix, argv.join(" "));
        }

        let result = if opts.with_output {
            self.process_runner.check_output(&argv).await
        } else {
            self.process_runner.check_call(&argv).await.map(|()| Vec::new())
        };

        match result {
            Ok(output) => Ok(output),
            Err(e) if opts.exit_on_fail => {
                let command = display_argv(&argv);
                let e = UpdateError::from(e);
                tracing::error!(
                    node_id = %self.node_id,
                    exit_code = e.exit_code(),
                    "{}Command failed: \n\n  {}\n ({})",
                    self.log_prefix,
                    command,
                    e
                );
                Err(UpdateError::Reported { command })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn run_rsync_up(&mut self, source: &str, target: &str) -> Result<(), UpdateError> {
        let ip = self.ensure_ip().await?;
        let target = self.remote(&ip, target);
        self.rsync(source.to_string(), target).await
    }

    async fn run_rsync_down(&mut self, source: &str, target: &str) -> Result<(), UpdateError> {
        let ip = self.ensure_ip().await?;
        let source = self.remote(&ip, source);
        self.rsync(source, target.to_string()).await
    }

    fn remote_shell_command_str(&self) -> String {
        format!(
            "ssh -o IdentitiesOnly=yes -i {} {}@{}\n",
            self.auth.ssh_private_key,
            self.auth.ssh_user,
            self.ssh_ip.as_deref().unwrap_or("<unresolved>")
        )
    }
}
