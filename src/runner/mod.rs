//! Remote command execution backends.
//!
//! Every transport implements [`CommandRunner`]: plain ssh, ssh with commands
//! injected into a docker container, and `kubectl exec` into a pod. The update
//! engine only ever talks to the trait.

pub mod docker;
pub mod kubernetes;
pub mod ssh;
pub mod ssh_options;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{AuthConfig, DockerConfig, Timeouts, Transport};
use crate::error::UpdateError;
use crate::process::{ProcessRunner, shell_quote};
use crate::provider::NodeProvider;

pub use docker::DockerCommandRunner;
pub use kubernetes::KubernetesCommandRunner;
pub use ssh::SshCommandRunner;
pub use ssh_options::SshOptions;

/// Forward `local` on this machine to `remote` on the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortForward {
    pub local: u16,
    pub remote: u16,
}

/// Where the docker backend executes a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunEnv {
    /// Host when the command itself invokes `docker`, container otherwise.
    #[default]
    Auto,
    Docker,
    Host,
}

impl RunEnv {
    /// Resolve [`RunEnv::Auto`] against the command about to run.
    pub fn resolve(self, cmd: &str) -> RunEnv {
        match self {
            RunEnv::Auto if cmd.starts_with("docker") => RunEnv::Host,
            RunEnv::Auto => RunEnv::Docker,
            other => other,
        }
    }
}

/// Per-call options for [`CommandRunner::run`]
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Connect timeout for the transport.
    pub timeout: Duration,
    /// Log the failure and return [`UpdateError::Reported`] instead of
    /// [`UpdateError::CommandFailed`].
    pub exit_on_fail: bool,
    pub port_forward: Vec<PortForward>,
    pub with_output: bool,
    /// Replaces the runner's base ssh options for this call only.
    pub ssh_options_override: Option<SshOptions>,
    pub run_env: RunEnv,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            exit_on_fail: false,
            port_forward: Vec::new(),
            with_output: false,
            ssh_options_override: None,
            run_env: RunEnv::default(),
        }
    }
}

impl RunOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn exit_on_fail(mut self) -> Self {
        self.exit_on_fail = true;
        self
    }

    pub fn with_output(mut self) -> Self {
        self.with_output = true;
        self
    }

    pub fn port_forward(mut self, forwards: Vec<PortForward>) -> Self {
        self.port_forward = forwards;
        self
    }

    pub fn ssh_options(mut self, options: SshOptions) -> Self {
        self.ssh_options_override = Some(options);
        self
    }

    pub fn run_env(mut self, run_env: RunEnv) -> Self {
        self.run_env = run_env;
        self
    }

    /// A command and a port forward cannot share one invocation.
    pub(crate) fn check_exclusive(&self, cmd: &str) -> Result<(), UpdateError> {
        if !cmd.is_empty() && !self.port_forward.is_empty() {
            return Err(UpdateError::InvalidArgument(
                "cannot forward ports and execute a command in the same invocation".into(),
            ));
        }
        Ok(())
    }
}

/// Transport to a single node.
///
/// Methods take `&mut self`: a runner is owned by exactly one update worker and
/// caches per-node state (resolved IP, container home directory).
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `cmd` on the node. An empty `cmd` with port forwards set only holds
    /// the forwards open. Returns captured stdout when `with_output` is set,
    /// an empty buffer otherwise.
    async fn run(&mut self, cmd: &str, opts: RunOptions) -> Result<Vec<u8>, UpdateError>;

    /// Copy a local path onto the node.
    async fn run_rsync_up(&mut self, source: &str, target: &str) -> Result<(), UpdateError>;

    /// Copy a node path to the local machine.
    async fn run_rsync_down(&mut self, source: &str, target: &str) -> Result<(), UpdateError>;

    /// A command a human can paste to open a shell on the node.
    fn remote_shell_command_str(&self) -> String;
}

/// Inputs for building a node's [`CommandRunner`]
#[derive(Clone)]
pub struct CommandRunnerArgs {
    pub log_prefix: String,
    pub node_id: String,
    pub auth: AuthConfig,
    pub cluster_name: String,
    pub use_internal_ip: bool,
    pub docker: Option<DockerConfig>,
    /// Used by the ssh backend for IP lookups.
    pub provider: Arc<dyn NodeProvider>,
    pub process_runner: Arc<dyn ProcessRunner>,
    pub timeouts: Timeouts,
}

/// Build the runner matching `transport`, wrapping ssh in docker when a
/// container is configured.
pub fn build_command_runner(
    transport: &Transport,
    args: CommandRunnerArgs,
) -> Box<dyn CommandRunner> {
    match transport {
        Transport::Kubernetes {
            namespace,
            rsync_helper,
        } => Box::new(KubernetesCommandRunner::new(
            args.log_prefix,
            namespace.clone(),
            args.node_id,
            rsync_helper.clone(),
            args.process_runner,
        )),
        Transport::Ssh => match args.docker.clone() {
            Some(docker) => Box::new(DockerCommandRunner::new(
                docker,
                SshCommandRunner::new(args),
            )),
            None => Box::new(SshCommandRunner::new(args)),
        },
    }
}

/// Shell prelude making non-interactive sessions behave like a login shell.
const FORCE_INTERACTIVE: &str =
    "true && source ~/.bashrc && export OMP_NUM_THREADS=1 PYTHONWARNINGS=ignore && ";

/// Wrap `cmd` in an interactive login bash.
///
/// With `quote` set the script is shell-quoted, as needed when the remote side
/// re-parses the argument vector as one string (ssh, `docker exec` through
/// ssh). `kubectl exec` passes arguments through untouched and needs it unset.
pub fn with_interactive(cmd: &str, quote: bool) -> Vec<String> {
    let script = format!("{}{}", FORCE_INTERACTIVE, cmd);
    let script = if quote { shell_quote(&script) } else { script };
    vec![
        "bash".to_string(),
        "--login".to_string(),
        "-c".to_string(),
        "-i".to_string(),
        script,
    ]
}

/// Render an argument vector for a log line, quoting the last element.
pub(crate) fn display_argv(argv: &[String]) -> String {
    match argv.split_last() {
        Some((last, rest)) if !rest.is_empty() => {
            format!("{} {}", rest.join(" "), shell_quote(last))
        }
        _ => argv.join(" "),
    }
}
