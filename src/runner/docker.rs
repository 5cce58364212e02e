//! docker-over-ssh backend.
//!
//! Holds an [`SshCommandRunner`] and rewrites commands so they execute inside
//! the node's container. Files are synced to the host first and then copied
//! into the container with `docker cp`.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::{DockerConfig, Timeouts};
use crate::error::UpdateError;
use crate::process::shell_quote;

use super::{CommandRunner, RunEnv, RunOptions, SshCommandRunner};

const NOT_PRESENT: &str = "not_present";

const SHUTDOWN_CMD: &str = "; sudo shutdown -h now";

const DOCKER_INSTALL_HINT: &[&str] = &[
    "curl -fsSL https://get.docker.com -o get-docker.sh",
    "sudo sh get-docker.sh",
    "sudo usermod -aG docker $USER",
    "sudo systemctl restart docker -f",
];

/// State of the node's container as seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Absent,
    Stopped,
    Running,
}

impl ContainerStatus {
    /// Parse the output of [`check_docker_running_cmd`].
    pub fn from_inspect_output(output: &str) -> Self {
        let output = output.trim();
        if output.contains(NOT_PRESENT) {
            ContainerStatus::Absent
        } else if output.to_lowercase().contains("true") {
            ContainerStatus::Running
        } else {
            ContainerStatus::Stopped
        }
    }
}

/// Prints `true`/`false` for an existing container, fails otherwise.
pub fn check_docker_running_cmd(container_name: &str) -> String {
    format!("docker inspect -f '{{{{.State.Running}}}}' {}", container_name)
}

/// Wrap `cmd` so it runs in `container_name` through bash.
pub fn with_docker_exec(cmd: &str, container_name: &str, interactive: bool) -> String {
    format!(
        "docker exec {}{} /bin/bash -c {}",
        if interactive { "-it " } else { "" },
        container_name,
        shell_quote(cmd)
    )
}

pub struct DockerCommandRunner {
    ssh: SshCommandRunner,
    container_name: String,
    /// `HOME` inside the container, looked up on first use.
    home_dir: Option<String>,
    shutdown: bool,
    docker_checked: bool,
    timeouts: Timeouts,
}

impl DockerCommandRunner {
    pub fn new(config: DockerConfig, ssh: SshCommandRunner) -> Self {
        let timeouts = *ssh.timeouts();
        Self {
            ssh,
            container_name: config.container_name,
            home_dir: None,
            shutdown: false,
            docker_checked: false,
            timeouts,
        }
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Power the node off after the next command finishes. Applies to that one
    /// command only.
    pub fn shutdown_after_next_cmd(&mut self) {
        self.shutdown = true;
    }

    /// Options for the runner's own bookkeeping commands on the host.
    fn host_opts(&self) -> RunOptions {
        RunOptions::default()
            .timeout(self.timeouts.command)
            .run_env(RunEnv::Host)
    }

    async fn host(&mut self, cmd: &str, opts: RunOptions) -> Result<Vec<u8>, UpdateError> {
        self.ssh.run(cmd, opts).await
    }

    /// Log install instructions once if the host has no docker client.
    ///
    /// Runs with the caller's connect timeout and counts as done only once the
    /// host has answered.
    async fn check_docker_installed(&mut self, timeout: Duration) {
        if self.docker_checked {
            return;
        }
        let check = RunOptions::default().timeout(timeout).run_env(RunEnv::Host);
        let result = self.host("command -v docker", check).await;
        match result {
            Ok(_) => self.docker_checked = true,
            // ssh exits 255 on connection errors; the host was not checked.
            Err(e)
                if matches!(e, UpdateError::NodeUnreachable { .. })
                    || e.exit_code() == Some(255) => {}
            Err(_) => {
                self.docker_checked = true;
                tracing::error!(
                    "Docker not installed. You can install Docker by adding the following \
                     commands to 'initialization_commands':\n{}",
                    DOCKER_INSTALL_HINT.join("\n")
                );
            }
        }
    }

    pub async fn check_container_status(&mut self) -> Result<ContainerStatus, UpdateError> {
        let cmd = format!(
            "{} || echo {}",
            check_docker_running_cmd(&self.container_name),
            shell_quote(NOT_PRESENT)
        );
        let opts = self.host_opts().with_output();
        let output = self.host(&cmd, opts).await?;
        Ok(ContainerStatus::from_inspect_output(&String::from_utf8_lossy(
            &output,
        )))
    }

    /// Replace `~` with the container's home directory.
    ///
    /// With `any_char` every `~/` is replaced, otherwise only a leading `~`.
    pub async fn docker_expand_user(
        &mut self,
        s: &str,
        any_char: bool,
    ) -> Result<String, UpdateError> {
        let Some(pos) = s.find('~') else {
            return Ok(s.to_string());
        };
        let home = self.container_home().await?;
        if any_char {
            Ok(s.replace("~/", &format!("{}/", home)))
        } else if pos == 0 {
            Ok(s.replacen('~', &home, 1))
        } else {
            Ok(s.to_string())
        }
    }

    async fn container_home(&mut self) -> Result<String, UpdateError> {
        if let Some(home) = &self.home_dir {
            return Ok(home.clone());
        }
        let cmd = format!(
            "docker exec {} env | grep HOME | cut -d'=' -f2",
            self.container_name
        );
        let opts = self.host_opts().with_output();
        let output = self.host(&cmd, opts).await?;
        let home = String::from_utf8_lossy(&output).trim().to_string();
        self.home_dir = Some(home.clone());
        Ok(home)
    }
}

#[async_trait]
impl CommandRunner for DockerCommandRunner {
    async fn run(&mut self, cmd: &str, opts: RunOptions) -> Result<Vec<u8>, UpdateError> {
        opts.check_exclusive(cmd)?;
        // Forwards terminate on the host.
        if !opts.port_forward.is_empty() {
            return self.ssh.run(cmd, opts).await;
        }

        let run_env = opts.run_env.resolve(cmd);
        if run_env == RunEnv::Docker || cmd.starts_with("docker") {
            self.check_docker_installed(opts.timeout).await;
        }

        let mut cmd = match run_env {
            RunEnv::Docker => {
                let expanded = self.docker_expand_user(cmd, true).await?;
                with_docker_exec(&expanded, &self.container_name, true)
            }
            _ => cmd.to_string(),
        };
        if std::mem::take(&mut self.shutdown) {
            cmd.push_str(SHUTDOWN_CMD);
        }
        self.ssh.run(&cmd, opts).await
    }

    async fn run_rsync_up(&mut self, source: &str, target: &str) -> Result<(), UpdateError> {
        self.ssh.run_rsync_up(source, target).await?;
        match self.check_container_status().await? {
            ContainerStatus::Running => {
                let container_target = self.docker_expand_user(target, false).await?;
                let cmd = format!(
                    "docker cp {} {}:{}",
                    target, self.container_name, container_target
                );
                let opts = self.host_opts();
                self.host(&cmd, opts).await?;
            }
            status => {
                tracing::debug!(
                    "Container {} is {:?}; leaving {} on the host",
                    self.container_name,
                    status,
                    target
                );
            }
        }
        Ok(())
    }

    async fn run_rsync_down(&mut self, source: &str, target: &str) -> Result<(), UpdateError> {
        let container_source = self.docker_expand_user(source, false).await?;
        let cmd = format!(
            "docker cp {}:{} {}",
            self.container_name, container_source, source
        );
        let opts = self.host_opts();
        self.host(&cmd, opts).await?;
        self.ssh.run_rsync_down(source, target).await
    }

    fn remote_shell_command_str(&self) -> String {
        let inner = self.ssh.remote_shell_command_str().replacen("ssh", "ssh -tt", 1);
        format!(
            "{} docker exec -it {} /bin/bash\n",
            inner.trim_end_matches('\n'),
            self.container_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_check_uses_inspect_template() {
        assert_eq!(
            check_docker_running_cmd("worker"),
            "docker inspect -f '{{.State.Running}}' worker"
        );
    }

    #[test]
    fn docker_exec_quotes_command() {
        assert_eq!(
            with_docker_exec("ls -la", "worker", true),
            "docker exec -it worker /bin/bash -c 'ls -la'"
        );
        assert_eq!(
            with_docker_exec("uptime", "worker", false),
            "docker exec worker /bin/bash -c uptime"
        );
    }

    #[test]
    fn container_status_from_probe_output() {
        assert_eq!(
            ContainerStatus::from_inspect_output("Error: No such object\nnot_present\n"),
            ContainerStatus::Absent
        );
        assert_eq!(
            ContainerStatus::from_inspect_output("true\n"),
            ContainerStatus::Running
        );
        assert_eq!(
            ContainerStatus::from_inspect_output("false\n"),
            ContainerStatus::Stopped
        );
    }
}
