//! Process boundary: every backend talks to ssh, rsync, docker and kubectl
//! through a [`ProcessRunner`].

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::ProcessError;

/// Runs external client tools from an argument vector.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion with inherited stdio, failing on a nonzero exit.
    async fn check_call(&self, argv: &[String]) -> Result<(), ProcessError>;

    /// Run to completion capturing stdout, failing on a nonzero exit.
    async fn check_output(&self, argv: &[String]) -> Result<Vec<u8>, ProcessError>;
}

/// [`ProcessRunner`] backed by real subprocesses.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessRunner;

impl SystemProcessRunner {
    fn command(argv: &[String]) -> Result<Command, ProcessError> {
        let (program, args) = argv.split_first().ok_or_else(|| ProcessError::Spawn {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argument vector"),
        })?;
        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        Ok(cmd)
    }

    fn check_status(argv: &[String], status: std::process::ExitStatus) -> Result<(), ProcessError> {
        if status.success() {
            return Ok(());
        }
        Err(ProcessError::Exit {
            argv: argv.to_vec(),
            // Killed by a signal.
            exit_code: status.code().unwrap_or(-1),
        })
    }

    fn spawn_error(argv: &[String], source: std::io::Error) -> ProcessError {
        ProcessError::Spawn {
            program: argv.first().cloned().unwrap_or_default(),
            source,
        }
    }
}

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    async fn check_call(&self, argv: &[String]) -> Result<(), ProcessError> {
        let status = Self::command(argv)?
            .status()
            .await
            .map_err(|e| Self::spawn_error(argv, e))?;
        Self::check_status(argv, status)
    }

    async fn check_output(&self, argv: &[String]) -> Result<Vec<u8>, ProcessError> {
        let output = Self::command(argv)?
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(|e| Self::spawn_error(argv, e))?;
        Self::check_status(argv, output.status)?;
        Ok(output.stdout)
    }
}

/// Quote a string for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\"'\"'"))
}
