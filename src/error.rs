use std::path::PathBuf;
use thiserror::Error;

/// Update plan errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read update plan '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse update plan: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Update plan has no nodes")]
    NoNodes,
}

/// Failure reported by a node provider
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct ProviderError(pub String);

/// Subprocess errors at the external tool boundary
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("(Exit Status {exit_code}) {}", .argv.join(" "))]
    Exit { argv: Vec<String>, exit_code: i32 },
}

/// Errors raised while bringing a node up to date
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Node {node_id} is unreachable: {reason}")]
    NodeUnreachable { node_id: String, reason: String },

    #[error("(Exit Status {exit_code}) {command}")]
    CommandFailed { command: String, exit_code: i32 },

    /// The failure was already logged at the call site and needs no further
    /// propagation.
    #[error("Command failed (already reported): {command}")]
    Reported { command: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transfer of {from} to {to} failed: {detail}")]
    TransferFailed {
        from: String,
        to: String,
        detail: String,
    },

    #[error("File mount source does not exist: {0}")]
    MissingSource(PathBuf),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Node provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Update worker for {node_id} aborted: {reason}")]
    Worker { node_id: String, reason: String },
}

impl UpdateError {
    /// True when the failure was already surfaced to the user.
    pub fn is_reported(&self) -> bool {
        matches!(self, UpdateError::Reported { .. })
    }

    /// Exit code of the failing remote command, if there was one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            UpdateError::CommandFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

impl From<ProcessError> for UpdateError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Spawn { program, source } => UpdateError::Spawn { program, source },
            ProcessError::Exit { argv, exit_code } => UpdateError::CommandFailed {
                command: argv.join(" "),
                exit_code,
            },
        }
    }
}
