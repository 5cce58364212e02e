use std::io;
use std::path::{Path, PathBuf};

use directories::{BaseDirs, ProjectDirs};
use md5::{Digest, Md5};

/// Overrides the log directory.
pub const LOG_DIR_ENV: &str = "NODE_UPDATER_LOG_DIR";

/// Number of hex characters kept from each hash in the ssh control path.
/// Unix socket paths are short, so the digests are truncated.
const HASH_MAX_LENGTH: usize = 10;

/// Per-user configuration directory for the updater.
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "node-updater", "node-updater")
        .map(|proj_dirs| proj_dirs.config_dir().to_path_buf())
}

/// Home directory of the local user.
fn home_dir() -> Option<PathBuf> {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
}

/// Expand a leading `~` in a local path. `~user` forms are left untouched.
pub fn expand_tilde(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some("") => "",
        Some(rest) if rest.starts_with('/') => &rest[1..],
        _ => return PathBuf::from(path),
    };
    match home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}

/// Name of the local user running the updater.
pub fn local_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn short_hash(value: &str) -> String {
    let digest = Md5::digest(value.as_bytes());
    let mut hex = data_encoding::HEXLOWER.encode(&digest);
    hex.truncate(HASH_MAX_LENGTH);
    hex
}

/// Directory holding the ssh multiplexing sockets for a cluster.
///
/// The path depends only on the cluster name and local user, so every process
/// targeting the same cluster as the same user shares one master connection
/// per node without any coordination.
pub fn ssh_control_path(cluster_name: &str, user: &str) -> PathBuf {
    PathBuf::from("/tmp")
        .join(format!("node_updater_ssh_{}", short_hash(user)))
        .join(short_hash(cluster_name))
}

/// Log directory: `NODE_UPDATER_LOG_DIR` when set, otherwise `logs/` under the
/// config directory. A blank override disables file logging.
pub fn log_dir() -> Option<PathBuf> {
    match std::env::var(LOG_DIR_ENV) {
        Ok(raw) => Some(raw.trim())
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from),
        Err(_) => config_dir().map(|dir| dir.join("logs")),
    }
}

/// Create the log directory if needed and return it.
pub fn ensure_log_dir() -> io::Result<PathBuf> {
    let dir = log_dir()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no log directory available"))?;
    create_private_dir(&dir)?;
    Ok(dir)
}

/// Create a directory (and parents) readable only by the owner.
pub fn create_private_dir(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
        }
    }
    Ok(())
}
