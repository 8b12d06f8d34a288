use std::path::PathBuf;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::DAEMON_SOCKET_DIR_ENV;

pub const SOCKET_NAME: &str = "daemon.sock";
pub const START_LOCK_NAME: &str = "daemon.start.lock";
pub const LOG_NAME: &str = "daemon.log";

/// Per-user socket directory: `<tmpdir>/mem-cli-<uid>-<homeHash12>`.
///
/// Lives under the short-path temp dir to stay inside `sun_path` limits.
pub fn socket_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DAEMON_SOCKET_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
    let home_hash = hex::encode(Sha256::digest(home.to_string_lossy().as_bytes()));
    std::env::temp_dir().join(format!("mem-cli-{}-{}", uid(), &home_hash[..12]))
}

pub fn socket_path() -> PathBuf {
    socket_dir().join(SOCKET_NAME)
}

pub fn start_lock_path() -> PathBuf {
    socket_dir().join(START_LOCK_NAME)
}

pub fn log_path() -> PathBuf {
    socket_dir().join(LOG_NAME)
}

/// Create the socket directory with owner-only permissions.
pub fn ensure_socket_dir() -> Result<PathBuf> {
    let dir = socket_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create socket directory {}", dir.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Failed to restrict socket directory {}", dir.display()))?;
    }

    Ok(dir)
}

fn uid() -> u32 {
    #[cfg(unix)]
    {
        unsafe { libc::getuid() }
    }
    #[cfg(not(unix))]
    {
        0
    }
}

#[cfg(test)]
mod unit_tests {
    use super::{socket_dir, socket_path};
    use crate::DAEMON_SOCKET_DIR_ENV;

    #[test]
    fn socket_dir_is_stable_namespaced_and_overridable() {
        std::env::remove_var(DAEMON_SOCKET_DIR_ENV);
        let first = socket_dir();
        let second = socket_dir();

        assert_eq!(first, second);
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("mem-cli-"), "unexpected dir name {name}");
        assert!(socket_path().ends_with("daemon.sock"));

        std::env::set_var(DAEMON_SOCKET_DIR_ENV, "/tmp/custom-mem-sockets");
        let overridden = socket_dir();
        std::env::remove_var(DAEMON_SOCKET_DIR_ENV);
        assert_eq!(overridden, std::path::Path::new("/tmp/custom-mem-sockets"));
    }
}
