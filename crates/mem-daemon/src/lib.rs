//! Long-lived per-user daemon that keeps the embedding model warm.
//!
//! Transport is a local UNIX socket carrying one JSON object per line in each
//! direction. Requests are served strictly one at a time so the embedding
//! model's compute stream stays sequential and the shared index store is
//! never touched from two commands at once.

pub mod protocol;

#[cfg(unix)]
pub mod client;
#[cfg(unix)]
pub mod server;
#[cfg(unix)]
pub mod socket;

#[cfg(not(unix))]
pub mod client {
    //! Forwarding is POSIX-only; other platforms always run in-process.

    pub fn forwarding_enabled() -> bool {
        false
    }

    pub fn forward(_argv: &[String], _stdin: Option<String>) -> Option<i32> {
        None
    }
}

/// Enables/disables daemon forwarding; enabled unless explicitly falsey.
pub const DAEMON_ENV: &str = "MEM_CLI_DAEMON";
/// Idle shutdown window in milliseconds.
pub const DAEMON_IDLE_MS_ENV: &str = "MEM_CLI_DAEMON_IDLE_MS";
/// Overrides the socket directory.
pub const DAEMON_SOCKET_DIR_ENV: &str = "MEM_CLI_DAEMON_SOCKET_DIR";
