use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use mem_indexing::indexing::lock::{self, LockOptions};
use serde::de::DeserializeOwned;

use crate::protocol::{PingResponse, Request, RunResponse, ShutdownResponse};
use crate::{socket, DAEMON_ENV};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(800);
/// Long enough to cover a cold model load on first use.
const RUN_TIMEOUT: Duration = Duration::from_secs(600);
const READY_WAIT: Duration = Duration::from_secs(5);
const START_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Forwarding defaults to on; `MEM_CLI_DAEMON` set to a falsey value turns
/// it off (and the spawned daemon child gets it set to `0`).
pub fn forwarding_enabled() -> bool {
    match std::env::var(DAEMON_ENV) {
        Err(_) => true,
        Ok(value) => {
            let normalized = value.trim().to_ascii_lowercase();
            !matches!(normalized.as_str(), "" | "0" | "false" | "no" | "off")
        }
    }
}

/// Run `argv` through the daemon, spawning one if necessary.
///
/// Returns the remote exit code after mirroring the captured output onto this
/// process's streams, or `None` ("not forwarded") on any transport problem so
/// the caller can fall back to in-process execution.
pub fn forward(argv: &[String], stdin: Option<String>) -> Option<i32> {
    match forward_with_retry(argv, stdin, true) {
        Ok(exit_code) => Some(exit_code),
        Err(error) => {
            tracing::debug!(%error, "daemon forwarding unavailable");
            None
        }
    }
}

/// Ask a running daemon to shut down. `Ok(false)` when none was listening.
pub fn shutdown_daemon() -> Result<bool> {
    let path = socket::socket_path();
    match send_request::<ShutdownResponse>(&path, &Request::shutdown(), HANDSHAKE_TIMEOUT) {
        Ok(response) => Ok(response.ok),
        Err(_) => Ok(false),
    }
}

fn forward_with_retry(argv: &[String], stdin: Option<String>, allow_retry: bool) -> Result<i32> {
    let path = socket::socket_path();

    match ping(&path) {
        Some(response) if response.restart_required != Some(true) => {}
        Some(_) => {
            // Running, but from another build: retire it and start fresh.
            let _ = shutdown_daemon();
            std::thread::sleep(Duration::from_millis(200));
            start_daemon()?;
        }
        None => start_daemon()?,
    }

    let response: RunResponse = send_request(
        &path,
        &Request::run(argv.to_vec(), stdin.clone()),
        RUN_TIMEOUT,
    )?;

    if response.restart_required == Some(true) {
        if !allow_retry {
            return Err(anyhow!("daemon still mismatched after restart"));
        }
        let _ = shutdown_daemon();
        std::thread::sleep(Duration::from_millis(200));
        return forward_with_retry(argv, stdin, false);
    }

    let mut stdout = std::io::stdout();
    stdout
        .write_all(response.stdout.as_bytes())
        .and_then(|_| stdout.flush())
        .context("Failed to relay daemon stdout")?;
    let mut stderr = std::io::stderr();
    stderr
        .write_all(response.stderr.as_bytes())
        .and_then(|_| stderr.flush())
        .context("Failed to relay daemon stderr")?;

    Ok(response.exit_code)
}

fn ping(path: &Path) -> Option<PingResponse> {
    send_request(path, &Request::ping(), HANDSHAKE_TIMEOUT).ok()
}

/// Spawn the daemon exactly once across racing clients: losers of the
/// start-lock find the socket already serving when they re-ping.
fn start_daemon() -> Result<()> {
    socket::ensure_socket_dir()?;
    let guard = lock::acquire(
        &socket::start_lock_path(),
        &LockOptions {
            timeout: START_LOCK_TIMEOUT,
            poll_interval: Duration::from_millis(50),
        },
    )?;

    let path = socket::socket_path();
    if ping(&path).is_some() {
        guard.release()?;
        return Ok(());
    }

    spawn_detached()?;

    let deadline = Instant::now() + READY_WAIT;
    while Instant::now() < deadline {
        if ping(&path).is_some() {
            guard.release()?;
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    Err(anyhow!("daemon did not become ready in time"))
}

fn spawn_detached() -> Result<()> {
    let exe = std::env::current_exe().context("Failed to resolve current executable")?;

    let mut command = std::process::Command::new(exe);
    command
        .arg("__daemon")
        .arg("--serve")
        .env(DAEMON_ENV, "0")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    unsafe {
        use std::os::unix::process::CommandExt;
        command.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    command.spawn().context("Failed to spawn daemon process")?;
    Ok(())
}

fn send_request<R: DeserializeOwned>(
    path: &Path,
    request: &Request,
    read_timeout: Duration,
) -> Result<R> {
    let stream = UnixStream::connect(path)
        .with_context(|| format!("Failed to connect to daemon at {}", path.display()))?;
    stream
        .set_read_timeout(Some(read_timeout))
        .context("Failed to set read timeout")?;
    stream
        .set_write_timeout(Some(HANDSHAKE_TIMEOUT))
        .context("Failed to set write timeout")?;

    let mut payload = serde_json::to_string(request).context("Failed to encode request")?;
    payload.push('\n');
    (&stream)
        .write_all(payload.as_bytes())
        .context("Failed to send request")?;

    let mut line = String::new();
    BufReader::new(&stream)
        .read_line(&mut line)
        .context("Failed to read response")?;
    if line.trim().is_empty() {
        return Err(anyhow!("daemon closed the connection without replying"));
    }

    serde_json::from_str(&line).context("Failed to decode daemon response")
}

#[cfg(test)]
mod unit_tests {
    use super::forwarding_enabled;
    use crate::DAEMON_ENV;

    #[test]
    fn forwarding_defaults_on_and_honors_falsey_values() {
        std::env::remove_var(DAEMON_ENV);
        assert!(forwarding_enabled());

        for falsey in ["0", "false", "off", "no", ""] {
            std::env::set_var(DAEMON_ENV, falsey);
            assert!(!forwarding_enabled(), "{falsey:?} should disable");
        }

        std::env::set_var(DAEMON_ENV, "1");
        assert!(forwarding_enabled());
        std::env::remove_var(DAEMON_ENV);
    }
}
