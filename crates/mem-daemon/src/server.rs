use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use embeddings_client::ProviderStatsSnapshot;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::protocol::{
    PingResponse, Request, RunResponse, ShutdownResponse, DAEMON_VERSION, PROTOCOL_VERSION,
};
use crate::{socket, DAEMON_IDLE_MS_ENV};

const DEFAULT_IDLE: Duration = Duration::from_millis(300_000);
const CONNECTION_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Captured result of executing one forwarded command.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Executes forwarded commands in-process, writing through captured sinks
/// rather than the process streams.
pub trait CommandRunner {
    fn run(&self, argv: &[String], stdin: Option<&str>) -> RunOutput;
    fn embedding_stats(&self) -> ProviderStatsSnapshot;
}

/// Serve the daemon loop until shutdown is requested or the idle timer fires.
pub fn serve(runner: &dyn CommandRunner) -> Result<()> {
    serve_in(&socket::socket_dir(), runner, idle_timeout())
}

/// Connections are accepted and handled strictly one at a time: the FIFO
/// arrival order is the execution order, and at most one `run` is in flight.
pub(crate) fn serve_in(dir: &Path, runner: &dyn CommandRunner, idle: Duration) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create socket directory {}", dir.display()))?;
    restrict_permissions(dir, 0o700)?;

    let path = dir.join(socket::SOCKET_NAME);
    // The start-lock held by the spawning client makes this safe: a leftover
    // file here is from a dead daemon, not a live one.
    if path.exists() {
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build daemon runtime")?;

    let listener = runtime
        .block_on(async { UnixListener::bind(&path) })
        .with_context(|| format!("Failed to bind daemon socket {}", path.display()))?;
    restrict_permissions(&path, 0o600)?;

    let started_at = now_ms();
    tracing::info!(
        pid = std::process::id(),
        socket = %path.display(),
        version = DAEMON_VERSION,
        "daemon started"
    );

    loop {
        let accepted = runtime.block_on(async {
            tokio::select! {
                result = listener.accept() => Some(result),
                _ = tokio::time::sleep(idle) => None,
            }
        });

        let Some(result) = accepted else {
            tracing::info!("idle timeout reached, shutting down");
            break;
        };

        let stream = match result {
            Ok((stream, _addr)) => stream,
            Err(error) => {
                tracing::warn!(%error, "failed to accept connection");
                continue;
            }
        };

        match handle_connection(&runtime, stream, runner, started_at) {
            Ok(true) => {
                tracing::info!("shutdown requested");
                break;
            }
            Ok(false) => {}
            Err(error) => tracing::warn!(%error, "connection failed"),
        }
    }

    drop(listener);
    let _ = std::fs::remove_file(&path);
    // Leaves the directory behind when it still holds the log file.
    let _ = std::fs::remove_dir(dir);

    Ok(())
}

/// Returns true when the client requested shutdown.
fn handle_connection(
    runtime: &tokio::runtime::Runtime,
    stream: UnixStream,
    runner: &dyn CommandRunner,
    started_at: i64,
) -> Result<bool> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = runtime.block_on(async {
            tokio::time::timeout(CONNECTION_READ_TIMEOUT, lines.next_line())
                .await
                .context("connection read timed out")?
                .context("failed to read request line")
        })?;

        let Some(line) = line else {
            return Ok(false);
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(%error, "unparseable request");
                return Ok(false);
            }
        };

        let mismatch = version_mismatch(&request);
        match request {
            Request::Ping { .. } => {
                let response = PingResponse {
                    ok: !mismatch,
                    protocol_version: PROTOCOL_VERSION,
                    daemon_version: DAEMON_VERSION.to_string(),
                    pid: std::process::id(),
                    started_at,
                    embeddings: runner.embedding_stats(),
                    restart_required: mismatch.then_some(true),
                };
                write_response(runtime, &mut write_half, &response)?;
            }
            Request::Shutdown { .. } => {
                // Honored even across versions so a newer client can always
                // retire an old daemon.
                write_response(runtime, &mut write_half, &ShutdownResponse { ok: true })?;
                return Ok(true);
            }
            Request::Run { argv, stdin, .. } => {
                let response = if mismatch {
                    RunResponse {
                        ok: false,
                        exit_code: 1,
                        stdout: String::new(),
                        stderr: String::new(),
                        restart_required: Some(true),
                    }
                } else {
                    // Executed outside the async context: command code is
                    // synchronous and may park on its own runtime internally.
                    let output = runner.run(&argv, stdin.as_deref());
                    RunResponse {
                        ok: output.exit_code == 0,
                        exit_code: output.exit_code,
                        stdout: output.stdout,
                        stderr: output.stderr,
                        restart_required: None,
                    }
                };
                write_response(runtime, &mut write_half, &response)?;
            }
        }
    }
}

fn version_mismatch(request: &Request) -> bool {
    if request.protocol_version() != PROTOCOL_VERSION {
        return true;
    }
    matches!(request.client_version(), Some(client) if client != DAEMON_VERSION)
}

fn write_response<T: Serialize>(
    runtime: &tokio::runtime::Runtime,
    write_half: &mut tokio::net::unix::OwnedWriteHalf,
    response: &T,
) -> Result<()> {
    let mut payload = serde_json::to_string(response).context("Failed to encode response")?;
    payload.push('\n');

    runtime.block_on(async {
        write_half
            .write_all(payload.as_bytes())
            .await
            .context("Failed to write response")?;
        write_half.flush().await.context("Failed to flush response")
    })?;

    Ok(())
}

fn restrict_permissions(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .with_context(|| format!("Failed to restrict permissions on {}", path.display()))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}

fn idle_timeout() -> Duration {
    std::env::var(DAEMON_IDLE_MS_ENV)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_IDLE)
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod serve_tests {
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use embeddings_client::ProviderStatsSnapshot;

    use super::{serve_in, CommandRunner, RunOutput};
    use crate::protocol::{PingResponse, Request, RunResponse, ShutdownResponse};
    use crate::socket::SOCKET_NAME;

    struct EchoRunner;

    impl CommandRunner for EchoRunner {
        fn run(&self, argv: &[String], stdin: Option<&str>) -> RunOutput {
            RunOutput {
                exit_code: 0,
                stdout: format!("argv={} stdin={}", argv.join(" "), stdin.unwrap_or("-")),
                stderr: String::new(),
            }
        }

        fn embedding_stats(&self) -> ProviderStatsSnapshot {
            ProviderStatsSnapshot {
                provider_cache_size: 1,
                provider_create_count: 1,
                runtime_init_count: 1,
                model_load_count: 1,
                context_create_count: 1,
                mock_enabled: true,
            }
        }
    }

    fn temp_dir(prefix: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "{prefix}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time went backwards")
                .as_nanos()
        ));
        dir
    }

    fn wait_for_socket(path: &Path) {
        for _ in 0..100 {
            if path.exists() {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("daemon socket never appeared at {}", path.display());
    }

    fn roundtrip(path: &Path, payload: &str) -> String {
        let mut stream = UnixStream::connect(path).expect("connect should succeed");
        stream
            .write_all(format!("{payload}\n").as_bytes())
            .expect("request write should succeed");
        let mut line = String::new();
        BufReader::new(stream)
            .read_line(&mut line)
            .expect("response read should succeed");
        line
    }

    #[test]
    fn given_running_daemon_when_pinging_running_and_shutting_down_then_protocol_round_trips() {
        let dir = temp_dir("mem-daemon-serve");
        let socket_path = dir.join(SOCKET_NAME);

        let serve_dir = dir.clone();
        let server = std::thread::spawn(move || {
            serve_in(&serve_dir, &EchoRunner, Duration::from_secs(30))
        });
        wait_for_socket(&socket_path);

        let ping_line = roundtrip(
            &socket_path,
            &serde_json::to_string(&Request::ping()).unwrap(),
        );
        let ping: PingResponse = serde_json::from_str(&ping_line).expect("ping should decode");
        assert!(ping.ok);
        assert_eq!(ping.embeddings.model_load_count, 1);
        assert_eq!(ping.restart_required, None);

        let run_line = roundtrip(
            &socket_path,
            &serde_json::to_string(&Request::run(
                vec!["search".to_string(), "kiwi".to_string()],
                Some("from stdin".to_string()),
            ))
            .unwrap(),
        );
        let run: RunResponse = serde_json::from_str(&run_line).expect("run should decode");
        assert!(run.ok);
        assert_eq!(run.exit_code, 0);
        assert_eq!(run.stdout, "argv=search kiwi stdin=from stdin");

        // Protocol drift: execution is refused with restartRequired.
        let stale_line = roundtrip(
            &socket_path,
            "{\"type\":\"run\",\"protocolVersion\":999,\"argv\":[\"state\"]}",
        );
        let stale: RunResponse = serde_json::from_str(&stale_line).expect("stale should decode");
        assert!(!stale.ok);
        assert_eq!(stale.restart_required, Some(true));

        let shutdown_line = roundtrip(
            &socket_path,
            &serde_json::to_string(&Request::shutdown()).unwrap(),
        );
        let shutdown: ShutdownResponse =
            serde_json::from_str(&shutdown_line).expect("shutdown should decode");
        assert!(shutdown.ok);

        server
            .join()
            .expect("server thread should not panic")
            .expect("serve should exit cleanly");
        assert!(!socket_path.exists(), "socket must be removed on shutdown");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn given_no_connections_when_idle_window_elapses_then_the_daemon_exits() {
        let dir = temp_dir("mem-daemon-idle");
        let socket_path = dir.join(SOCKET_NAME);

        let serve_dir = dir.clone();
        let server = std::thread::spawn(move || {
            serve_in(&serve_dir, &EchoRunner, Duration::from_millis(150))
        });
        wait_for_socket(&socket_path);

        server
            .join()
            .expect("server thread should not panic")
            .expect("serve should exit cleanly");
        assert!(!socket_path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
