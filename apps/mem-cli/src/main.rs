mod cli;
mod commands;
mod error;
mod settings;
mod workspace;

#[cfg(test)]
mod test_support;

use std::io::Read;

use clap::Parser;
use embeddings_client::ProviderCache;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let argv: Vec<String> = std::env::args().skip(1).collect();

    // Daemon entry is handled before anything else: the serve loop owns its
    // own logging and must never forward back to itself.
    if argv.first().map(String::as_str) == Some("__daemon") {
        return daemon_entry(&argv);
    }

    init_tracing();

    let stdin_content = read_stdin_if_requested(&argv);

    if is_forwardable(&argv) && mem_daemon::client::forwarding_enabled() {
        if let Some(exit_code) = mem_daemon::client::forward(&argv, stdin_content.clone()) {
            return exit_code;
        }
        tracing::debug!("daemon unavailable, running in-process");
    }

    let providers = ProviderCache::new();
    let mut out = std::io::stdout();
    let mut err = std::io::stderr();
    commands::run_argv(
        &argv,
        stdin_content.as_deref(),
        &providers,
        &mut out,
        &mut err,
    )
}

/// Commands the daemon may execute on our behalf. Workspace lifecycle and
/// state stay in-process so they never depend on daemon liveness.
fn is_forwardable(argv: &[String]) -> bool {
    matches!(
        argv.first().map(String::as_str),
        Some("add" | "search" | "reindex")
    )
}

fn read_stdin_if_requested(argv: &[String]) -> Option<String> {
    if !argv.iter().any(|arg| arg == "--stdin") {
        return None;
    }

    let mut buffer = String::new();
    match std::io::stdin().read_to_string(&mut buffer) {
        Ok(_) => Some(buffer),
        Err(error) => {
            tracing::warn!(%error, "failed to read stdin");
            Some(String::new())
        }
    }
}

fn daemon_entry(argv: &[String]) -> i32 {
    let full = std::iter::once("mem-cli".to_string()).chain(argv.iter().cloned());
    let parsed = match Cli::try_parse_from(full) {
        Ok(Cli {
            command: Command::Daemon(args),
        }) => args,
        _ => {
            eprintln!("mem-cli: __daemon requires --serve or --shutdown");
            return 1;
        }
    };

    #[cfg(unix)]
    {
        if parsed.shutdown {
            init_tracing();
            return match mem_daemon::client::shutdown_daemon() {
                Ok(true) => {
                    println!("daemon stopped");
                    0
                }
                Ok(false) => {
                    println!("no daemon running");
                    0
                }
                Err(error) => {
                    eprintln!("mem-cli: {error:#}");
                    1
                }
            };
        }
        if parsed.serve {
            return serve_daemon();
        }
        eprintln!("mem-cli: __daemon requires --serve or --shutdown");
        1
    }
    #[cfg(not(unix))]
    {
        let _ = parsed;
        eprintln!("mem-cli: the daemon is not supported on this platform");
        1
    }
}

#[cfg(unix)]
fn serve_daemon() -> i32 {
    let dir = match mem_daemon::socket::ensure_socket_dir() {
        Ok(dir) => dir,
        Err(error) => {
            eprintln!("mem-cli: {error:#}");
            return 1;
        }
    };

    // One start entry per daemon process lands in daemon.log.
    let appender = tracing_appender::rolling::never(&dir, mem_daemon::socket::LOG_NAME);
    let (writer, _guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();

    let runner = DaemonRunner {
        providers: ProviderCache::new(),
    };
    match mem_daemon::server::serve(&runner) {
        Ok(()) => 0,
        Err(error) => {
            tracing::error!(%error, "daemon failed");
            1
        }
    }
}

#[cfg(unix)]
struct DaemonRunner {
    providers: ProviderCache,
}

#[cfg(unix)]
impl mem_daemon::server::CommandRunner for DaemonRunner {
    fn run(&self, argv: &[String], stdin: Option<&str>) -> mem_daemon::server::RunOutput {
        let mut out: Vec<u8> = Vec::new();
        let mut err: Vec<u8> = Vec::new();
        let exit_code = commands::run_argv(argv, stdin, &self.providers, &mut out, &mut err);

        mem_daemon::server::RunOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr: String::from_utf8_lossy(&err).into_owned(),
        }
    }

    fn embedding_stats(&self) -> embeddings_client::ProviderStatsSnapshot {
        self.providers.snapshot()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
