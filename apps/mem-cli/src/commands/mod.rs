//! Command implementations shared by the CLI entry point and the daemon.
//!
//! Every command writes through the sinks in [`CommandIo`] instead of the
//! process streams, so the daemon can capture output per request without
//! touching global state.

pub mod add;
pub mod lifecycle;
pub mod reindex;
pub mod search;
pub mod state;


use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use embeddings_client::{EmbeddingProvider, ProviderCache};
use mem_indexing::WorkspaceLayout;

use crate::cli::{Cli, Command, WorkspaceArgs};
use crate::error::CliError;
use crate::settings::Settings;
use crate::workspace::{self, Workspace, WorkspaceSelector};

pub struct CommandIo<'a> {
    pub out: &'a mut dyn Write,
    pub err: &'a mut dyn Write,
}

pub struct CommandContext<'a> {
    pub providers: &'a ProviderCache,
    pub settings: Settings,
}

/// Parse and execute one command line, returning the process exit code.
///
/// Help and version are plain result values from the parser, not errors:
/// they render to the output sink and exit zero.
pub fn run_argv(
    argv: &[String],
    stdin: Option<&str>,
    providers: &ProviderCache,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> i32 {
    let full = std::iter::once("mem-cli".to_string()).chain(argv.iter().cloned());
    let cli = match Cli::try_parse_from(full) {
        Ok(cli) => cli,
        Err(error) => {
            let rendered = error.render().to_string();
            return match error.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    let _ = write!(out, "{rendered}");
                    0
                }
                _ => {
                    let _ = write!(err, "{rendered}");
                    1
                }
            };
        }
    };

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(error) => return render_error(err, &error),
    };

    let ctx = CommandContext {
        providers,
        settings,
    };
    let mut io = CommandIo {
        out: &mut *out,
        err: &mut *err,
    };

    let result = match cli.command {
        Command::Add(args) => add::run(&ctx, &mut io, args, stdin),
        Command::Search(args) => search::run(&ctx, &mut io, args),
        Command::Reindex(args) => reindex::run(&ctx, &mut io, args),
        Command::State(args) => state::run(&ctx, &mut io, args),
        Command::Init(args) => lifecycle::init(&mut io, args),
        Command::Destroy(args) => lifecycle::destroy(&mut io, args),
        Command::Daemon(_) => {
            Err(CliError::invalid_input("__daemon cannot run inside the daemon").into())
        }
    };

    match result {
        Ok(()) => 0,
        Err(error) => render_error(err, &error),
    }
}

fn render_error(err: &mut dyn Write, error: &anyhow::Error) -> i32 {
    let _ = writeln!(err, "mem-cli: {error:#}");
    if let Some(cli_error) = error.downcast_ref::<CliError>() {
        if let Some(hint) = cli_error.hint() {
            let _ = writeln!(err, "  {hint}");
        }
    }
    1
}

pub(crate) fn open_workspace(args: &WorkspaceArgs) -> Result<(Workspace, WorkspaceLayout)> {
    let selector = WorkspaceSelector::from_args(args)?;
    let workspace = workspace::resolve(&selector)?;
    let layout = WorkspaceLayout::new(&workspace.root);
    Ok((workspace, layout))
}

pub(crate) fn provider_for(ctx: &CommandContext<'_>) -> Result<Arc<dyn EmbeddingProvider>> {
    ctx.providers
        .get_or_create(&ctx.settings.provider_config())
        .context("Failed to initialize the embedding provider")
}
