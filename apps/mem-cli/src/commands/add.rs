use std::io::Write;

use anyhow::{Context, Result};
use mem_indexing::indexing::sync;
use mem_indexing::{IndexError, SyncSummary, WorkspaceLayout};
use mem_storage::IndexStore;

use crate::cli::{AddArgs, AddKind};
use crate::error::CliError;

use super::{open_workspace, provider_for, CommandContext, CommandIo};

pub fn run(
    ctx: &CommandContext<'_>,
    io: &mut CommandIo<'_>,
    args: AddArgs,
    stdin: Option<&str>,
) -> Result<()> {
    let (_workspace, layout) = open_workspace(&args.workspace)?;

    let text = if args.stdin {
        stdin.unwrap_or_default().trim_end().to_string()
    } else {
        args.text.join(" ")
    };
    if text.trim().is_empty() {
        return Err(CliError::invalid_input("missing note text (pass words or --stdin)").into());
    }

    let rel_path = match args.kind {
        AddKind::Short => append_daily(&layout, &text)?,
        AddKind::Long => append_long_memory(&layout, &text)?,
    };

    // The note is on disk by now; a broken embedding stack downgrades to a
    // warning and the index is refreshed without vectors.
    let mut store = IndexStore::open(&layout.index_db_path())?;
    let index_settings = ctx.settings.index_settings();
    let summary = match provider_for(ctx) {
        Ok(provider) => {
            match sync::ensure_up_to_date(
                &mut store,
                &layout,
                &index_settings,
                Some(provider.as_ref()),
            ) {
                Ok(summary) => summary,
                Err(error) if IndexError::is_embeddings_unavailable(&error) => {
                    writeln!(
                        io.err,
                        "warning: embeddings unavailable, indexing without vectors"
                    )?;
                    sync::ensure_up_to_date(&mut store, &layout, &index_settings, None)?
                }
                Err(error) => return Err(error),
            }
        }
        Err(error) => {
            writeln!(
                io.err,
                "warning: embedding provider failed to load ({error:#}); indexing without vectors"
            )?;
            sync::ensure_up_to_date(&mut store, &layout, &index_settings, None)?
        }
    };

    report(io, &args, &rel_path, &summary)
}

fn report(
    io: &mut CommandIo<'_>,
    args: &AddArgs,
    rel_path: &str,
    summary: &SyncSummary,
) -> Result<()> {
    if args.json {
        let payload = serde_json::json!({
            "ok": true,
            "file": rel_path,
            "summary": summary,
        });
        writeln!(io.out, "{payload}")?;
    } else {
        writeln!(io.out, "Added to {rel_path}")?;
    }
    Ok(())
}

/// Append to today's dated note under `memory/`, creating it with a date
/// heading on first use.
fn append_daily(layout: &WorkspaceLayout, text: &str) -> Result<String> {
    let date = chrono::Local::now().format("%Y-%m-%d").to_string();
    let rel_path = format!("memory/{date}.md");
    let path = layout.root().join(&rel_path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    if path.is_file() {
        append_line(&path, &format!("- {text}\n"))?;
    } else {
        std::fs::write(&path, format!("# {date}\n\n- {text}\n"))
            .with_context(|| format!("Failed to create {}", path.display()))?;
    }

    Ok(rel_path)
}

fn append_long_memory(layout: &WorkspaceLayout, text: &str) -> Result<String> {
    let path = layout
        .long_memory_path()
        .unwrap_or_else(|| layout.long_memory_default_path());
    append_line(&path, &format!("- {text}\n"))?;

    Ok(path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default())
}

fn append_line(path: &std::path::Path, line: &str) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("Failed to append to {}", path.display()))
}
