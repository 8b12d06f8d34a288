use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use mem_indexing::indexing::sync;
use mem_indexing::WorkspaceLayout;
use mem_storage::IndexStore;

use crate::cli::ReindexArgs;
use crate::workspace;

use super::{open_workspace, provider_for, CommandContext, CommandIo};

pub fn run(ctx: &CommandContext<'_>, io: &mut CommandIo<'_>, args: ReindexArgs) -> Result<()> {
    let targets: Vec<PathBuf> = if args.all {
        workspace::list_workspaces()?
    } else {
        vec![open_workspace(&args.workspace)?.0.root]
    };

    if targets.is_empty() {
        writeln!(io.out, "No workspaces to reindex")?;
        return Ok(());
    }

    let provider = provider_for(ctx)?;
    let index_settings = ctx.settings.index_settings();

    let mut reports = Vec::with_capacity(targets.len());
    for root in targets {
        let layout = WorkspaceLayout::new(&root);
        let mut store = IndexStore::open(&layout.index_db_path())?;

        let summary = if args.force {
            sync::reindex(&mut store, &layout, &index_settings, Some(provider.as_ref()))?
        } else {
            sync::ensure_up_to_date(&mut store, &layout, &index_settings, Some(provider.as_ref()))?
        };
        reports.push((root, summary));
    }

    if args.json {
        let payload: Vec<serde_json::Value> = reports
            .iter()
            .map(|(root, summary)| {
                serde_json::json!({
                    "workspace": root.to_string_lossy(),
                    "summary": summary,
                })
            })
            .collect();
        writeln!(io.out, "{}", serde_json::to_string(&payload)?)?;
        return Ok(());
    }

    for (root, summary) in &reports {
        writeln!(
            io.out,
            "{}: {} files scanned, {} indexed, {} deleted, {} chunks written",
            root.display(),
            summary.files_scanned,
            summary.files_indexed,
            summary.files_deleted,
            summary.chunks_written
        )?;
    }

    Ok(())
}
