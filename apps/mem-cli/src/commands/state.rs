use std::io::Write;

use anyhow::Result;
use mem_storage::IndexStore;
use serde::Serialize;

use crate::cli::StateArgs;

use super::{open_workspace, CommandContext, CommandIo};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StateReport {
    workspace: String,
    workspace_type: String,
    files: i64,
    chunks: i64,
    cache_rows: i64,
    model: String,
    dims: i64,
    vector_ready: bool,
}

pub fn run(ctx: &CommandContext<'_>, io: &mut CommandIo<'_>, args: StateArgs) -> Result<()> {
    let (workspace, layout) = open_workspace(&args.workspace)?;
    let mut store = IndexStore::open(&layout.index_db_path())?;

    let meta = store.read_meta()?;
    let report = StateReport {
        workspace: workspace.root.to_string_lossy().into_owned(),
        workspace_type: workspace.meta.workspace_type.to_string(),
        files: count(&store, "SELECT COUNT(*) FROM files")?,
        chunks: count(&store, "SELECT COUNT(*) FROM chunks")?,
        cache_rows: mem_storage::cache::count_rows(store.conn())?,
        model: meta.model,
        dims: meta.dims,
        vector_ready: store.vector_search_ready()?,
    };

    if args.json {
        writeln!(io.out, "{}", serde_json::to_string(&report)?)?;
        return Ok(());
    }

    writeln!(io.out, "Workspace:    {}", report.workspace)?;
    writeln!(io.out, "Type:         {}", report.workspace_type)?;
    writeln!(io.out, "Files:        {}", report.files)?;
    writeln!(io.out, "Chunks:       {}", report.chunks)?;
    writeln!(io.out, "Cache rows:   {}", report.cache_rows)?;
    writeln!(
        io.out,
        "Model:        {}",
        if report.model.is_empty() {
            "(none)"
        } else {
            report.model.as_str()
        }
    )?;
    writeln!(io.out, "Dims:         {}", report.dims)?;
    writeln!(io.out, "Vector ready: {}", report.vector_ready)?;

    // Chunking settings drift is the silent reindex trigger, worth surfacing.
    if meta.chunking != ctx.settings.chunking {
        writeln!(io.out, "Note: chunking settings changed; next sync reindexes")?;
    }

    Ok(())
}

fn count(store: &IndexStore, sql: &str) -> Result<i64> {
    Ok(store.conn().query_row(sql, [], |row| row.get(0))?)
}
