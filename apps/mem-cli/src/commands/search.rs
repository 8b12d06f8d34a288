use std::io::Write;

use anyhow::Result;
use mem_indexing::indexing::search::search_vector;
use mem_indexing::indexing::sync;
use mem_storage::IndexStore;

use crate::cli::SearchArgs;
use crate::error::CliError;

use super::{open_workspace, provider_for, CommandContext, CommandIo};

pub fn run(ctx: &CommandContext<'_>, io: &mut CommandIo<'_>, args: SearchArgs) -> Result<()> {
    let (_workspace, layout) = open_workspace(&args.workspace)?;

    let query = args.query.join(" ");
    let query = query.trim();
    if query.is_empty() {
        return Err(CliError::invalid_input("missing search query").into());
    }

    // Vector search has nothing to rank without embeddings, so a broken
    // provider is fatal here.
    let provider = provider_for(ctx)?;

    let mut store = IndexStore::open(&layout.index_db_path())?;
    let index_settings = ctx.settings.index_settings();
    sync::ensure_up_to_date(&mut store, &layout, &index_settings, Some(provider.as_ref()))?;

    let query_vec = provider.embed_query(query)?;
    if ctx.settings.debug.vector {
        writeln!(
            io.err,
            "[mem-cli] vector ready={} query_dims={}",
            store.vector_search_ready()?,
            query_vec.len()
        )?;
    }

    let limit = args.limit.unwrap_or(ctx.settings.search.limit);
    let hits = search_vector(
        &mut store,
        &query_vec,
        limit,
        Some(provider.model_path()),
        ctx.settings.search.snippet_max_chars,
    )?;

    if args.json {
        writeln!(io.out, "{}", serde_json::to_string(&hits)?)?;
        return Ok(());
    }

    if hits.is_empty() {
        writeln!(io.out, "No results")?;
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        writeln!(
            io.out,
            "{:>2}. {}:{}-{}  score={:.3}",
            rank + 1,
            hit.file_path,
            hit.line_start,
            hit.line_end,
            hit.score
        )?;
        let snippet = hit.snippet.replace('\n', " ");
        let snippet = snippet.trim();
        if !snippet.is_empty() {
            writeln!(io.out, "    {snippet}")?;
        }
    }

    Ok(())
}
