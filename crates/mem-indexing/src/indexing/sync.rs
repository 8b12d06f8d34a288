use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Context, Result};
use embeddings_client::EmbeddingProvider;
use mem_storage::{IndexStore, CHUNK_VEC_TABLE};
use rusqlite::{params, TransactionBehavior};

use super::chunking;
use super::embedding::embed_chunks;
use super::files::{collect_memory_files, hash_bytes, hash_file, hash_text, now_ms, MarkdownFile};
use super::layout::WorkspaceLayout;
use super::lock::{self, LockOptions};
use super::{f32s_to_le_bytes, IndexSettings, SyncSummary};

#[derive(Debug, Clone)]
struct FileRecord {
    hash: String,
    mtime: i64,
    size: i64,
}

/// Whether the index disagrees with the on-disk workspace or the current
/// settings. Cheap except for hashing files whose `(mtime, size)` drifted.
pub fn needs_update(
    store: &IndexStore,
    layout: &WorkspaceLayout,
    settings: &IndexSettings,
    provider: Option<&dyn EmbeddingProvider>,
) -> Result<bool> {
    let meta = store.read_meta()?;
    if meta.chunking != settings.chunking {
        return Ok(true);
    }

    if let Some(provider) = provider {
        if meta.model != provider.model_path() {
            return Ok(true);
        }
    }

    let tracked = load_file_records(store)?;
    let disk = collect_memory_files(layout)?;

    let mut seen = HashSet::new();
    for file in &disk {
        seen.insert(file.rel_path.as_str());
        match tracked.get(&file.rel_path) {
            None => return Ok(true),
            Some(record) if record.mtime != file.mtime_ms || record.size != file.size => {
                if hash_file(&file.abs_path)? != record.hash {
                    return Ok(true);
                }
            }
            Some(_) => {}
        }
    }

    Ok(tracked.keys().any(|path| !seen.contains(path.as_str())))
}

/// Bring the index into agreement with the on-disk files, serializing with
/// other processes through the workspace's index lock.
pub fn ensure_up_to_date(
    store: &mut IndexStore,
    layout: &WorkspaceLayout,
    settings: &IndexSettings,
    provider: Option<&dyn EmbeddingProvider>,
) -> Result<SyncSummary> {
    if !needs_update(store, layout, settings, provider)? {
        return Ok(SyncSummary::default());
    }

    let lock_path = layout.index_lock_path();
    let options = LockOptions::default();
    // A live holder means another process is indexing; wait it out before
    // contending for the exclusive create.
    lock::wait_for_release(&lock_path, &options)?;
    let guard = lock::acquire(&lock_path, &options)?;
    // The guard's drop covers the error path; explicit release surfaces
    // unlink failures on success.
    let summary = sync_locked(store, layout, settings, provider)?;
    guard.release()?;

    Ok(summary)
}

/// Rebuild the index from scratch under the workspace lock.
pub fn reindex(
    store: &mut IndexStore,
    layout: &WorkspaceLayout,
    settings: &IndexSettings,
    provider: Option<&dyn EmbeddingProvider>,
) -> Result<SyncSummary> {
    let guard = lock::acquire(&layout.index_lock_path(), &LockOptions::default())?;
    let summary = reindex_locked(store, layout, settings, provider)?;
    guard.release()?;

    Ok(summary)
}

fn sync_locked(
    store: &mut IndexStore,
    layout: &WorkspaceLayout,
    settings: &IndexSettings,
    provider: Option<&dyn EmbeddingProvider>,
) -> Result<SyncSummary> {
    // Another process may have finished the same work while we waited.
    if !needs_update(store, layout, settings, provider)? {
        return Ok(SyncSummary::default());
    }

    let meta = store.read_meta()?;
    let model_changed = provider
        .map(|provider| meta.model != provider.model_path())
        .unwrap_or(false);
    if meta.chunking != settings.chunking || model_changed {
        return reindex_locked(store, layout, settings, provider);
    }

    store.purge_orphan_vectors_once()?;

    let tracked = load_file_records(store)?;
    let disk = collect_memory_files(layout)?;

    let mut summary = SyncSummary {
        files_scanned: disk.len(),
        ..Default::default()
    };

    let mut seen = HashSet::new();
    for file in &disk {
        seen.insert(file.rel_path.clone());

        match tracked.get(&file.rel_path) {
            None => index_file(store, settings, provider, file, &mut summary)?,
            Some(record) if record.mtime != file.mtime_ms || record.size != file.size => {
                if hash_file(&file.abs_path)? != record.hash {
                    index_file(store, settings, provider, file, &mut summary)?;
                } else {
                    // Content is unchanged; refresh the stat columns so the
                    // next run takes the fast path again.
                    store
                        .conn()
                        .execute(
                            "UPDATE files SET mtime = ?1, size = ?2 WHERE path = ?3",
                            params![file.mtime_ms, file.size, file.rel_path],
                        )
                        .with_context(|| {
                            format!("Failed to refresh file stat for {}", file.rel_path)
                        })?;
                    summary.files_touched += 1;
                }
            }
            Some(_) => {}
        }
    }

    for rel_path in tracked.keys() {
        if !seen.contains(rel_path) {
            remove_file_rows(store, rel_path)?;
            summary.files_deleted += 1;
        }
    }

    Ok(summary)
}

fn reindex_locked(
    store: &mut IndexStore,
    layout: &WorkspaceLayout,
    settings: &IndexSettings,
    provider: Option<&dyn EmbeddingProvider>,
) -> Result<SyncSummary> {
    let mut meta = store.read_meta()?;
    meta.chunking = settings.chunking;
    if provider.is_none() {
        meta.model = String::new();
        meta.dims = 0;
    }
    store.write_meta(&meta)?;

    store
        .conn()
        .execute("DELETE FROM chunks", [])
        .context("Failed to clear chunk rows for reindex")?;

    if store.has_table(CHUNK_VEC_TABLE)? {
        if store.vector_extension_available() {
            store.drop_vector_table()?;
        } else if provider.is_some() {
            // Stale vectors for a different corpus cannot be left behind.
            return Err(anyhow!(
                "vector extension unavailable; cannot rebuild the vector table"
            ));
        } else {
            tracing::warn!("vector extension unavailable; leaving vector table for a later purge");
        }
    }

    store
        .conn()
        .execute("DELETE FROM files", [])
        .context("Failed to clear file rows for reindex")?;

    let disk = collect_memory_files(layout)?;
    let mut summary = SyncSummary {
        files_scanned: disk.len(),
        ..Default::default()
    };

    for file in &disk {
        index_file(store, settings, provider, file, &mut summary)?;
    }

    if let Some(provider) = provider {
        // Record the model even when no file produced an embedding, so the
        // next sync does not escalate to another rebuild.
        let mut meta = store.read_meta()?;
        if meta.model != provider.model_path() {
            meta.model = provider.model_path().to_string();
            store.write_meta(&meta)?;
        }
    }

    Ok(summary)
}

/// Rewrite one file's chunk, vector, and file rows inside a single
/// transaction: a crash leaves either the old or the new state, never a mix.
fn index_file(
    store: &mut IndexStore,
    settings: &IndexSettings,
    provider: Option<&dyn EmbeddingProvider>,
    file: &MarkdownFile,
    summary: &mut SyncSummary,
) -> Result<()> {
    let bytes = std::fs::read(&file.abs_path)
        .with_context(|| format!("Failed to read file {}", file.abs_path.display()))?;
    let file_hash = hash_bytes(&bytes);
    let content = String::from_utf8_lossy(&bytes).into_owned();

    let mut chunks = chunking::chunk(&content, &settings.chunking);
    chunks.retain(|chunk| !chunk.content.trim().is_empty());

    let mut embeddings: Vec<Vec<f32>> = vec![Vec::new(); chunks.len()];
    let mut model = String::new();
    let vector_ready = if let Some(provider) = provider {
        let outcome = embed_chunks(store, provider, &chunks, &settings.embedding)?;
        summary.embeddings_computed += outcome.computed;
        summary.embeddings_cached += outcome.cached;
        embeddings = outcome.embeddings;
        model = provider.model_path().to_string();

        let dims = embeddings
            .iter()
            .find(|embedding| !embedding.is_empty())
            .map(|embedding| embedding.len() as i64)
            .unwrap_or(0);
        store.ensure_vector_ready(&model, dims)?.is_ready()
    } else {
        store.vector_search_ready()?
    };

    let now = now_ms();
    let tx = store
        .conn_mut()
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .with_context(|| format!("Failed to start index transaction for {}", file.rel_path))?;

    if vector_ready {
        tx.execute(
            &format!(
                "DELETE FROM {CHUNK_VEC_TABLE} \
                 WHERE id IN (SELECT id FROM chunks WHERE file_path = ?1)"
            ),
            params![file.rel_path],
        )
        .with_context(|| format!("Failed to clear vectors for {}", file.rel_path))?;
    }
    tx.execute(
        "DELETE FROM chunks WHERE file_path = ?1",
        params![file.rel_path],
    )
    .with_context(|| format!("Failed to clear chunks for {}", file.rel_path))?;

    {
        let mut chunk_stmt = tx
            .prepare(
                "INSERT INTO chunks \
                 (id, file_path, line_start, line_end, hash, model, content, embedding, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .context("Failed to prepare chunk insert")?;
        let mut vec_stmt = if vector_ready {
            Some(
                tx.prepare(&format!(
                    "INSERT INTO {CHUNK_VEC_TABLE} (id, embedding) VALUES (?1, vec_f32(?2))"
                ))
                .context("Failed to prepare vector insert")?,
            )
        } else {
            None
        };

        for (ordinal, (chunk, embedding)) in chunks.iter().zip(&embeddings).enumerate() {
            let id = chunk_id(&file.rel_path, chunk.line_start, chunk.line_end, &chunk.hash, ordinal);
            let embedding_json = serde_json::to_string(embedding)
                .context("Failed to encode chunk embedding")?;

            chunk_stmt
                .execute(params![
                    id,
                    file.rel_path,
                    chunk.line_start as i64,
                    chunk.line_end as i64,
                    chunk.hash,
                    model,
                    chunk.content,
                    embedding_json,
                    now
                ])
                .with_context(|| format!("Failed to insert chunk for {}", file.rel_path))?;

            if let Some(stmt) = vec_stmt.as_mut() {
                if !embedding.is_empty() {
                    stmt.execute(params![id, f32s_to_le_bytes(embedding)])
                        .with_context(|| {
                            format!("Failed to insert vector row for {}", file.rel_path)
                        })?;
                }
            }
        }
    }

    tx.execute(
        "INSERT INTO files (path, hash, mtime, size) VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(path) DO UPDATE SET \
             hash = excluded.hash, mtime = excluded.mtime, size = excluded.size",
        params![file.rel_path, file_hash, file.mtime_ms, file.size],
    )
    .with_context(|| format!("Failed to upsert file row for {}", file.rel_path))?;

    tx.commit()
        .with_context(|| format!("Failed to commit index transaction for {}", file.rel_path))?;

    summary.files_indexed += 1;
    summary.chunks_written += chunks.len();
    Ok(())
}

fn remove_file_rows(store: &mut IndexStore, rel_path: &str) -> Result<()> {
    let vector_ready = store.vector_search_ready()?;

    let tx = store
        .conn_mut()
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .with_context(|| format!("Failed to start delete transaction for {rel_path}"))?;

    if vector_ready {
        tx.execute(
            &format!(
                "DELETE FROM {CHUNK_VEC_TABLE} \
                 WHERE id IN (SELECT id FROM chunks WHERE file_path = ?1)"
            ),
            params![rel_path],
        )
        .with_context(|| format!("Failed to delete vectors for {rel_path}"))?;
    }
    tx.execute("DELETE FROM chunks WHERE file_path = ?1", params![rel_path])
        .with_context(|| format!("Failed to delete chunks for {rel_path}"))?;
    tx.execute("DELETE FROM files WHERE path = ?1", params![rel_path])
        .with_context(|| format!("Failed to delete file row for {rel_path}"))?;

    tx.commit()
        .with_context(|| format!("Failed to commit delete transaction for {rel_path}"))
}

/// Stable chunk identity: SHA-256 over the file-relative coordinates, the
/// content hash, and the ordinal within the file.
fn chunk_id(
    rel_path: &str,
    line_start: usize,
    line_end: usize,
    content_hash: &str,
    ordinal: usize,
) -> String {
    hash_text(&format!(
        "{rel_path}:{line_start}:{line_end}:{content_hash}:{ordinal}"
    ))
}

fn load_file_records(store: &IndexStore) -> Result<HashMap<String, FileRecord>> {
    let mut stmt = store
        .conn()
        .prepare("SELECT path, hash, mtime, size FROM files")
        .context("Failed to prepare file record query")?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                FileRecord {
                    hash: row.get(1)?,
                    mtime: row.get(2)?,
                    size: row.get(3)?,
                },
            ))
        })
        .context("Failed to load file records")?;

    let mut records = HashMap::new();
    for row in rows {
        let (path, record) = row?;
        records.insert(path, record);
    }

    Ok(records)
}
