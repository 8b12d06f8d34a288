//! Embedding-cache rows keyed by `(model, chunk hash)`.
//!
//! Rows are written on first computation and only ever invalidated by the
//! user deleting the database file; the batching that keeps SQL parameter
//! counts bounded lives with the indexing pipeline, not here.

use std::collections::HashMap;

use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Connection};

/// Look up cached embeddings for one batch of chunk hashes.
///
/// Returns only hashes with a non-empty stored vector; callers treat every
/// other hash as missing.
pub fn lookup_embeddings(
    conn: &Connection,
    model: &str,
    hashes: &[String],
) -> Result<HashMap<String, Vec<f32>>> {
    if hashes.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders = vec!["?"; hashes.len()].join(", ");
    let sql = format!(
        "SELECT hash, embedding FROM embedding_cache \
         WHERE model = ? AND hash IN ({placeholders})"
    );
    let mut stmt = conn
        .prepare(&sql)
        .context("Failed to prepare embedding cache lookup")?;

    let bound = std::iter::once(model.to_string()).chain(hashes.iter().cloned());
    let rows = stmt
        .query_map(params_from_iter(bound), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .context("Failed to query embedding cache")?;

    let mut found = HashMap::new();
    for row in rows {
        let (hash, embedding_json) = row?;
        let embedding: Vec<f32> = serde_json::from_str(&embedding_json)
            .with_context(|| format!("Failed to decode cached embedding for hash {hash}"))?;
        if !embedding.is_empty() {
            found.insert(hash, embedding);
        }
    }

    Ok(found)
}

/// Insert or refresh cache rows for newly computed embeddings.
pub fn store_embeddings(
    conn: &Connection,
    model: &str,
    entries: &[(String, Vec<f32>)],
    now_ms: i64,
) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }

    let mut stmt = conn
        .prepare(
            "INSERT INTO embedding_cache (model, hash, embedding, dims, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(model, hash) DO UPDATE SET \
                 embedding = excluded.embedding, \
                 dims = excluded.dims, \
                 updated_at = excluded.updated_at",
        )
        .context("Failed to prepare embedding cache insert")?;

    for (hash, embedding) in entries {
        let embedding_json =
            serde_json::to_string(embedding).context("Failed to encode embedding for cache")?;
        stmt.execute(params![
            model,
            hash,
            embedding_json,
            embedding.len() as i64,
            now_ms
        ])
        .with_context(|| format!("Failed to cache embedding for hash {hash}"))?;
    }

    Ok(())
}

/// Total number of cache rows, across models.
pub fn count_rows(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM embedding_cache", [], |row| row.get(0))
        .context("Failed to count embedding cache rows")
}
