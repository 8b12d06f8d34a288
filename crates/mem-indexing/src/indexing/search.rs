use std::cmp::Ordering;

use anyhow::{Context, Result};
use mem_storage::{IndexStore, CHUNK_VEC_TABLE};
use rusqlite::params_from_iter;
use serde::Serialize;

use super::f32s_to_le_bytes;

/// One ranked retrieval result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub file_path: String,
    pub line_start: i64,
    pub line_end: i64,
    /// Final ranking score; equals `vector_score` in vector-only search.
    pub score: f32,
    pub vector_score: f32,
    pub snippet: String,
}

/// Rank chunks by cosine similarity against `query`.
///
/// Uses the native vector table when it exists and the extension is loaded;
/// otherwise streams chunk rows and scores their JSON embeddings in-process.
pub fn search_vector(
    store: &mut IndexStore,
    query: &[f32],
    k: usize,
    model: Option<&str>,
    snippet_max_chars: usize,
) -> Result<Vec<SearchHit>> {
    if query.is_empty() || k == 0 {
        return Ok(Vec::new());
    }

    if store.vector_search_ready()? {
        search_native(store, query, k, model, snippet_max_chars)
    } else {
        search_fallback(store, query, k, model, snippet_max_chars)
    }
}

fn search_native(
    store: &IndexStore,
    query: &[f32],
    k: usize,
    model: Option<&str>,
    snippet_max_chars: usize,
) -> Result<Vec<SearchHit>> {
    let model_filter = if model.is_some() {
        " AND c.model = ?3"
    } else {
        ""
    };
    let sql = format!(
        "SELECT c.file_path, c.line_start, c.line_end, c.content, \
                vec_distance_cosine(v.embedding, vec_f32(?1)) AS distance \
         FROM {CHUNK_VEC_TABLE} v \
         JOIN chunks c ON c.id = v.id \
         WHERE 1 = 1{model_filter} \
         ORDER BY distance ASC \
         LIMIT ?2"
    );

    let mut stmt = store
        .conn()
        .prepare(&sql)
        .context("Failed to prepare vector search")?;

    let query_bytes = f32s_to_le_bytes(query);
    let mut bound: Vec<rusqlite::types::Value> = vec![
        rusqlite::types::Value::Blob(query_bytes),
        rusqlite::types::Value::Integer(k as i64),
    ];
    if let Some(model) = model {
        bound.push(rusqlite::types::Value::Text(model.to_string()));
    }

    let rows = stmt
        .query_map(params_from_iter(bound), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
            ))
        })
        .context("Failed to run vector search")?;

    let mut hits = Vec::new();
    for row in rows {
        let (file_path, line_start, line_end, content, distance) = row?;
        let score = 1.0 - distance as f32;
        hits.push(SearchHit {
            file_path,
            line_start,
            line_end,
            score,
            vector_score: score,
            snippet: snippet(&content, snippet_max_chars),
        });
    }

    Ok(hits)
}

/// In-process scan over the JSON embedding column.
fn search_fallback(
    store: &IndexStore,
    query: &[f32],
    k: usize,
    model: Option<&str>,
    snippet_max_chars: usize,
) -> Result<Vec<SearchHit>> {
    let sql = match model {
        Some(_) => {
            "SELECT file_path, line_start, line_end, content, embedding \
             FROM chunks WHERE model = ?1"
        }
        None => {
            "SELECT file_path, line_start, line_end, content, embedding \
             FROM chunks"
        }
    };
    let mut stmt = store
        .conn()
        .prepare(sql)
        .context("Failed to prepare fallback search")?;

    let bound: Vec<rusqlite::types::Value> = model
        .map(|model| vec![rusqlite::types::Value::Text(model.to_string())])
        .unwrap_or_default();
    let rows = stmt
        .query_map(params_from_iter(bound), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })
        .context("Failed to run fallback search")?;

    let mut warned_dims = false;
    let mut hits = Vec::new();
    for row in rows {
        let (file_path, line_start, line_end, content, embedding_json) = row?;
        let embedding: Vec<f32> = serde_json::from_str(&embedding_json)
            .with_context(|| format!("Failed to decode stored embedding for {file_path}"))?;

        let score = if embedding.len() != query.len() {
            if !warned_dims {
                warned_dims = true;
                tracing::warn!(
                    stored = embedding.len(),
                    query = query.len(),
                    "stored embedding dimensions differ from query; scoring affected chunks zero"
                );
            }
            0.0
        } else {
            cosine_similarity(query, &embedding)
        };

        hits.push(SearchHit {
            file_path,
            line_start,
            line_end,
            score,
            vector_score: score,
            snippet: snippet(&content, snippet_max_chars),
        });
    }

    hits.sort_by(|left, right| {
        right
            .score
            .partial_cmp(&left.score)
            .unwrap_or(Ordering::Equal)
    });
    hits.truncate(k);

    Ok(hits)
}

/// Dot product over norms in a single pass; zero for degenerate vectors.
fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut left_norm = 0.0f32;
    let mut right_norm = 0.0f32;

    for (a, b) in left.iter().zip(right) {
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    let denom = left_norm.sqrt() * right_norm.sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return 0.0;
    }

    let score = dot / denom;
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

/// Plain prefix snippet; no word-boundary adjustment.
fn snippet(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}
