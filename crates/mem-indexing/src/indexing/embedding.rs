use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use embeddings_client::EmbeddingProvider;
use mem_storage::{cache, IndexStore};

use super::chunking::Chunk;
use super::files::now_ms;
use crate::error::IndexError;

/// Batching knobs for the embedding pipeline.
#[derive(Debug, Clone)]
pub struct EmbedSettings {
    /// Upper bound on the estimated token total of one provider batch.
    pub batch_max_tokens: usize,
    /// Characters per token used for the batch estimate.
    pub approx_chars_per_token: usize,
    /// Chunk hashes per cache lookup statement, bounding SQL parameters.
    pub cache_lookup_batch_size: usize,
}

impl Default for EmbedSettings {
    fn default() -> Self {
        Self {
            batch_max_tokens: 8192,
            approx_chars_per_token: 4,
            cache_lookup_batch_size: 400,
        }
    }
}

/// Outcome of embedding one batch of chunks, aligned with the input order.
#[derive(Debug)]
pub struct EmbedOutcome {
    pub embeddings: Vec<Vec<f32>>,
    pub computed: usize,
    pub cached: usize,
}

/// Resolve one embedding per chunk, consulting the `(model, hash)` cache
/// first and calling the provider only for misses.
///
/// Provider failures abort the whole operation; no partial results are
/// returned and nothing is written for the failed batch.
pub fn embed_chunks(
    store: &IndexStore,
    provider: &dyn EmbeddingProvider,
    chunks: &[Chunk],
    settings: &EmbedSettings,
) -> Result<EmbedOutcome> {
    if chunks.is_empty() {
        return Ok(EmbedOutcome {
            embeddings: Vec::new(),
            computed: 0,
            cached: 0,
        });
    }

    let model = provider.model_path();

    let mut unique_hashes = Vec::new();
    let mut seen = HashSet::new();
    for chunk in chunks {
        if seen.insert(chunk.hash.as_str()) {
            unique_hashes.push(chunk.hash.clone());
        }
    }

    let mut resolved: HashMap<String, Vec<f32>> = HashMap::new();
    let lookup_batch = settings.cache_lookup_batch_size.max(1);
    for batch in unique_hashes.chunks(lookup_batch) {
        resolved.extend(cache::lookup_embeddings(store.conn(), model, batch)?);
    }
    let cached = resolved.len();

    let missing: Vec<&Chunk> = {
        let mut picked = HashSet::new();
        chunks
            .iter()
            .filter(|chunk| !resolved.contains_key(&chunk.hash))
            .filter(|chunk| picked.insert(chunk.hash.as_str()))
            .collect()
    };

    let mut computed = 0usize;
    if !missing.is_empty() {
        let mut fresh: Vec<(String, Vec<f32>)> = Vec::with_capacity(missing.len());

        for batch in group_by_token_estimate(&missing, settings) {
            let texts: Vec<String> = batch
                .iter()
                .map(|chunk| chunk.content.clone())
                .collect();
            let vectors = provider.embed_batch(&texts).map_err(|error| {
                anyhow::Error::new(IndexError::EmbeddingsUnavailable {
                    message: format!("{error:#}"),
                })
            })?;
            if vectors.len() != texts.len() {
                return Err(anyhow::anyhow!(
                    "Embedding provider returned {} vectors for {} texts",
                    vectors.len(),
                    texts.len()
                ));
            }

            for (chunk, vector) in batch.iter().zip(vectors) {
                computed += 1;
                fresh.push((chunk.hash.clone(), vector));
            }
        }

        cache::store_embeddings(store.conn(), model, &fresh, now_ms())
            .context("Failed to persist freshly computed embeddings")?;
        resolved.extend(fresh);
    }

    let embeddings = chunks
        .iter()
        .map(|chunk| resolved.get(&chunk.hash).cloned().unwrap_or_default())
        .collect();

    Ok(EmbedOutcome {
        embeddings,
        computed,
        cached,
    })
}

/// Greedy grouping by estimated token count. A single chunk whose estimate
/// exceeds the budget forms a batch by itself.
fn group_by_token_estimate<'a>(
    chunks: &[&'a Chunk],
    settings: &EmbedSettings,
) -> Vec<Vec<&'a Chunk>> {
    let chars_per_token = settings.approx_chars_per_token.max(1);
    let budget = settings.batch_max_tokens.max(1);

    let mut batches = Vec::new();
    let mut current: Vec<&Chunk> = Vec::new();
    let mut current_tokens = 0usize;

    for chunk in chunks {
        let estimate = chunk.content.chars().count().div_ceil(chars_per_token);

        if !current.is_empty() && current_tokens + estimate > budget {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }

        current.push(chunk);
        current_tokens += estimate;
    }

    if !current.is_empty() {
        batches.push(current);
    }

    batches
}

#[cfg(test)]
mod unit_tests {
    use super::{group_by_token_estimate, EmbedSettings};
    use crate::indexing::chunking::Chunk;
    use crate::indexing::files::hash_text;

    fn chunk_of(len: usize) -> Chunk {
        let content = "x".repeat(len);
        Chunk {
            hash: hash_text(&content),
            content,
            line_start: 1,
            line_end: 1,
        }
    }

    fn settings(batch_max_tokens: usize) -> EmbedSettings {
        EmbedSettings {
            batch_max_tokens,
            approx_chars_per_token: 4,
            cache_lookup_batch_size: 400,
        }
    }

    #[test]
    fn batches_respect_the_token_budget() {
        let chunks = vec![chunk_of(40), chunk_of(40), chunk_of(40)];
        let refs: Vec<&Chunk> = chunks.iter().collect();

        // 10 estimated tokens each, budget 20 -> two batches.
        let batches = group_by_token_estimate(&refs, &settings(20));
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn oversized_chunk_forms_its_own_batch() {
        let chunks = vec![chunk_of(8), chunk_of(400), chunk_of(8)];
        let refs: Vec<&Chunk> = chunks.iter().collect();

        let batches = group_by_token_estimate(&refs, &settings(10));
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1].len(), 1);
        assert_eq!(batches[1][0].content.len(), 400);
    }

    #[test]
    fn order_is_preserved_across_batches() {
        let chunks: Vec<Chunk> = (1..=5).map(|index| chunk_of(index * 8)).collect();
        let refs: Vec<&Chunk> = chunks.iter().collect();

        let batches = group_by_token_estimate(&refs, &settings(6));
        let flattened: Vec<usize> = batches
            .into_iter()
            .flatten()
            .map(|chunk| chunk.content.len())
            .collect();
        assert_eq!(flattened, vec![8, 16, 24, 32, 40]);
    }
}
