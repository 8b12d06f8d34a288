use std::time::Duration;

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

use crate::{l2_normalize, EmbeddingProvider, ProviderStats, MOCK_DIMS_ENV, MOCK_LOAD_MS_ENV};

const DEFAULT_DIMS: usize = 16;

/// Deterministic offline backend: unit vectors derived from SHA-256 of the
/// input text. Identical text always embeds identically, across processes.
pub struct MockEmbedder {
    model: String,
    dims: usize,
}

impl MockEmbedder {
    /// Build the mock, honoring `MEM_CLI_EMBEDDINGS_MOCK_DIMS` and the
    /// simulated model-load delay in `MEM_CLI_EMBEDDINGS_MOCK_LOAD_MS`.
    pub fn from_env(model_path: &str, stats: &ProviderStats) -> Result<Self> {
        let dims = match std::env::var(MOCK_DIMS_ENV) {
            Ok(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|_| anyhow!("{MOCK_DIMS_ENV} must be a positive integer, got {raw:?}"))?,
            Err(_) => DEFAULT_DIMS,
        };
        if dims == 0 {
            return Err(anyhow!("{MOCK_DIMS_ENV} must be at least 1"));
        }

        stats.record_runtime_init();
        stats.record_context_create();

        if let Ok(raw) = std::env::var(MOCK_LOAD_MS_ENV) {
            if let Ok(delay_ms) = raw.trim().parse::<u64>() {
                std::thread::sleep(Duration::from_millis(delay_ms));
            }
        }
        stats.record_model_load();

        Ok(Self {
            model: model_path.to_string(),
            dims,
        })
    }

    pub fn with_dims(model_path: &str, dims: usize) -> Self {
        Self {
            model: model_path.to_string(),
            dims,
        }
    }

    fn derive(&self, text: &str) -> Result<Vec<f32>> {
        let mut values = Vec::with_capacity(self.dims);
        let mut block: u32 = 0;
        while values.len() < self.dims {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(block.to_le_bytes());
            for byte in hasher.finalize() {
                if values.len() == self.dims {
                    break;
                }
                // Map each digest byte into [-1, 1].
                values.push(f32::from(byte) / 127.5 - 1.0);
            }
            block += 1;
        }

        l2_normalize(&mut values)?;
        Ok(values)
    }
}

impl EmbeddingProvider for MockEmbedder {
    fn model_path(&self) -> &str {
        &self.model
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.derive(text)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.derive(text)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::MockEmbedder;
    use crate::EmbeddingProvider;

    #[test]
    fn vectors_are_deterministic_unit_length() {
        let mock = MockEmbedder::with_dims("mock-model", 24);

        let first = mock.embed_query("kiwi").unwrap();
        let second = mock.embed_query("kiwi").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 24);

        let norm = first.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
    }

    #[test]
    fn different_texts_produce_different_vectors() {
        let mock = MockEmbedder::with_dims("mock-model", 8);

        let kiwi = mock.embed_query("kiwi").unwrap();
        let mango = mock.embed_query("mango").unwrap();
        assert_ne!(kiwi, mango);
    }

    #[test]
    fn batch_order_matches_input_order() {
        let mock = MockEmbedder::with_dims("mock-model", 8);
        let texts = vec!["a".to_string(), "b".to_string(), "a".to_string()];

        let vectors = mock.embed_batch(&texts).unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vectors[2]);
        assert_ne!(vectors[0], vectors[1]);
    }
}
