use anyhow::{anyhow, Context, Result};
use ollama_rs::{generation::embeddings::request::GenerateEmbeddingsRequest, Ollama};

use crate::{l2_normalize, EmbeddingProvider, ProviderStats};

/// Embedding backend talking to a local Ollama instance.
///
/// Construction is the expensive step: it initializes the async runtime,
/// creates the client, and performs a warm-up embedding so the model is
/// resident before the first real batch.
pub struct OllamaEmbedder {
    model: String,
    ollama: Ollama,
    runtime: tokio::runtime::Runtime,
}

impl OllamaEmbedder {
    pub fn new(model_path: &str, stats: &ProviderStats) -> Result<Self> {
        if model_path.trim().is_empty() {
            return Err(anyhow!("Embedding model must be provided"));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to create async runtime for embedding requests")?;
        stats.record_runtime_init();

        let ollama = Ollama::default();
        stats.record_context_create();

        let embedder = Self {
            model: model_path.to_string(),
            ollama,
            runtime,
        };

        // Warm-up resolves model availability up front so sync failures
        // surface before any index rows are written.
        embedder
            .generate(vec!["warm-up".to_string()])
            .with_context(|| format!("Failed to load embedding model '{model_path}'"))?;
        stats.record_model_load();

        Ok(embedder)
    }

    fn generate(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let expected = texts.len();
        let request = GenerateEmbeddingsRequest::new(self.model.clone(), texts.into());

        let response = self.runtime.block_on(async {
            self.ollama
                .generate_embeddings(request)
                .await
                .context("Failed to generate embeddings with Ollama")
        })?;

        let mut vectors = response.embeddings;
        if vectors.len() != expected {
            return Err(anyhow!(
                "Ollama returned {} embeddings for {} inputs",
                vectors.len(),
                expected
            ));
        }

        for vector in &mut vectors {
            if vector.is_empty() {
                return Err(anyhow!(
                    "Ollama returned an embedding with zero dimensions for model '{}'",
                    self.model
                ));
            }
            l2_normalize(vector).with_context(|| {
                format!(
                    "Embedding vector for model '{}' contained invalid values",
                    self.model
                )
            })?;
        }

        Ok(vectors)
    }
}

impl EmbeddingProvider for OllamaEmbedder {
    fn model_path(&self) -> &str {
        &self.model
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.generate(vec![text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| anyhow!("Ollama returned an empty embeddings list"))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.generate(texts.to_vec())
    }
}
