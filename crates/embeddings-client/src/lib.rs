//! Embedding provider capability.
//!
//! The indexing core only needs something that can turn text into vectors
//! under a stable model identifier. The real backend talks to a local Ollama
//! instance; a deterministic mock activates through environment variables so
//! tests and offline runs never touch a model server.

mod mock;
mod ollama;
mod provider_cache;

use anyhow::Result;

pub use mock::MockEmbedder;
pub use ollama::OllamaEmbedder;
pub use provider_cache::{ProviderCache, ProviderStats, ProviderStatsSnapshot};

pub const MOCK_ENV: &str = "MEM_CLI_EMBEDDINGS_MOCK";
pub const MOCK_DIMS_ENV: &str = "MEM_CLI_EMBEDDINGS_MOCK_DIMS";
pub const MOCK_LOAD_MS_ENV: &str = "MEM_CLI_EMBEDDINGS_MOCK_LOAD_MS";

/// Capability required by the indexing core.
///
/// `model_path` is the opaque, stable identifier persisted with every chunk
/// and used as the embedding-cache key component.
pub trait EmbeddingProvider: Send + Sync {
    fn model_path(&self) -> &str;
    fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Identifies one provider instance: the model plus the cache directory used
/// for remote-model downloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderConfig {
    pub model_path: String,
    pub cache_dir: Option<String>,
}

impl ProviderConfig {
    pub fn new(model_path: impl Into<String>) -> Self {
        Self {
            model_path: model_path.into(),
            cache_dir: None,
        }
    }
}

/// Whether the deterministic mock backend is active for this process.
pub fn mock_enabled() -> bool {
    env_truthy(MOCK_ENV)
}

/// Shared truthiness rule for mem-cli environment toggles: unset or one of
/// `"" / 0 / false / no / off` (case-insensitive) is falsey.
pub fn env_truthy(name: &str) -> bool {
    match std::env::var(name) {
        Ok(value) => {
            let normalized = value.trim().to_ascii_lowercase();
            !matches!(normalized.as_str(), "" | "0" | "false" | "no" | "off")
        }
        Err(_) => false,
    }
}

pub(crate) fn l2_normalize(values: &mut [f32]) -> Result<()> {
    let norm = values.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return Err(anyhow::anyhow!(
            "Embedding vector norm must be finite and non-zero for normalization"
        ));
    }

    for value in values {
        *value /= norm;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::env_truthy;

    #[test]
    fn env_truthy_treats_common_falsey_spellings_as_disabled() {
        let name = "MEM_CLI_TEST_TRUTHY";
        for falsey in ["", "0", "false", "FALSE", "no", "off"] {
            std::env::set_var(name, falsey);
            assert!(!env_truthy(name), "{falsey:?} should be falsey");
        }
        for truthy in ["1", "true", "yes", "on", "anything"] {
            std::env::set_var(name, truthy);
            assert!(env_truthy(name), "{truthy:?} should be truthy");
        }
        std::env::remove_var(name);
        assert!(!env_truthy(name));
    }
}
