use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{mock_enabled, EmbeddingProvider, MockEmbedder, OllamaEmbedder, ProviderConfig};

/// Construction and load counters for the active process.
///
/// The daemon surfaces a snapshot of these in its ping response, which is how
/// tests prove the model is loaded exactly once under concurrent clients.
#[derive(Debug, Default)]
pub struct ProviderStats {
    provider_create_count: AtomicU64,
    runtime_init_count: AtomicU64,
    model_load_count: AtomicU64,
    context_create_count: AtomicU64,
}

impl ProviderStats {
    pub fn record_provider_create(&self) {
        self.provider_create_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_runtime_init(&self) {
        self.runtime_init_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_model_load(&self) {
        self.model_load_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_context_create(&self) {
        self.context_create_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of [`ProviderStats`], in the daemon's wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatsSnapshot {
    pub provider_cache_size: u64,
    pub provider_create_count: u64,
    #[serde(rename = "llamaInitCount")]
    pub runtime_init_count: u64,
    pub model_load_count: u64,
    pub context_create_count: u64,
    pub mock_enabled: bool,
}

/// Per-process provider cache keyed by `(modelPath, cacheDir)`.
///
/// The first lookup for a key constructs (and warms) the provider; every
/// later lookup reuses the same instance.
#[derive(Default)]
pub struct ProviderCache {
    providers: Mutex<HashMap<(String, String), Arc<dyn EmbeddingProvider>>>,
    stats: ProviderStats,
}

impl ProviderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, config: &ProviderConfig) -> Result<Arc<dyn EmbeddingProvider>> {
        let key = (
            config.model_path.clone(),
            config.cache_dir.clone().unwrap_or_default(),
        );

        let mut providers = self
            .providers
            .lock()
            .map_err(|_| anyhow::anyhow!("provider cache lock poisoned"))?;

        if let Some(provider) = providers.get(&key) {
            return Ok(Arc::clone(provider));
        }

        self.stats.record_provider_create();
        let provider: Arc<dyn EmbeddingProvider> = if mock_enabled() {
            Arc::new(
                MockEmbedder::from_env(&config.model_path, &self.stats)
                    .context("Failed to create mock embedding provider")?,
            )
        } else {
            Arc::new(
                OllamaEmbedder::new(&config.model_path, &self.stats)
                    .context("Failed to create embedding provider")?,
            )
        };

        providers.insert(key, Arc::clone(&provider));
        Ok(provider)
    }

    pub fn snapshot(&self) -> ProviderStatsSnapshot {
        let cache_size = self
            .providers
            .lock()
            .map(|providers| providers.len() as u64)
            .unwrap_or(0);

        ProviderStatsSnapshot {
            provider_cache_size: cache_size,
            provider_create_count: self.stats.provider_create_count.load(Ordering::Relaxed),
            runtime_init_count: self.stats.runtime_init_count.load(Ordering::Relaxed),
            model_load_count: self.stats.model_load_count.load(Ordering::Relaxed),
            context_create_count: self.stats.context_create_count.load(Ordering::Relaxed),
            mock_enabled: mock_enabled(),
        }
    }
}
