use std::path::PathBuf;

use anyhow::{Context, Result};
use embeddings_client::ProviderConfig;
use mem_indexing::indexing::embedding::EmbedSettings;
use mem_indexing::IndexSettings;
use mem_storage::ChunkParams;
use serde::{Deserialize, Serialize};

use crate::error::CliError;

pub const HOME_ENV: &str = "MEM_CLI_HOME";
const SETTINGS_FILE: &str = "settings.json";

/// Validated user configuration, loaded from `settings.json` under the
/// mem-cli home. Missing file or fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub chunking: ChunkParams,
    pub embeddings: EmbeddingSettings,
    pub search: SearchSettings,
    pub debug: DebugSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chunking: ChunkParams::default(),
            embeddings: EmbeddingSettings::default(),
            search: SearchSettings::default(),
            debug: DebugSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbeddingSettings {
    /// Opaque model identifier: a local path, a model name, or a remote
    /// specifier such as `hf:…`.
    pub model_path: String,
    /// Optional directory for remote-model caching.
    pub cache_dir: Option<String>,
    pub batch_max_tokens: usize,
    pub approx_chars_per_token: usize,
    pub cache_lookup_batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model_path: "nomic-embed-text".to_string(),
            cache_dir: None,
            batch_max_tokens: 8192,
            approx_chars_per_token: 4,
            cache_lookup_batch_size: 400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchSettings {
    pub limit: usize,
    pub snippet_max_chars: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            limit: 8,
            snippet_max_chars: 240,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DebugSettings {
    pub vector: bool,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let path = settings_path();
        let mut settings = if path.is_file() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings at {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse settings at {}", path.display()))?
        } else {
            Self::default()
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&mut self) -> Result<()> {
        if self.chunking.tokens < 1 {
            return Err(CliError::invalid_input("chunking.tokens must be at least 1").into());
        }
        if self.chunking.min_chars < 1 {
            return Err(CliError::invalid_input("chunking.minChars must be at least 1").into());
        }
        if self.chunking.chars_per_token < 1 {
            return Err(
                CliError::invalid_input("chunking.charsPerToken must be at least 1").into(),
            );
        }
        self.chunking.overlap = self.chunking.overlap.min(self.chunking.tokens - 1);

        if self.embeddings.model_path.trim().is_empty() {
            return Err(CliError::invalid_input("embeddings.modelPath must be set").into());
        }
        if self.search.limit < 1 {
            return Err(CliError::invalid_input("search.limit must be at least 1").into());
        }
        if self.search.snippet_max_chars < 1 {
            return Err(
                CliError::invalid_input("search.snippetMaxChars must be at least 1").into(),
            );
        }

        Ok(())
    }

    pub fn index_settings(&self) -> IndexSettings {
        IndexSettings {
            chunking: self.chunking,
            embedding: EmbedSettings {
                batch_max_tokens: self.embeddings.batch_max_tokens.max(1),
                approx_chars_per_token: self.embeddings.approx_chars_per_token.max(1),
                cache_lookup_batch_size: self.embeddings.cache_lookup_batch_size.max(1),
            },
        }
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            model_path: self.embeddings.model_path.clone(),
            cache_dir: self.embeddings.cache_dir.clone(),
        }
    }
}

/// `$MEM_CLI_HOME`, or `~/.mem-cli`.
pub fn mem_home() -> PathBuf {
    if let Ok(home) = std::env::var(HOME_ENV) {
        if !home.trim().is_empty() {
            return PathBuf::from(home);
        }
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mem-cli")
}

fn settings_path() -> PathBuf {
    mem_home().join(SETTINGS_FILE)
}
