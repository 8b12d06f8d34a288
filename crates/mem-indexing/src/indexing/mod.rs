//! Indexing pipeline for the Markdown files inside a memory workspace.
//!
//! The overall flow is:
//! 1. `sync::ensure_up_to_date` acquires the workspace's index lock, decides
//!    which files drifted, and re-chunks exactly those.
//! 2. Chunks are embedded through the content-addressed cache so unchanged
//!    text never hits the model twice, then written transactionally per file
//!    together with their vector rows.
//! 3. `search::search_vector` ranks chunks by cosine similarity, natively
//!    when the sqlite-vec table is usable and in-process otherwise.

pub mod chunking;
pub mod embedding;
pub mod files;
pub mod layout;
pub mod lock;
pub mod search;
pub mod sync;

#[cfg(test)]
mod tests;

use serde::Serialize;

pub use mem_storage::ChunkParams;

/// Validated configuration consumed by the sync engine; assembled by the
/// settings collaborator.
#[derive(Debug, Clone, Default)]
pub struct IndexSettings {
    pub chunking: ChunkParams,
    pub embedding: embedding::EmbedSettings,
}

/// What one sync run did, for status output and logs.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    /// Markdown files found on disk.
    pub files_scanned: usize,
    /// Files whose chunks were rewritten.
    pub files_indexed: usize,
    /// Files whose `(mtime, size)` was refreshed without re-chunking.
    pub files_touched: usize,
    /// Tracked files that disappeared from disk.
    pub files_deleted: usize,
    /// Chunk rows written across all indexed files.
    pub chunks_written: usize,
    /// Embeddings computed by the provider (cache misses).
    pub embeddings_computed: usize,
    /// Embeddings served from the cache.
    pub embeddings_cached: usize,
}

pub(crate) fn f32s_to_le_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * std::mem::size_of::<f32>());
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}
