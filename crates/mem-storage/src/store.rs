use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::sqlite_ext;

/// Name of the sqlite-vec virtual table holding one row per embedded chunk.
pub const CHUNK_VEC_TABLE: &str = "chunk_vec";

const META_KEY: &str = "index_meta";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Chunking parameters recorded alongside the index so a settings change can
/// be detected as drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChunkParams {
    pub tokens: u32,
    pub overlap: u32,
    pub min_chars: u32,
    pub chars_per_token: u32,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            tokens: 200,
            overlap: 40,
            min_chars: 64,
            chars_per_token: 4,
        }
    }
}

/// Single JSON blob persisted under a well-known `meta` key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexMeta {
    /// Embedding model identifier active when the index was produced.
    /// Empty when the index was built without embeddings.
    pub model: String,
    /// Embedding dimensionality, 0 when unknown.
    pub dims: i64,
    /// Last-known vector extension identifier (sqlite-vec version string).
    pub vector_extension: String,
    pub chunking: ChunkParams,
}

/// Outcome of [`IndexStore::ensure_vector_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorReadiness {
    Ready,
    NotReady,
}

impl VectorReadiness {
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VectorExtension {
    Unprobed,
    Available,
    Unavailable,
}

/// Handle on the per-workspace index database.
///
/// The vector-extension probe result and the one-shot orphan-purge flag live
/// here so every connection carries its own state instead of leaning on
/// process globals.
pub struct IndexStore {
    conn: Connection,
    extension: VectorExtension,
    orphans_purged: bool,
}

const CHUNKS_DDL: &str = "CREATE TABLE IF NOT EXISTS chunks ( \
     id TEXT PRIMARY KEY, \
     file_path TEXT NOT NULL, \
     line_start INTEGER NOT NULL, \
     line_end INTEGER NOT NULL, \
     hash TEXT NOT NULL, \
     model TEXT NOT NULL DEFAULT '', \
     content TEXT NOT NULL, \
     embedding TEXT NOT NULL DEFAULT '[]', \
     updated_at INTEGER NOT NULL \
 )";

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS meta ( \
    key TEXT PRIMARY KEY, \
    value TEXT NOT NULL \
); \
CREATE TABLE IF NOT EXISTS files ( \
    path TEXT PRIMARY KEY, \
    hash TEXT NOT NULL, \
    mtime INTEGER NOT NULL, \
    size INTEGER NOT NULL \
); \
CREATE TABLE IF NOT EXISTS embedding_cache ( \
    model TEXT NOT NULL, \
    hash TEXT NOT NULL, \
    embedding TEXT NOT NULL, \
    dims INTEGER NOT NULL, \
    updated_at INTEGER NOT NULL, \
    PRIMARY KEY (model, hash) \
); \
CREATE INDEX IF NOT EXISTS idx_embedding_cache_updated_at \
    ON embedding_cache(updated_at); \
CREATE INDEX IF NOT EXISTS idx_chunks_file_path ON chunks(file_path);";

const REQUIRED_CHUNK_COLUMNS: [&str; 9] = [
    "id",
    "file_path",
    "line_start",
    "line_end",
    "hash",
    "model",
    "content",
    "embedding",
    "updated_at",
];

impl IndexStore {
    /// Open or create the index database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        // Best effort: the store stays usable without the extension and
        // search falls back to the in-process scan.
        if let Err(error) = sqlite_ext::register_auto_extension() {
            tracing::warn!(%error, "vector extension registration failed");
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open index database at {}", db_path.display()))?;

        conn.busy_timeout(BUSY_TIMEOUT)
            .context("Failed to set busy timeout on index database")?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable write-ahead journaling")?;

        let mut store = Self {
            conn,
            extension: VectorExtension::Unprobed,
            orphans_purged: false,
        };
        store.ensure_schema()?;

        Ok(store)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CHUNKS_DDL)
            .context("Failed to ensure chunks table")?;

        if let Some(missing) = self.missing_chunk_column()? {
            // Schema drift from an older build: drop and recreate rather
            // than attempting a column-by-column migration.
            tracing::warn!(column = missing, "chunks table schema mismatch, recreating");
            self.conn
                .execute_batch("DROP TABLE chunks")
                .context("Failed to drop out-of-date chunks table")?;
            if self.has_table(CHUNK_VEC_TABLE)? {
                if let Err(error) = self
                    .conn
                    .execute_batch(&format!("DROP TABLE IF EXISTS {CHUNK_VEC_TABLE}"))
                {
                    tracing::warn!(%error, "failed to drop stale vector table");
                }
            }
            self.conn
                .execute_batch(CHUNKS_DDL)
                .context("Failed to recreate chunks table")?;
        }

        self.conn
            .execute_batch(SCHEMA)
            .context("Failed to ensure index schema")?;

        Ok(())
    }

    fn missing_chunk_column(&self) -> Result<Option<&'static str>> {
        let mut stmt = self
            .conn
            .prepare("PRAGMA table_info(chunks)")
            .context("Failed to inspect chunks table")?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .context("Failed to read chunks table info")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to decode chunks table info")?;

        Ok(REQUIRED_CHUNK_COLUMNS
            .iter()
            .find(|required| !columns.iter().any(|column| column == *required))
            .copied())
    }

    pub fn has_table(&self, name: &str) -> Result<bool> {
        let exists: i64 = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                params![name],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to check table existence for {name}"))?;

        Ok(exists != 0)
    }

    pub fn read_meta(&self) -> Result<IndexMeta> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![META_KEY],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read index metadata")?;

        match value {
            Some(json) => serde_json::from_str(&json).context("Failed to decode index metadata"),
            None => Ok(IndexMeta::default()),
        }
    }

    pub fn write_meta(&self, meta: &IndexMeta) -> Result<()> {
        let json = serde_json::to_string(meta).context("Failed to encode index metadata")?;
        self.conn
            .execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![META_KEY, json],
            )
            .context("Failed to write index metadata")?;

        Ok(())
    }

    /// Whether similarity functions are callable on this connection.
    ///
    /// The probe runs once per store; later calls return the cached result.
    pub fn vector_extension_available(&mut self) -> bool {
        if self.extension == VectorExtension::Unprobed {
            self.extension = match sqlite_ext::probe_vector_extension(&self.conn) {
                Some(_) => VectorExtension::Available,
                None => VectorExtension::Unavailable,
            };
        }

        self.extension == VectorExtension::Available
    }

    /// True when vector search can use the native table: the extension is
    /// loaded and the virtual table exists.
    pub fn vector_search_ready(&mut self) -> Result<bool> {
        Ok(self.vector_extension_available() && self.has_table(CHUNK_VEC_TABLE)?)
    }

    /// Bring the vector virtual table in line with `(model, dims)`.
    ///
    /// Never called with a freshly opened store unless a positive `dims` is
    /// already known; opening the database alone must not create the table.
    pub fn ensure_vector_ready(&mut self, model: &str, dims: i64) -> Result<VectorReadiness> {
        if dims <= 0 {
            return Ok(VectorReadiness::NotReady);
        }

        let mut meta = self.read_meta()?;

        if !self.vector_extension_available() {
            meta.model = model.to_string();
            meta.dims = dims;
            self.write_meta(&meta)?;
            return Ok(VectorReadiness::NotReady);
        }

        let target_changed = meta.model != model || meta.dims != dims;
        if target_changed && self.has_table(CHUNK_VEC_TABLE)? {
            self.conn
                .execute_batch(&format!("DROP TABLE {CHUNK_VEC_TABLE}"))
                .context("Failed to drop vector table for model change")?;
        }

        if !self.has_table(CHUNK_VEC_TABLE)? {
            self.conn
                .execute_batch(&format!(
                    "CREATE VIRTUAL TABLE {CHUNK_VEC_TABLE} USING vec0( \
                         id TEXT PRIMARY KEY, \
                         embedding FLOAT[{dims}] \
                     )"
                ))
                .with_context(|| format!("Failed to create vector table with {dims} dims"))?;
        }

        meta.model = model.to_string();
        meta.dims = dims;
        meta.vector_extension = sqlite_ext::probe_vector_extension(&self.conn).unwrap_or_default();
        self.write_meta(&meta)?;

        Ok(VectorReadiness::Ready)
    }

    /// Drop the vector table if present. Fails when the table exists but the
    /// extension cannot be loaded, since stale vectors must not survive a
    /// rebuild silently.
    pub fn drop_vector_table(&mut self) -> Result<bool> {
        if !self.has_table(CHUNK_VEC_TABLE)? {
            return Ok(false);
        }

        self.conn
            .execute_batch(&format!("DROP TABLE {CHUNK_VEC_TABLE}"))
            .context("Failed to drop vector table")?;

        Ok(true)
    }

    /// Delete vector rows whose chunk no longer exists. Runs at most once per
    /// store handle; cheap no-op afterwards.
    pub fn purge_orphan_vectors_once(&mut self) -> Result<usize> {
        if self.orphans_purged {
            return Ok(0);
        }
        self.orphans_purged = true;

        if !self.vector_search_ready()? {
            return Ok(0);
        }

        let purged = self
            .conn
            .execute(
                &format!(
                    "DELETE FROM {CHUNK_VEC_TABLE} \
                     WHERE id NOT IN (SELECT id FROM chunks)"
                ),
                [],
            )
            .context("Failed to purge orphaned vector rows")?;

        if purged > 0 {
            tracing::debug!(purged, "removed orphaned vector rows");
        }

        Ok(purged)
    }
}
