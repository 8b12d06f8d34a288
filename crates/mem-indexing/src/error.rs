use std::path::PathBuf;

use thiserror::Error;

/// Structured failures callers are expected to branch on.
///
/// Everything else propagates as contextual `anyhow` errors and is rendered
/// only by the CLI front-end.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("timed out waiting for index lock at {path} after {waited_ms} ms")]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("embeddings unavailable: {message}")]
    EmbeddingsUnavailable { message: String },
}

impl IndexError {
    /// True when `error` (at any level of its chain) is an embeddings
    /// failure a command may downgrade to a warning.
    pub fn is_embeddings_unavailable(error: &anyhow::Error) -> bool {
        error
            .chain()
            .any(|cause| matches!(cause.downcast_ref(), Some(Self::EmbeddingsUnavailable { .. })))
    }
}
