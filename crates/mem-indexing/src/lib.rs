//! Indexing and retrieval core for mem-cli workspaces.
//!
//! Turns a tree of Markdown memory files into a searchable SQLite index:
//! chunking, cached embeddings, incremental sync under a cross-process lock,
//! and cosine-ranked retrieval with an in-process fallback when the vector
//! extension is unavailable.

pub mod error;
pub mod indexing;

pub use error::IndexError;
pub use indexing::layout::WorkspaceLayout;
pub use indexing::search::SearchHit;
pub use indexing::{IndexSettings, SyncSummary};
