use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use super::layout::WorkspaceLayout;

/// One Markdown source file eligible for indexing.
#[derive(Debug, Clone)]
pub struct MarkdownFile {
    pub abs_path: PathBuf,
    /// Workspace-relative path with forward-slash separators.
    pub rel_path: String,
    pub size: i64,
    /// Modification time in whole milliseconds since the epoch.
    pub mtime_ms: i64,
}

impl MarkdownFile {
    fn from_workspace_and_abs_path(workspace_root: &Path, abs_path: &Path) -> Result<Self> {
        let rel = abs_path.strip_prefix(workspace_root).with_context(|| {
            format!("Failed to compute relative path for {}", abs_path.display())
        })?;
        let metadata = std::fs::metadata(abs_path)
            .with_context(|| format!("Failed to stat {}", abs_path.display()))?;

        Ok(Self {
            abs_path: abs_path.to_path_buf(),
            rel_path: normalize_rel_path(rel),
            size: i64::try_from(metadata.len()).unwrap_or(i64::MAX),
            mtime_ms: metadata
                .modified()
                .ok()
                .and_then(system_time_to_millis)
                .unwrap_or(0),
        })
    }
}

/// Collect the indexed set: the long-memory file plus every `*.md`
/// descendant of the memory directory. Nothing else in the workspace is
/// indexed.
pub fn collect_memory_files(layout: &WorkspaceLayout) -> Result<Vec<MarkdownFile>> {
    let mut files = Vec::new();

    if let Some(long_memory) = layout.long_memory_path() {
        files.push(MarkdownFile::from_workspace_and_abs_path(
            layout.root(),
            &long_memory,
        )?);
    }

    let memory_dir = layout.memory_dir();
    if memory_dir.is_dir() {
        for entry in WalkDir::new(&memory_dir).follow_links(false) {
            let entry = entry.context("Failed to traverse memory directory")?;
            if !entry.file_type().is_file() || !is_markdown(entry.path()) {
                continue;
            }

            files.push(MarkdownFile::from_workspace_and_abs_path(
                layout.root(),
                entry.path(),
            )?);
        }
    }

    // Deterministic order keeps sync runs and summaries reproducible.
    files.sort_by(|left, right| left.rel_path.cmp(&right.rel_path));
    Ok(files)
}

fn is_markdown(path: &Path) -> bool {
    matches!(path.extension().and_then(OsStr::to_str), Some(ext) if ext.eq_ignore_ascii_case("md"))
}

pub fn normalize_rel_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// SHA-256 of the file's raw bytes, hex encoded.
pub fn hash_file(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read file {}", path.display()))?;
    Ok(hash_bytes(&bytes))
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn hash_text(text: &str) -> String {
    hash_bytes(text.as_bytes())
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

fn system_time_to_millis(time: SystemTime) -> Option<i64> {
    time.duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|duration| i64::try_from(duration.as_millis()).ok())
}
