use std::path::{Path, PathBuf};

/// Long-memory filenames, probed in order; the first existing one is indexed.
pub const LONG_MEMORY_CANDIDATES: &[&str] = &["MEMORY.md"];

pub const MEMORY_DIR_NAME: &str = "memory";
pub const INDEX_DB_NAME: &str = "index.db";
pub const INDEX_LOCK_NAME: &str = "index.db.lock";

/// Maps a workspace root to its canonical sub-paths.
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_db_path(&self) -> PathBuf {
        self.root.join(INDEX_DB_NAME)
    }

    pub fn index_lock_path(&self) -> PathBuf {
        self.root.join(INDEX_LOCK_NAME)
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.root.join(MEMORY_DIR_NAME)
    }

    /// The long-memory file that exists on disk, if any.
    pub fn long_memory_path(&self) -> Option<PathBuf> {
        LONG_MEMORY_CANDIDATES
            .iter()
            .map(|name| self.root.join(name))
            .find(|path| path.is_file())
    }

    /// Where the long-memory file is created when absent.
    pub fn long_memory_default_path(&self) -> PathBuf {
        self.root.join(LONG_MEMORY_CANDIDATES[0])
    }
}

#[cfg(test)]
mod tests {
    use super::WorkspaceLayout;

    #[test]
    fn sub_paths_hang_off_the_workspace_root() {
        let layout = WorkspaceLayout::new("/ws");

        assert_eq!(layout.index_db_path(), std::path::Path::new("/ws/index.db"));
        assert_eq!(
            layout.index_lock_path(),
            std::path::Path::new("/ws/index.db.lock")
        );
        assert_eq!(layout.memory_dir(), std::path::Path::new("/ws/memory"));
        assert_eq!(
            layout.long_memory_default_path(),
            std::path::Path::new("/ws/MEMORY.md")
        );
    }
}
