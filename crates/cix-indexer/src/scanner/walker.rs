//! Project tree walker with gitignore support.

use crate::IndexerError;
use ignore::{WalkBuilder, WalkState};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::debug;

/// A discovered file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute path to the file
    pub path: PathBuf,
    /// Path relative to the project root
    pub relative: PathBuf,
    /// File size in bytes
    pub size: u64,
}

impl FileEntry {
    /// File name of the entry.
    pub fn basename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Directory containing the entry, relative to the project root.
    /// Empty for files at the root.
    pub fn relative_dir(&self) -> PathBuf {
        self.relative
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

/// Walks a project tree, honouring `.gitignore` and skipping hidden files.
#[derive(Debug, Clone)]
pub struct Walker {
    root: PathBuf,
    start: PathBuf,
    max_depth: Option<usize>,
    follow_symlinks: bool,
}

impl Walker {
    /// Walk the whole project rooted at `root`.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            start: root.to_path_buf(),
            max_depth: None,
            follow_symlinks: false,
        }
    }

    /// Restrict the walk to one subdirectory. Relative paths stay relative
    /// to the project root.
    pub fn within(mut self, subdir: &Path) -> Self {
        self.start = self.root.join(subdir);
        self
    }

    /// Only visit files directly inside the start directory.
    pub fn shallow(mut self) -> Self {
        self.max_depth = Some(1);
        self
    }

    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Walk and return all files, sorted by path.
    pub fn walk(&self) -> Result<Vec<FileEntry>, IndexerError> {
        if !self.start.is_dir() {
            return Err(IndexerError::NotFound(self.start.clone()));
        }

        let (tx, rx) = mpsc::channel();

        let walker = WalkBuilder::new(&self.start)
            .follow_links(self.follow_symlinks)
            .max_depth(self.max_depth)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .ignore(true)
            .parents(true)
            .build_parallel();

        let root = self.root.as_path();
        walker.run(|| {
            let tx = tx.clone();
            Box::new(move |result| {
                match result {
                    Ok(entry) => {
                        if entry.file_type().is_some_and(|ft| ft.is_file()) {
                            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                            let path = entry.path().to_path_buf();
                            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
                            let _ = tx.send(FileEntry {
                                path,
                                relative,
                                size,
                            });
                        }
                    }
                    Err(e) => {
                        // Unreadable entries are skipped, not fatal.
                        debug!(error = %e, "Walk error");
                    }
                }
                WalkState::Continue
            })
        });

        drop(tx);

        let mut entries: Vec<FileEntry> = rx.into_iter().collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Visible top-level directories of the project, sorted, relative to
    /// the root.
    pub fn top_level_dirs(&self) -> Result<Vec<PathBuf>, IndexerError> {
        if !self.root.is_dir() {
            return Err(IndexerError::NotFound(self.root.clone()));
        }

        let mut dirs: Vec<PathBuf> = WalkBuilder::new(&self.root)
            .max_depth(Some(1))
            .hidden(true)
            .git_ignore(true)
            .git_exclude(true)
            .parents(true)
            .build()
            .filter_map(Result::ok)
            .filter(|e| e.depth() == 1 && e.file_type().is_some_and(|ft| ft.is_dir()))
            .filter_map(|e| e.path().strip_prefix(&self.root).ok().map(Path::to_path_buf))
            .collect();
        dirs.sort();
        Ok(dirs)
    }
}
