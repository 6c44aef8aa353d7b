//! In-memory cache of parsed trees for one language of a zone.

use crate::scanner::ScannerRegistry;
use crate::tree::{merge, MergePolicy, NodeKind, SymbolNode};
use crate::IndexerError;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

struct CachedTree {
    /// SHA-256 of the source the tree was built from
    hash: String,
    tree: Arc<SymbolNode>,
}

/// Bounded cache of symbol trees keyed by absolute file path.
///
/// Besides the trees themselves, a LangLib remembers which file defined
/// each top-level symbol it has seen so blob lookups by symbol name do not
/// need to re-parse the project. That index survives tree eviction and is
/// verified against a fresh parse before being trusted.
pub struct LangLib {
    language: &'static str,
    registry: Arc<ScannerRegistry>,
    trees: LruCache<PathBuf, CachedTree>,
    /// Top-level symbol name to defining file
    symbols: HashMap<String, (PathBuf, NodeKind)>,
    /// Files whose symbols are in `symbols`
    indexed: HashSet<PathBuf>,
}

impl LangLib {
    /// Create an empty cache holding at most `capacity` trees.
    pub fn new(language: &'static str, registry: Arc<ScannerRegistry>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            language,
            registry,
            trees: LruCache::new(capacity),
            symbols: HashMap::new(),
            indexed: HashSet::new(),
        }
    }

    pub fn language(&self) -> &'static str {
        self.language
    }

    /// Number of cached trees.
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Parse `path` or reuse the cached tree if the file is unchanged.
    ///
    /// A missing file yields `None`.
    pub fn load(&mut self, path: &Path) -> Result<Option<Arc<SymbolNode>>, IndexerError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.forget(path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let hash = content_hash(&bytes);

        if let Some(cached) = self.trees.get(path) {
            if cached.hash == hash {
                return Ok(Some(cached.tree.clone()));
            }
        }

        let content = String::from_utf8_lossy(&bytes);
        let output = self.registry.try_scan(&content, path, self.language)?;
        if !output.errors.is_empty() {
            debug!(path = ?path, errors = output.errors.len(), "Parsed with errors");
        }
        Ok(Some(self.store(path, hash, output.tree)))
    }

    /// Merge a tree scanned from `content` (possibly an unsaved buffer)
    /// into the cache entry for `path`.
    pub fn absorb(
        &mut self,
        path: &Path,
        content: &str,
        fresh: SymbolNode,
        policy: MergePolicy,
    ) -> Arc<SymbolNode> {
        let merged = match self.trees.pop(path) {
            Some(existing) => merge((*existing.tree).clone(), fresh, policy),
            None => fresh,
        };
        self.store(path, content_hash(content.as_bytes()), merged)
    }

    /// File that defined top-level symbol `name` when last parsed.
    pub fn symbol_file(&self, name: &str) -> Option<&Path> {
        self.symbols.get(name).map(|(file, _)| file.as_path())
    }

    /// Top-level symbols seen so far, with their kinds.
    pub fn symbols(&self) -> impl Iterator<Item = (&str, NodeKind)> {
        self.symbols
            .iter()
            .map(|(name, (_, kind))| (name.as_str(), *kind))
    }

    /// Whether the symbols of `path` have been recorded.
    pub fn is_indexed(&self, path: &Path) -> bool {
        self.indexed.contains(path)
    }

    /// Drop everything cached for `path`.
    pub fn forget(&mut self, path: &Path) {
        self.trees.pop(path);
        self.indexed.remove(path);
        self.symbols.retain(|_, (file, _)| file.as_path() != path);
    }

    /// Drop every cached tree and the symbol index.
    pub fn clear(&mut self) {
        self.trees.clear();
        self.symbols.clear();
        self.indexed.clear();
    }

    fn store(&mut self, path: &Path, hash: String, tree: SymbolNode) -> Arc<SymbolNode> {
        self.symbols.retain(|_, (file, _)| file.as_path() != path);
        for child in &tree.children {
            if !child.name.is_empty() {
                self.symbols
                    .entry(child.name.clone())
                    .or_insert_with(|| (path.to_path_buf(), child.kind));
            }
        }
        self.indexed.insert(path.to_path_buf());

        let tree = Arc::new(tree);
        self.trees.put(
            path.to_path_buf(),
            CachedTree {
                hash,
                tree: tree.clone(),
            },
        );
        tree
    }
}

fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn langlib(capacity: usize) -> LangLib {
        LangLib::new("Python", Arc::new(ScannerRegistry::with_defaults()), capacity)
    }

    #[test]
    fn test_load_reuses_unchanged_tree() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.py");
        fs::write(&path, "def foo(x): pass\n").unwrap();

        let mut lib = langlib(4);
        let first = lib.load(&path).unwrap().unwrap();
        let second = lib.load(&path).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(lib.symbol_file("foo"), Some(path.as_path()));
        assert!(lib.is_indexed(&path));
        assert_eq!(lib.symbols().collect::<Vec<_>>(), vec![("foo", NodeKind::Method)]);
    }

    #[test]
    fn test_load_reparses_changed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.py");
        fs::write(&path, "def foo(x): pass\n").unwrap();

        let mut lib = langlib(4);
        lib.load(&path).unwrap();
        fs::write(&path, "def bar(): pass\n").unwrap();

        let tree = lib.load(&path).unwrap().unwrap();
        assert!(tree.child("bar").is_some());
        assert!(lib.symbol_file("foo").is_none());
        assert_eq!(lib.symbol_file("bar"), Some(path.as_path()));
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let mut lib = langlib(4);
        assert!(lib.load(&dir.path().join("gone.py")).unwrap().is_none());
    }

    #[test]
    fn test_capacity_bounds_trees_not_symbols() {
        let dir = tempdir().unwrap();
        let mut lib = langlib(1);
        for name in ["a", "b"] {
            let path = dir.path().join(format!("{}.py", name));
            fs::write(&path, format!("def {}_fn(): pass\n", name)).unwrap();
            lib.load(&path).unwrap();
        }
        assert_eq!(lib.len(), 1);
        assert!(lib.symbol_file("a_fn").is_some());
        assert!(lib.symbol_file("b_fn").is_some());
    }

    #[test]
    fn test_absorb_merges_partial() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.py");
        fs::write(&path, "def foo(): pass\ndef bar(): pass\n").unwrap();

        let mut lib = langlib(4);
        lib.load(&path).unwrap();

        let mut fresh = SymbolNode::file("a.py");
        fresh.children.push(SymbolNode::method("baz", 3));
        let merged = lib.absorb(&path, "def baz(): pass\n", fresh.clone(), MergePolicy::Partial);
        let names: Vec<_> = merged.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["foo", "bar", "baz"]);

        let replaced = lib.absorb(&path, "def baz(): pass\n", fresh, MergePolicy::WholeFile);
        assert_eq!(replaced.children.len(), 1);
        assert_eq!(replaced.children[0].kind, NodeKind::Method);
        assert!(lib.symbol_file("foo").is_none());
    }
}
