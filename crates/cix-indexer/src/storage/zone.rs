//! One project's slice of the database.

use super::langlib::LangLib;
use super::query::{members, Completion, Definition};
use super::record::{write_atomic, BasenameMap, BasenameRecord};
use crate::scanner::{Scanner, ScannerRegistry, Walker};
use crate::tree::{MergePolicy, NodeKind, SymbolNode};
use crate::IndexerError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// File holding the persisted basename map.
pub const BASENAME_FILE: &str = "dirs_from_basename";

/// Marker file recording the literal project path.
pub const PATH_FILE: &str = "path";

/// Outcome of an index rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStats {
    /// Indexed source files
    pub files: usize,
    /// Distinct basenames
    pub basenames: usize,
    /// Work units the rebuild was split into
    pub chunks: usize,
}

/// A unit of rebuild work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateChunk {
    /// The whole project in one walk
    All,
    /// Files directly in the project root
    RootFiles,
    /// One top-level directory, recursively
    Dir(PathBuf),
}

/// A rebuild split into chunks that may run on different threads.
///
/// Each chunk's partial map is folded into the staged map; the chunk that
/// finishes last commits it to the zone.
#[derive(Debug)]
pub struct StagedUpdate {
    chunks: Vec<UpdateChunk>,
    staged: Mutex<Staged>,
    remaining: AtomicUsize,
}

#[derive(Debug, Default)]
struct Staged {
    map: BasenameMap,
    files: usize,
    failure: Option<String>,
}

impl StagedUpdate {
    pub fn chunks(&self) -> &[UpdateChunk] {
        &self.chunks
    }

    /// Chunks not yet finished.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }
}

/// A blob found on disk.
struct ResolvedBlob {
    path: PathBuf,
    tree: Arc<SymbolNode>,
    /// Top-level symbol inside `tree`, when the blob is a symbol rather
    /// than the whole file
    symbol: Option<String>,
}

impl ResolvedBlob {
    fn node(&self) -> Option<&SymbolNode> {
        match &self.symbol {
            Some(name) => self.tree.child(name),
            None => Some(&self.tree),
        }
    }
}

#[derive(Default)]
struct ZoneState {
    loaded: bool,
    basenames: BasenameMap,
    dirty: bool,
    langlibs: HashMap<&'static str, LangLib>,
}

/// Persisted basename index plus parsed-tree caches for one project.
///
/// Every operation takes the zone lock for its whole duration, so index
/// loads, rebuild commits and LangLib mutation are serialized per project.
pub struct Zone {
    project: PathBuf,
    dir: PathBuf,
    registry: Arc<ScannerRegistry>,
    langlib_capacity: usize,
    state: Mutex<ZoneState>,
}

impl Zone {
    /// Zone for `project` under database root `db_root`. Nothing is read
    /// or created until first use.
    pub fn open(
        db_root: &Path,
        project: &Path,
        registry: Arc<ScannerRegistry>,
        langlib_capacity: usize,
    ) -> Self {
        Self {
            project: project.to_path_buf(),
            dir: db_root.join("projs").join(Self::key(project)),
            registry,
            langlib_capacity,
            state: Mutex::new(ZoneState::default()),
        }
    }

    /// Directory name of a project's zone: MD5 of the project path.
    pub fn key(project: &Path) -> String {
        format!("{:x}", md5::compute(project.to_string_lossy().as_bytes()))
    }

    pub fn project(&self) -> &Path {
        &self.project
    }

    /// On-disk directory of the zone.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self) -> PathBuf {
        self.dir.join(BASENAME_FILE)
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// The basename map, loaded from disk or built on first use.
    pub fn get_dirs_from_basename(&self) -> Result<BasenameMap, IndexerError> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        Ok(state.basenames.clone())
    }

    /// Directories containing files named `basename`.
    pub fn dirs_for(&self, basename: &str) -> Result<Vec<PathBuf>, IndexerError> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        Ok(state.basenames.get(basename).cloned().unwrap_or_default())
    }

    /// Rebuild the basename map by walking the project.
    ///
    /// In `nice` mode the walk is split per top-level directory and the
    /// thread yields between chunks.
    pub fn update(&self, nice: bool) -> Result<UpdateStats, IndexerError> {
        let staged = self.begin_update(nice)?;
        let mut stats = None;
        for idx in 0..staged.chunks().len() {
            if nice && idx > 0 {
                std::thread::yield_now();
            }
            stats = self.run_update_chunk(&staged, idx)?;
        }
        stats.ok_or_else(|| IndexerError::NotFound(self.project.clone()))
    }

    /// Plan a rebuild. `nice` splits it into one chunk for the root files
    /// plus one per top-level directory.
    pub fn begin_update(&self, nice: bool) -> Result<Arc<StagedUpdate>, IndexerError> {
        let chunks = if nice {
            let mut chunks = vec![UpdateChunk::RootFiles];
            chunks.extend(
                Walker::new(&self.project)
                    .top_level_dirs()?
                    .into_iter()
                    .map(UpdateChunk::Dir),
            );
            chunks
        } else {
            vec![UpdateChunk::All]
        };

        debug!(project = %self.project.display(), chunks = chunks.len(), "Planned index update");
        Ok(Arc::new(StagedUpdate {
            remaining: AtomicUsize::new(chunks.len()),
            chunks,
            staged: Mutex::new(Staged::default()),
        }))
    }

    /// Run chunk `idx` of a staged update. Returns the stats when this was
    /// the last outstanding chunk and the new map has been committed.
    ///
    /// Chunks do not hold the zone lock while walking.
    pub fn run_update_chunk(
        &self,
        update: &StagedUpdate,
        idx: usize,
    ) -> Result<Option<UpdateStats>, IndexerError> {
        let walked = match update.chunks.get(idx) {
            Some(chunk) => self.walk_chunk(chunk),
            None => Ok(BasenameMap::new()),
        };

        {
            let mut staged = update.staged.lock();
            match walked {
                Ok(part) => {
                    for (basename, dirs) in part {
                        staged.files += dirs.len();
                        staged.map.entry(basename).or_default().extend(dirs);
                    }
                }
                Err(e) => {
                    warn!(project = %self.project.display(), chunk = idx, error = %e, "Index chunk failed");
                    staged.failure.get_or_insert_with(|| e.to_string());
                }
            }
        }

        if update.remaining.fetch_sub(1, Ordering::SeqCst) != 1 {
            return Ok(None);
        }

        let staged = std::mem::take(&mut *update.staged.lock());
        if let Some(failure) = staged.failure {
            return Err(IndexerError::Io(std::io::Error::other(failure)));
        }

        let mut map = staged.map;
        for dirs in map.values_mut() {
            dirs.sort();
            dirs.dedup();
        }
        let stats = UpdateStats {
            files: staged.files,
            basenames: map.len(),
            chunks: update.chunks.len(),
        };

        let mut state = self.state.lock();
        state.basenames = map;
        state.loaded = true;
        state.dirty = true;
        for lib in state.langlibs.values_mut() {
            lib.clear();
        }

        info!(
            project = %self.project.display(),
            files = stats.files,
            basenames = stats.basenames,
            chunks = stats.chunks,
            "Index rebuilt"
        );
        Ok(Some(stats))
    }

    fn walk_chunk(&self, chunk: &UpdateChunk) -> Result<BasenameMap, IndexerError> {
        let walker = Walker::new(&self.project);
        let entries = match chunk {
            UpdateChunk::All => walker.walk()?,
            UpdateChunk::RootFiles => walker.shallow().walk()?,
            UpdateChunk::Dir(dir) => walker.within(dir).walk()?,
        };

        let mut map = BasenameMap::new();
        for entry in entries {
            if self.registry.language_for_path(&entry.path).is_none() {
                continue;
            }
            map.entry(entry.basename())
                .or_default()
                .push(entry.relative_dir());
        }
        Ok(map)
    }

    /// Whether a blob `name` exists for `language`. Never fails.
    pub fn has_blob(&self, language: &str, name: &str) -> bool {
        self.get_blob(language, name).is_some()
    }

    /// Blob `name` for `language`, or `None` when it cannot be found.
    pub fn get_blob(&self, language: &str, name: &str) -> Option<SymbolNode> {
        match self.try_get_blob(language, name) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(project = %self.project.display(), language, name, error = %e, "Blob lookup failed");
                None
            }
        }
    }

    /// Blob lookup that reports unsupported languages and I/O failures.
    pub fn try_get_blob(&self, language: &str, name: &str) -> Result<Option<SymbolNode>, IndexerError> {
        let scanner = self.scanner(language)?;
        let mut state = self.state.lock();
        let blob = self.resolve_blob(&mut state, scanner.as_ref(), name)?;
        Ok(blob.and_then(|b| b.node().cloned()))
    }

    /// Members of the symbol named by dotted `expr`, filtered by `prefix`.
    /// An empty `expr` lists the blobs known for the language.
    pub fn completions(
        &self,
        language: &str,
        expr: &str,
        prefix: &str,
    ) -> Result<Vec<Completion>, IndexerError> {
        let scanner = self.scanner(language)?;
        let mut state = self.state.lock();

        let expr = expr.trim().trim_end_matches('.');
        if expr.is_empty() {
            return self.blob_names(&mut state, scanner.as_ref(), prefix);
        }

        let found = self.resolve_expr(&mut state, scanner.as_ref(), expr)?;
        Ok(found
            .and_then(|(blob, rest)| blob.node().and_then(|n| n.resolve(&rest)).map(|n| members(n, prefix)))
            .unwrap_or_default())
    }

    /// Definition site of the symbol named by dotted `expr`.
    pub fn definition(&self, language: &str, expr: &str) -> Result<Option<Definition>, IndexerError> {
        let scanner = self.scanner(language)?;
        let mut state = self.state.lock();

        let Some((blob, rest)) = self.resolve_expr(&mut state, scanner.as_ref(), expr.trim())? else {
            return Ok(None);
        };
        Ok(blob
            .node()
            .and_then(|n| n.resolve(&rest))
            .map(|node| Definition {
                path: blob.path.clone(),
                line: node.line_num,
                kind: node.kind,
                name: node.name.clone(),
            }))
    }

    /// Fold a tree scanned from `content` into the LangLib entry for `path`.
    pub fn absorb(
        &self,
        language: &str,
        path: &Path,
        content: &str,
        tree: SymbolNode,
        policy: MergePolicy,
    ) -> Result<Arc<SymbolNode>, IndexerError> {
        let scanner = self.scanner(language)?;
        let mut state = self.state.lock();
        let lib = self.langlib(&mut state, scanner.language());
        Ok(lib.absorb(path, content, tree, policy))
    }

    /// Persist the basename map if it changed. Returns whether anything
    /// was written.
    pub fn save(&self) -> Result<bool, IndexerError> {
        let mut state = self.state.lock();
        Self::persist(&self.dir, &self.project, &mut state)
    }

    fn persist(dir: &Path, project: &Path, state: &mut ZoneState) -> Result<bool, IndexerError> {
        if !state.dirty || !state.loaded {
            return Ok(false);
        }

        fs::create_dir_all(dir)?;
        write_atomic(&dir.join(PATH_FILE), project.to_string_lossy().as_bytes())?;

        let record = BasenameRecord {
            project: project.to_path_buf(),
            basenames: state.basenames.clone(),
        };
        let bytes = record.encode()?;
        write_atomic(&dir.join(BASENAME_FILE), &bytes)?;
        state.dirty = false;

        info!(project = %project.display(), bytes = bytes.len(), "Saved index");
        Ok(true)
    }

    fn scanner(&self, language: &str) -> Result<Arc<dyn Scanner>, IndexerError> {
        self.registry
            .get(language)
            .ok_or_else(|| IndexerError::UnsupportedLanguage(language.to_string()))
    }

    fn ensure_loaded(&self, state: &mut ZoneState) -> Result<(), IndexerError> {
        if state.loaded {
            return Ok(());
        }

        let (map, dirty) = match self.read_record() {
            Ok(Some(map)) => {
                debug!(project = %self.project.display(), basenames = map.len(), "Loaded index");
                (map, false)
            }
            Ok(None) => (self.build_full()?, true),
            Err(e @ IndexerError::IndexCorruption { .. }) => {
                warn!(error = %e, "Discarding corrupted index, rebuilding");
                (self.build_full()?, true)
            }
            Err(e) => return Err(e),
        };

        state.basenames = map;
        state.loaded = true;
        state.dirty = dirty;
        Ok(())
    }

    /// The persisted map, `None` if the zone was never saved.
    fn read_record(&self) -> Result<Option<BasenameMap>, IndexerError> {
        let path = self.record_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record = BasenameRecord::decode(&bytes, &path)?;
        if record.project != self.project {
            return Err(IndexerError::IndexCorruption {
                path,
                reason: format!("recorded for {}", record.project.display()),
            });
        }
        Ok(Some(record.basenames))
    }

    fn build_full(&self) -> Result<BasenameMap, IndexerError> {
        let mut map = self.walk_chunk(&UpdateChunk::All)?;
        for dirs in map.values_mut() {
            dirs.sort();
            dirs.dedup();
        }
        info!(project = %self.project.display(), basenames = map.len(), "Built index");
        Ok(map)
    }

    fn langlib<'a>(&self, state: &'a mut ZoneState, language: &'static str) -> &'a mut LangLib {
        state
            .langlibs
            .entry(language)
            .or_insert_with(|| LangLib::new(language, self.registry.clone(), self.langlib_capacity))
    }

    /// Longest dotted prefix of `expr` that names a blob, plus the rest.
    fn resolve_expr(
        &self,
        state: &mut ZoneState,
        scanner: &dyn Scanner,
        expr: &str,
    ) -> Result<Option<(ResolvedBlob, String)>, IndexerError> {
        let parts: Vec<&str> = expr.split('.').filter(|p| !p.is_empty()).collect();
        for split in (1..=parts.len()).rev() {
            let name = parts[..split].join(".");
            if let Some(blob) = self.resolve_blob(state, scanner, &name)? {
                return Ok(Some((blob, parts[split..].join("."))));
            }
        }
        Ok(None)
    }

    fn resolve_blob(
        &self,
        state: &mut ZoneState,
        scanner: &dyn Scanner,
        name: &str,
    ) -> Result<Option<ResolvedBlob>, IndexerError> {
        self.ensure_loaded(state)?;
        let language = scanner.language();
        let project = self.project.as_path();

        // Split borrows: the map is read while the LangLib is mutated.
        let ZoneState {
            basenames,
            langlibs,
            ..
        } = state;
        let lib = langlibs
            .entry(language)
            .or_insert_with(|| LangLib::new(language, self.registry.clone(), self.langlib_capacity));

        // 1. Naming convention: `foo` lives in `foo.py`.
        for candidate in scanner.blob_candidates(name) {
            let Some(dirs) = basenames.get(&candidate.basename) else {
                continue;
            };
            for dir in dirs.iter().filter(|d| candidate.accepts_dir(d)) {
                let path = project.join(dir).join(&candidate.basename);
                if let Some(tree) = lib.load(&path)? {
                    return Ok(Some(ResolvedBlob {
                        path,
                        tree,
                        symbol: None,
                    }));
                }
            }
        }

        // 2. A top-level symbol seen in an earlier parse.
        if let Some(path) = lib.symbol_file(name).map(Path::to_path_buf) {
            if let Some(tree) = lib.load(&path)? {
                if tree.child(name).is_some() {
                    return Ok(Some(ResolvedBlob {
                        path,
                        tree,
                        symbol: Some(name.to_string()),
                    }));
                }
            }
        }

        // 3. Parse the language's files not yet indexed, in path order.
        for (basename, dirs) in basenames.iter() {
            if self.registry.language_for_path(Path::new(basename)) != Some(language) {
                continue;
            }
            for dir in dirs {
                let path = project.join(dir).join(basename);
                if lib.is_indexed(&path) {
                    continue;
                }
                if let Some(tree) = lib.load(&path)? {
                    if tree.child(name).is_some() {
                        return Ok(Some(ResolvedBlob {
                            path,
                            tree,
                            symbol: Some(name.to_string()),
                        }));
                    }
                }
            }
        }

        Ok(None)
    }

    /// Module names of the language's files plus known top-level symbols.
    fn blob_names(
        &self,
        state: &mut ZoneState,
        scanner: &dyn Scanner,
        prefix: &str,
    ) -> Result<Vec<Completion>, IndexerError> {
        self.ensure_loaded(state)?;
        let language = scanner.language();

        let mut names: BTreeMap<String, NodeKind> = BTreeMap::new();
        if let Some(lib) = state.langlibs.get(language) {
            for (name, kind) in lib.symbols() {
                names.insert(name.to_string(), kind);
            }
        }
        for (basename, dirs) in &state.basenames {
            if self.registry.language_for_path(Path::new(basename)) != Some(language) {
                continue;
            }
            for dir in dirs {
                let module = scanner.module_name(&dir.join(basename));
                if !module.is_empty() {
                    names.insert(module, NodeKind::Module);
                }
            }
        }

        Ok(names
            .into_iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, kind)| Completion { name, kind })
            .collect())
    }
}

impl Drop for Zone {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Err(e) = Self::persist(&self.dir, &self.project, state) {
            warn!(project = %self.project.display(), error = %e, "Failed to save index on drop");
        }
    }
}

impl std::fmt::Debug for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Zone")
            .field("project", &self.project)
            .field("dir", &self.dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn zone(db: &Path, project: &Path) -> Zone {
        Zone::open(db, project, Arc::new(ScannerRegistry::with_defaults()), 16)
    }

    #[test]
    fn test_key_is_md5_of_path() {
        assert_eq!(
            Zone::key(Path::new("/work/proj")),
            format!("{:x}", md5::compute(b"/work/proj"))
        );
        assert_eq!(Zone::key(Path::new("/a")).len(), 32);
    }

    #[test]
    fn test_lazy_directory_creation() {
        let db = tempdir().unwrap();
        let project = tempdir().unwrap();
        fs::write(project.path().join("a.py"), "x = 1\n").unwrap();

        let zone = zone(db.path(), project.path());
        assert!(!zone.dir().exists());

        let map = zone.get_dirs_from_basename().unwrap();
        assert_eq!(map["a.py"], vec![PathBuf::new()]);
        assert!(zone.is_dirty());
        assert!(!zone.dir().exists());

        assert!(zone.save().unwrap());
        assert!(zone.record_path().exists());
        assert_eq!(
            fs::read_to_string(zone.dir().join(PATH_FILE)).unwrap(),
            project.path().to_string_lossy()
        );
        assert!(!zone.save().unwrap());
    }

    #[test]
    fn test_only_known_languages_are_indexed() {
        let db = tempdir().unwrap();
        let project = tempdir().unwrap();
        fs::write(project.path().join("notes.txt"), "hi").unwrap();
        fs::write(project.path().join("main.go"), "package main\n").unwrap();

        let zone = zone(db.path(), project.path());
        let map = zone.get_dirs_from_basename().unwrap();
        assert!(map.contains_key("main.go"));
        assert!(!map.contains_key("notes.txt"));
    }

    #[test]
    fn test_nice_update_chunks() {
        let db = tempdir().unwrap();
        let project = tempdir().unwrap();
        fs::create_dir_all(project.path().join("pkg")).unwrap();
        fs::create_dir_all(project.path().join("lib")).unwrap();
        fs::write(project.path().join("top.py"), "").unwrap();
        fs::write(project.path().join("pkg/a.py"), "").unwrap();
        fs::write(project.path().join("lib/a.py"), "").unwrap();

        let zone = zone(db.path(), project.path());
        let staged = zone.begin_update(true).unwrap();
        assert_eq!(
            staged.chunks(),
            &[
                UpdateChunk::RootFiles,
                UpdateChunk::Dir(PathBuf::from("lib")),
                UpdateChunk::Dir(PathBuf::from("pkg")),
            ]
        );

        // Chunks may finish in any order; only the last commits.
        assert_eq!(zone.run_update_chunk(&staged, 2).unwrap(), None);
        assert_eq!(zone.run_update_chunk(&staged, 0).unwrap(), None);
        let stats = zone.run_update_chunk(&staged, 1).unwrap().unwrap();
        assert_eq!(stats.files, 3);
        assert_eq!(stats.basenames, 2);
        assert_eq!(stats.chunks, 3);
        assert_eq!(staged.remaining(), 0);

        let dirs = zone.dirs_for("a.py").unwrap();
        assert_eq!(dirs, vec![PathBuf::from("lib"), PathBuf::from("pkg")]);
    }

    #[test]
    fn test_unsupported_language() {
        let db = tempdir().unwrap();
        let project = tempdir().unwrap();
        let zone = zone(db.path(), project.path());

        assert!(!zone.has_blob("COBOL", "anything"));
        assert!(matches!(
            zone.try_get_blob("COBOL", "anything"),
            Err(IndexerError::UnsupportedLanguage(_))
        ));
    }

    #[test]
    fn test_completions_and_definition() {
        let db = tempdir().unwrap();
        let project = tempdir().unwrap();
        fs::write(
            project.path().join("shapes.py"),
            "class Circle:\n    def area(self):\n        pass\n\n    def argue(self):\n        pass\n",
        )
        .unwrap();

        let zone = zone(db.path(), project.path());
        zone.update(false).unwrap();

        let blobs = zone.completions("Python", "", "").unwrap();
        assert_eq!(
            blobs,
            vec![Completion {
                name: "shapes".to_string(),
                kind: NodeKind::Module
            }]
        );

        let members = zone.completions("Python", "shapes.Circle", "ar").unwrap();
        let names: Vec<_> = members.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["area", "argue"]);

        // Top-level symbol lookup without the module prefix.
        let by_symbol = zone.completions("Python", "Circle.", "").unwrap();
        assert_eq!(by_symbol.len(), 2);

        let def = zone.definition("Python", "Circle.argue").unwrap().unwrap();
        assert_eq!(def.line, 5);
        assert_eq!(def.kind, NodeKind::Method);
        assert_eq!(def.path, project.path().join("shapes.py"));

        assert!(zone.definition("Python", "Circle.missing").unwrap().is_none());
        assert!(zone.completions("Python", "nothing_here", "").unwrap().is_empty());
    }
}
