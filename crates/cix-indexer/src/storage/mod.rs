//! Project index persistence.
//!
//! A [`Database`] owns one [`Zone`] per active project. Each zone keeps a
//! persisted basename → directories map under
//! `<db-root>/projs/<md5(project)>/dirs_from_basename` and a [`LangLib`]
//! per language caching parsed trees.

mod langlib;
mod query;
mod record;
mod zone;

pub use langlib::LangLib;
pub use query::{members, Completion, Definition};
pub use record::{BasenameMap, BasenameRecord, RECORD_MAGIC, RECORD_VERSION};
pub use zone::{StagedUpdate, UpdateChunk, UpdateStats, Zone, BASENAME_FILE, PATH_FILE};

use crate::scanner::ScannerRegistry;
use crate::IndexerError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default number of parsed trees a LangLib keeps.
pub const DEFAULT_LANGLIB_CAPACITY: usize = 256;

/// The on-disk code-intelligence database.
pub struct Database {
    root: PathBuf,
    registry: Arc<ScannerRegistry>,
    langlib_capacity: usize,
    zones: Mutex<HashMap<PathBuf, Arc<Zone>>>,
}

impl Database {
    /// Database rooted at `root`. Directories are created on first save.
    pub fn new(root: impl Into<PathBuf>, registry: Arc<ScannerRegistry>) -> Self {
        Self {
            root: root.into(),
            registry,
            langlib_capacity: DEFAULT_LANGLIB_CAPACITY,
            zones: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_langlib_capacity(mut self, capacity: usize) -> Self {
        self.langlib_capacity = capacity.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> &Arc<ScannerRegistry> {
        &self.registry
    }

    /// The zone for `project`, opened on first request.
    ///
    /// The project path is canonicalized so every spelling of it shares a
    /// zone.
    pub fn zone(&self, project: &Path) -> Result<Arc<Zone>, IndexerError> {
        let canonical = project
            .canonicalize()
            .map_err(|_| IndexerError::NotFound(project.to_path_buf()))?;
        if !canonical.is_dir() {
            return Err(IndexerError::NotFound(canonical));
        }

        let mut zones = self.zones.lock();
        if let Some(zone) = zones.get(&canonical) {
            return Ok(zone.clone());
        }

        let zone = Arc::new(Zone::open(
            &self.root,
            &canonical,
            self.registry.clone(),
            self.langlib_capacity,
        ));
        debug!(project = %canonical.display(), dir = %zone.dir().display(), "Opened zone");
        zones.insert(canonical, zone.clone());
        Ok(zone)
    }

    /// Zones opened so far.
    pub fn loaded_zones(&self) -> usize {
        self.zones.lock().len()
    }

    /// Zones with unsaved changes.
    pub fn dirty_zones(&self) -> usize {
        self.zones.lock().values().filter(|z| z.is_dirty()).count()
    }

    /// Persist every dirty zone. Every zone is attempted; the first failure
    /// is returned after the rest have been saved.
    pub fn save_all(&self) -> Result<usize, IndexerError> {
        let zones: Vec<Arc<Zone>> = self.zones.lock().values().cloned().collect();

        let mut saved = 0;
        let mut first_error = None;
        for zone in zones {
            match zone.save() {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(project = %zone.project().display(), error = %e, "Failed to save index");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(saved),
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("root", &self.root)
            .field("zones", &self.loaded_zones())
            .finish()
    }
}
