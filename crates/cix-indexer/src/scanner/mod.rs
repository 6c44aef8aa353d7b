//! Scanner interface and registry.
//!
//! A [`Scanner`] turns raw source text into a [`SymbolNode`] tree. Scanners
//! are pure: no disk or network access, and they never fail. A syntax error
//! yields the best-effort partial tree plus one or more [`ScanError`]s.
//! Languages are added by registering an implementation with the
//! [`ScannerRegistry`]; callers never special-case a language.

mod go;
mod language;
mod python;
mod rust;
mod ts;
mod typescript;
mod walker;

pub use go::GoScanner;
pub use language::detect_language_from_content;
pub use python::PythonScanner;
pub use rust::RustScanner;
pub use typescript::TypeScriptScanner;
pub use walker::{FileEntry, Walker};

use crate::tree::SymbolNode;
use crate::IndexerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};

/// A single-file parse failure. Never aborts a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanError {
    /// 1-indexed line
    pub line: u32,
    /// 0-indexed column
    pub column: u32,
    pub message: String,
}

impl ScanError {
    pub fn new(line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

/// Result of scanning one file.
#[derive(Debug, Clone)]
pub struct ScanOutput {
    /// Root file node (possibly bare)
    pub tree: SymbolNode,
    /// Syntax problems found while scanning
    pub errors: Vec<ScanError>,
}

impl ScanOutput {
    /// A bare file node carrying a single error.
    pub fn failed(path: &Path, error: ScanError) -> Self {
        Self {
            tree: SymbolNode::file(file_name(path)),
            errors: vec![error],
        }
    }
}

/// Where a blob may live on disk: a file basename, optionally inside a
/// directory whose path ends with `dir_suffix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobCandidate {
    pub basename: String,
    pub dir_suffix: Option<PathBuf>,
}

impl BlobCandidate {
    pub fn file(basename: impl Into<String>) -> Self {
        Self {
            basename: basename.into(),
            dir_suffix: None,
        }
    }

    pub fn in_dir(basename: impl Into<String>, dir_suffix: impl Into<PathBuf>) -> Self {
        Self {
            basename: basename.into(),
            dir_suffix: Some(dir_suffix.into()),
        }
    }

    /// Whether a directory (relative to the project root) satisfies the
    /// candidate's directory constraint.
    pub fn accepts_dir(&self, dir: &Path) -> bool {
        match &self.dir_suffix {
            None => true,
            Some(suffix) => dir.ends_with(suffix),
        }
    }
}

/// A per-language parser producing a symbol tree.
pub trait Scanner: Send + Sync {
    /// Canonical language name, e.g. `Python`.
    fn language(&self) -> &'static str;

    /// File extensions (without dot, lowercase) handled by this scanner.
    fn extensions(&self) -> &'static [&'static str];

    /// Naming convention: files that would define blob `name`.
    fn blob_candidates(&self, name: &str) -> Vec<BlobCandidate>;

    /// Blob name defined by a file, e.g. `a` for `a.py`.
    fn module_name(&self, path: &Path) -> String {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Scan `content` read from `path`.
    fn scan(&self, content: &str, path: &Path) -> ScanOutput;
}

/// Maps language names to scanner implementations.
#[derive(Clone, Default)]
pub struct ScannerRegistry {
    scanners: HashMap<String, Arc<dyn Scanner>>,
    by_extension: HashMap<&'static str, &'static str>,
}

impl ScannerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every built-in scanner.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PythonScanner));
        registry.register(Arc::new(RustScanner));
        registry.register(Arc::new(GoScanner));
        registry.register(Arc::new(TypeScriptScanner::javascript()));
        registry.register(Arc::new(TypeScriptScanner::typescript()));
        registry
    }

    /// Register a scanner, replacing any previous one for the language.
    pub fn register(&mut self, scanner: Arc<dyn Scanner>) {
        let language = scanner.language();
        for ext in scanner.extensions() {
            self.by_extension.insert(*ext, language);
        }
        debug!(language, "Registered scanner");
        self.scanners.insert(language.to_lowercase(), scanner);
    }

    /// Look up a scanner by language name (case-insensitive).
    pub fn get(&self, language: &str) -> Option<Arc<dyn Scanner>> {
        self.scanners.get(&language.to_lowercase()).cloned()
    }

    /// Registered language names, sorted.
    pub fn languages(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.scanners.values().map(|s| s.language()).collect();
        names.sort_unstable();
        names
    }

    /// Detect the language of a file from its extension.
    pub fn language_for_path(&self, path: &Path) -> Option<&'static str> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        self.by_extension.get(ext.as_str()).copied()
    }

    /// Detect the language of a file from its extension, then its shebang.
    pub fn detect(&self, path: &Path, content: &str) -> Option<&'static str> {
        self.language_for_path(path).or_else(|| {
            detect_language_from_content(content)
                .and_then(|lang| self.get(lang))
                .map(|s| s.language())
        })
    }

    /// Scan with the scanner registered for `language`.
    pub fn try_scan(
        &self,
        content: &str,
        path: &Path,
        language: &str,
    ) -> Result<ScanOutput, IndexerError> {
        let scanner = self
            .get(language)
            .ok_or_else(|| IndexerError::UnsupportedLanguage(language.to_string()))?;

        let output = panic::catch_unwind(AssertUnwindSafe(|| scanner.scan(content, path)))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!(path = ?path, language, message = %message, "Scanner panicked");
                ScanOutput::failed(path, ScanError::new(1, 0, format!("scanner failed: {}", message)))
            });

        if !output.errors.is_empty() {
            debug!(path = ?path, errors = output.errors.len(), "Scan reported errors");
        }
        Ok(output)
    }

    /// Scan and never fail: an unknown language yields a bare file node
    /// plus an error.
    pub fn scan(&self, content: &str, path: &Path, language: &str) -> ScanOutput {
        self.try_scan(content, path, language).unwrap_or_else(|e| {
            ScanOutput::failed(path, ScanError::new(1, 0, e.to_string()))
        })
    }
}

impl fmt::Debug for ScannerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScannerRegistry")
            .field("languages", &self.languages())
            .finish()
    }
}

/// File name used for the root node of a scan.
pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeKind;

    struct PanickingScanner;

    impl Scanner for PanickingScanner {
        fn language(&self) -> &'static str {
            "Broken"
        }

        fn extensions(&self) -> &'static [&'static str] {
            &["brk"]
        }

        fn blob_candidates(&self, name: &str) -> Vec<BlobCandidate> {
            vec![BlobCandidate::file(format!("{}.brk", name))]
        }

        fn scan(&self, _content: &str, _path: &Path) -> ScanOutput {
            panic!("boom")
        }
    }

    #[test]
    fn test_defaults_registered() {
        let registry = ScannerRegistry::with_defaults();
        assert_eq!(
            registry.languages(),
            vec!["Go", "JavaScript", "Python", "Rust", "TypeScript"]
        );
        assert!(registry.get("python").is_some());
        assert!(registry.get("PYTHON").is_some());
        assert!(registry.get("cobol").is_none());
    }

    #[test]
    fn test_language_for_path() {
        let registry = ScannerRegistry::with_defaults();
        assert_eq!(registry.language_for_path(Path::new("a.py")), Some("Python"));
        assert_eq!(registry.language_for_path(Path::new("lib.RS")), Some("Rust"));
        assert_eq!(registry.language_for_path(Path::new("main.go")), Some("Go"));
        assert_eq!(registry.language_for_path(Path::new("app.tsx")), Some("TypeScript"));
        assert_eq!(registry.language_for_path(Path::new("app.mjs")), Some("JavaScript"));
        assert_eq!(registry.language_for_path(Path::new("README")), None);
    }

    #[test]
    fn test_detect_falls_back_to_shebang() {
        let registry = ScannerRegistry::with_defaults();
        assert_eq!(
            registry.detect(Path::new("tool"), "#!/usr/bin/env python3\nprint(1)\n"),
            Some("Python")
        );
        assert_eq!(registry.detect(Path::new("tool"), "plain text"), None);
    }

    #[test]
    fn test_unknown_language_returns_bare_file() {
        let registry = ScannerRegistry::with_defaults();
        let output = registry.scan("IDENTIFICATION DIVISION.", Path::new("x.cob"), "COBOL");
        assert_eq!(output.tree.kind, NodeKind::File);
        assert_eq!(output.tree.name, "x.cob");
        assert_eq!(output.errors.len(), 1);
        assert!(output.errors[0].message.contains("COBOL"));

        assert!(matches!(
            registry.try_scan("", Path::new("x.cob"), "COBOL"),
            Err(IndexerError::UnsupportedLanguage(_))
        ));
    }

    #[test]
    fn test_panicking_scanner_is_contained() {
        let mut registry = ScannerRegistry::new();
        registry.register(Arc::new(PanickingScanner));

        let output = registry.scan("anything", Path::new("x.brk"), "broken");
        assert_eq!(output.tree.kind, NodeKind::File);
        assert!(output.errors[0].message.contains("boom"));
    }

    #[test]
    fn test_blob_candidate_dir_constraint() {
        let candidate = BlobCandidate::in_dir("__init__.py", "pkg");
        assert!(candidate.accepts_dir(Path::new("src/pkg")));
        assert!(!candidate.accepts_dir(Path::new("src/other")));
        assert!(BlobCandidate::file("a.py").accepts_dir(Path::new("")));
    }
}
