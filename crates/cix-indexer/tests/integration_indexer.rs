//! Integration tests for the CIX indexer: scanning, codec and project index.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::tempdir;

use cix_indexer::storage::{Database, RECORD_MAGIC};
use cix_indexer::{from_cix, to_cix, MergePolicy, NodeKind, ScannerRegistry};

fn database(root: &Path) -> Database {
    Database::new(root.join("db"), Arc::new(ScannerRegistry::with_defaults()))
}

/// `a.py` defines `foo`, `b.py` defines `Bar`.
fn create_python_project(base: &Path) -> PathBuf {
    let project = base.join("proj");
    fs::create_dir_all(&project).unwrap();
    fs::write(project.join("a.py"), "def foo(x): pass\n").unwrap();
    fs::write(project.join("b.py"), "class Bar: pass\n").unwrap();
    project
}

#[test]
fn test_end_to_end_blob_lookup() {
    let temp = tempdir().unwrap();
    let project = create_python_project(temp.path());
    let db = database(temp.path());
    let zone = db.zone(&project).unwrap();

    zone.update(false).unwrap();

    let foo = zone.get_blob("Python", "foo").expect("foo should resolve");
    assert_eq!(foo.kind, NodeKind::Method);
    assert_eq!(foo.name, "foo");
    let args: Vec<_> = foo.args().iter().map(|a| a.name.as_str()).collect();
    assert_eq!(args, vec!["x"]);

    let bar = zone.get_blob("Python", "Bar").expect("Bar should resolve");
    assert_eq!(bar.kind, NodeKind::Class);
    assert_eq!(bar.name, "Bar");
    assert!(bar.classrefs.is_empty());

    // Module blobs resolve to the whole file.
    let module = zone.get_blob("Python", "a").unwrap();
    assert_eq!(module.kind, NodeKind::File);
    assert_eq!(module.name, "a.py");
}

#[test]
fn test_has_blob_after_update() {
    let temp = tempdir().unwrap();
    let project = create_python_project(temp.path());
    let db = database(temp.path());
    let zone = db.zone(&project).unwrap();

    assert!(!zone.has_blob("Python", "widgets"));
    assert!(!zone.has_blob("Python", "Widget"));

    fs::create_dir_all(project.join("ui")).unwrap();
    fs::write(project.join("ui/widgets.py"), "class Widget:\n    pass\n").unwrap();
    zone.update(true).unwrap();

    assert!(zone.has_blob("Python", "widgets"));
    assert!(zone.has_blob("Python", "ui.widgets"));
    assert!(zone.has_blob("Python", "Widget"));
    assert!(!zone.has_blob("Python", "Gadget"));
}

#[test]
fn test_index_survives_restart() {
    let temp = tempdir().unwrap();
    let project = create_python_project(temp.path());

    {
        let db = database(temp.path());
        let zone = db.zone(&project).unwrap();
        zone.update(false).unwrap();
        assert_eq!(db.save_all().unwrap(), 1);
    }

    let db = database(temp.path());
    let zone = db.zone(&project).unwrap();
    let map = zone.get_dirs_from_basename().unwrap();
    assert!(map.contains_key("a.py"));
    assert!(map.contains_key("b.py"));
    assert!(!zone.is_dirty());

    let marker = fs::read_to_string(zone.dir().join("path")).unwrap();
    assert_eq!(PathBuf::from(marker), project.canonicalize().unwrap());
}

#[test]
fn test_corrupted_index_is_rebuilt() {
    let temp = tempdir().unwrap();
    let project = create_python_project(temp.path());

    let record_path = {
        let db = database(temp.path());
        let zone = db.zone(&project).unwrap();
        zone.update(false).unwrap();
        zone.save().unwrap();
        zone.record_path()
    };

    let mut bytes = fs::read(&record_path).unwrap();
    assert_eq!(&bytes[..8], RECORD_MAGIC);
    bytes.truncate(10);
    fs::write(&record_path, &bytes).unwrap();

    let db = database(temp.path());
    let zone = db.zone(&project).unwrap();
    let map = zone.get_dirs_from_basename().unwrap();
    assert!(map.contains_key("a.py"));
    assert!(zone.is_dirty());

    zone.save().unwrap();
    let rewritten = fs::read(&record_path).unwrap();
    assert!(rewritten.len() > 10);
}

#[test]
fn test_zone_saves_on_drop() {
    let temp = tempdir().unwrap();
    let project = create_python_project(temp.path());

    let record_path = {
        let db = database(temp.path());
        let zone = db.zone(&project).unwrap();
        zone.update(false).unwrap();
        zone.record_path()
    };

    assert!(record_path.exists());
}

#[test]
fn test_unterminated_string_yields_partial_tree() {
    let registry = ScannerRegistry::with_defaults();
    let code = "s = \"unterminated\n\ndef after(x):\n    pass\n";
    let output = registry.scan(code, Path::new("broken.py"), "Python");

    assert_eq!(output.tree.kind, NodeKind::File);
    assert!(!output.errors.is_empty());
}

#[test]
fn test_scan_output_round_trips_through_cix() {
    let registry = ScannerRegistry::with_defaults();
    let code = r#"
"""Módulo de ejemplo."""
import os

class Cafe(object):
    """Ünïcödé docs."""
    def __init__(self, nombre: str = "José"):
        self.nombre = nombre

def main(*args, **kwargs):
    local = [1, 2]
"#;
    let output = registry.scan(code, Path::new("café.py"), "Python");
    assert!(output.errors.is_empty(), "{:?}", output.errors);

    let text = to_cix(&output.tree);
    let decoded = from_cix(&text).unwrap();
    assert_eq!(decoded, output.tree);
}

#[test]
fn test_every_language_scans_through_registry() {
    let registry = ScannerRegistry::with_defaults();
    let samples = [
        ("lib.rs", "pub fn answer() -> u32 { 42 }\n", "answer"),
        ("main.go", "package main\n\nfunc Answer() int { return 42 }\n", "Answer"),
        ("app.ts", "export function answer(): number { return 42; }\n", "answer"),
        ("app.js", "function answer() { return 42; }\n", "answer"),
        ("app.py", "def answer():\n    return 42\n", "answer"),
    ];

    for (file, code, symbol) in samples {
        let path = Path::new(file);
        let language = registry.language_for_path(path).unwrap();
        let output = registry.scan(code, path, language);
        assert!(output.errors.is_empty(), "{}: {:?}", file, output.errors);
        assert_eq!(
            output.tree.child(symbol).map(|n| n.kind),
            Some(NodeKind::Method),
            "{}",
            file
        );
    }
}

#[test]
fn test_absorbed_scan_is_served_from_cache() {
    let temp = tempdir().unwrap();
    let project = create_python_project(temp.path());
    let db = database(temp.path());
    let zone = db.zone(&project).unwrap();
    zone.update(false).unwrap();

    // An unsaved buffer adds `baz`; disk still only has `foo`.
    let path = project.canonicalize().unwrap().join("a.py");
    let buffer = "def foo(x): pass\ndef baz(): pass\n";
    let output = db.registry().scan(buffer, &path, "Python");
    let merged = zone
        .absorb("Python", &path, buffer, output.tree, MergePolicy::WholeFile)
        .unwrap();
    assert!(merged.child("baz").is_some());

    let completions = zone.completions("Python", "", "ba").unwrap();
    let names: Vec<_> = completions.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["baz"]);
}
