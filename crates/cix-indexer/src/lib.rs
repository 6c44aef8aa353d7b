//! CIX Indexer
//!
//! The indexing engine behind the CIX driver:
//! - A lowest-common-denominator symbol tree shared by every language
//! - The CIX text codec and tree merging
//! - Pluggable per-language scanners built on tree-sitter
//! - The per-project index: persisted basename map, blob resolution and
//!   parsed-tree caches

pub mod cix;
mod error;
pub mod scanner;
pub mod storage;
pub mod tree;

pub use cix::{from_cix, to_cix, CIX_VERSION};
pub use error::IndexerError;
pub use scanner::{panic_message, BlobCandidate, ScanError, ScanOutput, Scanner, ScannerRegistry};
pub use storage::{Completion, Database, Definition, LangLib, UpdateStats, Zone};
pub use tree::{merge, MergePolicy, NodeKind, SymbolNode};
