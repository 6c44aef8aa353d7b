//! Completion and definition results.

use crate::tree::{NodeKind, SymbolNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One completion candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub name: String,
    pub kind: NodeKind,
}

/// Where a symbol is defined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    /// Absolute path of the defining file
    pub path: PathBuf,
    /// 1-indexed line
    pub line: u32,
    pub kind: NodeKind,
    pub name: String,
}

/// Members of `node`: child symbols plus class and instance variables,
/// sorted by name and filtered by `prefix`. A child wins over a variable
/// of the same name.
pub fn members(node: &SymbolNode, prefix: &str) -> Vec<Completion> {
    let mut found: BTreeMap<&str, NodeKind> = BTreeMap::new();

    for var in node.class_vars.keys().chain(node.instance_vars.keys()) {
        found.insert(var, NodeKind::Variable);
    }
    for child in &node.children {
        if child.kind == NodeKind::Block {
            // Blocks are transparent: `if __name__ == ...` bodies
            for nested in &child.children {
                found.insert(&nested.name, nested.kind);
            }
        } else if !child.name.is_empty() {
            found.insert(&child.name, child.kind);
        }
    }

    found
        .into_iter()
        .filter(|(name, _)| name.starts_with(prefix))
        .map(|(name, kind)| Completion {
            name: name.to_string(),
            kind,
        })
        .collect()
}
