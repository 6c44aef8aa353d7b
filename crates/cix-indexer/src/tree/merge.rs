//! Merging freshly scanned trees into cached ones.

use super::{SymbolNode, VarMap};

/// How a fresh tree is combined with the cached one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// The fresh tree replaces the cached one entirely.
    #[default]
    WholeFile,
    /// The fresh tree covers only part of the file: named top-level children
    /// it does not mention are retained from the cached tree.
    Partial,
}

/// Combine `fresh` into `existing`.
///
/// Name collisions always prefer `fresh`. Only the direct children of the
/// root are reconciled; retained children are re-inserted by line so the
/// result keeps source order.
pub fn merge(existing: SymbolNode, fresh: SymbolNode, policy: MergePolicy) -> SymbolNode {
    match policy {
        MergePolicy::WholeFile => fresh,
        MergePolicy::Partial => merge_partial(existing, fresh),
    }
}

fn merge_partial(existing: SymbolNode, mut fresh: SymbolNode) -> SymbolNode {
    let retained: Vec<SymbolNode> = existing
        .children
        .into_iter()
        .filter(|old| {
            !old.name.is_empty()
                && !fresh
                    .children
                    .iter()
                    .any(|new| new.kind == old.kind && new.name == old.name)
        })
        .collect();

    for child in retained {
        let at = fresh
            .children
            .iter()
            .position(|c| c.line_num > child.line_num)
            .unwrap_or(fresh.children.len());
        fresh.children.insert(at, child);
    }

    union_into(&mut fresh.class_vars, existing.class_vars);
    union_into(&mut fresh.instance_vars, existing.instance_vars);
    union_into(&mut fresh.local_vars, existing.local_vars);
    union_into(&mut fresh.aliases, existing.aliases);

    fresh
}

fn union_into(fresh: &mut VarMap, old: VarMap) {
    for (name, info) in old {
        fresh.entry(name).or_insert(info);
    }
}
