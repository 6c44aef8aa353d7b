//! Symbol tree model shared by every language.
//!
//! A scan produces one [`SymbolNode`] of kind [`NodeKind::File`] whose
//! children are the top-level symbols of the file, in source order. The model
//! is a lowest-common-denominator symbol tree, not a language AST.

mod merge;

pub use merge::{merge, MergePolicy};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of a symbol tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Class,
    Module,
    Method,
    Variable,
    Block,
}

impl NodeKind {
    /// All kinds, in declaration order.
    pub const ALL: [NodeKind; 6] = [
        NodeKind::File,
        NodeKind::Class,
        NodeKind::Module,
        NodeKind::Method,
        NodeKind::Variable,
        NodeKind::Block,
    ];

    /// Element tag used for this kind in CIX documents.
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Class => "class",
            NodeKind::Module => "module",
            NodeKind::Method => "method",
            NodeKind::Variable => "variable",
            NodeKind::Block => "block",
        }
    }

    /// Parse an element tag back into a kind.
    pub fn from_tag(tag: &str) -> Option<Self> {
        NodeKind::ALL.into_iter().find(|k| k.tag() == tag)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// An import or include statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    /// Imported module / path as written
    pub name: String,
    /// 1-indexed source line
    pub line: u32,
}

/// Entry in one of the per-node variable maps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarInfo {
    /// 1-indexed source line of the first binding
    pub line_num: u32,
    /// Best-effort type (annotation, literal kind or constructor name)
    pub type_name: Option<String>,
}

/// A base class / implemented interface of a class node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRef {
    pub name: String,
    pub line: u32,
    /// Relationship hint, e.g. `extends`, `implements`, `embeds`
    pub ref_type: Option<String>,
}

/// A method argument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arg {
    pub name: String,
    /// Annotation or default value text
    pub extra_info: Option<String>,
    /// Comma separated attributes such as `varargs`, `kwargs`, `default`
    pub attrs: Option<String>,
}

/// Callable details carried by method nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub args: Vec<Arg>,
    pub signature: Option<String>,
    pub is_constructor: bool,
    pub is_classmethod: bool,
}

/// Named variable maps. Keys are kept sorted so encoding is deterministic.
pub type VarMap = BTreeMap<String, VarInfo>;

/// A node in the symbol tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolNode {
    /// Node kind
    pub kind: NodeKind,

    /// Symbol name (file name for file nodes)
    pub name: String,

    /// 1-indexed start line
    pub line_num: u32,

    /// 1-indexed end line, set once scanning of the node completes
    pub line_end: Option<u32>,

    /// Documentation text, one entry per line
    pub doc_lines: Vec<String>,

    /// Imports / includes in source order
    pub imports: Vec<Import>,

    /// Child symbols in source order
    pub children: Vec<SymbolNode>,

    pub class_vars: VarMap,
    pub instance_vars: VarMap,
    pub local_vars: VarMap,
    pub aliases: VarMap,

    /// Base classes, for class nodes. Never holds two refs with one name.
    pub classrefs: Vec<ClassRef>,

    /// Callable details, for method nodes
    pub method: Option<MethodInfo>,

    /// Declared or guessed type, for variable nodes
    pub type_name: Option<String>,
}

impl SymbolNode {
    /// Create a bare node.
    pub fn new(kind: NodeKind, name: impl Into<String>, line_num: u32) -> Self {
        Self {
            kind,
            name: name.into(),
            line_num,
            line_end: None,
            doc_lines: Vec::new(),
            imports: Vec::new(),
            children: Vec::new(),
            class_vars: VarMap::new(),
            instance_vars: VarMap::new(),
            local_vars: VarMap::new(),
            aliases: VarMap::new(),
            classrefs: Vec::new(),
            method: None,
            type_name: None,
        }
    }

    /// Create a file node.
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(NodeKind::File, name, 1)
    }

    /// Create a class node.
    pub fn class(name: impl Into<String>, line_num: u32) -> Self {
        Self::new(NodeKind::Class, name, line_num)
    }

    /// Create a method node with empty callable details.
    pub fn method(name: impl Into<String>, line_num: u32) -> Self {
        let mut node = Self::new(NodeKind::Method, name, line_num);
        node.method = Some(MethodInfo::default());
        node
    }

    /// Create a variable node.
    pub fn variable(name: impl Into<String>, line_num: u32, type_name: Option<String>) -> Self {
        let mut node = Self::new(NodeKind::Variable, name, line_num);
        node.type_name = type_name;
        node
    }

    /// Mark the node as complete at `line`.
    pub fn finish(&mut self, line: u32) {
        if self.line_end.is_none() {
            self.line_end = Some(line.max(self.line_num));
        }
    }

    /// Add a base class unless one with the same name is already present.
    pub fn add_classref(&mut self, name: impl Into<String>, line: u32, ref_type: Option<String>) {
        let name = name.into();
        if self.classrefs.iter().any(|r| r.name == name) {
            return;
        }
        self.classrefs.push(ClassRef {
            name,
            line,
            ref_type,
        });
    }

    /// Record a binding in `map`, keeping the first line a name was seen on.
    pub fn bind(map: &mut VarMap, name: impl Into<String>, line_num: u32, type_name: Option<String>) {
        let entry = map.entry(name.into()).or_insert(VarInfo {
            line_num,
            type_name: None,
        });
        if entry.type_name.is_none() {
            entry.type_name = type_name;
        }
    }

    /// Method arguments, empty for non-callables.
    pub fn args(&self) -> &[Arg] {
        self.method.as_ref().map(|m| m.args.as_slice()).unwrap_or(&[])
    }

    /// Find a direct child by name.
    pub fn child(&self, name: &str) -> Option<&SymbolNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Find a direct child by name (mutable).
    pub fn child_mut(&mut self, name: &str) -> Option<&mut SymbolNode> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Find a direct child by kind and name (mutable).
    pub fn child_of_kind_mut(&mut self, kind: NodeKind, name: &str) -> Option<&mut SymbolNode> {
        self.children
            .iter_mut()
            .find(|c| c.kind == kind && c.name == name)
    }

    /// Resolve a dotted path (`Bar.method`) below this node.
    pub fn resolve(&self, dotted: &str) -> Option<&SymbolNode> {
        dotted
            .split('.')
            .filter(|s| !s.is_empty())
            .try_fold(self, |node, part| node.child(part))
    }

    /// Total number of nodes in this subtree, including self.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(|c| c.node_count()).sum::<usize>()
    }

    /// Depth-first pre-order walk.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a SymbolNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}
