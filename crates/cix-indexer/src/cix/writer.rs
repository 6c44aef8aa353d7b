//! CIX serialization.

use super::{
    is_unrepresentable, ARG_TAG, CIX_VERSION, CLASSREF_TAG, DOC_TAG, IMPORT_TAG, RAW_CHAR_ESCAPE,
    ROOT_TAG, VAR_TAG,
};
use crate::tree::{SymbolNode, VarMap};
use std::fmt::Write;

/// Serialize a symbol tree to a CIX document.
pub fn to_cix(tree: &SymbolNode) -> String {
    let mut out = String::with_capacity(256 + tree.node_count() * 64);
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(out, "<{} version=\"{}\">", ROOT_TAG, CIX_VERSION);
    write_node(&mut out, tree, 1);
    let _ = writeln!(out, "</{}>", ROOT_TAG);
    out
}

fn write_node(out: &mut String, node: &SymbolNode, depth: usize) {
    indent(out, depth);
    let _ = write!(out, "<{}", node.kind.tag());
    attr(out, "name", &node.name);
    attr(out, "line", &node.line_num.to_string());
    if let Some(end) = node.line_end {
        attr(out, "lineend", &end.to_string());
    }
    if let Some(type_name) = &node.type_name {
        attr(out, "type", type_name);
    }
    if let Some(method) = &node.method {
        attr(out, "callable", "1");
        if let Some(signature) = &method.signature {
            attr(out, "signature", signature);
        }
        if method.is_constructor {
            attr(out, "constructor", "1");
        }
        if method.is_classmethod {
            attr(out, "classmethod", "1");
        }
    }

    if is_leaf(node) {
        out.push_str("/>\n");
        return;
    }
    out.push_str(">\n");

    let inner = depth + 1;
    for line in &node.doc_lines {
        indent(out, inner);
        let _ = write!(out, "<{}", DOC_TAG);
        attr(out, "text", line);
        out.push_str("/>\n");
    }
    for import in &node.imports {
        indent(out, inner);
        let _ = write!(out, "<{}", IMPORT_TAG);
        attr(out, "name", &import.name);
        attr(out, "line", &import.line.to_string());
        out.push_str("/>\n");
    }
    write_vars(out, "class", &node.class_vars, inner);
    write_vars(out, "instance", &node.instance_vars, inner);
    write_vars(out, "local", &node.local_vars, inner);
    write_vars(out, "alias", &node.aliases, inner);
    for classref in &node.classrefs {
        indent(out, inner);
        let _ = write!(out, "<{}", CLASSREF_TAG);
        attr(out, "name", &classref.name);
        attr(out, "line", &classref.line.to_string());
        if let Some(ref_type) = &classref.ref_type {
            attr(out, "type", ref_type);
        }
        out.push_str("/>\n");
    }
    for arg in node.args() {
        indent(out, inner);
        let _ = write!(out, "<{}", ARG_TAG);
        attr(out, "name", &arg.name);
        if let Some(extra) = &arg.extra_info {
            attr(out, "extra", extra);
        }
        if let Some(attrs) = &arg.attrs {
            attr(out, "attrs", attrs);
        }
        out.push_str("/>\n");
    }
    for child in &node.children {
        write_node(out, child, inner);
    }

    indent(out, depth);
    let _ = writeln!(out, "</{}>", node.kind.tag());
}

fn write_vars(out: &mut String, map_name: &str, vars: &VarMap, depth: usize) {
    for (name, info) in vars {
        indent(out, depth);
        let _ = write!(out, "<{}", VAR_TAG);
        attr(out, "map", map_name);
        attr(out, "name", name);
        attr(out, "line", &info.line_num.to_string());
        if let Some(type_name) = &info.type_name {
            attr(out, "type", type_name);
        }
        out.push_str("/>\n");
    }
}

fn is_leaf(node: &SymbolNode) -> bool {
    node.doc_lines.is_empty()
        && node.imports.is_empty()
        && node.class_vars.is_empty()
        && node.instance_vars.is_empty()
        && node.local_vars.is_empty()
        && node.aliases.is_empty()
        && node.classrefs.is_empty()
        && node.args().is_empty()
        && node.children.is_empty()
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn attr(out: &mut String, name: &str, value: &str) {
    let _ = write!(out, " {}=\"{}\"", name, escape_attr(value));
}

/// Escape an attribute value. Whitespace control characters are written as
/// character references so parsers do not normalize them away; characters
/// XML cannot carry at all go through [`RAW_CHAR_ESCAPE`].
fn escape_attr(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            '\t' => escaped.push_str("&#9;"),
            '\n' => escaped.push_str("&#10;"),
            '\r' => escaped.push_str("&#13;"),
            c if c == RAW_CHAR_ESCAPE || is_unrepresentable(c) => {
                let _ = write!(escaped, "{}{:04X}", RAW_CHAR_ESCAPE, c as u32);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}
