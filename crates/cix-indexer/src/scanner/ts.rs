//! Shared tree-sitter plumbing for the built-in scanners.

use super::{file_name, ScanError, ScanOutput};
use crate::tree::{NodeKind, SymbolNode};
use std::path::Path;
use tree_sitter::{Language, Node, Parser, Tree};

/// Cap on reported syntax errors per file.
const MAX_REPORTED_ERRORS: usize = 32;

/// Parse `content`, returning the syntax tree and a file node to fill.
///
/// On failure the returned output already carries the error and a bare
/// file node.
pub(crate) fn parse(
    language: &Language,
    content: &str,
    path: &Path,
) -> Result<(Tree, SymbolNode, Vec<ScanError>), ScanOutput> {
    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(language) {
        return Err(ScanOutput::failed(
            path,
            ScanError::new(1, 0, format!("failed to load grammar: {}", e)),
        ));
    }

    let Some(tree) = parser.parse(content, None) else {
        return Err(ScanOutput::failed(
            path,
            ScanError::new(1, 0, "parser produced no tree"),
        ));
    };

    let mut errors = Vec::new();
    collect_errors(tree.root_node(), &mut errors);

    Ok((tree, SymbolNode::file(file_name(path)), errors))
}

/// Close the file node and package the output.
pub(crate) fn finish(mut file: SymbolNode, content: &str, errors: Vec<ScanError>) -> ScanOutput {
    let lines = content.lines().count().max(1);
    file.finish(u32::try_from(lines).unwrap_or(u32::MAX));
    ScanOutput { tree: file, errors }
}

/// Report `ERROR` and `MISSING` nodes as scan errors.
pub(crate) fn collect_errors(root: Node, errors: &mut Vec<ScanError>) {
    if !root.has_error() {
        return;
    }

    let before = errors.len();
    visit_errors(root, errors);

    // has_error() can be set without a locatable node.
    if errors.len() == before {
        errors.push(ScanError::new(1, 0, "syntax error"));
    }
}

fn visit_errors(node: Node, errors: &mut Vec<ScanError>) {
    if errors.len() >= MAX_REPORTED_ERRORS {
        return;
    }

    let pos = node.start_position();
    let (line, column) = (to_u32(pos.row) + 1, to_u32(pos.column));

    if node.is_missing() {
        errors.push(ScanError::new(
            line,
            column,
            format!("missing '{}'", node.kind()),
        ));
        return;
    }
    if node.is_error() {
        errors.push(ScanError::new(line, column, "syntax error"));
        return;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            visit_errors(child, errors);
        }
    }
}

/// Source text of a node.
pub(crate) fn text<'a>(node: Node, src: &'a str) -> &'a str {
    src.get(node.byte_range()).unwrap_or("")
}

/// Source text of a named field, if present.
pub(crate) fn field_text<'a>(node: Node, field: &str, src: &'a str) -> Option<&'a str> {
    node.child_by_field_name(field).map(|n| text(n, src))
}

/// 1-indexed start line.
pub(crate) fn line(node: Node) -> u32 {
    to_u32(node.start_position().row) + 1
}

/// 1-indexed end line.
pub(crate) fn end_line(node: Node) -> u32 {
    let end = node.end_position();
    // A node ending at column 0 closed on the previous line.
    let row = if end.column == 0 && end.row > node.start_position().row {
        end.row - 1
    } else {
        end.row
    };
    to_u32(row) + 1
}

/// Named children of a node, collected.
pub(crate) fn named_children(node: Node) -> Vec<Node> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Comment lines immediately preceding `node`, cleaned of comment markers.
pub(crate) fn leading_comments(node: Node, src: &str, markers: &[&str]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut expected_end = line(node);
    let mut prev = node.prev_sibling();

    while let Some(comment) = prev {
        if !comment.kind().contains("comment") || end_line(comment) + 1 < expected_end {
            break;
        }
        let cleaned = clean_comment(text(comment, src), markers);
        if cleaned.is_empty() && markers.iter().all(|m| !text(comment, src).starts_with(m)) {
            break;
        }
        for l in cleaned.into_iter().rev() {
            lines.push(l);
        }
        expected_end = line(comment);
        prev = comment.prev_sibling();
    }

    lines.reverse();
    lines
}

/// Strip comment markers (`///`, `//`, `/**`, `*/`, leading `*`).
fn clean_comment(raw: &str, markers: &[&str]) -> Vec<String> {
    if !markers.iter().any(|m| raw.starts_with(m)) {
        return Vec::new();
    }
    let body = raw.trim_end_matches("*/");
    body.lines()
        .map(|l| {
            let l = l.trim();
            let l = markers
                .iter()
                .find_map(|m| l.strip_prefix(m))
                .unwrap_or(l);
            let l = l.strip_prefix('*').unwrap_or(l);
            l.trim().to_string()
        })
        .filter(|l| !l.is_empty())
        .collect()
}

fn to_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// The class named `name` among `owner`'s children. When the file never
/// declares it, a class spanning `start..=end` is inserted at its place in
/// source order.
pub(crate) fn class_for_members<'a>(
    owner: &'a mut SymbolNode,
    name: &str,
    start: u32,
    end: u32,
) -> &'a mut SymbolNode {
    let existing = owner
        .children
        .iter()
        .position(|c| c.kind == NodeKind::Class && c.name == name);
    let idx = match existing {
        Some(idx) => idx,
        None => {
            let mut class = SymbolNode::class(name, start);
            class.finish(end);
            let at = owner
                .children
                .iter()
                .position(|c| c.line_num > start)
                .unwrap_or(owner.children.len());
            owner.children.insert(at, class);
            at
        }
    };
    &mut owner.children[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_comment() {
        assert_eq!(clean_comment("/// Adds two", &["///"]), vec!["Adds two"]);
        assert_eq!(
            clean_comment("/**\n * Line one\n * Line two\n */", &["/**"]),
            vec!["Line one", "Line two"]
        );
        assert!(clean_comment("// plain", &["///"]).is_empty());
    }

    #[test]
    fn test_collect_errors_on_broken_python() {
        let language: Language = tree_sitter_python::LANGUAGE.into();
        let (_, _, errors) = parse(&language, "def broken(:\n    pass\n", Path::new("x.py"))
            .unwrap_or_else(|_| panic!("grammar should load"));
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_clean_source_has_no_errors() {
        let language: Language = tree_sitter_python::LANGUAGE.into();
        let (tree, file, errors) = parse(&language, "x = 1\n", Path::new("x.py"))
            .unwrap_or_else(|_| panic!("grammar should load"));
        assert!(errors.is_empty());
        assert_eq!(file.name, "x.py");
        assert_eq!(line(tree.root_node()), 1);
    }
}
