//! CIX deserialization.

use super::{
    is_unrepresentable, ARG_TAG, CIX_VERSION, CLASSREF_TAG, DOC_TAG, IMPORT_TAG, RAW_CHAR_ESCAPE,
    ROOT_TAG, VAR_TAG,
};
use crate::tree::{Arg, ClassRef, Import, MethodInfo, NodeKind, SymbolNode, VarInfo};
use crate::IndexerError;
use roxmltree::{Document, Node};

/// Parse a CIX document back into a symbol tree.
pub fn from_cix(text: &str) -> Result<SymbolNode, IndexerError> {
    let doc = Document::parse(text)?;
    let root = doc.root_element();

    if root.tag_name().name() != ROOT_TAG {
        return Err(cix_err(format!(
            "expected <{}> root, found <{}>",
            ROOT_TAG,
            root.tag_name().name()
        )));
    }
    match root.attribute("version") {
        Some(CIX_VERSION) => {}
        Some(other) => return Err(cix_err(format!("unsupported CIX version {}", other))),
        None => return Err(cix_err("missing CIX version")),
    }

    let mut elements = root.children().filter(|n| n.is_element());
    let top = elements
        .next()
        .ok_or_else(|| cix_err("document has no symbol node"))?;
    if elements.next().is_some() {
        return Err(cix_err("document has more than one top-level node"));
    }

    read_node(top)
}

fn read_node(el: Node) -> Result<SymbolNode, IndexerError> {
    let tag = el.tag_name().name();
    let kind = NodeKind::from_tag(tag).ok_or_else(|| cix_err(format!("unknown element <{}>", tag)))?;

    let mut node = SymbolNode::new(kind, required(el, "name")?, number(el, "line")?);
    node.line_end = optional_number(el, "lineend")?;
    node.type_name = text(el, "type")?;

    if el.attribute("callable") == Some("1") {
        node.method = Some(MethodInfo {
            args: Vec::new(),
            signature: text(el, "signature")?,
            is_constructor: el.attribute("constructor") == Some("1"),
            is_classmethod: el.attribute("classmethod") == Some("1"),
        });
    }

    for child in el.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            DOC_TAG => node.doc_lines.push(required(child, "text")?),
            IMPORT_TAG => node.imports.push(Import {
                name: required(child, "name")?,
                line: number(child, "line")?,
            }),
            VAR_TAG => {
                let info = VarInfo {
                    line_num: number(child, "line")?,
                    type_name: text(child, "type")?,
                };
                let name = required(child, "name")?;
                let map = match child.attribute("map") {
                    Some("class") => &mut node.class_vars,
                    Some("instance") => &mut node.instance_vars,
                    Some("local") => &mut node.local_vars,
                    Some("alias") => &mut node.aliases,
                    other => return Err(cix_err(format!("unknown variable map {:?}", other))),
                };
                map.insert(name, info);
            }
            CLASSREF_TAG => node.classrefs.push(ClassRef {
                name: required(child, "name")?,
                line: number(child, "line")?,
                ref_type: text(child, "type")?,
            }),
            ARG_TAG => {
                let arg = Arg {
                    name: required(child, "name")?,
                    extra_info: text(child, "extra")?,
                    attrs: text(child, "attrs")?,
                };
                node.method
                    .as_mut()
                    .ok_or_else(|| cix_err("<arg> on a non-callable node"))?
                    .args
                    .push(arg);
            }
            _ => node.children.push(read_node(child)?),
        }
    }

    Ok(node)
}

fn required(el: Node, name: &str) -> Result<String, IndexerError> {
    text(el, name)?.ok_or_else(|| {
        cix_err(format!(
            "<{}> missing attribute '{}'",
            el.tag_name().name(),
            name
        ))
    })
}

/// Attribute value with raw-character escapes undone.
fn text(el: Node, name: &str) -> Result<Option<String>, IndexerError> {
    el.attribute(name).map(unescape_raw).transpose()
}

fn unescape_raw(value: &str) -> Result<String, IndexerError> {
    if !value.contains(RAW_CHAR_ESCAPE) {
        return Ok(value.to_string());
    }

    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != RAW_CHAR_ESCAPE {
            out.push(c);
            continue;
        }
        let hex: String = chars.by_ref().take(4).collect();
        let decoded = Some(hex.as_str())
            .filter(|h| h.len() == 4 && h.chars().all(|d| d.is_ascii_hexdigit()))
            .and_then(|h| u32::from_str_radix(h, 16).ok())
            .and_then(char::from_u32)
            .filter(|&d| d == RAW_CHAR_ESCAPE || is_unrepresentable(d))
            .ok_or_else(|| cix_err(format!("bad escaped character {:?}", hex)))?;
        out.push(decoded);
    }
    Ok(out)
}

fn number(el: Node, name: &str) -> Result<u32, IndexerError> {
    optional_number(el, name)?.ok_or_else(|| {
        cix_err(format!(
            "<{}> missing attribute '{}'",
            el.tag_name().name(),
            name
        ))
    })
}

fn optional_number(el: Node, name: &str) -> Result<Option<u32>, IndexerError> {
    el.attribute(name)
        .map(|v| {
            v.parse::<u32>()
                .map_err(|_| cix_err(format!("attribute '{}' is not a line number: {}", name, v)))
        })
        .transpose()
}

fn cix_err(message: impl Into<String>) -> IndexerError {
    IndexerError::Cix(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_minimal_document() {
        let text = r#"<?xml version="1.0" encoding="UTF-8"?>
<codeintel version="3.0">
  <file name="b.py" line="1" lineend="1">
    <class name="Bar" line="1" lineend="1"/>
  </file>
</codeintel>
"#;
        let tree = from_cix(text).unwrap();
        assert_eq!(tree.kind, NodeKind::File);
        assert_eq!(tree.children[0].name, "Bar");
        assert!(tree.children[0].classrefs.is_empty());
    }

    #[test]
    fn test_bad_line_number() {
        let text = r#"<codeintel version="3.0"><file name="b.py" line="x"/></codeintel>"#;
        let err = from_cix(text).unwrap_err();
        assert!(err.to_string().contains("line number"));
    }

    #[test]
    fn test_arg_requires_callable() {
        let text = r#"<codeintel version="3.0"><class name="C" line="1"><arg name="x"/></class></codeintel>"#;
        assert!(from_cix(text).is_err());
    }

    #[test]
    fn test_rejects_bad_raw_escape() {
        let text = "<codeintel version=\"3.0\"><file name=\"a\u{E000}00\" line=\"1\"/></codeintel>";
        assert!(from_cix(text).is_err());
        let text = "<codeintel version=\"3.0\"><file name=\"a\u{E000}0041\" line=\"1\"/></codeintel>";
        assert!(from_cix(text).is_err());
    }

    #[test]
    fn test_decodes_character_references() {
        let text = r#"<codeintel version="3.0"><file name="a&#9;b&#10;c&amp;" line="1"/></codeintel>"#;
        let tree = from_cix(text).unwrap();
        assert_eq!(tree.name, "a\tb\nc&");
    }
}
