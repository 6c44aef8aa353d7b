//! Rust scanner.

use super::ts::{self, end_line, field_text, leading_comments, line, named_children, text};
use super::{BlobCandidate, ScanOutput, Scanner};
use crate::tree::{Arg, Import, NodeKind, SymbolNode};
use std::path::Path;
use tree_sitter::Node;

const DOC_MARKERS: &[&str] = &["///", "/**"];

/// Scans Rust source into a symbol tree.
///
/// Structs, enums, unions and traits become class nodes. Methods in `impl`
/// blocks are attached to the class of the implementing type, creating it
/// when the type is declared elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustScanner;

impl Scanner for RustScanner {
    fn language(&self) -> &'static str {
        "Rust"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }

    fn blob_candidates(&self, name: &str) -> Vec<BlobCandidate> {
        let parts: Vec<&str> = name.split("::").filter(|p| !p.is_empty()).collect();
        let Some((last, parents)) = parts.split_last() else {
            return Vec::new();
        };
        let file = format!("{}.rs", last);
        if parents.is_empty() {
            vec![
                BlobCandidate::file(file),
                BlobCandidate::in_dir("mod.rs", *last),
            ]
        } else {
            let parent_dir: std::path::PathBuf = parents.iter().collect();
            let module_dir: std::path::PathBuf = parts.iter().collect();
            vec![
                BlobCandidate::in_dir(file, parent_dir),
                BlobCandidate::in_dir("mod.rs", module_dir),
            ]
        }
    }

    fn module_name(&self, path: &Path) -> String {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if stem == "mod" {
            if let Some(dir) = path.parent().and_then(|p| p.file_name()) {
                return dir.to_string_lossy().into_owned();
            }
        }
        stem
    }

    fn scan(&self, content: &str, path: &Path) -> ScanOutput {
        let language = tree_sitter_rust::LANGUAGE.into();
        let (tree, mut file, errors) = match ts::parse(&language, content, path) {
            Ok(parsed) => parsed,
            Err(output) => return output,
        };

        let root = tree.root_node();
        let scan = RustScan { src: content };
        file.doc_lines = scan.inner_docs(root);
        scan.items(root, &mut file);

        ts::finish(file, content, errors)
    }
}

struct RustScan<'s> {
    src: &'s str,
}

/// An `impl` block waiting for its type's class node.
struct PendingImpl {
    type_name: String,
    trait_name: Option<(String, u32)>,
    line: u32,
    end: u32,
    methods: Vec<SymbolNode>,
}

impl<'s> RustScan<'s> {
    /// Scan the items of a source file or module body into `owner`.
    fn items(&self, body: Node, owner: &mut SymbolNode) {
        let mut impls = Vec::new();

        for item in named_children(body) {
            match item.kind() {
                "function_item" => {
                    let method = self.function(item, false);
                    owner.children.push(method);
                }
                "struct_item" | "union_item" => owner.children.push(self.structure(item)),
                "enum_item" => owner.children.push(self.enumeration(item)),
                "trait_item" => owner.children.push(self.trait_item(item)),
                "impl_item" => impls.extend(self.impl_block(item)),
                "mod_item" => {
                    let name = field_text(item, "name", self.src).unwrap_or_default();
                    let mut module = SymbolNode::new(NodeKind::Module, name, line(item));
                    module.doc_lines = self.docs(item);
                    if let Some(body) = item.child_by_field_name("body") {
                        self.items(body, &mut module);
                    }
                    module.finish(end_line(item));
                    owner.children.push(module);
                }
                "use_declaration" => self.use_declaration(item, owner),
                "extern_crate_declaration" => {
                    if let Some(name) = field_text(item, "name", self.src) {
                        owner.imports.push(Import {
                            name: name.to_string(),
                            line: line(item),
                        });
                    }
                }
                "const_item" | "static_item" => {
                    let name = field_text(item, "name", self.src).unwrap_or_default();
                    let ty = field_text(item, "type", self.src).map(str::to_string);
                    let mut var = SymbolNode::variable(name, line(item), ty);
                    var.doc_lines = self.docs(item);
                    var.finish(end_line(item));
                    owner.children.push(var);
                }
                "type_item" => {
                    if let Some(name) = field_text(item, "name", self.src) {
                        let target = field_text(item, "type", self.src).map(str::to_string);
                        SymbolNode::bind(&mut owner.aliases, name, line(item), target);
                    }
                }
                _ => {}
            }
        }

        for pending in impls {
            self.attach_impl(owner, pending);
        }
    }

    fn attach_impl(&self, owner: &mut SymbolNode, pending: PendingImpl) {
        let class = ts::class_for_members(owner, &pending.type_name, pending.line, pending.end);

        if let Some((trait_name, at)) = pending.trait_name {
            class.add_classref(trait_name, at, Some("implements".to_string()));
        }
        class.children.extend(pending.methods);
    }

    fn function(&self, node: Node, in_impl: bool) -> SymbolNode {
        let name = field_text(node, "name", self.src).unwrap_or_default();
        let mut method = SymbolNode::method(name, line(node));
        method.doc_lines = self.docs(node);

        let mut args = Vec::new();
        let mut has_self = false;
        if let Some(params) = node.child_by_field_name("parameters") {
            for param in named_children(params) {
                match param.kind() {
                    "self_parameter" => {
                        has_self = true;
                        args.push(Arg {
                            name: "self".to_string(),
                            extra_info: Some(text(param, self.src).to_string()),
                            attrs: None,
                        });
                    }
                    "parameter" => args.push(Arg {
                        name: field_text(param, "pattern", self.src)
                            .unwrap_or_default()
                            .to_string(),
                        extra_info: field_text(param, "type", self.src).map(str::to_string),
                        attrs: None,
                    }),
                    "variadic_parameter" => args.push(Arg {
                        name: "...".to_string(),
                        extra_info: None,
                        attrs: Some("varargs".to_string()),
                    }),
                    _ => {}
                }
            }
        }

        if let Some(info) = method.method.as_mut() {
            info.args = args;
            info.signature = Some(signature(node, self.src));
            info.is_constructor = in_impl && name == "new";
            info.is_classmethod = in_impl && !has_self;
        }

        if let Some(body) = node.child_by_field_name("body") {
            self.locals(body, &mut method);
        }

        method.finish(end_line(node));
        method
    }

    /// Collect `let` bindings from a function body, skipping nested items.
    fn locals(&self, node: Node, method: &mut SymbolNode) {
        for child in named_children(node) {
            match child.kind() {
                "function_item" | "impl_item" | "mod_item" | "trait_item" => continue,
                "let_declaration" => {
                    let ty = field_text(child, "type", self.src)
                        .map(str::to_string)
                        .or_else(|| {
                            child
                                .child_by_field_name("value")
                                .and_then(|v| self.guess_type(v))
                        });
                    if let Some(pattern) = child.child_by_field_name("pattern") {
                        let mut names = Vec::new();
                        self.pattern_names(pattern, &mut names);
                        for (name, at) in names {
                            SymbolNode::bind(&mut method.local_vars, name, at, ty.clone());
                        }
                    }
                    if let Some(value) = child.child_by_field_name("value") {
                        self.locals(value, method);
                    }
                }
                _ => self.locals(child, method),
            }
        }
    }

    fn pattern_names(&self, pattern: Node, out: &mut Vec<(String, u32)>) {
        match pattern.kind() {
            "identifier" => out.push((text(pattern, self.src).to_string(), line(pattern))),
            "mut_pattern" | "ref_pattern" | "tuple_pattern" | "slice_pattern"
            | "tuple_struct_pattern" | "reference_pattern" => {
                for child in named_children(pattern) {
                    // Skip the struct path of `Some(x)`.
                    if pattern.kind() == "tuple_struct_pattern"
                        && pattern.child_by_field_name("type") == Some(child)
                    {
                        continue;
                    }
                    self.pattern_names(child, out);
                }
            }
            _ => {}
        }
    }

    fn guess_type(&self, value: Node) -> Option<String> {
        let guess = match value.kind() {
            "string_literal" | "raw_string_literal" => "&str",
            "boolean_literal" => "bool",
            "char_literal" => "char",
            "integer_literal" => "i32",
            "float_literal" => "f64",
            "struct_expression" => return field_text(value, "name", self.src).map(str::to_string),
            "macro_invocation" => match field_text(value, "macro", self.src)? {
                "vec" => "Vec",
                "format" => "String",
                _ => return None,
            },
            "call_expression" => {
                // `Foo::new(..)` yields `Foo`.
                let callee = value.child_by_field_name("function")?;
                if callee.kind() != "scoped_identifier" {
                    return None;
                }
                let path = field_text(callee, "path", self.src)?;
                return Some(strip_generics(path).to_string());
            }
            _ => return None,
        };
        Some(guess.to_string())
    }

    fn structure(&self, node: Node) -> SymbolNode {
        let name = field_text(node, "name", self.src).unwrap_or_default();
        let mut class = SymbolNode::class(name, line(node));
        class.doc_lines = self.docs(node);

        if let Some(body) = node.child_by_field_name("body") {
            match body.kind() {
                "field_declaration_list" => {
                    for field in named_children(body) {
                        if field.kind() != "field_declaration" {
                            continue;
                        }
                        if let Some(field_name) = field_text(field, "name", self.src) {
                            let ty = field_text(field, "type", self.src).map(str::to_string);
                            SymbolNode::bind(&mut class.instance_vars, field_name, line(field), ty);
                        }
                    }
                }
                "ordered_field_declaration_list" => {
                    let mut cursor = body.walk();
                    let types: Vec<Node> = body.children_by_field_name("type", &mut cursor).collect();
                    for (idx, ty) in types.into_iter().enumerate() {
                        SymbolNode::bind(
                            &mut class.instance_vars,
                            idx.to_string(),
                            line(ty),
                            Some(text(ty, self.src).to_string()),
                        );
                    }
                }
                _ => {}
            }
        }

        class.finish(end_line(node));
        class
    }

    fn enumeration(&self, node: Node) -> SymbolNode {
        let name = field_text(node, "name", self.src).unwrap_or_default();
        let mut class = SymbolNode::class(name, line(node));
        class.doc_lines = self.docs(node);

        if let Some(body) = node.child_by_field_name("body") {
            for variant in named_children(body) {
                if variant.kind() != "enum_variant" {
                    continue;
                }
                if let Some(variant_name) = field_text(variant, "name", self.src) {
                    SymbolNode::bind(&mut class.class_vars, variant_name, line(variant), None);
                }
            }
        }

        class.finish(end_line(node));
        class
    }

    fn trait_item(&self, node: Node) -> SymbolNode {
        let name = field_text(node, "name", self.src).unwrap_or_default();
        let mut class = SymbolNode::class(name, line(node));
        class.doc_lines = self.docs(node);

        if let Some(bounds) = node.child_by_field_name("bounds") {
            for bound in named_children(bounds) {
                if matches!(bound.kind(), "type_identifier" | "scoped_type_identifier" | "generic_type") {
                    class.add_classref(
                        strip_generics(text(bound, self.src)),
                        line(bound),
                        Some("extends".to_string()),
                    );
                }
            }
        }

        if let Some(body) = node.child_by_field_name("body") {
            for item in named_children(body) {
                match item.kind() {
                    "function_item" | "function_signature_item" => {
                        class.children.push(self.function(item, true));
                    }
                    "associated_type" => {
                        if let Some(assoc) = field_text(item, "name", self.src) {
                            SymbolNode::bind(&mut class.aliases, assoc, line(item), None);
                        }
                    }
                    _ => {}
                }
            }
        }

        class.finish(end_line(node));
        class
    }

    fn impl_block(&self, node: Node) -> Option<PendingImpl> {
        let type_name = strip_generics(field_text(node, "type", self.src)?).to_string();
        let trait_name = node
            .child_by_field_name("trait")
            .map(|t| (strip_generics(text(t, self.src)).to_string(), line(t)));

        let mut methods = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            for item in named_children(body) {
                if item.kind() == "function_item" {
                    methods.push(self.function(item, true));
                }
            }
        }

        Some(PendingImpl {
            type_name,
            trait_name,
            line: line(node),
            end: end_line(node),
            methods,
        })
    }

    fn use_declaration(&self, node: Node, owner: &mut SymbolNode) {
        let Some(argument) = node.child_by_field_name("argument") else {
            return;
        };
        let at = line(node);

        if argument.kind() == "use_as_clause" {
            let path = field_text(argument, "path", self.src).unwrap_or_default();
            if let Some(alias) = field_text(argument, "alias", self.src) {
                SymbolNode::bind(&mut owner.aliases, alias, at, Some(compact(path)));
            }
            owner.imports.push(Import {
                name: compact(path),
                line: at,
            });
            return;
        }

        owner.imports.push(Import {
            name: compact(text(argument, self.src)),
            line: at,
        });
    }

    /// Doc comments above an item, skipping over its attributes.
    fn docs(&self, node: Node) -> Vec<String> {
        let mut anchor = node;
        while let Some(prev) = anchor.prev_sibling() {
            if prev.kind() != "attribute_item" {
                break;
            }
            anchor = prev;
        }
        leading_comments(anchor, self.src, DOC_MARKERS)
    }

    /// `//!` comments at the top of the file.
    fn inner_docs(&self, root: Node) -> Vec<String> {
        let mut lines = Vec::new();
        for child in named_children(root) {
            let raw = text(child, self.src);
            if !child.kind().contains("comment") || !raw.starts_with("//!") {
                break;
            }
            let doc = raw.trim_start_matches("//!").trim();
            if !doc.is_empty() {
                lines.push(doc.to_string());
            }
        }
        lines
    }
}

/// Function header up to the body, whitespace collapsed.
fn signature(node: Node, src: &str) -> String {
    let end = node
        .child_by_field_name("body")
        .map(|b| b.start_byte())
        .unwrap_or_else(|| node.end_byte());
    let header = src.get(node.start_byte()..end).unwrap_or("");
    compact(header.trim_end_matches(';'))
}

fn compact(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_generics(s: &str) -> &str {
    s.split('<').next().unwrap_or(s).trim()
}
