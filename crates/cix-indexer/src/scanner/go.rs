//! Go scanner.

use super::ts::{self, end_line, field_text, leading_comments, line, named_children, text};
use super::{BlobCandidate, ScanOutput, Scanner};
use crate::tree::{Arg, Import, SymbolNode};
use std::path::Path;
use tree_sitter::Node;

/// Scans Go source into a symbol tree.
///
/// Struct and interface types become class nodes; methods are attached to
/// the class of their receiver type. Embedded fields and interfaces are
/// recorded as class refs.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoScanner;

impl Scanner for GoScanner {
    fn language(&self) -> &'static str {
        "Go"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["go"]
    }

    fn blob_candidates(&self, name: &str) -> Vec<BlobCandidate> {
        // A Go package is a directory; any file in it may define symbols.
        let dir = name.trim_matches('/');
        if dir.is_empty() {
            return Vec::new();
        }
        let last = dir.rsplit('/').next().unwrap_or(dir);
        vec![
            BlobCandidate::in_dir(format!("{}.go", last), dir),
            BlobCandidate::file(format!("{}.go", last)),
        ]
    }

    fn scan(&self, content: &str, path: &Path) -> ScanOutput {
        let language = tree_sitter_go::LANGUAGE.into();
        let (tree, mut file, errors) = match ts::parse(&language, content, path) {
            Ok(parsed) => parsed,
            Err(output) => return output,
        };

        let scan = GoScan { src: content };
        scan.source_file(tree.root_node(), &mut file);

        ts::finish(file, content, errors)
    }
}

struct GoScan<'s> {
    src: &'s str,
}

impl<'s> GoScan<'s> {
    fn source_file(&self, root: Node, file: &mut SymbolNode) {
        let mut methods: Vec<(String, SymbolNode)> = Vec::new();

        for decl in named_children(root) {
            match decl.kind() {
                "package_clause" => {
                    file.doc_lines = leading_comments(decl, self.src, &["//"]);
                }
                "import_declaration" => self.imports(decl, file),
                "function_declaration" => {
                    let func = self.function(decl);
                    file.children.push(func);
                }
                "method_declaration" => {
                    if let Some(receiver) = self.receiver_type(decl) {
                        methods.push((receiver, self.function(decl)));
                    }
                }
                "type_declaration" => {
                    for spec in named_children(decl) {
                        match spec.kind() {
                            "type_spec" => self.type_spec(spec, decl, file),
                            "type_alias" => {
                                if let Some(name) = field_text(spec, "name", self.src) {
                                    let target = field_text(spec, "type", self.src).map(str::to_string);
                                    SymbolNode::bind(&mut file.aliases, name, line(spec), target);
                                }
                            }
                            _ => {}
                        }
                    }
                }
                "var_declaration" | "const_declaration" => self.package_vars(decl, file),
                _ => {}
            }
        }

        for (receiver, method) in methods {
            let end = method.line_end.unwrap_or(method.line_num);
            let class = ts::class_for_members(file, &receiver, method.line_num, end);
            class.children.push(method);
        }
    }

    fn imports(&self, decl: Node, file: &mut SymbolNode) {
        let mut specs = Vec::new();
        for child in named_children(decl) {
            match child.kind() {
                "import_spec" => specs.push(child),
                "import_spec_list" => specs.extend(
                    named_children(child)
                        .into_iter()
                        .filter(|n| n.kind() == "import_spec"),
                ),
                _ => {}
            }
        }

        for spec in specs {
            let Some(path) = field_text(spec, "path", self.src) else {
                continue;
            };
            let path = unquote(path);
            if let Some(alias) = field_text(spec, "name", self.src) {
                if alias != "_" && alias != "." {
                    SymbolNode::bind(&mut file.aliases, alias, line(spec), Some(path.clone()));
                }
            }
            file.imports.push(Import {
                name: path,
                line: line(spec),
            });
        }
    }

    fn function(&self, node: Node) -> SymbolNode {
        let name = field_text(node, "name", self.src).unwrap_or_default();
        let mut func = SymbolNode::method(name, line(node));
        func.doc_lines = leading_comments(node, self.src, &["//"]);

        let args = node
            .child_by_field_name("parameters")
            .map(|p| self.parameters(p))
            .unwrap_or_default();

        if let Some(info) = func.method.as_mut() {
            info.args = args;
            info.signature = Some(signature(node, self.src));
            info.is_constructor = node.kind() == "function_declaration" && name.starts_with("New");
        }

        if let Some(body) = node.child_by_field_name("body") {
            self.locals(body, &mut func);
        }

        func.finish(end_line(node));
        func
    }

    fn parameters(&self, params: Node) -> Vec<Arg> {
        let mut args = Vec::new();
        for param in named_children(params) {
            let variadic = param.kind() == "variadic_parameter_declaration";
            if !variadic && param.kind() != "parameter_declaration" {
                continue;
            }
            let ty = field_text(param, "type", self.src).map(str::to_string);
            let attrs = variadic.then(|| "varargs".to_string());

            let mut cursor = param.walk();
            let names: Vec<Node> = param.children_by_field_name("name", &mut cursor).collect();
            for name in names {
                args.push(Arg {
                    name: text(name, self.src).to_string(),
                    extra_info: ty.clone(),
                    attrs: attrs.clone(),
                });
            }
        }
        args
    }

    /// Receiver type name of a method, pointer and type parameters removed.
    fn receiver_type(&self, method: Node) -> Option<String> {
        let receiver = method.child_by_field_name("receiver")?;
        let param = named_children(receiver)
            .into_iter()
            .find(|n| n.kind() == "parameter_declaration")?;
        let ty = field_text(param, "type", self.src)?;
        let name = ty.trim_start_matches('*').split('[').next().unwrap_or(ty).trim();
        (!name.is_empty()).then(|| name.to_string())
    }

    fn type_spec(&self, spec: Node, decl: Node, file: &mut SymbolNode) {
        let Some(name) = field_text(spec, "name", self.src) else {
            return;
        };
        let Some(ty) = spec.child_by_field_name("type") else {
            return;
        };

        match ty.kind() {
            "struct_type" | "interface_type" => {
                let mut class = SymbolNode::class(name, line(spec));
                // Docs sit above `type`, or above the spec inside a group.
                class.doc_lines = leading_comments(spec, self.src, &["//"]);
                if class.doc_lines.is_empty() {
                    class.doc_lines = leading_comments(decl, self.src, &["//"]);
                }
                if ty.kind() == "struct_type" {
                    self.struct_fields(ty, &mut class);
                } else {
                    self.interface_elems(ty, &mut class);
                }
                class.finish(end_line(spec));
                file.children.push(class);
            }
            _ => {
                SymbolNode::bind(
                    &mut file.aliases,
                    name,
                    line(spec),
                    Some(text(ty, self.src).to_string()),
                );
            }
        }
    }

    fn struct_fields(&self, struct_type: Node, class: &mut SymbolNode) {
        let Some(list) = named_children(struct_type)
            .into_iter()
            .find(|n| n.kind() == "field_declaration_list")
        else {
            return;
        };

        for field in named_children(list) {
            if field.kind() != "field_declaration" {
                continue;
            }
            let ty = field_text(field, "type", self.src);
            let mut cursor = field.walk();
            let names: Vec<Node> = field.children_by_field_name("name", &mut cursor).collect();

            if names.is_empty() {
                if let Some(ty) = ty {
                    class.add_classref(ty.trim_start_matches('*'), line(field), Some("embeds".to_string()));
                }
                continue;
            }
            for name in names {
                SymbolNode::bind(
                    &mut class.instance_vars,
                    text(name, self.src),
                    line(name),
                    ty.map(str::to_string),
                );
            }
        }
    }

    fn interface_elems(&self, iface: Node, class: &mut SymbolNode) {
        for elem in named_children(iface) {
            match elem.kind() {
                "method_elem" | "method_spec" => {
                    let name = field_text(elem, "name", self.src).unwrap_or_default();
                    let mut method = SymbolNode::method(name, line(elem));
                    method.doc_lines = leading_comments(elem, self.src, &["//"]);
                    if let Some(info) = method.method.as_mut() {
                        info.args = elem
                            .child_by_field_name("parameters")
                            .map(|p| self.parameters(p))
                            .unwrap_or_default();
                        info.signature = Some(compact(text(elem, self.src)));
                    }
                    method.finish(end_line(elem));
                    class.children.push(method);
                }
                "type_elem" | "constraint_elem" => {
                    for embedded in named_children(elem) {
                        if matches!(embedded.kind(), "type_identifier" | "qualified_type") {
                            class.add_classref(
                                text(embedded, self.src),
                                line(embedded),
                                Some("embeds".to_string()),
                            );
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn package_vars(&self, decl: Node, file: &mut SymbolNode) {
        for spec in self.var_specs(decl) {
            let ty = field_text(spec, "type", self.src)
                .map(str::to_string)
                .or_else(|| self.first_value_type(spec));
            let mut cursor = spec.walk();
            let names: Vec<Node> = spec.children_by_field_name("name", &mut cursor).collect();
            for name in names {
                let name_text = text(name, self.src);
                if name_text == "_" {
                    continue;
                }
                let mut var = SymbolNode::variable(name_text, line(name), ty.clone());
                var.doc_lines = leading_comments(spec, self.src, &["//"]);
                var.finish(end_line(spec));
                file.children.push(var);
            }
        }
    }

    fn var_specs<'t>(&self, decl: Node<'t>) -> Vec<Node<'t>> {
        let mut specs = Vec::new();
        for child in named_children(decl) {
            match child.kind() {
                "var_spec" | "const_spec" => specs.push(child),
                "var_spec_list" => specs.extend(named_children(child)),
                _ => {}
            }
        }
        specs
    }

    fn first_value_type(&self, spec: Node) -> Option<String> {
        let values = spec.child_by_field_name("value")?;
        let first = named_children(values).into_iter().next()?;
        self.guess_type(first)
    }

    fn locals(&self, node: Node, func: &mut SymbolNode) {
        for child in named_children(node) {
            match child.kind() {
                "func_literal" => continue,
                "short_var_declaration" => {
                    let left = child.child_by_field_name("left");
                    let right = child.child_by_field_name("right");
                    let values = right.map(named_children).unwrap_or_default();
                    for (idx, name) in left.map(named_children).unwrap_or_default().into_iter().enumerate() {
                        let name_text = text(name, self.src);
                        if name_text == "_" {
                            continue;
                        }
                        let ty = values.get(idx).and_then(|v| self.guess_type(*v));
                        SymbolNode::bind(&mut func.local_vars, name_text, line(name), ty);
                    }
                }
                "var_declaration" => {
                    for spec in self.var_specs(child) {
                        let ty = field_text(spec, "type", self.src).map(str::to_string);
                        let mut cursor = spec.walk();
                        let names: Vec<Node> = spec.children_by_field_name("name", &mut cursor).collect();
                        for name in names {
                            SymbolNode::bind(&mut func.local_vars, text(name, self.src), line(name), ty.clone());
                        }
                    }
                }
                _ => self.locals(child, func),
            }
        }
    }

    fn guess_type(&self, value: Node) -> Option<String> {
        let guess = match value.kind() {
            "interpreted_string_literal" | "raw_string_literal" => "string",
            "int_literal" => "int",
            "float_literal" => "float64",
            "rune_literal" => "rune",
            "true" | "false" => "bool",
            "composite_literal" => return field_text(value, "type", self.src).map(str::to_string),
            "unary_expression" => {
                // &T{...}
                let operand = value.child_by_field_name("operand")?;
                let inner = self.guess_type(operand)?;
                return Some(format!("*{}", inner));
            }
            "call_expression" => {
                let callee = field_text(value, "function", self.src)?;
                let ctor = callee.rsplit('.').next().unwrap_or(callee);
                return ctor.strip_prefix("New").filter(|t| !t.is_empty()).map(str::to_string);
            }
            _ => return None,
        };
        Some(guess.to_string())
    }
}

fn signature(node: Node, src: &str) -> String {
    let end = node
        .child_by_field_name("body")
        .map(|b| b.start_byte())
        .unwrap_or_else(|| node.end_byte());
    compact(src.get(node.start_byte()..end).unwrap_or(""))
}

fn compact(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn unquote(s: &str) -> String {
    s.trim_matches(|c| c == '"' || c == '`').to_string()
}
