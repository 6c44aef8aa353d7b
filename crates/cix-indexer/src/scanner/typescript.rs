//! TypeScript and JavaScript scanner.

use super::ts::{self, end_line, field_text, leading_comments, line, named_children, text};
use super::{BlobCandidate, ScanOutput, Scanner};
use crate::tree::{Arg, Import, NodeKind, SymbolNode, VarMap};
use std::path::Path;
use tree_sitter::{Language, Node};

const DOC_MARKERS: &[&str] = &["/**"];

/// Scans TypeScript or JavaScript source into a symbol tree.
///
/// Both dialects share the TypeScript grammars; JavaScript always goes
/// through the TSX grammar so JSX parses.
#[derive(Debug, Clone, Copy)]
pub struct TypeScriptScanner {
    javascript: bool,
}

impl TypeScriptScanner {
    pub fn typescript() -> Self {
        Self { javascript: false }
    }

    pub fn javascript() -> Self {
        Self { javascript: true }
    }

    fn grammar(&self, path: &Path) -> Language {
        let is_tsx = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("tsx"));
        if self.javascript || is_tsx {
            tree_sitter_typescript::LANGUAGE_TSX.into()
        } else {
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
        }
    }
}

impl Scanner for TypeScriptScanner {
    fn language(&self) -> &'static str {
        if self.javascript {
            "JavaScript"
        } else {
            "TypeScript"
        }
    }

    fn extensions(&self) -> &'static [&'static str] {
        if self.javascript {
            &["js", "jsx", "mjs", "cjs"]
        } else {
            &["ts", "tsx", "mts", "cts"]
        }
    }

    fn blob_candidates(&self, name: &str) -> Vec<BlobCandidate> {
        let trimmed = name.trim_start_matches("./").trim_end_matches('/');
        if trimmed.is_empty() {
            return Vec::new();
        }
        let (dir, base) = match trimmed.rsplit_once('/') {
            Some((dir, base)) => (Some(dir), base),
            None => (None, trimmed),
        };

        let mut candidates = Vec::new();
        for ext in self.extensions() {
            let file = format!("{}.{}", base, ext);
            candidates.push(match dir {
                Some(dir) => BlobCandidate::in_dir(file, dir),
                None => BlobCandidate::file(file),
            });
        }
        for ext in self.extensions() {
            candidates.push(BlobCandidate::in_dir(format!("index.{}", ext), trimmed));
        }
        candidates
    }

    fn module_name(&self, path: &Path) -> String {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if stem == "index" {
            if let Some(dir) = path.parent().and_then(|p| p.file_name()) {
                return dir.to_string_lossy().into_owned();
            }
        }
        stem
    }

    fn scan(&self, content: &str, path: &Path) -> ScanOutput {
        let language = self.grammar(path);
        let (tree, mut file, errors) = match ts::parse(&language, content, path) {
            Ok(parsed) => parsed,
            Err(output) => return output,
        };

        let mut scan = TsScan {
            src: content,
            instance_vars: Vec::new(),
        };
        scan.statements(tree.root_node(), &mut file);

        ts::finish(file, content, errors)
    }
}

struct TsScan<'s> {
    src: &'s str,
    /// `this.x` accumulators, one per enclosing class.
    instance_vars: Vec<VarMap>,
}

impl<'s> TsScan<'s> {
    fn statements(&mut self, body: Node, owner: &mut SymbolNode) {
        for stmt in named_children(body) {
            self.statement(stmt, stmt, owner);
        }
    }

    /// `doc_anchor` is the node whose preceding comments document `stmt`
    /// (the export statement for exported declarations).
    fn statement(&mut self, stmt: Node, doc_anchor: Node, owner: &mut SymbolNode) {
        match stmt.kind() {
            "export_statement" => {
                let decl = stmt
                    .child_by_field_name("declaration")
                    .or_else(|| stmt.child_by_field_name("value"));
                if let Some(decl) = decl {
                    self.statement(decl, stmt, owner);
                }
            }
            "import_statement" => self.import(stmt, owner),
            "class_declaration" | "abstract_class_declaration" | "class" => {
                if stmt.child_by_field_name("name").is_none() {
                    return;
                }
                let mut class = self.class(stmt);
                class.doc_lines = leading_comments(doc_anchor, self.src, DOC_MARKERS);
                owner.children.push(class);
            }
            "interface_declaration" => {
                let mut iface = self.interface(stmt);
                iface.doc_lines = leading_comments(doc_anchor, self.src, DOC_MARKERS);
                owner.children.push(iface);
            }
            "enum_declaration" => {
                let mut class = self.enumeration(stmt);
                class.doc_lines = leading_comments(doc_anchor, self.src, DOC_MARKERS);
                owner.children.push(class);
            }
            "function_declaration" | "generator_function_declaration" | "function_signature"
            | "function_expression" | "function" => {
                let Some(name) = field_text(stmt, "name", self.src) else {
                    return;
                };
                let mut func = self.callable(stmt, name, false);
                func.doc_lines = leading_comments(doc_anchor, self.src, DOC_MARKERS);
                owner.children.push(func);
            }
            "lexical_declaration" | "variable_declaration" => {
                self.declarations(stmt, doc_anchor, owner);
            }
            "type_alias_declaration" => {
                if let Some(name) = field_text(stmt, "name", self.src) {
                    let value = field_text(stmt, "value", self.src).map(compact);
                    SymbolNode::bind(&mut owner.aliases, name, line(stmt), value);
                }
            }
            "internal_module" | "module" => {
                let name = field_text(stmt, "name", self.src)
                    .map(|n| n.trim_matches(|c| c == '"' || c == '\'').to_string())
                    .unwrap_or_default();
                let mut module = SymbolNode::new(NodeKind::Module, name, line(stmt));
                module.doc_lines = leading_comments(doc_anchor, self.src, DOC_MARKERS);
                if let Some(body) = stmt.child_by_field_name("body") {
                    self.statements(body, &mut module);
                }
                module.finish(end_line(stmt));
                owner.children.push(module);
            }
            "expression_statement" => {
                // `namespace Foo {}` parses as an expression statement.
                if let Some(inner) = named_children(stmt).into_iter().next() {
                    if inner.kind() == "internal_module" {
                        self.statement(inner, doc_anchor, owner);
                    }
                }
            }
            _ => {}
        }
    }

    fn import(&self, stmt: Node, owner: &mut SymbolNode) {
        let Some(source) = field_text(stmt, "source", self.src) else {
            return;
        };
        let source = unquote(source);
        let at = line(stmt);

        let clause = named_children(stmt)
            .into_iter()
            .find(|n| n.kind() == "import_clause");
        if let Some(clause) = clause {
            for part in named_children(clause) {
                match part.kind() {
                    // import Foo from "x"
                    "identifier" => SymbolNode::bind(
                        &mut owner.aliases,
                        text(part, self.src),
                        at,
                        Some(format!("{}.default", source)),
                    ),
                    // import * as ns from "x"
                    "namespace_import" => {
                        if let Some(ident) = named_children(part).into_iter().next() {
                            SymbolNode::bind(&mut owner.aliases, text(ident, self.src), at, Some(source.clone()));
                        }
                    }
                    // import { a as b } from "x"
                    "named_imports" => {
                        for spec in named_children(part) {
                            if spec.kind() != "import_specifier" {
                                continue;
                            }
                            let imported = field_text(spec, "name", self.src).unwrap_or_default();
                            if let Some(alias) = field_text(spec, "alias", self.src) {
                                SymbolNode::bind(
                                    &mut owner.aliases,
                                    alias,
                                    at,
                                    Some(format!("{}.{}", source, imported)),
                                );
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        owner.imports.push(Import {
            name: source,
            line: at,
        });
    }

    fn class(&mut self, node: Node) -> SymbolNode {
        let name = field_text(node, "name", self.src).unwrap_or_default();
        let mut class = SymbolNode::class(name, line(node));

        let heritage = named_children(node)
            .into_iter()
            .find(|n| n.kind() == "class_heritage");
        if let Some(heritage) = heritage {
            for clause in named_children(heritage) {
                let ref_type = match clause.kind() {
                    "extends_clause" => "extends",
                    "implements_clause" => "implements",
                    _ => continue,
                };
                for base in named_children(clause) {
                    if base.kind() == "type_arguments" {
                        continue;
                    }
                    class.add_classref(
                        strip_generics(text(base, self.src)),
                        line(base),
                        Some(ref_type.to_string()),
                    );
                }
            }
        }

        self.instance_vars.push(VarMap::new());
        if let Some(body) = node.child_by_field_name("body") {
            for member in named_children(body) {
                self.class_member(member, &mut class);
            }
        }
        if let Some(vars) = self.instance_vars.pop() {
            for (var, info) in vars {
                class.instance_vars.entry(var).or_insert(info);
            }
        }

        class.finish(end_line(node));
        class
    }

    fn class_member(&mut self, member: Node, class: &mut SymbolNode) {
        match member.kind() {
            "method_definition" | "method_signature" | "abstract_method_signature" => {
                let name = field_text(member, "name", self.src).unwrap_or_default();
                let is_static = has_token(member, "static");
                let mut method = self.callable(member, name, true);
                method.doc_lines = leading_comments(member, self.src, DOC_MARKERS);
                if let Some(info) = method.method.as_mut() {
                    info.is_constructor = name == "constructor";
                    info.is_classmethod = is_static;
                }
                class.children.push(method);
            }
            "public_field_definition" | "field_definition" => {
                let Some(name_node) = member
                    .child_by_field_name("name")
                    .or_else(|| member.child_by_field_name("property"))
                else {
                    return;
                };
                let name = text(name_node, self.src);
                let ty = field_text(member, "type", self.src)
                    .map(type_annotation)
                    .or_else(|| member.child_by_field_name("value").and_then(|v| self.guess_type(v)));
                let map = if has_token(member, "static") {
                    &mut class.class_vars
                } else {
                    &mut class.instance_vars
                };
                SymbolNode::bind(map, name, line(member), ty);
            }
            _ => {}
        }
    }

    fn interface(&self, node: Node) -> SymbolNode {
        let name = field_text(node, "name", self.src).unwrap_or_default();
        let mut iface = SymbolNode::class(name, line(node));

        for child in named_children(node) {
            if child.kind() == "extends_type_clause" {
                for base in named_children(child) {
                    iface.add_classref(
                        strip_generics(text(base, self.src)),
                        line(base),
                        Some("extends".to_string()),
                    );
                }
            }
        }

        if let Some(body) = node.child_by_field_name("body") {
            for member in named_children(body) {
                match member.kind() {
                    "method_signature" => {
                        let member_name = field_text(member, "name", self.src).unwrap_or_default();
                        let mut method = self.signature_only(member, member_name);
                        method.doc_lines = leading_comments(member, self.src, DOC_MARKERS);
                        iface.children.push(method);
                    }
                    "property_signature" => {
                        if let Some(prop) = field_text(member, "name", self.src) {
                            let ty = field_text(member, "type", self.src).map(type_annotation);
                            SymbolNode::bind(&mut iface.instance_vars, prop, line(member), ty);
                        }
                    }
                    _ => {}
                }
            }
        }

        iface.finish(end_line(node));
        iface
    }

    fn enumeration(&self, node: Node) -> SymbolNode {
        let name = field_text(node, "name", self.src).unwrap_or_default();
        let mut class = SymbolNode::class(name, line(node));
        if let Some(body) = node.child_by_field_name("body") {
            for member in named_children(body) {
                let member_name = match member.kind() {
                    "property_identifier" | "string" => Some(member),
                    "enum_assignment" => member.child_by_field_name("name"),
                    _ => None,
                };
                if let Some(n) = member_name {
                    SymbolNode::bind(&mut class.class_vars, unquote(text(n, self.src)), line(n), None);
                }
            }
        }
        class.finish(end_line(node));
        class
    }

    fn declarations(&mut self, stmt: Node, doc_anchor: Node, owner: &mut SymbolNode) {
        for declarator in named_children(stmt) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            let Some(name_node) = declarator.child_by_field_name("name") else {
                continue;
            };
            let name = text(name_node, self.src);
            let value = declarator.child_by_field_name("value");

            // const f = (a) => ...
            if let Some(func) = value.filter(|v| {
                matches!(v.kind(), "arrow_function" | "function_expression" | "function")
            }) {
                let mut method = self.callable(func, name, false);
                method.line_num = line(declarator);
                method.doc_lines = leading_comments(doc_anchor, self.src, DOC_MARKERS);
                owner.children.push(method);
                continue;
            }

            let ty = field_text(declarator, "type", self.src)
                .map(type_annotation)
                .or_else(|| value.and_then(|v| self.guess_type(v)));

            if owner.kind == NodeKind::Method {
                SymbolNode::bind(&mut owner.local_vars, name, line(declarator), ty);
            } else if name_node.kind() == "identifier" {
                let mut var = SymbolNode::variable(name, line(declarator), ty);
                var.doc_lines = leading_comments(doc_anchor, self.src, DOC_MARKERS);
                var.finish(end_line(declarator));
                owner.children.push(var);
            }
        }
    }

    fn callable(&mut self, node: Node, name: &str, in_class: bool) -> SymbolNode {
        let mut method = self.signature_only(node, name);

        if let Some(body) = node.child_by_field_name("body") {
            if body.kind() == "statement_block" {
                self.body(body, &mut method, in_class);
            }
        }

        // Parameter properties: constructor(private x: number)
        if in_class && name == "constructor" {
            if let Some(params) = node.child_by_field_name("parameters") {
                for param in named_children(params) {
                    if has_child_kind(param, "accessibility_modifier") {
                        if let (Some(prop), Some(vars)) =
                            (field_text(param, "pattern", self.src), self.instance_vars.last_mut())
                        {
                            let ty = field_text(param, "type", self.src).map(type_annotation);
                            SymbolNode::bind(vars, prop, line(param), ty);
                        }
                    }
                }
            }
        }

        method.finish(end_line(node));
        method
    }

    fn signature_only(&self, node: Node, name: &str) -> SymbolNode {
        let mut method = SymbolNode::method(name, line(node));
        let args = match node.child_by_field_name("parameters") {
            Some(params) => self.parameters(params),
            // x => x * 2
            None => node
                .child_by_field_name("parameter")
                .map(|p| {
                    vec![Arg {
                        name: text(p, self.src).to_string(),
                        ..Default::default()
                    }]
                })
                .unwrap_or_default(),
        };

        let mut signature = format!(
            "{}{}",
            name,
            field_text(node, "parameters", self.src).map(compact).unwrap_or_else(|| "()".to_string())
        );
        if let Some(ret) = field_text(node, "return_type", self.src) {
            signature.push_str(&compact(ret));
        }

        if let Some(info) = method.method.as_mut() {
            info.args = args;
            info.signature = Some(signature);
        }
        method
    }

    fn parameters(&self, params: Node) -> Vec<Arg> {
        let mut args = Vec::new();
        for param in named_children(params) {
            let (pattern, default_attr) = match param.kind() {
                "required_parameter" => (param.child_by_field_name("pattern"), None),
                "optional_parameter" => (param.child_by_field_name("pattern"), Some("optional")),
                // Plain JS parameter lists
                "identifier" => (Some(param), None),
                "assignment_pattern" => (param.child_by_field_name("left"), Some("default")),
                "rest_pattern" => (Some(param), None),
                _ => continue,
            };
            let Some(pattern) = pattern else {
                continue;
            };

            let is_rest = pattern.kind() == "rest_pattern";
            let name = text(pattern, self.src).trim_start_matches("...").to_string();
            let attrs = if is_rest {
                Some("varargs".to_string())
            } else if param.child_by_field_name("value").is_some() {
                Some("default".to_string())
            } else {
                default_attr.map(str::to_string)
            };
            args.push(Arg {
                name,
                extra_info: field_text(param, "type", self.src).map(type_annotation),
                attrs,
            });
        }
        args
    }

    /// Locals and `this.x` assignments in a function body.
    fn body(&mut self, node: Node, method: &mut SymbolNode, in_class: bool) {
        for child in named_children(node) {
            match child.kind() {
                "function_declaration" | "class_declaration" | "arrow_function"
                | "function_expression" | "method_definition" => continue,
                "lexical_declaration" | "variable_declaration" => {
                    for declarator in named_children(child) {
                        if declarator.kind() != "variable_declarator" {
                            continue;
                        }
                        if let Some(name) = field_text(declarator, "name", self.src) {
                            let ty = field_text(declarator, "type", self.src)
                                .map(type_annotation)
                                .or_else(|| {
                                    declarator
                                        .child_by_field_name("value")
                                        .and_then(|v| self.guess_type(v))
                                });
                            SymbolNode::bind(&mut method.local_vars, name, line(declarator), ty);
                        }
                    }
                }
                "assignment_expression" if in_class => {
                    let left = child.child_by_field_name("left");
                    if let Some(left) = left.filter(|l| l.kind() == "member_expression") {
                        let object = left.child_by_field_name("object");
                        let property = field_text(left, "property", self.src);
                        if let (Some(object), Some(property)) = (object, property) {
                            if object.kind() == "this" {
                                let ty = child
                                    .child_by_field_name("right")
                                    .and_then(|r| self.guess_type(r));
                                if let Some(vars) = self.instance_vars.last_mut() {
                                    SymbolNode::bind(vars, property, line(child), ty);
                                }
                            }
                        }
                    }
                }
                _ => self.body(child, method, in_class),
            }
        }
    }

    fn guess_type(&self, value: Node) -> Option<String> {
        let guess = match value.kind() {
            "string" | "template_string" => "string",
            "number" => "number",
            "true" | "false" => "boolean",
            "array" => "Array",
            "object" => "Object",
            "regex" => "RegExp",
            "arrow_function" | "function_expression" | "function" => "Function",
            "new_expression" => {
                let ctor = field_text(value, "constructor", self.src)?;
                return Some(strip_generics(ctor).to_string());
            }
            _ => return None,
        };
        Some(guess.to_string())
    }
}

fn has_token(node: Node, token: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| c.kind() == token);
    found
}

fn has_child_kind(node: Node, kind: &str) -> bool {
    named_children(node).iter().any(|c| c.kind() == kind)
}

/// `: number` annotation text without the colon.
fn type_annotation(raw: &str) -> String {
    compact(raw.trim_start_matches(':'))
}

fn compact(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_generics(s: &str) -> &str {
    s.split('<').next().unwrap_or(s).trim()
}

fn unquote(s: &str) -> String {
    s.trim_matches(|c| c == '"' || c == '\'' || c == '`').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_ts(code: &str) -> ScanOutput {
        TypeScriptScanner::typescript().scan(code, Path::new("app.ts"))
    }

    #[test]
    fn test_class_with_heritage_fields_and_methods() {
        let code = r#"
import { Base, helper as h } from "./base";
import * as path from "path";

/** A widget. */
export class Widget extends Base implements Drawable {
    static count = 0;
    label: string;

    constructor(private readonly id: number, name?: string) {
        super();
        this.size = 10;
    }

    static create(): Widget {
        const w = new Widget(1);
        return w;
    }
}
"#;
        let output = scan_ts(code);
        assert!(output.errors.is_empty(), "{:?}", output.errors);
        let file = &output.tree;

        let imports: Vec<_> = file.imports.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(imports, vec!["./base", "path"]);
        assert_eq!(file.aliases["h"].type_name.as_deref(), Some("./base.helper"));
        assert_eq!(file.aliases["path"].type_name.as_deref(), Some("path"));

        let widget = file.child("Widget").unwrap();
        assert_eq!(widget.kind, NodeKind::Class);
        assert_eq!(widget.doc_lines, vec!["A widget."]);
        let refs: Vec<_> = widget
            .classrefs
            .iter()
            .map(|r| (r.name.as_str(), r.ref_type.as_deref()))
            .collect();
        assert_eq!(
            refs,
            vec![("Base", Some("extends")), ("Drawable", Some("implements"))]
        );
        assert_eq!(widget.class_vars["count"].type_name.as_deref(), Some("number"));
        assert_eq!(widget.instance_vars["label"].type_name.as_deref(), Some("string"));
        assert_eq!(widget.instance_vars["size"].type_name.as_deref(), Some("number"));
        assert_eq!(widget.instance_vars["id"].type_name.as_deref(), Some("number"));

        let ctor = widget.child("constructor").unwrap();
        let info = ctor.method.as_ref().unwrap();
        assert!(info.is_constructor);
        assert_eq!(info.args[1].name, "name");
        assert_eq!(info.args[1].attrs.as_deref(), Some("optional"));

        let create = widget.child("create").unwrap();
        assert!(create.method.as_ref().unwrap().is_classmethod);
        assert_eq!(create.local_vars["w"].type_name.as_deref(), Some("Widget"));
    }

    #[test]
    fn test_functions_interfaces_and_variables() {
        let code = r#"
export interface Shape extends Named {
    area(scale: number): number;
    sides: number;
}

export function total(shapes: Shape[], ...rest: number[]): number {
    let sum = 0;
    return sum;
}

export const double = (x: number) => x * 2;
const VERSION = "2.0";
type Id = string | number;
enum Color { Red, Green = 2 }
"#;
        let output = scan_ts(code);
        assert!(output.errors.is_empty(), "{:?}", output.errors);
        let file = &output.tree;

        let shape = file.child("Shape").unwrap();
        assert_eq!(shape.classrefs[0].name, "Named");
        assert_eq!(shape.child("area").unwrap().args()[0].name, "scale");
        assert_eq!(shape.instance_vars["sides"].type_name.as_deref(), Some("number"));

        let total = file.child("total").unwrap();
        let args = total.args();
        assert_eq!(args[0].extra_info.as_deref(), Some("Shape[]"));
        assert_eq!(args[1].name, "rest");
        assert_eq!(args[1].attrs.as_deref(), Some("varargs"));
        assert_eq!(total.local_vars["sum"].type_name.as_deref(), Some("number"));

        let double = file.child("double").unwrap();
        assert_eq!(double.kind, NodeKind::Method);
        assert_eq!(double.args()[0].name, "x");

        let version = file.child("VERSION").unwrap();
        assert_eq!(version.kind, NodeKind::Variable);
        assert_eq!(version.type_name.as_deref(), Some("string"));
        assert_eq!(file.aliases["Id"].type_name.as_deref(), Some("string | number"));

        let color = file.child("Color").unwrap();
        assert!(color.class_vars.contains_key("Red"));
        assert!(color.class_vars.contains_key("Green"));
    }

    #[test]
    fn test_javascript_with_jsx() {
        let code = "export default function App(props) {\n  return <div>{props.title}</div>;\n}\n";
        let scanner = TypeScriptScanner::javascript();
        assert_eq!(scanner.language(), "JavaScript");
        let output = scanner.scan(code, Path::new("App.jsx"));
        assert!(output.errors.is_empty(), "{:?}", output.errors);
        assert_eq!(output.tree.child("App").unwrap().args()[0].name, "props");
    }

    #[test]
    fn test_blob_candidates() {
        let candidates = TypeScriptScanner::typescript().blob_candidates("lib/util");
        assert_eq!(candidates[0], BlobCandidate::in_dir("util.ts", "lib"));
        assert!(candidates.contains(&BlobCandidate::in_dir("index.ts", "lib/util")));
        assert_eq!(
            TypeScriptScanner::typescript().module_name(Path::new("src/lib/index.ts")),
            "lib"
        );
    }
}
