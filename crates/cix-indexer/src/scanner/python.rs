//! Python scanner (reference implementation).

use super::ts::{self, end_line, field_text, line, named_children, text};
use super::{BlobCandidate, ScanOutput, Scanner};
use crate::tree::{Arg, Import, NodeKind, SymbolNode, VarMap};
use std::path::{Path, PathBuf};
use tree_sitter::Node;

/// Scans Python source into a symbol tree.
///
/// Module-level assignments become variable children, class-body
/// assignments class variables, `self.x = ...` inside methods instance
/// variables of the enclosing class, and function-body assignments locals.
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonScanner;

impl Scanner for PythonScanner {
    fn language(&self) -> &'static str {
        "Python"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["py", "pyi", "pyw"]
    }

    fn blob_candidates(&self, name: &str) -> Vec<BlobCandidate> {
        let parts: Vec<&str> = name.split('.').filter(|p| !p.is_empty()).collect();
        let Some((last, parents)) = parts.split_last() else {
            return Vec::new();
        };

        let parent_dir: PathBuf = parents.iter().collect();
        let package_dir: PathBuf = parts.iter().collect();
        let module_file = format!("{}.py", last);

        let mut candidates = Vec::new();
        if parents.is_empty() {
            candidates.push(BlobCandidate::file(module_file));
        } else {
            candidates.push(BlobCandidate::in_dir(module_file, parent_dir));
        }
        candidates.push(BlobCandidate::in_dir("__init__.py", package_dir));
        candidates
    }

    fn module_name(&self, path: &Path) -> String {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if stem == "__init__" {
            if let Some(dir) = path.parent().and_then(|p| p.file_name()) {
                return dir.to_string_lossy().into_owned();
            }
        }
        stem
    }

    fn scan(&self, content: &str, path: &Path) -> ScanOutput {
        let language = tree_sitter_python::LANGUAGE.into();
        let (tree, mut file, errors) = match ts::parse(&language, content, path) {
            Ok(parsed) => parsed,
            Err(output) => return output,
        };

        let root = tree.root_node();
        let mut scan = PyScan {
            src: content,
            instance_vars: Vec::new(),
        };
        file.doc_lines = scan.docstring(root);
        scan.body(root, &mut file, &Scope::Module);

        ts::finish(file, content, errors)
    }
}

enum Scope {
    Module,
    Class,
    Function { self_name: Option<String> },
}

struct PyScan<'s> {
    src: &'s str,
    /// Instance variable accumulators, one per enclosing class.
    instance_vars: Vec<VarMap>,
}

impl<'s> PyScan<'s> {
    fn body(&mut self, body: Node, owner: &mut SymbolNode, scope: &Scope) {
        for stmt in named_children(body) {
            self.statement(stmt, owner, scope);
        }
    }

    fn statement(&mut self, stmt: Node, owner: &mut SymbolNode, scope: &Scope) {
        match stmt.kind() {
            "function_definition" => {
                let method = self.function(stmt, &[], scope);
                owner.children.push(method);
            }
            "class_definition" => {
                let class = self.class(stmt);
                owner.children.push(class);
            }
            "decorated_definition" => {
                let decorators: Vec<String> = named_children(stmt)
                    .into_iter()
                    .filter(|n| n.kind() == "decorator")
                    .map(|n| text(n, self.src).trim_start_matches('@').trim().to_string())
                    .collect();
                match stmt.child_by_field_name("definition") {
                    Some(def) if def.kind() == "function_definition" => {
                        let method = self.function(def, &decorators, scope);
                        owner.children.push(method);
                    }
                    Some(def) if def.kind() == "class_definition" => {
                        let class = self.class(def);
                        owner.children.push(class);
                    }
                    _ => {}
                }
            }
            "import_statement" => self.import(stmt, owner),
            "import_from_statement" => self.import_from(stmt, owner),
            "expression_statement" => {
                for expr in named_children(stmt) {
                    if matches!(expr.kind(), "assignment" | "augmented_assignment") {
                        self.assignment(expr, owner, scope);
                    }
                }
            }
            "if_statement" | "try_statement" | "with_statement" | "for_statement"
            | "while_statement" => self.compound(stmt, owner, scope),
            _ => {}
        }
    }

    /// Compound statements: at module level their contents go into a block
    /// node, elsewhere they are flattened into the owner.
    fn compound(&mut self, stmt: Node, owner: &mut SymbolNode, scope: &Scope) {
        let keyword = stmt.kind().trim_end_matches("_statement");
        match scope {
            Scope::Module => {
                let mut block = SymbolNode::new(NodeKind::Block, keyword, line(stmt));
                self.nested_blocks(stmt, &mut block, scope);
                if !block.children.is_empty() || !block.imports.is_empty() {
                    block.finish(end_line(stmt));
                    owner.children.push(block);
                }
            }
            _ => self.nested_blocks(stmt, owner, scope),
        }
    }

    fn nested_blocks(&mut self, node: Node, owner: &mut SymbolNode, scope: &Scope) {
        for child in named_children(node) {
            if child.kind() == "block" {
                self.body(child, owner, scope);
            } else if child.kind().ends_with("_clause") {
                self.nested_blocks(child, owner, scope);
            }
        }
    }

    fn function(&mut self, node: Node, decorators: &[String], scope: &Scope) -> SymbolNode {
        let name = field_text(node, "name", self.src).unwrap_or_default();
        let mut method = SymbolNode::method(name, line(node));
        let in_class = matches!(scope, Scope::Class);

        let args = node
            .child_by_field_name("parameters")
            .map(|p| self.parameters(p))
            .unwrap_or_default();

        let mut signature = format!(
            "{}{}",
            name,
            field_text(node, "parameters", self.src).unwrap_or("()")
        );
        if let Some(ret) = field_text(node, "return_type", self.src) {
            signature.push_str(" -> ");
            signature.push_str(ret);
        }

        let is_classmethod = decorators.iter().any(|d| d == "classmethod");
        let is_static = decorators.iter().any(|d| d == "staticmethod");
        let self_name = if in_class && !is_classmethod && !is_static {
            args.first().map(|a| a.name.clone())
        } else {
            None
        };

        if let Some(info) = method.method.as_mut() {
            info.args = args;
            info.signature = Some(signature);
            info.is_constructor = in_class && name == "__init__";
            info.is_classmethod = is_classmethod;
        }

        if let Some(body) = node.child_by_field_name("body") {
            method.doc_lines = self.docstring(body);
            self.body(body, &mut method, &Scope::Function { self_name });
        }

        method.finish(end_line(node));
        method
    }

    fn parameters(&self, params: Node) -> Vec<Arg> {
        let mut args = Vec::new();
        for param in named_children(params) {
            let arg = match param.kind() {
                "identifier" => Arg {
                    name: text(param, self.src).to_string(),
                    ..Default::default()
                },
                "typed_parameter" => {
                    let inner = named_children(param).into_iter().next();
                    let (name, attrs) = inner
                        .map(|n| self.splat_name(n))
                        .unwrap_or_default();
                    Arg {
                        name,
                        extra_info: field_text(param, "type", self.src).map(str::to_string),
                        attrs,
                    }
                }
                "default_parameter" => Arg {
                    name: field_text(param, "name", self.src).unwrap_or_default().to_string(),
                    extra_info: field_text(param, "value", self.src).map(str::to_string),
                    attrs: Some("default".to_string()),
                },
                "typed_default_parameter" => Arg {
                    name: field_text(param, "name", self.src).unwrap_or_default().to_string(),
                    extra_info: field_text(param, "type", self.src).map(str::to_string),
                    attrs: Some("default".to_string()),
                },
                "list_splat_pattern" | "dictionary_splat_pattern" => {
                    let (name, attrs) = self.splat_name(param);
                    Arg {
                        name,
                        attrs,
                        ..Default::default()
                    }
                }
                _ => continue,
            };
            if !arg.name.is_empty() {
                args.push(arg);
            }
        }
        args
    }

    fn splat_name(&self, node: Node) -> (String, Option<String>) {
        let raw = text(node, self.src);
        let attrs = match node.kind() {
            "list_splat_pattern" => Some("varargs".to_string()),
            "dictionary_splat_pattern" => Some("kwargs".to_string()),
            _ => None,
        };
        (raw.trim_start_matches('*').to_string(), attrs)
    }

    fn class(&mut self, node: Node) -> SymbolNode {
        let name = field_text(node, "name", self.src).unwrap_or_default();
        let mut class = SymbolNode::class(name, line(node));

        if let Some(bases) = node.child_by_field_name("superclasses") {
            for base in named_children(bases) {
                match base.kind() {
                    "identifier" | "attribute" | "subscript" => {
                        class.add_classref(text(base, self.src), line(base), None);
                    }
                    "keyword_argument" => {
                        if field_text(base, "name", self.src) == Some("metaclass") {
                            if let Some(meta) = field_text(base, "value", self.src) {
                                class.add_classref(meta, line(base), Some("metaclass".to_string()));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        if let Some(body) = node.child_by_field_name("body") {
            class.doc_lines = self.docstring(body);
            self.instance_vars.push(VarMap::new());
            self.body(body, &mut class, &Scope::Class);
            if let Some(vars) = self.instance_vars.pop() {
                for (var, info) in vars {
                    class.instance_vars.entry(var).or_insert(info);
                }
            }
        }

        class.finish(end_line(node));
        class
    }

    fn import(&self, stmt: Node, owner: &mut SymbolNode) {
        for item in named_children(stmt) {
            match item.kind() {
                "dotted_name" => owner.imports.push(Import {
                    name: text(item, self.src).to_string(),
                    line: line(item),
                }),
                "aliased_import" => {
                    let module = field_text(item, "name", self.src).unwrap_or_default();
                    owner.imports.push(Import {
                        name: module.to_string(),
                        line: line(item),
                    });
                    if let Some(alias) = field_text(item, "alias", self.src) {
                        SymbolNode::bind(&mut owner.aliases, alias, line(item), Some(module.to_string()));
                    }
                }
                _ => {}
            }
        }
    }

    fn import_from(&self, stmt: Node, owner: &mut SymbolNode) {
        let module = field_text(stmt, "module_name", self.src).unwrap_or_default();
        let qualify = |name: &str| {
            if module.ends_with('.') {
                format!("{}{}", module, name)
            } else {
                format!("{}.{}", module, name)
            }
        };

        let is_wildcard = named_children(stmt)
            .into_iter()
            .any(|n| n.kind() == "wildcard_import");
        if is_wildcard {
            owner.imports.push(Import {
                name: qualify("*"),
                line: line(stmt),
            });
            return;
        }

        let mut cursor = stmt.walk();
        let names: Vec<Node> = stmt.children_by_field_name("name", &mut cursor).collect();
        for item in names {
            match item.kind() {
                "aliased_import" => {
                    let imported = field_text(item, "name", self.src).unwrap_or_default();
                    let full = qualify(imported);
                    if let Some(alias) = field_text(item, "alias", self.src) {
                        SymbolNode::bind(&mut owner.aliases, alias, line(item), Some(full.clone()));
                    }
                    owner.imports.push(Import {
                        name: full,
                        line: line(item),
                    });
                }
                _ => owner.imports.push(Import {
                    name: qualify(text(item, self.src)),
                    line: line(item),
                }),
            }
        }
    }

    fn assignment(&mut self, node: Node, owner: &mut SymbolNode, scope: &Scope) {
        let Some(left) = node.child_by_field_name("left") else {
            return;
        };
        let type_name = field_text(node, "type", self.src)
            .map(str::to_string)
            .or_else(|| {
                node.child_by_field_name("right")
                    .and_then(|right| self.guess_type(right))
            });

        let mut targets = Vec::new();
        self.targets(left, &mut targets);

        for target in targets {
            let at = line(target);
            match (target.kind(), scope) {
                ("identifier", Scope::Module) => {
                    let name = text(target, self.src);
                    match owner.child_of_kind_mut(NodeKind::Variable, name) {
                        Some(existing) => {
                            if existing.type_name.is_none() {
                                existing.type_name = type_name.clone();
                            }
                        }
                        None => {
                            let mut var = SymbolNode::variable(name, at, type_name.clone());
                            var.finish(end_line(node));
                            owner.children.push(var);
                        }
                    }
                }
                ("identifier", Scope::Class) => {
                    SymbolNode::bind(&mut owner.class_vars, text(target, self.src), at, type_name.clone());
                }
                ("identifier", Scope::Function { .. }) => {
                    SymbolNode::bind(&mut owner.local_vars, text(target, self.src), at, type_name.clone());
                }
                ("attribute", Scope::Function { self_name: Some(self_name) }) => {
                    let object = field_text(target, "object", self.src);
                    let attribute = field_text(target, "attribute", self.src);
                    if let (Some(object), Some(attribute)) = (object, attribute) {
                        if object == self_name {
                            if let Some(vars) = self.instance_vars.last_mut() {
                                SymbolNode::bind(vars, attribute, at, type_name.clone());
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn targets<'t>(&self, node: Node<'t>, out: &mut Vec<Node<'t>>) {
        match node.kind() {
            "identifier" | "attribute" => out.push(node),
            "pattern_list" | "tuple_pattern" | "list_pattern" => {
                for child in named_children(node) {
                    self.targets(child, out);
                }
            }
            _ => {}
        }
    }

    fn guess_type(&self, value: Node) -> Option<String> {
        let guess = match value.kind() {
            "integer" => "int",
            "float" => "float",
            "string" | "concatenated_string" => "str",
            "true" | "false" => "bool",
            "none" => "None",
            "list" | "list_comprehension" => "list",
            "dictionary" | "dictionary_comprehension" => "dict",
            "set" | "set_comprehension" => "set",
            "tuple" | "generator_expression" => "tuple",
            "lambda" => "function",
            "call" => {
                let callee = value.child_by_field_name("function")?;
                return matches!(callee.kind(), "identifier" | "attribute")
                    .then(|| text(callee, self.src).to_string());
            }
            _ => return None,
        };
        Some(guess.to_string())
    }

    /// Docstring of a module or block: the first statement, if it is a
    /// bare string literal.
    fn docstring(&self, body: Node) -> Vec<String> {
        let Some(first) = named_children(body).into_iter().next() else {
            return Vec::new();
        };
        if first.kind() != "expression_statement" {
            return Vec::new();
        }
        let Some(string) = named_children(first).into_iter().next() else {
            return Vec::new();
        };
        if string.kind() != "string" {
            return Vec::new();
        }
        clean_docstring(text(string, self.src))
    }
}

/// Strip prefix letters and quotes, trim every line, drop blank edges.
fn clean_docstring(raw: &str) -> Vec<String> {
    let unprefixed = raw.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    let inner = ["\"\"\"", "'''", "\"", "'"]
        .iter()
        .find_map(|q| {
            unprefixed
                .strip_prefix(q)
                .map(|s| s.strip_suffix(q).unwrap_or(s))
        })
        .unwrap_or(unprefixed);

    let mut lines: Vec<String> = inner.lines().map(|l| l.trim().to_string()).collect();
    while lines.first().is_some_and(|l| l.is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(code: &str) -> ScanOutput {
        PythonScanner.scan(code, Path::new("sample.py"))
    }

    #[test]
    fn test_function_with_args() {
        let output = scan("def foo(x): pass\n");
        assert!(output.errors.is_empty());

        let foo = output.tree.child("foo").unwrap();
        assert_eq!(foo.kind, NodeKind::Method);
        let names: Vec<_> = foo.args().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["x"]);
        assert_eq!(
            foo.method.as_ref().unwrap().signature.as_deref(),
            Some("foo(x)")
        );
        assert_eq!(foo.line_end, Some(1));
    }

    #[test]
    fn test_class_with_bases_methods_and_vars() {
        let code = r#"
import os
import numpy as np
from collections import OrderedDict as OD

class Bar(Base, mixins.Loggable):
    """A bar.

    More detail.
    """
    count = 0

    def __init__(self, name: str, *args, size=3, **kwargs):
        self.name = name
        self.items = []
        local = OD()

    @classmethod
    def create(cls):
        return cls("x")

    @staticmethod
    def helper(value):
        value.x = 1
"#;
        let output = scan(code);
        assert!(output.errors.is_empty(), "{:?}", output.errors);

        let file = &output.tree;
        let imports: Vec<_> = file.imports.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(imports, vec!["os", "numpy", "collections.OrderedDict"]);
        assert_eq!(file.aliases["np"].type_name.as_deref(), Some("numpy"));
        assert_eq!(
            file.aliases["OD"].type_name.as_deref(),
            Some("collections.OrderedDict")
        );

        let bar = file.child("Bar").unwrap();
        assert_eq!(bar.kind, NodeKind::Class);
        let bases: Vec<_> = bar.classrefs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(bases, vec!["Base", "mixins.Loggable"]);
        assert_eq!(bar.doc_lines, vec!["A bar.", "", "More detail."]);
        assert_eq!(bar.class_vars["count"].type_name.as_deref(), Some("int"));
        assert_eq!(bar.instance_vars["items"].type_name.as_deref(), Some("list"));
        assert!(bar.instance_vars.contains_key("name"));
        assert!(!bar.instance_vars.contains_key("x"));

        let init = bar.child("__init__").unwrap();
        let info = init.method.as_ref().unwrap();
        assert!(info.is_constructor);
        let args: Vec<_> = info
            .args
            .iter()
            .map(|a| (a.name.as_str(), a.attrs.as_deref()))
            .collect();
        assert_eq!(
            args,
            vec![
                ("self", None),
                ("name", None),
                ("args", Some("varargs")),
                ("size", Some("default")),
                ("kwargs", Some("kwargs")),
            ]
        );
        assert_eq!(info.args[1].extra_info.as_deref(), Some("str"));
        assert_eq!(init.local_vars["local"].type_name.as_deref(), Some("OD"));

        let create = bar.child("create").unwrap();
        assert!(create.method.as_ref().unwrap().is_classmethod);
        assert!(!create.method.as_ref().unwrap().is_constructor);
    }

    #[test]
    fn test_module_variables_and_blocks() {
        let code = "VERSION = \"1.0\"\nx, y = 1, 2\n\nif __name__ == \"__main__\":\n    def main():\n        pass\n";
        let output = scan(code);

        let version = output.tree.child("VERSION").unwrap();
        assert_eq!(version.kind, NodeKind::Variable);
        assert_eq!(version.type_name.as_deref(), Some("str"));
        assert!(output.tree.child("x").is_some());
        assert!(output.tree.child("y").is_some());

        let block = output.tree.child("if").unwrap();
        assert_eq!(block.kind, NodeKind::Block);
        assert_eq!(block.child("main").unwrap().kind, NodeKind::Method);
    }

    #[test]
    fn test_module_docstring() {
        let output = scan("'''Module doc.'''\n\ndef f():\n    \"\"\"Function doc.\"\"\"\n");
        assert_eq!(output.tree.doc_lines, vec!["Module doc."]);
        assert_eq!(output.tree.child("f").unwrap().doc_lines, vec!["Function doc."]);
    }

    #[test]
    fn test_unterminated_string_returns_partial_tree() {
        let output = scan("def ok(a):\n    pass\n\ns = \"never closed\n");
        assert_eq!(output.tree.kind, NodeKind::File);
        assert!(!output.errors.is_empty());
    }

    #[test]
    fn test_blob_candidates() {
        assert_eq!(
            PythonScanner.blob_candidates("foo"),
            vec![
                BlobCandidate::file("foo.py"),
                BlobCandidate::in_dir("__init__.py", "foo"),
            ]
        );
        assert_eq!(
            PythonScanner.blob_candidates("pkg.mod"),
            vec![
                BlobCandidate::in_dir("mod.py", "pkg"),
                BlobCandidate::in_dir("__init__.py", PathBuf::from("pkg").join("mod")),
            ]
        );
        assert!(PythonScanner.blob_candidates("").is_empty());
    }

    #[test]
    fn test_module_name() {
        assert_eq!(PythonScanner.module_name(Path::new("src/a.py")), "a");
        assert_eq!(PythonScanner.module_name(Path::new("src/pkg/__init__.py")), "pkg");
    }

    #[test]
    fn test_clean_docstring() {
        assert_eq!(clean_docstring("r'''  raw  '''"), vec!["raw"]);
        assert_eq!(clean_docstring("\"single\""), vec!["single"]);
    }
}
