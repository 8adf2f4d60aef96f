//! Análisis sintáctico de ficheros fuente con tree-sitter.
//!
//! Sólo Python tiene gramática; cualquier otra extensión permitida se trata
//! como texto plano (el fichero entero queda como código suelto).

use std::path::Path;

use tree_sitter::{Node, Parser, Tree};

use crate::{error::ParseError, models::EntityType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLanguage {
    Python,
    PlainText,
}

impl SourceLanguage {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("py") | Some("pyi") => Self::Python,
            _ => Self::PlainText,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedImport {
    /// `Import` o `FromImport`.
    pub kind: EntityType,
    /// Módulo para `import x`, nombre importado para `from x import y`.
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFunction {
    pub name: String,
    pub args: Vec<String>,
    pub docstring: Option<String>,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedClass {
    pub name: String,
    pub docstring: Option<String>,
    pub code: String,
    pub methods: Vec<ParsedFunction>,
}

/// Resultado de analizar un fichero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFile {
    pub imports: Vec<ParsedImport>,
    pub functions: Vec<ParsedFunction>,
    pub classes: Vec<ParsedClass>,
    /// Líneas que no pertenecen a ninguna función ni clase.
    pub inline_code: Option<String>,
}

impl ParsedFile {
    pub fn plain_text(source: &str) -> Self {
        let trimmed = source.trim();
        Self {
            inline_code: (!trimmed.is_empty()).then(|| trimmed.to_string()),
            ..Self::default()
        }
    }
}

/// Analizador de Python basado en tree-sitter. Reutilizable entre ficheros.
pub struct PythonAnalyzer {
    parser: Parser,
}

impl PythonAnalyzer {
    pub fn new() -> Result<Self, ParseError> {
        let language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
        let mut parser = Parser::new();
        parser
            .set_language(&language)
            .map_err(|e| ParseError::TreeSitter(format!("no se pudo cargar la gramática: {e}")))?;
        Ok(Self { parser })
    }

    /// Lee y analiza un fichero según su extensión.
    pub fn parse_path(&mut self, path: &Path) -> Result<ParsedFile, ParseError> {
        let source = std::fs::read_to_string(path)?;
        match SourceLanguage::from_path(path) {
            SourceLanguage::Python => self.parse(&source),
            SourceLanguage::PlainText => Ok(ParsedFile::plain_text(&source)),
        }
    }

    pub fn parse(&mut self, source: &str) -> Result<ParsedFile, ParseError> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| ParseError::TreeSitter("el parser no devolvió árbol".into()))?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(ParseError::Syntax {
                line: first_error_line(&tree),
            });
        }

        let unit = SourceUnit::new(source);
        let mut parsed = ParsedFile::default();
        collect_imports(&unit, root, &mut parsed.imports);

        let mut covered = vec![false; unit.lines.len()];
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            let (outer, definition) = unwrap_decorated(child);
            match definition.kind() {
                "function_definition" => {
                    parsed.functions.push(unit.function(outer, definition));
                    unit.mark(outer, &mut covered);
                }
                "class_definition" => {
                    parsed.classes.push(unit.class(outer, definition));
                    unit.mark(outer, &mut covered);
                }
                _ => {}
            }
        }

        let inline: Vec<&str> = unit
            .lines
            .iter()
            .zip(&covered)
            .filter(|(_, used)| !**used)
            .map(|(line, _)| *line)
            .collect();
        let inline = inline.join("\n");
        let inline = inline.trim();
        parsed.inline_code = (!inline.is_empty()).then(|| inline.to_string());

        Ok(parsed)
    }
}

struct SourceUnit<'a> {
    source: &'a str,
    lines: Vec<&'a str>,
}

impl<'a> SourceUnit<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            lines: source.lines().collect(),
        }
    }

    fn text(&self, node: Node) -> String {
        node.utf8_text(self.source.as_bytes())
            .map(str::to_string)
            .unwrap_or_default()
    }

    /// Líneas completas que abarca el nodo.
    fn segment(&self, node: Node) -> String {
        let start = node.start_position().row;
        let end = node.end_position().row.min(self.lines.len().saturating_sub(1));
        if start > end || self.lines.is_empty() {
            return String::new();
        }
        self.lines[start..=end].join("\n")
    }

    fn mark(&self, node: Node, covered: &mut [bool]) {
        let start = node.start_position().row;
        let end = node.end_position().row;
        for row in start..=end {
            if let Some(slot) = covered.get_mut(row) {
                *slot = true;
            }
        }
    }

    fn name_of(&self, definition: Node) -> String {
        definition
            .child_by_field_name("name")
            .map(|n| self.text(n))
            .unwrap_or_default()
    }

    fn function(&self, outer: Node, definition: Node) -> ParsedFunction {
        ParsedFunction {
            name: self.name_of(definition),
            args: self.parameter_names(definition),
            docstring: self.docstring(definition),
            code: self.segment(outer),
        }
    }

    fn class(&self, outer: Node, definition: Node) -> ParsedClass {
        let mut methods = Vec::new();
        if let Some(body) = definition.child_by_field_name("body") {
            let mut cursor = body.walk();
            for item in body.named_children(&mut cursor) {
                let (item_outer, item_def) = unwrap_decorated(item);
                if item_def.kind() == "function_definition" {
                    methods.push(self.function(item_outer, item_def));
                }
            }
        }

        ParsedClass {
            name: self.name_of(definition),
            docstring: self.docstring(definition),
            code: self.segment(outer),
            methods,
        }
    }

    fn parameter_names(&self, definition: Node) -> Vec<String> {
        let Some(params) = definition.child_by_field_name("parameters") else {
            return Vec::new();
        };
        let mut names = Vec::new();
        let mut cursor = params.walk();
        for param in params.named_children(&mut cursor) {
            let name_node = match param.kind() {
                "identifier" => Some(param),
                "default_parameter" | "typed_default_parameter" => {
                    param.child_by_field_name("name")
                }
                "typed_parameter" => param
                    .named_child(0)
                    .filter(|n| n.kind() == "identifier"),
                // *args, **kwargs y separadores no cuentan
                _ => None,
            };
            if let Some(node) = name_node {
                names.push(self.text(node));
            }
        }
        names
    }

    fn docstring(&self, definition: Node) -> Option<String> {
        let body = definition.child_by_field_name("body")?;
        let mut cursor = body.walk();
        let first = body
            .named_children(&mut cursor)
            .find(|n| n.kind() != "comment")?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let literal = first.named_child(0).filter(|n| n.kind() == "string")?;
        let cleaned = clean_docstring(&self.text(literal));
        (!cleaned.is_empty()).then_some(cleaned)
    }
}

/// Devuelve (nodo con decoradores, definición interna).
fn unwrap_decorated(node: Node) -> (Node, Node) {
    if node.kind() == "decorated_definition" {
        if let Some(definition) = node.child_by_field_name("definition") {
            return (node, definition);
        }
    }
    (node, node)
}

fn collect_imports(unit: &SourceUnit<'_>, node: Node, out: &mut Vec<ParsedImport>) {
    match node.kind() {
        "import_statement" => {
            let code = unit.segment(node);
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                out.push(ParsedImport {
                    kind: EntityType::Import,
                    name: imported_name(unit, name),
                    code: code.clone(),
                });
            }
            return;
        }
        "import_from_statement" | "future_import_statement" => {
            let code = unit.segment(node);
            let mut cursor = node.walk();
            let mut names: Vec<String> = node
                .children_by_field_name("name", &mut cursor)
                .map(|n| imported_name(unit, n))
                .collect();
            let mut cursor = node.walk();
            if node
                .named_children(&mut cursor)
                .any(|n| n.kind() == "wildcard_import")
            {
                names.push("*".to_string());
            }
            for name in names {
                out.push(ParsedImport {
                    kind: EntityType::FromImport,
                    name,
                    code: code.clone(),
                });
            }
            return;
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_imports(unit, child, out);
    }
}

fn imported_name(unit: &SourceUnit<'_>, node: Node) -> String {
    if node.kind() == "aliased_import" {
        if let Some(inner) = node.child_by_field_name("name") {
            return unit.text(inner);
        }
    }
    unit.text(node)
}

fn first_error_line(tree: &Tree) -> usize {
    fn find(node: Node) -> Option<usize> {
        if node.is_error() || node.is_missing() {
            return Some(node.start_position().row + 1);
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        children.into_iter().find_map(find)
    }
    find(tree.root_node()).unwrap_or(1)
}

/// Quita comillas y prefijos del literal y normaliza la sangría como hace
/// `inspect.cleandoc`.
pub fn clean_docstring(literal: &str) -> String {
    let body = literal.trim_start_matches(|c: char| "rRuUbBfF".contains(c));
    let body = ["\"\"\"", "'''", "\"", "'"]
        .iter()
        .find_map(|q| {
            body.strip_prefix(q)
                .and_then(|rest| rest.strip_suffix(q))
        })
        .unwrap_or(body);

    let expanded = body.replace('\t', "        ");
    let lines: Vec<&str> = expanded.lines().collect();
    if lines.is_empty() {
        return String::new();
    }

    let margin = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut cleaned: Vec<String> = Vec::with_capacity(lines.len());
    cleaned.push(lines[0].trim_start().to_string());
    for line in &lines[1..] {
        let cut = margin.min(line.len() - line.trim_start().len());
        let rest = line.get(cut..).unwrap_or_else(|| line.trim_start());
        cleaned.push(rest.trim_end().to_string());
    }

    while cleaned.last().is_some_and(|l| l.trim().is_empty()) {
        cleaned.pop();
    }
    while cleaned.first().is_some_and(|l| l.trim().is_empty()) {
        cleaned.remove(0);
    }
    cleaned.join("\n")
}
