//! Declaration outline of a source file via tree-sitter.

use std::fmt::Write;

use tree_sitter::{Node, Parser};

use crate::languages::Lang;

#[derive(Debug, thiserror::Error)]
pub enum StructureError {
    #[error("no grammar compiled in for {0}")]
    Unsupported(&'static str),
    #[error("failed to load grammar: {0}")]
    Grammar(String),
    #[error("parser produced no tree")]
    Parse,
}

/// One declaration found in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub kind: &'static str,
    pub name: String,
    /// 1-based.
    pub line: usize,
    /// Number of enclosing declarations.
    pub depth: usize,
}

/// Collect declarations in source order, including nested ones such as
/// methods inside classes and impl blocks.
///
/// # Errors
///
/// Returns an error if the language has no grammar or parsing fails.
pub fn extract_structure(source: &str, lang: Lang) -> Result<Vec<Symbol>, StructureError> {
    let grammar = lang.grammar().ok_or(StructureError::Unsupported(lang.id()))?;
    let mut parser = Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| StructureError::Grammar(e.to_string()))?;
    let tree = parser.parse(source, None).ok_or(StructureError::Parse)?;

    let kinds = lang.entity_node_kinds();
    let mut symbols = Vec::new();
    let mut stack = vec![(tree.root_node(), 0usize)];

    while let Some((node, depth)) = stack.pop() {
        let is_entity = kinds.contains(&node.kind());
        if is_entity {
            symbols.push(Symbol {
                kind: shorten_kind(node.kind()),
                name: entity_name(node, source),
                line: node.start_position().row + 1,
                depth,
            });
        }
        let child_depth = if is_entity { depth + 1 } else { depth };
        let count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
        for i in (0..count).rev() {
            if let Some(child) = node.named_child(i) {
                stack.push((child, child_depth));
            }
        }
    }

    Ok(symbols)
}

/// One line per symbol, indented by nesting depth.
#[must_use]
pub fn render_structure(symbols: &[Symbol]) -> String {
    let mut out = String::new();
    for s in symbols {
        let indent = "  ".repeat(s.depth);
        let _ = writeln!(out, "{indent}{} {} (line {})", s.kind, s.name, s.line);
    }
    out
}

fn entity_name(node: Node<'_>, source: &str) -> String {
    node.child_by_field_name("name")
        .or_else(|| node.child_by_field_name("type"))
        // go: type_declaration wraps type_spec
        .or_else(|| node.named_child(0).and_then(|c| c.child_by_field_name("name")))
        .and_then(|n| source.get(n.byte_range()))
        .map_or_else(|| "<anonymous>".to_owned(), str::to_owned)
}

fn shorten_kind(kind: &str) -> &str {
    match kind {
        "function_item"
        | "function_signature_item"
        | "function_declaration"
        | "generator_function_declaration"
        | "function_definition" => "fn",
        "method_definition" | "method_declaration" => "method",
        "struct_item" => "struct",
        "enum_item" | "enum_declaration" => "enum",
        "trait_item" => "trait",
        "impl_item" => "impl",
        "type_item" | "type_alias_declaration" | "type_declaration" => "type",
        "const_item" => "const",
        "static_item" => "static",
        "mod_item" => "mod",
        "class_definition" | "class_declaration" | "abstract_class_declaration" => "class",
        "interface_declaration" => "interface",
        "macro_definition" => "macro",
        other => other,
    }
}
