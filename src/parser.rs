//! This module provides the tree-sitter parser for PHP files and lowers its
//! syntax tree into the call-expression model the matcher consumes.
//!
//! Tree-sitter parsers convert source code into concrete syntax trees. We
//! walk that tree once per document and keep only what detection needs:
//! call expressions, their arguments and the `use` imports that resolve
//! receiver classes.

use lsp_types::{Position, Range};
use tree_sitter::{Language, Node, Parser, Point};

use crate::blade;
use crate::document::{
    AliasTable, Argument, ArgumentValue, CallNode, CallTree, CallTreeParser, Receiver,
    StringLiteral,
};
use crate::error::ParseError;

// ============================================================================
// PART 1: Language and parser creation
// ============================================================================

/// Gets the tree-sitter language definition for PHP
///
/// tree-sitter-php exposes both `LANGUAGE_PHP` (with the `<?php` host
/// document) and `LANGUAGE_PHP_ONLY`; project files always start in HTML
/// mode, so we want the former.
pub fn language_php() -> Language {
    tree_sitter_php::LANGUAGE_PHP.into()
}

/// PHP without the host document, for Blade projections that have no
/// `<?php` tag.
pub fn language_php_only() -> Language {
    tree_sitter_php::LANGUAGE_PHP_ONLY.into()
}

/// Creates a new tree-sitter parser configured for PHP
///
/// A Parser is stateful and not thread-safe, so we create one per parse.
pub fn create_php_parser() -> anyhow::Result<Parser> {
    create_parser(&language_php())
}

fn create_parser(language: &Language) -> anyhow::Result<Parser> {
    let mut parser = Parser::new();

    parser
        .set_language(language)
        .map_err(|e| anyhow::anyhow!("Failed to set PHP language: {:?}", e))?;

    Ok(parser)
}

/// Parse PHP source code into a syntax tree
///
/// Tree-sitter recovers from syntax errors, so `Err` here means the parser
/// itself failed, not that the source is invalid.
pub fn parse_php(source: &str) -> anyhow::Result<tree_sitter::Tree> {
    let mut parser = create_php_parser()?;

    parser
        .parse(source, None)
        .ok_or_else(|| anyhow::anyhow!("Failed to parse PHP source"))
}

// ============================================================================
// PART 2: Lowering to call nodes
// ============================================================================

/// [`CallTreeParser`] backed by tree-sitter-php.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhpParser;

impl CallTreeParser for PhpParser {
    fn parse(&self, source: &str) -> Result<CallTree, ParseError> {
        let mut parser =
            create_php_parser().map_err(|e| ParseError::Unavailable(e.to_string()))?;
        let tree = parser.parse(source, None).ok_or(ParseError::NoTree)?;
        Ok(lower_tree(tree.root_node(), source))
    }
}

/// [`CallTreeParser`] for Blade templates. Parses the PHP projection of
/// the template (see [`crate::blade`]) and keeps it on the tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct BladeParser;

impl CallTreeParser for BladeParser {
    fn parse(&self, source: &str) -> Result<CallTree, ParseError> {
        let code = blade::project(source);
        let mut parser = create_parser(&language_php_only())
            .map_err(|e| ParseError::Unavailable(e.to_string()))?;
        let tree = parser.parse(&code, None).ok_or(ParseError::NoTree)?;

        let mut call_tree = lower_tree(tree.root_node(), &code);
        call_tree.code = Some(code);
        Ok(call_tree)
    }
}

/// Pick the parser for a file by name; `None` for files that carry no PHP.
pub fn parser_for_path(path: &str) -> Option<&'static dyn CallTreeParser> {
    if path.ends_with(".blade.php") {
        Some(&BladeParser)
    } else if path.ends_with(".php") {
        Some(&PhpParser)
    } else {
        None
    }
}

/// Convenience wrapper used by tests and the server.
pub fn parse_call_tree(source: &str) -> Result<CallTree, ParseError> {
    PhpParser.parse(source)
}

fn lower_tree(root: Node, source: &str) -> CallTree {
    let mut lowering = Lowering {
        source: source.as_bytes(),
        aliases: AliasTable::new(),
        calls: Vec::new(),
    };

    // Imports must be known before receivers are resolved, and PHP allows
    // `use` statements anywhere at the top level, so collect them first.
    lowering.collect_imports(root);
    lowering.walk(root);

    CallTree {
        calls: lowering.calls,
        aliases: lowering.aliases,
        code: None,
    }
}

struct Lowering<'s> {
    source: &'s [u8],
    aliases: AliasTable,
    calls: Vec<CallNode>,
}

impl<'s> Lowering<'s> {
    fn text(&self, node: Node) -> &'s str {
        node.utf8_text(self.source).unwrap_or("")
    }

    fn collect_imports(&mut self, node: Node) {
        match node.kind() {
            "namespace_definition" => {
                if let Some(name) = node.child_by_field_name("name") {
                    let namespace = self.text(name);
                    self.aliases.set_namespace(namespace);
                }
            }
            "namespace_use_declaration" => {
                self.collect_use_declaration(node);
                return;
            }
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.collect_imports(child);
        }
    }

    fn collect_use_declaration(&mut self, node: Node) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();

        // `use function foo;` and `use const BAR;` never name classes
        if children.iter().any(|c| matches!(c.kind(), "function" | "const")) {
            return;
        }

        // Group form: use App\Models\{User, Post as Article};
        let prefix = children
            .iter()
            .find(|c| c.kind() == "namespace_name")
            .map(|c| self.text(*c).trim_matches('\\').to_string());

        for child in &children {
            match child.kind() {
                "namespace_use_clause" => self.collect_use_clause(*child, prefix.as_deref()),
                "namespace_use_group" => {
                    let mut group_cursor = child.walk();
                    for clause in child.named_children(&mut group_cursor) {
                        if clause.kind() == "namespace_use_clause"
                            || clause.kind() == "namespace_use_group_clause"
                        {
                            self.collect_use_clause(clause, prefix.as_deref());
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn collect_use_clause(&mut self, clause: Node, prefix: Option<&str>) {
        let mut cursor = clause.walk();
        let names: Vec<Node> = clause
            .named_children(&mut cursor)
            .filter(|c| matches!(c.kind(), "name" | "qualified_name" | "namespace_name"))
            .collect();

        let Some(target) = names.first() else {
            return;
        };
        let alias = clause
            .child_by_field_name("alias")
            .or_else(|| names.get(1).copied())
            .map(|n| self.text(n));

        let written = self.text(*target).trim_start_matches('\\');
        let fqn = match prefix {
            Some(prefix) if !prefix.is_empty() => format!("{}\\{}", prefix, written),
            _ => written.to_string(),
        };
        self.aliases.add_import(&fqn, alias);
    }

    fn walk(&mut self, node: Node) {
        if let Some(call) = self.lower_call(node) {
            self.calls.push(call);
        }

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.walk(child);
        }
    }

    fn lower_call(&self, node: Node) -> Option<CallNode> {
        let (name, receiver) = match node.kind() {
            "function_call_expression" => {
                let function = node.child_by_field_name("function")?;
                if !matches!(function.kind(), "name" | "qualified_name") {
                    return None;
                }
                let written = self.text(function);
                let name = written.rsplit('\\').next().unwrap_or(written);
                (name.to_string(), Receiver::Function)
            }
            "scoped_call_expression" => {
                let name = node.child_by_field_name("name")?;
                if name.kind() != "name" {
                    return None;
                }
                let receiver = node
                    .child_by_field_name("scope")
                    .and_then(|scope| self.class_of_scope(scope))
                    .map(Receiver::Class)
                    .unwrap_or(Receiver::Unknown);
                (self.text(name).to_string(), receiver)
            }
            "member_call_expression" | "nullsafe_member_call_expression" => {
                let name = node.child_by_field_name("name")?;
                if name.kind() != "name" {
                    return None;
                }
                let receiver = node
                    .child_by_field_name("object")
                    .and_then(|object| self.class_of_expression(object))
                    .map(Receiver::Class)
                    .unwrap_or(Receiver::Unknown);
                (self.text(name).to_string(), receiver)
            }
            _ => return None,
        };

        let arguments = node
            .child_by_field_name("arguments")
            .map(|args| self.lower_arguments(args))
            .unwrap_or_default();

        Some(CallNode {
            name,
            receiver,
            arguments,
            range: node_range(node),
        })
    }

    fn class_of_scope(&self, scope: Node) -> Option<String> {
        match scope.kind() {
            "name" | "qualified_name" => Some(self.aliases.resolve(self.text(scope))),
            _ => None,
        }
    }

    /// Static class behind a fluent chain: `Route::middleware('a')->name('b')`
    /// is a call on the `Route` facade all the way down.
    fn class_of_expression(&self, object: Node) -> Option<String> {
        match object.kind() {
            "scoped_call_expression" => self.class_of_scope(object.child_by_field_name("scope")?),
            "member_call_expression" | "nullsafe_member_call_expression" => {
                self.class_of_expression(object.child_by_field_name("object")?)
            }
            "parenthesized_expression" => {
                let mut cursor = object.walk();
                let inner = object.named_children(&mut cursor).next()?;
                self.class_of_expression(inner)
            }
            "object_creation_expression" => {
                let mut cursor = object.walk();
                let class = object
                    .named_children(&mut cursor)
                    .find(|c| matches!(c.kind(), "name" | "qualified_name"))?;
                Some(self.aliases.resolve(self.text(class)))
            }
            _ => None,
        }
    }

    fn lower_arguments(&self, arguments: Node) -> Vec<Argument> {
        let mut cursor = arguments.walk();
        arguments
            .named_children(&mut cursor)
            .filter(|child| child.kind() == "argument")
            .map(|argument| self.lower_argument(argument))
            .collect()
    }

    fn lower_argument(&self, argument: Node) -> Argument {
        let name_node = argument.child_by_field_name("name");
        let name = name_node.map(|n| self.text(n).to_string());

        let mut cursor = argument.walk();
        let value_node = argument
            .named_children(&mut cursor)
            .filter(|child| Some(child.id()) != name_node.map(|n| n.id()))
            .last();

        let value = value_node
            .and_then(|node| self.lower_literal(node))
            .map(ArgumentValue::Literal)
            .unwrap_or(ArgumentValue::NonLiteral);

        Argument {
            name,
            value,
            range: node_range(argument),
        }
    }

    /// Only complete, interpolation-free strings count as literals.
    fn lower_literal(&self, node: Node) -> Option<StringLiteral> {
        if !matches!(node.kind(), "string" | "encapsed_string") || node.has_error() {
            return None;
        }

        let mut cursor = node.walk();
        let plain = node
            .named_children(&mut cursor)
            .all(|child| matches!(child.kind(), "string_content" | "escape_sequence"));
        if !plain {
            return None;
        }

        let raw = self.text(node);
        let quote_index = raw.find(['\'', '"'])?;
        let quote = raw[quote_index..].chars().next()?;
        let inner = raw.get(quote_index + 1..raw.len().checked_sub(1)?)?;
        if raw.len() < quote_index + 2 || !raw.ends_with(quote) {
            return None;
        }

        let start = node.start_position();
        let end = node.end_position();
        let range = Range::new(
            Position::new(start.row as u32, (start.column + quote_index + 1) as u32),
            Position::new(end.row as u32, end.column.saturating_sub(1) as u32),
        );

        Some(StringLiteral {
            value: unescape(inner, quote),
            range,
        })
    }
}

fn node_range(node: Node) -> Range {
    Range::new(point_to_position(node.start_position()), point_to_position(node.end_position()))
}

fn point_to_position(point: Point) -> Position {
    Position::new(point.row as u32, point.column as u32)
}

/// PHP escape rules: single-quoted strings only know `\\` and `\'`.
fn unescape(inner: &str, quote: char) -> String {
    if !inner.contains('\\') {
        return inner.to_string();
    }

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match (quote, chars.peek().copied()) {
            (_, Some('\\')) => {
                out.push('\\');
                chars.next();
            }
            ('\'', Some('\'')) | ('"', Some('"')) => {
                out.push(quote);
                chars.next();
            }
            ('"', Some('n')) => {
                out.push('\n');
                chars.next();
            }
            ('"', Some('t')) => {
                out.push('\t');
                chars.next();
            }
            ('"', Some('$')) => {
                out.push('$');
                chars.next();
            }
            _ => out.push('\\'),
        }
    }
    out
}

// ============================================================================
// PART 3: Tests
// ============================================================================
