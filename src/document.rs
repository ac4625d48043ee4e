//! Read-only call-expression trees and the documents that carry them
//!
//! The detection engine never sees tree-sitter nodes. A parser lowers each
//! source file into a flat, pre-ordered list of [`CallNode`]s plus the
//! import table needed to resolve receiver classes. Columns are byte offsets
//! within the line, the same unit tree-sitter reports.

use std::collections::HashMap;

use lsp_types::{Position, Range};
use once_cell::sync::Lazy;
use tracing::debug;

use crate::error::ParseError;

// ============================================================================
// PART 1: Call nodes
// ============================================================================

/// A plain string literal argument. `range` covers the content only, not
/// the quotes, so it lines up with what the user would select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringLiteral {
    pub value: String,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentValue {
    Literal(StringLiteral),
    /// Variables, interpolated strings, arrays, nested calls...
    NonLiteral,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    /// Set for PHP 8 named arguments (`locale: 'fr'`)
    pub name: Option<String>,
    pub value: ArgumentValue,
    pub range: Range,
}

impl Argument {
    pub fn literal(&self) -> Option<&StringLiteral> {
        match &self.value {
            ArgumentValue::Literal(lit) => Some(lit),
            ArgumentValue::NonLiteral => None,
        }
    }
}

/// Who a call is made on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receiver {
    /// `config('app.name')`
    Function,
    /// `Route::has('home')`, or a fluent chain rooted at one. Fully qualified,
    /// without a leading backslash.
    Class(String),
    /// `$request->input('x')` where the object type is not statically known
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallNode {
    /// Function or method name, without namespace
    pub name: String,
    pub receiver: Receiver,
    /// All arguments in source order, named ones included
    pub arguments: Vec<Argument>,
    pub range: Range,
}

impl CallNode {
    pub fn receiver_class(&self) -> Option<&str> {
        match &self.receiver {
            Receiver::Class(class) => Some(class),
            _ => None,
        }
    }

    /// The `index`-th positional (unnamed) argument together with its index
    /// in `arguments`.
    pub fn positional(&self, index: usize) -> Option<(usize, &Argument)> {
        self.arguments
            .iter()
            .enumerate()
            .filter(|(_, arg)| arg.name.is_none())
            .nth(index)
    }

    pub fn named(&self, name: &str) -> Option<(usize, &Argument)> {
        self.arguments
            .iter()
            .enumerate()
            .find(|(_, arg)| arg.name.as_deref() == Some(name))
    }
}

// ============================================================================
// PART 2: Class alias resolution
// ============================================================================

/// Laravel's default global aliases, registered by `config/app.php`.
static FACADE_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("App", "Illuminate\\Support\\Facades\\App"),
        ("Artisan", "Illuminate\\Support\\Facades\\Artisan"),
        ("Auth", "Illuminate\\Support\\Facades\\Auth"),
        ("Blade", "Illuminate\\Support\\Facades\\Blade"),
        ("Cache", "Illuminate\\Support\\Facades\\Cache"),
        ("Config", "Illuminate\\Support\\Facades\\Config"),
        ("DB", "Illuminate\\Support\\Facades\\DB"),
        ("Env", "Illuminate\\Support\\Env"),
        ("Gate", "Illuminate\\Support\\Facades\\Gate"),
        ("Lang", "Illuminate\\Support\\Facades\\Lang"),
        ("Redirect", "Illuminate\\Support\\Facades\\Redirect"),
        ("Request", "Illuminate\\Support\\Facades\\Request"),
        ("Route", "Illuminate\\Support\\Facades\\Route"),
        ("Storage", "Illuminate\\Support\\Facades\\Storage"),
        ("URL", "Illuminate\\Support\\Facades\\URL"),
        ("View", "Illuminate\\Support\\Facades\\View"),
        ("Volt", "Livewire\\Volt\\Volt"),
    ]
    .into_iter()
    .collect()
});

/// `use` imports and namespace of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    namespace: Option<String>,
    /// short name (or `as` alias) -> fully qualified name
    imports: HashMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_namespace(&mut self, namespace: &str) {
        let namespace = namespace.trim().trim_matches('\\');
        if !namespace.is_empty() {
            self.namespace = Some(namespace.to_string());
        }
    }

    /// Register `use Foo\Bar;` or `use Foo\Bar as Baz;`
    pub fn add_import(&mut self, fqn: &str, alias: Option<&str>) {
        let fqn = fqn.trim().trim_start_matches('\\');
        if fqn.is_empty() {
            return;
        }
        let short = alias
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| fqn.rsplit('\\').next().unwrap_or(fqn));
        self.imports.insert(short.to_string(), fqn.to_string());
    }

    /// Resolve a class name as written in source to its fully qualified form.
    pub fn resolve(&self, written: &str) -> String {
        let written = written.trim();
        if let Some(absolute) = written.strip_prefix('\\') {
            return absolute.to_string();
        }

        let (first, rest) = match written.split_once('\\') {
            Some((first, rest)) => (first, Some(rest)),
            None => (written, None),
        };

        if let Some(imported) = self.imports.get(first) {
            return match rest {
                Some(rest) => format!("{}\\{}", imported, rest),
                None => imported.clone(),
            };
        }

        if rest.is_none() {
            if let Some(facade) = FACADE_ALIASES.get(first) {
                return (*facade).to_string();
            }
        }

        match &self.namespace {
            Some(ns) => format!("{}\\{}", ns, written),
            None => written.to_string(),
        }
    }
}

// ============================================================================
// PART 3: Documents
// ============================================================================

/// Everything a parser extracts from one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallTree {
    /// Pre-order, i.e. source order of the call expressions
    pub calls: Vec<CallNode>,
    pub aliases: AliasTable,
    /// PHP view of a template, byte-aligned with the source. `None` when
    /// the source is PHP already.
    pub code: Option<String>,
}

/// The parser collaborator.
pub trait CallTreeParser {
    fn parse(&self, source: &str) -> Result<CallTree, ParseError>;
}

static EMPTY_ALIASES: Lazy<AliasTable> = Lazy::new(AliasTable::default);

/// Source text plus its parse outcome. A failed parse is kept, not raised:
/// every detection mode treats it as "no calls".
#[derive(Debug, Clone)]
pub struct Document {
    text: String,
    parsed: Result<CallTree, ParseError>,
}

impl Document {
    pub fn new(text: impl Into<String>, parsed: Result<CallTree, ParseError>) -> Self {
        Self {
            text: text.into(),
            parsed,
        }
    }

    pub fn parse(text: impl Into<String>, parser: &dyn CallTreeParser) -> Self {
        let text = text.into();
        let parsed = parser.parse(&text);
        if let Err(e) = &parsed {
            debug!("Document parse failed: {}", e);
        }
        Self { text, parsed }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tree(&self) -> Option<&CallTree> {
        self.parsed.as_ref().ok()
    }

    pub fn parse_error(&self) -> Option<&ParseError> {
        self.parsed.as_ref().err()
    }

    pub fn calls(&self) -> &[CallNode] {
        self.tree().map(|t| t.calls.as_slice()).unwrap_or(&[])
    }

    pub fn aliases(&self) -> &AliasTable {
        self.tree().map(|t| &t.aliases).unwrap_or(&EMPTY_ALIASES)
    }

    /// The text to read as PHP and whether it starts inside code: the
    /// projection for templates, the source (in HTML mode) otherwise.
    pub fn code(&self) -> (&str, bool) {
        match self.tree().and_then(|t| t.code.as_deref()) {
            Some(code) => (code, true),
            None => (&self.text, false),
        }
    }

    pub fn offset_at(&self, position: Position) -> usize {
        offset_at(&self.text, position)
    }

    pub fn position_at(&self, offset: usize) -> Position {
        position_at(&self.text, offset)
    }
}

// ============================================================================
// PART 4: Position helpers
// ============================================================================

/// Byte offset of a line/column position, clamped to the text.
pub fn offset_at(text: &str, position: Position) -> usize {
    let mut offset = 0;
    for (row, line) in text.split_inclusive('\n').enumerate() {
        if row == position.line as usize {
            let content_len = line.trim_end_matches('\n').len();
            let column = (position.character as usize).min(content_len);
            return floor_char_boundary(text, offset + column);
        }
        offset += line.len();
    }
    text.len()
}

pub fn position_at(text: &str, offset: usize) -> Position {
    let offset = floor_char_boundary(text, offset.min(text.len()));
    let before = &text[..offset];
    let line = before.matches('\n').count();
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    Position::new(line as u32, (offset - line_start) as u32)
}

fn floor_char_boundary(text: &str, mut offset: usize) -> usize {
    while offset > 0 && !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

/// Inclusive on both ends: a cursor right after the last character of a
/// literal still counts as inside it.
pub fn range_contains(range: &Range, position: Position) -> bool {
    let after_start = (position.line, position.character) >= (range.start.line, range.start.character);
    let before_end = (position.line, position.character) <= (range.end.line, range.end.character);
    after_start && before_end
}
