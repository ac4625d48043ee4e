//! Completion context detection
//!
//! While the user is typing, the string under the cursor is usually not
//! terminated yet and tree-sitter wraps the tail of the file in an ERROR
//! node. Instead of matching against the tree, this module scans the text
//! up to the cursor, tracking strings, comments and open brackets, and
//! reconstructs just enough of the innermost call to run the descriptors
//! against it. Templates are scanned through their PHP projection.

use lsp_types::{Position, Range};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::descriptor::ShapeDescriptor;
use crate::document::Document;

/// `Foo::bar`, `->bar`, `?->bar` or `bar` right before an opening paren
static CALLEE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:(\\?[A-Za-z_][\w\\]*)\s*::\s*|(\?->|->)\s*)?([A-Za-z_]\w*)\s*$")
        .expect("callee pattern is valid")
});

/// `name:` at the start of an argument (but not `Foo::`)
static NAMED_ARGUMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_]\w*)\s*:(?:[^:]|$)").expect("named argument pattern is valid")
});

static NAMED_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[A-Za-z_]\w*\s*:\s*$").expect("named prefix pattern is valid")
});

/// Which argument the cursor sits in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionSlot {
    /// Zero-based index among positional arguments
    Position(usize),
    Named(String),
}

/// Where a completion was requested, in descriptor terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionContext {
    /// Index of the first descriptor accepting the call and slot
    pub descriptor_index: usize,
    pub slot: CompletionSlot,
    /// Text typed so far inside the string (empty when no quote was opened)
    pub partial: String,
    /// The opening quote, if the user already typed one
    pub quote: Option<char>,
    /// Span of `partial`, to be replaced by the accepted item
    pub replace: Range,
}

/// Detect whether `position` is inside the argument slot of a call accepted
/// by one of `descriptors`.
pub fn completion_context(
    doc: &Document,
    position: Position,
    descriptors: &[ShapeDescriptor],
) -> Option<CompletionContext> {
    let (text, starts_in_code) = doc.code();
    let cursor = doc.offset_at(position);
    let initial = if starts_in_code { ScanState::Code } else { ScanState::Html };
    let scan = scan(&text[..cursor], initial);

    let frame = scan.frames.last()?;
    let callee = frame.callee.as_ref()?;

    let (partial, quote, partial_start) = match scan.state {
        ScanState::Code => {
            let pending = &text[frame.argument_start..cursor];
            if !is_argument_prefix(pending) {
                return None;
            }
            (String::new(), None, cursor)
        }
        ScanState::Single { start } | ScanState::Double { start } => {
            if !is_argument_prefix(&text[frame.argument_start..start]) {
                return None;
            }
            let quote = text[start..].chars().next();
            (text[start + 1..cursor].to_string(), quote, start + 1)
        }
        ScanState::Html
        | ScanState::LineComment
        | ScanState::BlockComment
        | ScanState::Heredoc => return None,
    };

    let argument_text = match scan.state {
        ScanState::Single { start } | ScanState::Double { start } => &text[frame.argument_start..start],
        _ => &text[frame.argument_start..cursor],
    };
    let slot = match named_argument(argument_text) {
        Some(name) => CompletionSlot::Named(name.to_string()),
        None => CompletionSlot::Position(frame.positional_before),
    };

    let class = callee.class.as_deref().map(|c| doc.aliases().resolve(c));
    let is_function = callee.class.is_none() && !callee.is_member;

    let descriptor_index = descriptors.iter().position(|descriptor| {
        if !descriptor.accepts_name(&callee.name) {
            return false;
        }
        if !descriptor.accepts_receiver(class.as_deref(), is_function) {
            return false;
        }
        match &slot {
            CompletionSlot::Named(name) => descriptor.slot().name() == Some(name.as_str()),
            CompletionSlot::Position(index) => descriptor.slot().index() == Some(*index),
        }
    })?;

    Some(CompletionContext {
        descriptor_index,
        slot,
        partial,
        quote,
        replace: Range::new(doc.position_at(partial_start), position),
    })
}

/// Only whitespace, optionally after `name:`.
fn is_argument_prefix(text: &str) -> bool {
    text.trim().is_empty() || NAMED_PREFIX.is_match(text)
}

fn named_argument(text: &str) -> Option<&str> {
    NAMED_ARGUMENT
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

// ============================================================================
// Lexical scan
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Outside `<?php ... ?>`
    Html,
    Code,
    /// Inside `'...'`, `start` is the offset of the quote
    Single { start: usize },
    Double { start: usize },
    LineComment,
    BlockComment,
    /// Heredoc or nowdoc body, up to the closing label
    Heredoc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Callee {
    name: String,
    /// Class as written before `::`, or of the static call a chain starts at
    class: Option<String>,
    /// Called with `->` or `?->`
    is_member: bool,
    /// Offset of the callee text, including `Foo::` or `->`
    start: usize,
}

#[derive(Debug, Clone)]
struct Frame {
    /// `None` for array brackets and grouping parens
    callee: Option<Callee>,
    argument_start: usize,
    positional_before: usize,
}

struct Scan {
    state: ScanState,
    frames: Vec<Frame>,
}

fn scan(text: &str, initial: ScanState) -> Scan {
    let bytes = text.as_bytes();
    let mut state = initial;
    let mut frames: Vec<Frame> = Vec::new();
    let mut heredoc_label = String::new();
    // End offset and class of the last closed static call, for chains
    let mut chain: Option<(usize, String)> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match state {
            ScanState::Html => {
                if bytes[i..].len() >= 5 && bytes[i..i + 5].eq_ignore_ascii_case(b"<?php") {
                    state = ScanState::Code;
                    i += 4;
                } else if bytes[i..].starts_with(b"<?=") {
                    state = ScanState::Code;
                    i += 2;
                }
            }
            ScanState::Code => match b {
                b'\'' => state = ScanState::Single { start: i },
                b'"' => state = ScanState::Double { start: i },
                b'#' if bytes.get(i + 1) != Some(&b'[') => state = ScanState::LineComment,
                b'/' if bytes.get(i + 1) == Some(&b'/') => state = ScanState::LineComment,
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    state = ScanState::BlockComment;
                    i += 1;
                }
                b'?' if bytes.get(i + 1) == Some(&b'>') => {
                    state = ScanState::Html;
                    frames.clear();
                    i += 1;
                }
                b'<' if bytes[i..].starts_with(b"<<<") => {
                    if let Some((label, body)) = heredoc_start(text, i + 3) {
                        heredoc_label = label;
                        state = ScanState::Heredoc;
                        // Lands on the newline, so the body starts at a line start
                        i = body - 1;
                    } else {
                        i += 2;
                    }
                }
                b'(' => {
                    let mut callee = callee_before(&text[..i]);
                    if let (Some(callee), Some((end, class))) = (callee.as_mut(), chain.as_ref()) {
                        let unqualified = callee.is_member && callee.class.is_none();
                        let adjacent = text
                            .get(*end..callee.start)
                            .is_some_and(|gap| gap.trim().is_empty());
                        if unqualified && adjacent {
                            callee.class = Some(class.clone());
                        }
                    }
                    frames.push(Frame {
                        callee,
                        argument_start: i + 1,
                        positional_before: 0,
                    });
                }
                b'[' => frames.push(Frame {
                    callee: None,
                    argument_start: i + 1,
                    positional_before: 0,
                }),
                b')' | b']' => {
                    let closed = frames.pop().and_then(|frame| frame.callee);
                    chain = match closed.and_then(|callee| callee.class) {
                        Some(class) if b == b')' => Some((i + 1, class)),
                        _ => None,
                    };
                }
                b',' => {
                    if let Some(frame) = frames.last_mut() {
                        if named_argument(&text[frame.argument_start..i]).is_none() {
                            frame.positional_before += 1;
                        }
                        frame.argument_start = i + 1;
                    }
                }
                // Statement boundaries close anything left open by broken code
                b';' | b'{' | b'}' => frames.clear(),
                _ => {}
            },
            ScanState::Single { .. } | ScanState::Double { .. } => {
                let quote = if matches!(state, ScanState::Single { .. }) { b'\'' } else { b'"' };
                if b == b'\\' {
                    i += 1;
                } else if b == quote {
                    state = ScanState::Code;
                }
            }
            ScanState::LineComment => {
                if b == b'\n' {
                    state = ScanState::Code;
                } else if b == b'?' && bytes.get(i + 1) == Some(&b'>') {
                    state = ScanState::Html;
                    frames.clear();
                    i += 1;
                }
            }
            ScanState::BlockComment => {
                if b == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    state = ScanState::Code;
                    i += 1;
                }
            }
            ScanState::Heredoc => {
                if bytes[i - 1] == b'\n' {
                    let line = text[i..].trim_start_matches([' ', '\t']);
                    let indent = text.len() - i - line.len();
                    let closes = line.starts_with(heredoc_label.as_str())
                        && !line[heredoc_label.len()..]
                            .bytes()
                            .next()
                            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_');
                    if closes {
                        state = ScanState::Code;
                        i += indent + heredoc_label.len() - 1;
                    }
                }
            }
        }
        i += 1;
    }

    Scan { state, frames }
}

/// Parse `ID\n`, `"ID"\n` or `'ID'\n` after `<<<`. Returns the label and
/// the offset of the first body byte.
fn heredoc_start(text: &str, from: usize) -> Option<(String, usize)> {
    let rest = &text[from..];
    let header = rest.trim_start_matches([' ', '\t']);
    let header = header.strip_prefix(['\'', '"']).unwrap_or(header);
    let label_len = header
        .bytes()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == b'_')
        .count();
    if label_len == 0 || header.as_bytes()[0].is_ascii_digit() {
        return None;
    }
    let label = &header[..label_len];
    let after = header[label_len..].trim_start_matches(['\'', '"']);
    let newline = after.strip_prefix("\r\n").or_else(|| after.strip_prefix('\n'))?;
    Some((label.to_string(), text.len() - newline.len()))
}

fn callee_before(code: &str) -> Option<Callee> {
    let caps = CALLEE.captures(code)?;
    let whole = caps.get(0)?;

    // `$callback(...)` or `function name(...)` are not calls we can describe
    if code[..whole.start()].ends_with('$') {
        return None;
    }
    let name = caps.get(3)?.as_str();
    if caps.get(1).is_none() && caps.get(2).is_none() {
        let before = code[..whole.start()].trim_end();
        if before.ends_with("function") || before.ends_with("fn") || before.ends_with("new") {
            return None;
        }
    }

    Some(Callee {
        name: name.to_string(),
        class: caps.get(1).map(|m| m.as_str().to_string()),
        is_member: caps.get(2).is_some(),
        start: whole.start(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ArgumentSlot;
    use crate::parser::{BladeParser, PhpParser};

    fn doc(text: &str) -> Document {
        Document::parse(text, &PhpParser)
    }

    fn end_of(text: &str) -> Position {
        crate::document::position_at(text, text.len())
    }

    fn config_descriptors() -> Vec<ShapeDescriptor> {
        vec![
            ShapeDescriptor::function(["config"], ArgumentSlot::Position(0)).unwrap(),
            ShapeDescriptor::method(
                ["Illuminate\\Support\\Facades\\Config"],
                ["get"],
                ArgumentSlot::NamedOrPosition {
                    name: "key".to_string(),
                    index: 0,
                },
            )
            .unwrap(),
        ]
    }

    #[test]
    fn test_unterminated_string() {
        let text = "<?php\n$name = config('app.na";
        let context = completion_context(&doc(text), end_of(text), &config_descriptors()).unwrap();

        assert_eq!(context.descriptor_index, 0);
        assert_eq!(context.slot, CompletionSlot::Position(0));
        assert_eq!(context.partial, "app.na");
        assert_eq!(context.quote, Some('\''));
        assert_eq!(context.replace, Range::new(Position::new(1, 16), Position::new(1, 22)));
    }

    #[test]
    fn test_empty_slot_without_quote() {
        let text = "<?php\nconfig(";
        let context = completion_context(&doc(text), end_of(text), &config_descriptors()).unwrap();
        assert_eq!(context.partial, "");
        assert_eq!(context.quote, None);
    }

    #[test]
    fn test_cursor_inside_closed_string() {
        let text = "<?php\nconfig('app.name');\n";
        let position = Position::new(1, 11);
        let context = completion_context(&doc(text), position, &config_descriptors()).unwrap();
        assert_eq!(context.partial, "app");
    }

    #[test]
    fn test_facade_named_argument() {
        let text = "<?php\nConfig::get(default: null, key: \"mail.";
        let context = completion_context(&doc(text), end_of(text), &config_descriptors()).unwrap();
        assert_eq!(context.descriptor_index, 1);
        assert_eq!(context.slot, CompletionSlot::Named("key".to_string()));
        assert_eq!(context.partial, "mail.");
        assert_eq!(context.quote, Some('"'));
    }

    #[test]
    fn test_wrong_slot_is_ignored() {
        let text = "<?php\nconfig('app.name', '";
        assert!(completion_context(&doc(text), end_of(text), &config_descriptors()).is_none());
    }

    #[test]
    fn test_nested_call_uses_innermost_frame() {
        let text = "<?php\nstrtoupper(config('app.";
        let context = completion_context(&doc(text), end_of(text), &config_descriptors()).unwrap();
        assert_eq!(context.partial, "app.");
    }

    #[test]
    fn test_array_commas_do_not_shift_position() {
        let descriptors =
            vec![ShapeDescriptor::function(["trans"], ArgumentSlot::Position(2)).unwrap()];
        let text = "<?php\ntrans('a.b', ['x' => 1, 'y' => 2], '";
        let context = completion_context(&doc(text), end_of(text), &descriptors).unwrap();
        assert_eq!(context.slot, CompletionSlot::Position(2));
    }

    #[test]
    fn test_comment_and_variable_calls() {
        let text = "<?php\n// config('app.";
        assert!(completion_context(&doc(text), end_of(text), &config_descriptors()).is_none());

        let text = "<?php\n$config('app.";
        assert!(completion_context(&doc(text), end_of(text), &config_descriptors()).is_none());

        let text = "<?php\n$repo->config('app.";
        assert!(completion_context(&doc(text), end_of(text), &config_descriptors()).is_none());
    }

    #[test]
    fn test_inline_html_before_php() {
        let text = "<p>Don't panic</p>\n<?php\nconfig('app.";
        let context = completion_context(&doc(text), end_of(text), &config_descriptors()).unwrap();
        assert_eq!(context.partial, "app.");

        let text = "<?php $x = 1; ?>\n<p>config('app.";
        assert!(completion_context(&doc(text), end_of(text), &config_descriptors()).is_none());

        let text = "<?php // done ?>\n<p>It's</p>\n<?= config('app.";
        let context = completion_context(&doc(text), end_of(text), &config_descriptors()).unwrap();
        assert_eq!(context.partial, "app.");
    }

    #[test]
    fn test_heredoc_bodies_are_skipped() {
        let text = "<?php\n$s = <<<EOT\nit's here\nEOT;\nconfig('app.";
        let context = completion_context(&doc(text), end_of(text), &config_descriptors()).unwrap();
        assert_eq!(context.partial, "app.");

        let text = "<?php\n$sql = <<<'SQL'\n    select 'x\n    SQL;\nconfig('app.";
        let context = completion_context(&doc(text), end_of(text), &config_descriptors()).unwrap();
        assert_eq!(context.partial, "app.");

        let text = "<?php\n$s = <<<EOT\nconfig('app.";
        assert!(completion_context(&doc(text), end_of(text), &config_descriptors()).is_none());
    }

    #[test]
    fn test_chain_rooted_at_facade() {
        let descriptors = vec![ShapeDescriptor::method(
            ["Illuminate\\Support\\Facades\\Route"],
            ["name"],
            ArgumentSlot::Position(0),
        )
        .unwrap()];

        let text = "<?php\nRoute::middleware(['auth'])->name('dash";
        let context = completion_context(&doc(text), end_of(text), &descriptors).unwrap();
        assert_eq!(context.partial, "dash");

        let text = "<?php\n$route->name('dash";
        assert!(completion_context(&doc(text), end_of(text), &descriptors).is_none());

        let text = "<?php\nRoute::middleware('auth');\n$route->name('dash";
        assert!(completion_context(&doc(text), end_of(text), &descriptors).is_none());
    }

    #[test]
    fn test_blade_echo() {
        let descriptors =
            vec![ShapeDescriptor::function(["__"], ArgumentSlot::Position(0)).unwrap()];
        let text = "<p>Don't</p>\n<h1>{{ __('mess";
        let template = Document::parse(text, &BladeParser);
        let context = completion_context(&template, end_of(text), &descriptors).unwrap();
        assert_eq!(context.partial, "mess");
        assert_eq!(context.replace.start, Position::new(1, 11));

        let text = "<p>__('mess";
        let template = Document::parse(text, &BladeParser);
        assert!(completion_context(&template, end_of(text), &descriptors).is_none());
    }

    #[test]
    fn test_typed_identifier_is_not_a_string_slot() {
        let text = "<?php\nconfig($ap";
        assert!(completion_context(&doc(text), end_of(text), &config_descriptors()).is_none());
    }
}
