//! Blade templates as PHP
//!
//! A template is projected onto a PHP-only text of the same byte length:
//! echo bodies, directive arguments and raw PHP blocks are copied, markup is
//! blanked to spaces and region boundaries become `;`. Newlines survive, so
//! line and column of every copied byte are unchanged and calls found in
//! the projection map straight back to the template.
//!
//! ```text
//!   <h1>{{ __('messages.title') }}</h1>     @include('partials.nav')
//!       ;  __('messages.title') ;           ;view   ('partials.nav')
//! ```

/// Helpers that stand in for directives whose arguments name facts.
/// Control-flow directives keep their keyword so the projection parses.
fn directive_head(name: &str) -> Option<&'static str> {
    match name {
        "include" | "includeIf" | "extends" | "each" | "component" => Some("view"),
        "lang" | "choice" => Some("__"),
        "if" | "elseif" | "unless" => Some("if"),
        "foreach" | "forelse" => Some("foreach"),
        "for" => Some("for"),
        "while" => Some("while"),
        _ => None,
    }
}

/// Project a Blade template onto PHP, see the module docs.
pub fn project(source: &str) -> String {
    let mut projector = Projector {
        src: source.as_bytes(),
        out: source
            .bytes()
            .map(|b| if b == b'\n' || b == b'\r' { b } else { b' ' })
            .collect(),
    };
    projector.run();
    String::from_utf8_lossy(&projector.out).into_owned()
}

struct Projector<'s> {
    src: &'s [u8],
    out: Vec<u8>,
}

impl Projector<'_> {
    fn run(&mut self) {
        let len = self.src.len();
        let mut i = 0;
        while i < len {
            let rest = &self.src[i..];
            i = if rest.starts_with(b"{{--") {
                find(self.src, i + 4, b"--}}").map_or(len, |end| end + 4)
            } else if rest.starts_with(b"@{{") {
                i + 3
            } else if rest.starts_with(b"@@") {
                i + 2
            } else if rest.starts_with(b"{!!") {
                self.region(i, 3, b"!!}")
            } else if rest.starts_with(b"{{") {
                self.region(i, 2, b"}}")
            } else if rest.len() >= 5 && rest[..5].eq_ignore_ascii_case(b"<?php") {
                self.region(i, 5, b"?>")
            } else if rest.starts_with(b"<?=") {
                self.region(i, 3, b"?>")
            } else if rest[0] == b'@' && self.starts_directive(i) {
                self.directive(i)
            } else {
                i + 1
            };
        }
    }

    /// Copy the PHP between an opener at `start` and `closer`. Returns the
    /// offset after the closer.
    fn region(&mut self, start: usize, opener_len: usize, closer: &[u8]) -> usize {
        self.out[start] = b';';
        let body = start + opener_len;
        match find_outside_strings(self.src, body, closer) {
            Some(end) => {
                self.copy(body, end);
                self.out[end] = b';';
                end + closer.len()
            }
            // Still being typed
            None => {
                self.copy(body, self.src.len());
                self.src.len()
            }
        }
    }

    fn starts_directive(&self, at: usize) -> bool {
        let after = self.src.get(at + 1).copied().unwrap_or(b' ');
        let before = at.checked_sub(1).map(|b| self.src[b]);
        after.is_ascii_alphabetic() && !before.is_some_and(is_word_byte)
    }

    fn directive(&mut self, at: usize) -> usize {
        let name_start = at + 1;
        let name_end = (name_start..self.src.len())
            .find(|&j| !is_word_byte(self.src[j]))
            .unwrap_or(self.src.len());
        let name = String::from_utf8_lossy(&self.src[name_start..name_end]).into_owned();

        let mut paren = name_end;
        while matches!(self.src.get(paren), Some(b' ' | b'\t')) {
            paren += 1;
        }
        let has_arguments = self.src.get(paren) == Some(&b'(');

        match name.as_str() {
            "verbatim" => find(self.src, name_end, b"@endverbatim")
                .map_or(self.src.len(), |end| end + "@endverbatim".len()),
            "php" if !has_arguments => self.region(at, 4, b"@endphp"),
            _ if has_arguments => {
                self.out[at] = b';';
                match directive_head(&name) {
                    Some(head) => self.out[name_start..name_start + head.len()]
                        .copy_from_slice(head.as_bytes()),
                    None => self.out[name_start..name_end].fill(b'x'),
                }
                match matching_paren(self.src, paren) {
                    Some(close) => {
                        self.copy(paren, close + 1);
                        close + 1
                    }
                    None => {
                        self.copy(paren, self.src.len());
                        self.src.len()
                    }
                }
            }
            _ => name_end,
        }
    }

    fn copy(&mut self, from: usize, to: usize) {
        self.out[from..to].copy_from_slice(&self.src[from..to]);
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn find(src: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    src.get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}

/// Offset of the quote closing the string that opens at `start`.
fn skip_string(src: &[u8], start: usize) -> Option<usize> {
    let quote = src[start];
    let mut j = start + 1;
    while j < src.len() {
        match src[j] {
            b'\\' => j += 1,
            b if b == quote => return Some(j),
            _ => {}
        }
        j += 1;
    }
    None
}

fn find_outside_strings(src: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    let mut j = from;
    while j < src.len() {
        if src[j..].starts_with(needle) {
            return Some(j);
        }
        if matches!(src[j], b'\'' | b'"') {
            j = skip_string(src, j)?;
        }
        j += 1;
    }
    None
}

fn matching_paren(src: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut j = open;
    while j < src.len() {
        match src[j] {
            b'\'' | b'"' => j = skip_string(src, j)?,
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(j);
                }
            }
            _ => {}
        }
        j += 1;
    }
    None
}
