/// Parser for Laravel .env files
///
/// Laravel reads `.env`, and tooling commonly ships `.env.example` and
/// `.env.local` beside it. Files are merged lowest priority first so that a
/// name defined in several files ends up with the value from the most
/// specific one:
///
/// 1. .env.example (template/documentation)
/// 2. .env.local (local overrides)
/// 3. .env (actual values, wins)
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Env files in merge order, lowest priority first
pub const ENV_FILES: [&str; 3] = [".env.example", ".env.local", ".env"];

/// One `NAME=value` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    pub name: String,
    /// Unquoted value, inline comment removed. Empty for `NAME=`.
    pub value: String,
    /// 1-based line number
    pub line: u32,
    /// Byte column where the name starts
    pub column: u32,
    /// `# NAME=value`: documented but not set
    pub is_commented: bool,
}

/// Parse env file content from a string
pub fn parse_env_content(content: &str) -> Vec<EnvEntry> {
    let mut entries = Vec::new();

    for (line_idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let is_commented = line.trim_start().starts_with('#');
        let working_line = if is_commented {
            line.trim_start().trim_start_matches('#').trim_start()
        } else {
            line
        };

        let Some((name_part, value_part)) = working_line.split_once('=') else {
            continue;
        };

        let name = name_part.trim().trim_start_matches("export ").trim();
        if !is_valid_name(name) {
            continue;
        }

        entries.push(EnvEntry {
            name: name.to_string(),
            value: parse_env_value(value_part),
            line: line_idx as u32 + 1,
            column: line.find(name).unwrap_or(0) as u32,
            is_commented,
        });
    }

    entries
}

/// Parse a single .env file
pub fn parse_env_file(path: &Path) -> Result<Vec<EnvEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read env file: {:?}", path))?;
    Ok(parse_env_content(&content))
}

/// Merge every env file of a project. Commented entries are dropped; the
/// value is the file name the winning definition came from.
pub fn parse_project_env(root: &Path) -> Result<HashMap<String, (EnvEntry, &'static str)>> {
    let mut merged = HashMap::new();

    for file in ENV_FILES {
        let path = root.join(file);
        if !path.is_file() {
            debug!("EnvParser: {:?} not found", path);
            continue;
        }

        let entries = parse_env_file(&path)?;
        debug!("EnvParser: {} entries in {:?}", entries.len(), path);
        for entry in entries.into_iter().filter(|e| !e.is_commented) {
            merged.insert(entry.name.clone(), (entry, file));
        }
    }

    Ok(merged)
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

/// Handles:
/// - APP_NAME=Laravel (no quotes)
/// - APP_NAME="Laravel Application" (double quotes)
/// - APP_NAME='Laravel' (single quotes)
/// - DB_PASSWORD="" (empty quoted string)
/// - APP_ENV=local # inline comment
fn parse_env_value(raw_value: &str) -> String {
    let trimmed = raw_value.trim();

    let value = match find_comment_position(trimmed) {
        Some(pos) => trimmed[..pos].trim(),
        None => trimmed,
    };

    if value.len() >= 2 {
        let quoted = (value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\''));
        if quoted {
            return value[1..value.len() - 1].to_string();
        }
    }

    value.to_string()
}

/// Byte offset of a `#` outside quotes. Only counts as a comment at the
/// start of the value or after whitespace, so `PASS=abc#123` keeps its hash.
fn find_comment_position(s: &str) -> Option<usize> {
    let mut in_double_quotes = false;
    let mut in_single_quotes = false;
    let mut previous = ' ';

    for (i, ch) in s.char_indices() {
        match ch {
            '"' if !in_single_quotes => in_double_quotes = !in_double_quotes,
            '\'' if !in_double_quotes => in_single_quotes = !in_single_quotes,
            '#' if !in_double_quotes && !in_single_quotes && previous.is_whitespace() => {
                return Some(i)
            }
            _ => {}
        }
        previous = ch;
    }

    None
}
