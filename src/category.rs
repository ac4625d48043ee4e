//! Fact categories and the reasons they get invalidated

use std::fmt;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern, PatternError};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Files that change whenever composer installs, removes or dumps autoload.
const COMPOSER_TRIGGERS: [&str; 3] = [
    "composer.json",
    "composer.lock",
    "vendor/composer/autoload_*.php",
];

/// A named kind of project knowledge and the files it is derived from.
///
/// Paths are always relative to the project root and use `/` separators.
#[derive(Debug, Clone)]
pub struct FactCategory {
    name: &'static str,
    patterns: Vec<Pattern>,
    extra_triggers: Vec<String>,
    watches_composer: bool,
}

impl FactCategory {
    pub fn new(name: &'static str, patterns: &[&str]) -> Result<Self, PatternError> {
        let patterns = patterns
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name,
            patterns,
            extra_triggers: Vec::new(),
            watches_composer: false,
        })
    }

    /// Also invalidate when this exact file changes.
    pub fn with_trigger(mut self, relative_path: &str) -> Self {
        self.extra_triggers.push(relative_path.trim_start_matches("./").to_string());
        self
    }

    /// Also invalidate on composer / autoload changes.
    pub fn with_composer(mut self) -> Self {
        self.watches_composer = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Pattern::as_str)
    }

    pub fn extra_triggers(&self) -> &[String] {
        &self.extra_triggers
    }

    pub fn watches_composer(&self) -> bool {
        self.watches_composer
    }

    /// Does a change to `relative` (project-relative) concern this category?
    pub fn is_affected_by(&self, relative: &Path) -> bool {
        let normalized = normalize(relative);

        if self
            .patterns
            .iter()
            .any(|p| p.matches_with(&normalized, MATCH_OPTIONS))
        {
            return true;
        }

        if self.extra_triggers.iter().any(|t| *t == normalized) {
            return true;
        }

        self.watches_composer && is_composer_file(&normalized)
    }
}

impl fmt::Display for FactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub fn is_composer_file(normalized: &str) -> bool {
    COMPOSER_TRIGGERS.iter().any(|trigger| {
        Pattern::new(trigger)
            .map(|p| p.matches_with(normalized, MATCH_OPTIONS))
            .unwrap_or(false)
    })
}

fn normalize(relative: &Path) -> String {
    let text = relative.to_string_lossy().replace('\\', "/");
    text.trim_start_matches("./").to_string()
}

/// What happened to a watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
}

/// Why a category was asked to reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationReason {
    /// First load after start-up
    Startup,
    FileEvent { kind: FileEventKind, path: PathBuf },
    /// Explicit refresh command
    Manual,
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationReason::Startup => f.write_str("startup"),
            InvalidationReason::FileEvent { kind, path } => {
                write!(f, "{:?} {}", kind, path.display())
            }
            InvalidationReason::Manual => f.write_str("manual refresh"),
        }
    }
}
