//! Editor features built on the detection engine
//!
//! A [`Feature`] is the declarative part: which call sites it cares about
//! and what to say about a matched literal given the category's facts.
//! [`FeatureRunner`] binds a feature to its cache and turns those answers
//! into LSP values; the server only talks to the type-erased
//! [`DocumentFeature`].

pub mod binding;
pub mod config;
pub mod env;
pub mod middleware;
pub mod route;
pub mod translation;
pub mod view;

use std::path::{Path, PathBuf};

use lsp_types::{
    CompletionItem, CompletionItemKind, CompletionTextEdit, Diagnostic, DiagnosticSeverity,
    Documentation, MarkupContent, MarkupKind, Position, Range, TextEdit,
};

use crate::cache::{CategoryHandle, KnowledgeCache};
use crate::completion::CompletionContext;
use crate::descriptor::ShapeDescriptor;
use crate::detect::{detect_all, detect_all_async, detect_at_position, detect_for_completion};
use crate::document::Document;
use crate::matcher::CallSiteMatch;

pub use self::binding::BindingFeature;
pub use self::config::ConfigFeature;
pub use self::env::EnvFeature;
pub use self::middleware::MiddlewareFeature;
pub use self::route::RouteFeature;
pub use self::translation::TranslationFeature;
pub use self::view::ViewFeature;

/// Source name attached to every published diagnostic
pub const DIAGNOSTIC_SOURCE: &str = "laravel";

/// What a match is being inspected for. Features use it to reject call
/// overloads that are fine to navigate but wrong to diagnose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
    Link,
    Hover,
    Diagnostic,
}

/// Where a matched literal points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactTarget {
    /// Relative to the project root, or absolute
    pub path: PathBuf,
    /// 0-based
    pub line: u32,
}

impl FactTarget {
    pub fn new(path: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            path: path.into(),
            line,
        }
    }
}

/// A link from a literal in the document to its definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactLink {
    /// The literal's range in the document
    pub origin: Range,
    /// Absolute path
    pub path: PathBuf,
    pub line: u32,
}

/// A problem with one literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub severity: DiagnosticSeverity,
    pub message: String,
}

impl Finding {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::WARNING,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::ERROR,
            message: message.into(),
        }
    }
}

/// One completion candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub label: String,
    pub detail: Option<String>,
}

impl Suggestion {
    pub fn new(label: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            label: label.into(),
            detail,
        }
    }
}

pub trait Feature: Send + Sync + 'static {
    type Facts: Send + Sync + 'static;

    fn name(&self) -> &'static str;

    fn descriptors(&self) -> &[ShapeDescriptor];

    /// Contextual predicate, run after the matcher.
    fn accepts(&self, _m: &CallSiteMatch<'_>, _mode: DetectionMode) -> bool {
        true
    }

    fn link(&self, m: &CallSiteMatch<'_>, facts: &Self::Facts) -> Option<FactTarget>;

    /// Markdown
    fn hover(&self, m: &CallSiteMatch<'_>, facts: &Self::Facts) -> Option<String>;

    fn diagnostic(&self, m: &CallSiteMatch<'_>, facts: &Self::Facts) -> Option<Finding>;

    fn completions(&self, context: &CompletionContext, facts: &Self::Facts) -> Vec<Suggestion>;
}

// ============================================================================
// Type-erased runner
// ============================================================================

/// What the server needs from a feature, independent of its fact type.
#[tower_lsp::async_trait]
pub trait DocumentFeature: Send + Sync {
    fn name(&self) -> &'static str;

    fn handle(&self) -> &dyn CategoryHandle;

    fn links(&self, doc: &Document) -> Vec<FactLink>;

    fn link_at(&self, doc: &Document, position: Position) -> Option<FactLink>;

    fn hover_at(&self, doc: &Document, position: Position) -> Option<(Range, String)>;

    /// Waits for the category's first load.
    async fn diagnostics(&self, doc: &Document) -> Vec<Diagnostic>;

    fn completions(&self, doc: &Document, position: Position) -> Option<Vec<CompletionItem>>;
}

pub struct FeatureRunner<F: Feature> {
    feature: F,
    cache: KnowledgeCache<F::Facts>,
    root: PathBuf,
}

impl<F: Feature> FeatureRunner<F> {
    pub fn new(feature: F, cache: KnowledgeCache<F::Facts>, root: impl Into<PathBuf>) -> Self {
        Self {
            feature,
            cache,
            root: root.into(),
        }
    }

    pub fn feature(&self) -> &F {
        &self.feature
    }

    pub fn cache(&self) -> &KnowledgeCache<F::Facts> {
        &self.cache
    }

    fn resolve_link(&self, m: &CallSiteMatch<'_>, facts: &F::Facts) -> Option<FactLink> {
        if !self.feature.accepts(m, DetectionMode::Link) {
            return None;
        }
        let target = self.feature.link(m, facts)?;
        Some(FactLink {
            origin: m.range(),
            path: absolute(&self.root, &target.path),
            line: target.line,
        })
    }
}

fn absolute(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[tower_lsp::async_trait]
impl<F: Feature> DocumentFeature for FeatureRunner<F> {
    fn name(&self) -> &'static str {
        self.feature.name()
    }

    fn handle(&self) -> &dyn CategoryHandle {
        &self.cache
    }

    fn links(&self, doc: &Document) -> Vec<FactLink> {
        let mut links = detect_all(doc, self.feature.descriptors(), &self.cache, |m, facts| {
            self.resolve_link(m, facts)
        });
        // Matches come in source order, so duplicates are adjacent
        links.dedup();
        links
    }

    fn link_at(&self, doc: &Document, position: Position) -> Option<FactLink> {
        detect_at_position(doc, position, self.feature.descriptors(), &self.cache, |m, facts| {
            self.resolve_link(m, facts)
        })
    }

    fn hover_at(&self, doc: &Document, position: Position) -> Option<(Range, String)> {
        detect_at_position(doc, position, self.feature.descriptors(), &self.cache, |m, facts| {
            if !self.feature.accepts(m, DetectionMode::Hover) {
                return None;
            }
            self.feature.hover(m, facts).map(|text| (m.range(), text))
        })
    }

    async fn diagnostics(&self, doc: &Document) -> Vec<Diagnostic> {
        let mut diagnostics: Vec<Diagnostic> =
            detect_all_async(doc, self.feature.descriptors(), &self.cache, |m, facts| {
                // Ready but never loaded: the default knows nothing, so
                // everything would be "not found"
                if !facts.has_loaded() || !self.feature.accepts(m, DetectionMode::Diagnostic) {
                    return None;
                }
                self.feature.diagnostic(m, facts).map(|finding| Diagnostic {
                    range: m.range(),
                    severity: Some(finding.severity),
                    source: Some(DIAGNOSTIC_SOURCE.to_string()),
                    message: finding.message,
                    ..Default::default()
                })
            })
            .await;

        // Overlapping descriptors can flag the same literal twice
        diagnostics.dedup_by(|a, b| a.range == b.range && a.message == b.message);
        diagnostics
    }

    fn completions(&self, doc: &Document, position: Position) -> Option<Vec<CompletionItem>> {
        let context = detect_for_completion(doc, position, self.feature.descriptors())?;
        let snapshot = self.cache.current();
        let suggestions = self.feature.completions(&context, &snapshot);

        Some(
            suggestions
                .into_iter()
                .map(|s| completion_item(&context, s))
                .collect(),
        )
    }
}

fn completion_item(context: &CompletionContext, suggestion: Suggestion) -> CompletionItem {
    let new_text = match context.quote {
        Some(_) => suggestion.label.clone(),
        None => format!("'{}'", suggestion.label),
    };

    CompletionItem {
        label: suggestion.label.clone(),
        kind: Some(CompletionItemKind::VALUE),
        detail: suggestion.detail.clone(),
        documentation: suggestion.detail.map(|detail| {
            Documentation::MarkupContent(MarkupContent {
                kind: MarkupKind::Markdown,
                value: format!("`{}`", detail),
            })
        }),
        filter_text: Some(suggestion.label),
        text_edit: Some(CompletionTextEdit::Edit(TextEdit {
            range: context.replace,
            new_text,
        })),
        ..Default::default()
    }
}

/// Keys starting with the typed prefix, sorted.
pub(crate) fn suggest_keys<'a, I>(keys: I, partial: &str) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut matched: Vec<&str> = keys
        .into_iter()
        .map(String::as_str)
        .filter(|key| key.starts_with(partial))
        .collect();
    matched.sort_unstable();
    matched
}

/// 1-based line from a loader, as a 0-based LSP line
pub(crate) fn zero_based(line: Option<u32>) -> u32 {
    line.unwrap_or(1).saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheOptions;
    use crate::category::FactCategory;
    use crate::descriptor::ArgumentSlot;
    use crate::error::LoaderError;
    use crate::loader::loader_fn;
    use crate::parser::PhpParser;
    use std::collections::HashSet;

    struct KeysFeature {
        descriptors: Vec<ShapeDescriptor>,
    }

    impl Feature for KeysFeature {
        type Facts = HashSet<String>;

        fn name(&self) -> &'static str {
            "keys"
        }

        fn descriptors(&self) -> &[ShapeDescriptor] {
            &self.descriptors
        }

        fn accepts(&self, m: &CallSiteMatch<'_>, mode: DetectionMode) -> bool {
            mode != DetectionMode::Diagnostic || !m.value().starts_with("skip")
        }

        fn link(&self, m: &CallSiteMatch<'_>, _facts: &HashSet<String>) -> Option<FactTarget> {
            Some(FactTarget::new(format!("keys/{}.php", m.value()), 3))
        }

        fn hover(&self, m: &CallSiteMatch<'_>, _facts: &HashSet<String>) -> Option<String> {
            Some(format!("**{}**", m.value()))
        }

        fn diagnostic(&self, m: &CallSiteMatch<'_>, facts: &HashSet<String>) -> Option<Finding> {
            (!facts.contains(m.value())).then(|| Finding::warning(format!("'{}' not found", m.value())))
        }

        fn completions(&self, context: &CompletionContext, facts: &HashSet<String>) -> Vec<Suggestion> {
            suggest_keys(facts, &context.partial)
                .into_iter()
                .map(|k| Suggestion::new(k, None))
                .collect()
        }
    }

    fn runner() -> FeatureRunner<KeysFeature> {
        let cache = KnowledgeCache::spawn(
            FactCategory::new("keys", &["keys/*.php"]).unwrap(),
            HashSet::new(),
            loader_fn(|| async {
                Ok::<_, LoaderError>(HashSet::from(["alpha".to_string(), "beta".to_string()]))
            }),
            CacheOptions::default(),
        );
        FeatureRunner::new(keys_feature(), cache, "/project")
    }

    fn keys_feature() -> KeysFeature {
        KeysFeature {
            descriptors: vec![
                ShapeDescriptor::function(["key"], ArgumentSlot::Position(0)).unwrap(),
                ShapeDescriptor::function(["key", "other"], ArgumentSlot::Position(0)).unwrap(),
            ],
        }
    }

    #[tokio::test]
    async fn test_diagnostics_deduplicated_and_filtered() {
        let runner = runner();
        let doc = Document::parse("<?php\nkey('alpha');\nkey('gamma');\nkey('skip.me');\n", &PhpParser);

        let diagnostics = runner.diagnostics(&doc).await;
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, "'gamma' not found");
        assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::WARNING));
        assert_eq!(diagnostics[0].source.as_deref(), Some(DIAGNOSTIC_SOURCE));
    }

    #[tokio::test]
    async fn test_diagnostics_wait_for_a_successful_load() {
        let cache = KnowledgeCache::spawn(
            FactCategory::new("keys", &["keys/*.php"]).unwrap(),
            HashSet::new(),
            loader_fn(|| async { Err::<HashSet<String>, _>(LoaderError::MissingOutput) }),
            CacheOptions::default(),
        );
        let runner = FeatureRunner::new(keys_feature(), cache, "/project");
        let doc = Document::parse("<?php\nkey('gamma');\n", &PhpParser);

        assert!(runner.diagnostics(&doc).await.is_empty());
        assert!(runner.cache().is_ready());
    }

    #[tokio::test]
    async fn test_overlapping_descriptors_link_once() {
        let runner = runner();
        runner.cache().when_ready().await;
        let doc = Document::parse("<?php\nkey('alpha');\nkey('beta');\n", &PhpParser);

        let links = runner.links(&doc);
        let targets: Vec<&Path> = links.iter().map(|l| l.path.as_path()).collect();
        assert_eq!(
            targets,
            vec![Path::new("/project/keys/alpha.php"), Path::new("/project/keys/beta.php")]
        );
    }

    #[tokio::test]
    async fn test_links_are_absolute() {
        let runner = runner();
        let doc = Document::parse("<?php\nkey('alpha');\n", &PhpParser);

        let link = runner.link_at(&doc, Position::new(1, 6)).unwrap();
        assert_eq!(link.path, PathBuf::from("/project/keys/alpha.php"));
        assert_eq!(link.line, 3);
        assert_eq!(link.origin, Range::new(Position::new(1, 5), Position::new(1, 10)));
    }

    #[tokio::test]
    async fn test_completion_inserts_quotes_when_missing() {
        let runner = runner();
        runner.cache().when_ready().await;

        let doc = Document::parse("<?php\nkey(", &PhpParser);
        let items = runner.completions(&doc, Position::new(1, 4)).unwrap();
        let labels: Vec<&str> = items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["alpha", "beta"]);
        match &items[0].text_edit {
            Some(CompletionTextEdit::Edit(edit)) => assert_eq!(edit.new_text, "'alpha'"),
            other => panic!("unexpected edit: {:?}", other),
        }

        let doc = Document::parse("<?php\nkey('al", &PhpParser);
        let items = runner.completions(&doc, Position::new(1, 7)).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_zero_based() {
        assert_eq!(zero_based(Some(12)), 11);
        assert_eq!(zero_based(None), 0);
        assert_eq!(zero_based(Some(0)), 0);
    }
}
