//! Blade views: `view('welcome')`, `View::make`, `Route::view`, `Volt::route`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use glob::PatternError;
use tracing::debug;
use walkdir::WalkDir;

use super::{suggest_keys, FactTarget, Feature, Finding, Suggestion};
use crate::category::FactCategory;
use crate::completion::CompletionContext;
use crate::descriptor::{ArgumentSlot, ShapeDescriptor};
use crate::error::{DescriptorError, LoaderError};
use crate::loader::{LoadFuture, Loader};
use crate::matcher::CallSiteMatch;

pub const VIEW_FACADE: &str = "Illuminate\\Support\\Facades\\View";
pub const ROUTE_FACADE: &str = "Illuminate\\Support\\Facades\\Route";
pub const VOLT_CLASS: &str = "Livewire\\Volt\\Volt";

pub const VIEWS_DIR: &str = "resources/views";

/// View name (`layouts.app`) to template path relative to the project root.
pub type ViewIndex = BTreeMap<String, PathBuf>;

pub fn category() -> Result<FactCategory, PatternError> {
    Ok(FactCategory::new("views", &["resources/views/**/*.php"])?.with_composer())
}

/// Dotted view name for a path relative to the views directory, e.g.
/// `emails/welcome.blade.php` -> `emails.welcome`
pub fn view_name(relative: &Path) -> Option<String> {
    let text = relative.to_str()?.replace('\\', "/");
    let stem = text
        .strip_suffix(".blade.php")
        .or_else(|| text.strip_suffix(".php"))?;
    Some(stem.replace('/', "."))
}

/// Walks `resources/views` on a blocking thread.
pub struct ViewLoader {
    root: PathBuf,
}

impl ViewLoader {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

fn scan_views(root: &Path) -> ViewIndex {
    let views_dir = root.join(VIEWS_DIR);
    let mut index = ViewIndex::new();

    for entry in WalkDir::new(&views_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let Ok(relative) = entry.path().strip_prefix(&views_dir) else {
            continue;
        };
        if let Some(name) = view_name(relative) {
            // `welcome.blade.php` wins over a plain `welcome.php`
            let path = Path::new(VIEWS_DIR).join(relative);
            let is_blade = relative.to_string_lossy().ends_with(".blade.php");
            if is_blade || !index.contains_key(&name) {
                index.insert(name, path);
            }
        }
    }

    index
}

impl Loader<ViewIndex> for ViewLoader {
    fn load(&self) -> LoadFuture<ViewIndex> {
        let root = self.root.clone();
        Box::pin(async move {
            let index = tokio::task::spawn_blocking(move || scan_views(&root))
                .await
                .map_err(|e| LoaderError::Io(e.to_string()))?;
            debug!("ViewLoader: {} views", index.len());
            Ok(index)
        })
    }
}

/// Descriptor positions of the route-level view registrations. A missing
/// view there breaks the route itself, so those are errors.
const ROUTE_LEVEL: [usize; 2] = [2, 3];

pub struct ViewFeature {
    descriptors: Vec<ShapeDescriptor>,
}

impl ViewFeature {
    pub fn new() -> Result<Self, DescriptorError> {
        let view = |index| ArgumentSlot::NamedOrPosition {
            name: "view".to_string(),
            index,
        };

        Ok(Self {
            descriptors: vec![
                ShapeDescriptor::function(["view"], view(0))?,
                ShapeDescriptor::method([VIEW_FACADE], ["make", "exists", "first"], view(0))?,
                ShapeDescriptor::method([ROUTE_FACADE], ["view"], view(1))?,
                ShapeDescriptor::method(
                    [VOLT_CLASS],
                    ["route"],
                    ArgumentSlot::NamedOrPosition {
                        name: "component".to_string(),
                        index: 1,
                    },
                )?,
            ],
        })
    }
}

impl Feature for ViewFeature {
    type Facts = ViewIndex;

    fn name(&self) -> &'static str {
        "view"
    }

    fn descriptors(&self) -> &[ShapeDescriptor] {
        &self.descriptors
    }

    fn link(&self, m: &CallSiteMatch<'_>, facts: &ViewIndex) -> Option<FactTarget> {
        facts.get(m.value()).map(|path| FactTarget::new(path, 0))
    }

    fn hover(&self, m: &CallSiteMatch<'_>, facts: &ViewIndex) -> Option<String> {
        let path = facts.get(m.value())?;
        Some(format!("**view** `{}`\n\n{}", m.value(), path.display()))
    }

    fn diagnostic(&self, m: &CallSiteMatch<'_>, facts: &ViewIndex) -> Option<Finding> {
        // Namespaced package views (`mail::message`) are not indexed
        if facts.contains_key(m.value()) || m.value().contains("::") {
            return None;
        }
        let message = format!("View '{}' not found", m.value());
        if ROUTE_LEVEL.contains(&m.descriptor_index) {
            Some(Finding::error(message))
        } else {
            Some(Finding::warning(message))
        }
    }

    fn completions(&self, context: &CompletionContext, facts: &ViewIndex) -> Vec<Suggestion> {
        suggest_keys(facts.keys(), &context.partial)
            .into_iter()
            .map(|name| {
                let detail = facts.get(name).map(|p| p.display().to_string());
                Suggestion::new(name, detail)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::matcher::match_calls;
    use crate::parser::PhpParser;
    use lsp_types::DiagnosticSeverity;

    #[test]
    fn test_view_name() {
        assert_eq!(view_name(Path::new("welcome.blade.php")).as_deref(), Some("welcome"));
        assert_eq!(view_name(Path::new("emails/order/shipped.blade.php")).as_deref(), Some("emails.order.shipped"));
        assert_eq!(view_name(Path::new("legacy.php")).as_deref(), Some("legacy"));
        assert_eq!(view_name(Path::new("app.css")), None);
    }

    #[tokio::test]
    async fn test_view_loader_walks_views() {
        let dir = tempfile::tempdir().unwrap();
        let views = dir.path().join(VIEWS_DIR);
        std::fs::create_dir_all(views.join("layouts")).unwrap();
        std::fs::write(views.join("welcome.blade.php"), "").unwrap();
        std::fs::write(views.join("layouts/app.blade.php"), "").unwrap();
        std::fs::write(views.join("layouts/readme.md"), "").unwrap();

        let index = ViewLoader::new(dir.path().to_path_buf()).load().await.unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index["layouts.app"], Path::new("resources/views/layouts/app.blade.php"));
    }

    #[tokio::test]
    async fn test_view_loader_without_views_dir() {
        let dir = tempfile::tempdir().unwrap();
        let index = ViewLoader::new(dir.path().to_path_buf()).load().await.unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_route_views_are_errors() {
        let feature = ViewFeature::new().unwrap();
        let source = "<?php\nview('missing');\nRoute::view('/about', 'missing');\nVolt::route('/counter', 'missing');\nview('mail::message');\n";
        let doc = Document::parse(source, &PhpParser);
        let facts = ViewIndex::new();

        let severities: Vec<Option<DiagnosticSeverity>> = match_calls(doc.calls(), feature.descriptors())
            .iter()
            .map(|m| feature.diagnostic(m, &facts).map(|f| f.severity))
            .collect();
        assert_eq!(
            severities,
            vec![
                Some(DiagnosticSeverity::WARNING),
                Some(DiagnosticSeverity::ERROR),
                Some(DiagnosticSeverity::ERROR),
                None,
            ]
        );
    }
}
