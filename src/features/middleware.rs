//! Route middleware: `Route::middleware('auth')`, `->middleware('verified')`,
//! `->withoutMiddleware('throttle:api')`

use std::collections::HashMap;
use std::path::PathBuf;

use glob::PatternError;
use serde::Deserialize;

use super::route::ROUTE_FACADE;
use super::{suggest_keys, zero_based, DetectionMode, FactTarget, Feature, Finding, Suggestion};
use crate::category::FactCategory;
use crate::completion::CompletionContext;
use crate::descriptor::{ArgumentSlot, ShapeDescriptor};
use crate::error::DescriptorError;
use crate::loader::PhpScriptLoader;
use crate::matcher::CallSiteMatch;

const SCRIPT: &str = include_str!("../../php/middleware.php");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MiddlewareKind {
    Alias,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MiddlewareItem {
    pub name: String,
    pub kind: MiddlewareKind,
    /// One class for an alias, the members of a group
    #[serde(default)]
    pub classes: Vec<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

/// Aliases and groups registered on the router, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Vec<MiddlewareItem>")]
pub struct MiddlewareTable {
    items: HashMap<String, MiddlewareItem>,
}

impl From<Vec<MiddlewareItem>> for MiddlewareTable {
    fn from(items: Vec<MiddlewareItem>) -> Self {
        Self {
            items: items.into_iter().map(|item| (item.name.clone(), item)).collect(),
        }
    }
}

impl MiddlewareTable {
    /// Look up `throttle:60,1` as `throttle`.
    pub fn get(&self, reference: &str) -> Option<&MiddlewareItem> {
        self.items.get(middleware_name(reference))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn middleware_name(reference: &str) -> &str {
    reference.split_once(':').map_or(reference, |(name, _)| name)
}

pub fn category() -> Result<FactCategory, PatternError> {
    Ok(FactCategory::new(
        "middleware",
        &["bootstrap/app.php", "app/Http/Kernel.php", "app/Http/Middleware/**/*.php"],
    )?
    .with_composer())
}

pub fn loader(php: &str, root: PathBuf) -> PhpScriptLoader<MiddlewareTable> {
    PhpScriptLoader::new(php, root, SCRIPT)
}

pub struct MiddlewareFeature {
    descriptors: Vec<ShapeDescriptor>,
}

impl MiddlewareFeature {
    pub fn new() -> Result<Self, DescriptorError> {
        Ok(Self {
            descriptors: vec![ShapeDescriptor::method(
                [ROUTE_FACADE],
                ["middleware", "withoutMiddleware"],
                ArgumentSlot::Position(0),
            )?],
        })
    }
}

impl Feature for MiddlewareFeature {
    type Facts = MiddlewareTable;

    fn name(&self) -> &'static str {
        "middleware"
    }

    fn descriptors(&self) -> &[ShapeDescriptor] {
        &self.descriptors
    }

    /// Class names are valid middleware without an alias.
    fn accepts(&self, m: &CallSiteMatch<'_>, mode: DetectionMode) -> bool {
        mode != DetectionMode::Diagnostic || !m.value().contains('\\')
    }

    fn link(&self, m: &CallSiteMatch<'_>, facts: &MiddlewareTable) -> Option<FactTarget> {
        let item = facts.get(m.value())?;
        let file = item.file.as_ref()?;
        Some(FactTarget::new(file, zero_based(item.line)))
    }

    fn hover(&self, m: &CallSiteMatch<'_>, facts: &MiddlewareTable) -> Option<String> {
        let item = facts.get(m.value())?;
        let mut text = match item.kind {
            MiddlewareKind::Alias => format!("**middleware** `{}`\n", item.name),
            MiddlewareKind::Group => format!("**middleware group** `{}`\n", item.name),
        };
        for class in &item.classes {
            text.push_str(&format!("\n- `{}`", class));
        }
        Some(text)
    }

    fn diagnostic(&self, m: &CallSiteMatch<'_>, facts: &MiddlewareTable) -> Option<Finding> {
        if facts.get(m.value()).is_some() {
            return None;
        }
        Some(Finding::warning(format!(
            "Middleware '{}' not found",
            middleware_name(m.value())
        )))
    }

    fn completions(&self, context: &CompletionContext, facts: &MiddlewareTable) -> Vec<Suggestion> {
        suggest_keys(facts.items.keys(), &context.partial)
            .into_iter()
            .filter_map(|name| facts.items.get(name))
            .map(|item| {
                let detail = match item.kind {
                    MiddlewareKind::Alias => item.classes.first().cloned(),
                    MiddlewareKind::Group => Some(format!("group ({})", item.classes.len())),
                };
                Suggestion::new(&item.name, detail)
            })
            .collect()
    }
}
