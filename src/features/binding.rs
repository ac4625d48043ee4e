//! Container bindings: `app('cache')`, `resolve('events')`, `App::make('auth')`

use std::collections::HashMap;
use std::path::PathBuf;

use glob::PatternError;
use serde::Deserialize;

use super::{suggest_keys, zero_based, DetectionMode, FactTarget, Feature, Finding, Suggestion};
use crate::category::FactCategory;
use crate::completion::CompletionContext;
use crate::descriptor::{ArgumentSlot, ShapeDescriptor};
use crate::error::DescriptorError;
use crate::loader::PhpScriptLoader;
use crate::matcher::CallSiteMatch;

const SCRIPT: &str = include_str!("../../php/bindings.php");

pub const APP_FACADE: &str = "Illuminate\\Support\\Facades\\App";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BindingItem {
    /// Concrete class, when the container knows it
    pub class: Option<String>,
    /// Singleton or instance
    #[serde(default)]
    pub shared: bool,
    pub file: Option<String>,
    pub line: Option<u32>,
}

/// Abstract name or alias to what it resolves to
pub type Bindings = HashMap<String, BindingItem>;

pub fn category() -> Result<FactCategory, PatternError> {
    Ok(FactCategory::new(
        "bindings",
        &["app/Providers/**/*.php", "bootstrap/providers.php", "config/app.php"],
    )?
    .with_composer())
}

pub fn loader(php: &str, root: PathBuf) -> PhpScriptLoader<Bindings> {
    PhpScriptLoader::new(php, root, SCRIPT)
}

pub struct BindingFeature {
    descriptors: Vec<ShapeDescriptor>,
}

impl BindingFeature {
    pub fn new() -> Result<Self, DescriptorError> {
        let abstract_name = ArgumentSlot::NamedOrPosition {
            name: "abstract".to_string(),
            index: 0,
        };

        Ok(Self {
            descriptors: vec![
                ShapeDescriptor::function(["app", "resolve"], abstract_name.clone())?,
                ShapeDescriptor::method([APP_FACADE], ["make", "makeWith", "bound"], abstract_name)?,
            ],
        })
    }
}

impl Feature for BindingFeature {
    type Facts = Bindings;

    fn name(&self) -> &'static str {
        "binding"
    }

    fn descriptors(&self) -> &[ShapeDescriptor] {
        &self.descriptors
    }

    /// Any class can be auto-resolved, so only string keys are diagnosed.
    fn accepts(&self, m: &CallSiteMatch<'_>, mode: DetectionMode) -> bool {
        mode != DetectionMode::Diagnostic || !m.value().contains('\\')
    }

    fn link(&self, m: &CallSiteMatch<'_>, facts: &Bindings) -> Option<FactTarget> {
        let item = facts.get(m.value())?;
        let file = item.file.as_ref()?;
        Some(FactTarget::new(file, zero_based(item.line)))
    }

    fn hover(&self, m: &CallSiteMatch<'_>, facts: &Bindings) -> Option<String> {
        let item = facts.get(m.value())?;
        let kind = if item.shared { "singleton" } else { "binding" };
        let mut text = format!("**{}** `{}`", kind, m.value());
        if let Some(class) = &item.class {
            text.push_str(&format!("\n\nResolves to `{}`", class));
        }
        Some(text)
    }

    fn diagnostic(&self, m: &CallSiteMatch<'_>, facts: &Bindings) -> Option<Finding> {
        if facts.contains_key(m.value()) {
            return None;
        }
        Some(Finding::warning(format!("Binding '{}' not found", m.value())))
    }

    fn completions(&self, context: &CompletionContext, facts: &Bindings) -> Vec<Suggestion> {
        // `Foo::class` covers class-named keys
        let keys = facts.keys().filter(|key| !key.contains('\\'));
        suggest_keys(keys, &context.partial)
            .into_iter()
            .map(|key| {
                let detail = facts.get(key).and_then(|item| item.class.clone());
                Suggestion::new(key, detail)
            })
            .collect()
    }
}
