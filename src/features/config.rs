//! `config('app.name')` and the `Config` facade

use std::collections::HashMap;
use std::path::PathBuf;

use glob::PatternError;
use serde::Deserialize;

use super::{suggest_keys, zero_based, FactTarget, Feature, Finding, Suggestion};
use crate::completion::CompletionContext;
use crate::category::FactCategory;
use crate::descriptor::{ArgumentSlot, ShapeDescriptor};
use crate::error::DescriptorError;
use crate::loader::PhpScriptLoader;
use crate::matcher::CallSiteMatch;

const SCRIPT: &str = include_str!("../../php/configs.php");

pub const CONFIG_FACADE: &str = "Illuminate\\Support\\Facades\\Config";

/// One flattened config key as reported by the application.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConfigItem {
    pub name: String,
    /// `var_export` of scalar values, `None` for arrays and objects
    pub value: Option<String>,
    pub file: Option<String>,
    /// 1-based
    pub line: Option<u32>,
}

/// Every config key of the application, by dotted name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Vec<ConfigItem>")]
pub struct ConfigRepository {
    items: HashMap<String, ConfigItem>,
}

impl From<Vec<ConfigItem>> for ConfigRepository {
    fn from(items: Vec<ConfigItem>) -> Self {
        Self {
            items: items.into_iter().map(|item| (item.name.clone(), item)).collect(),
        }
    }
}

impl ConfigRepository {
    pub fn get(&self, name: &str) -> Option<&ConfigItem> {
        self.items.get(name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub fn category() -> Result<FactCategory, PatternError> {
    Ok(FactCategory::new("configs", &["config/**/*.php"])?.with_trigger(".env"))
}

pub fn loader(php: &str, root: PathBuf) -> PhpScriptLoader<ConfigRepository> {
    PhpScriptLoader::new(php, root, SCRIPT)
}

pub struct ConfigFeature {
    descriptors: Vec<ShapeDescriptor>,
}

impl ConfigFeature {
    pub fn new() -> Result<Self, DescriptorError> {
        let key = ArgumentSlot::NamedOrPosition {
            name: "key".to_string(),
            index: 0,
        };

        Ok(Self {
            descriptors: vec![
                ShapeDescriptor::function(["config"], key.clone())?,
                ShapeDescriptor::method(
                    [CONFIG_FACADE],
                    ["get", "string", "integer", "boolean", "float", "array", "has"],
                    key,
                )?,
            ],
        })
    }
}

impl Feature for ConfigFeature {
    type Facts = ConfigRepository;

    fn name(&self) -> &'static str {
        "config"
    }

    fn descriptors(&self) -> &[ShapeDescriptor] {
        &self.descriptors
    }

    fn link(&self, m: &CallSiteMatch<'_>, facts: &ConfigRepository) -> Option<FactTarget> {
        let item = facts.get(m.value())?;
        let file = item.file.as_ref()?;
        Some(FactTarget::new(file, zero_based(item.line)))
    }

    fn hover(&self, m: &CallSiteMatch<'_>, facts: &ConfigRepository) -> Option<String> {
        let item = facts.get(m.value())?;
        let mut text = format!("**config** `{}`", item.name);
        if let Some(value) = &item.value {
            text.push_str(&format!("\n\n```php\n{}\n```", value));
        }
        if let Some(file) = &item.file {
            match item.line {
                Some(line) => text.push_str(&format!("\n\n{}:{}", file, line)),
                None => text.push_str(&format!("\n\n{}", file)),
            }
        }
        Some(text)
    }

    fn diagnostic(&self, m: &CallSiteMatch<'_>, facts: &ConfigRepository) -> Option<Finding> {
        if facts.get(m.value()).is_some() {
            return None;
        }
        Some(Finding::warning(format!("Config key '{}' not found", m.value())))
    }

    fn completions(&self, context: &CompletionContext, facts: &ConfigRepository) -> Vec<Suggestion> {
        suggest_keys(facts.items.keys(), &context.partial)
            .into_iter()
            .filter_map(|key| facts.get(key))
            .map(|item| Suggestion::new(&item.name, item.value.clone()))
            .collect()
    }
}
