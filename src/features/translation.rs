//! Translation keys: `__('messages.welcome')`, `trans()`, `Lang::get`...

use std::collections::{BTreeMap, HashMap};
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

const SCRIPT: &str = include_str!("../../php/translations.php");

pub const LANG_FACADE: &str = "Illuminate\\Support\\Facades\\Lang";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TranslationItem {
    /// Locale to translated text
    pub values: BTreeMap<String, String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

pub type Translations = HashMap<String, TranslationItem>;

pub fn category() -> Result<FactCategory, PatternError> {
    Ok(FactCategory::new("translations", &["lang/**/*", "resources/lang/**/*"])?.with_composer())
}

pub fn loader(php: &str, root: PathBuf) -> PhpScriptLoader<Translations> {
    PhpScriptLoader::new(php, root, SCRIPT)
}

/// `messages.welcome` is a group key; `Welcome back!` is a JSON string key
/// that may legitimately fall back to itself. Package keys (`courier::x.y`)
/// live outside the indexed lang directories.
fn is_group_key(key: &str) -> bool {
    key.contains('.')
        && !key.contains(char::is_whitespace)
        && !key.ends_with('.')
        && !key.contains("::")
}

pub struct TranslationFeature {
    descriptors: Vec<ShapeDescriptor>,
}

impl TranslationFeature {
    pub fn new() -> Result<Self, DescriptorError> {
        let key = ArgumentSlot::NamedOrPosition {
            name: "key".to_string(),
            index: 0,
        };

        Ok(Self {
            descriptors: vec![
                ShapeDescriptor::function(["__", "trans", "trans_choice"], key.clone())?,
                ShapeDescriptor::method([LANG_FACADE], ["get", "choice", "has"], key)?,
            ],
        })
    }
}

impl Feature for TranslationFeature {
    type Facts = Translations;

    fn name(&self) -> &'static str {
        "translation"
    }

    fn descriptors(&self) -> &[ShapeDescriptor] {
        &self.descriptors
    }

    fn accepts(&self, m: &CallSiteMatch<'_>, mode: DetectionMode) -> bool {
        mode != DetectionMode::Diagnostic || is_group_key(m.value())
    }

    fn link(&self, m: &CallSiteMatch<'_>, facts: &Translations) -> Option<FactTarget> {
        let item = facts.get(m.value())?;
        let file = item.file.as_ref()?;
        Some(FactTarget::new(file, zero_based(item.line)))
    }

    fn hover(&self, m: &CallSiteMatch<'_>, facts: &Translations) -> Option<String> {
        let item = facts.get(m.value())?;
        let mut text = format!("**trans** `{}`\n", m.value());
        for (locale, value) in &item.values {
            text.push_str(&format!("\n- `{}`: {}", locale, value));
        }
        Some(text)
    }

    fn diagnostic(&self, m: &CallSiteMatch<'_>, facts: &Translations) -> Option<Finding> {
        if facts.contains_key(m.value()) {
            return None;
        }
        Some(Finding::warning(format!("Translation key '{}' not found", m.value())))
    }

    fn completions(&self, context: &CompletionContext, facts: &Translations) -> Vec<Suggestion> {
        suggest_keys(facts.keys(), &context.partial)
            .into_iter()
            .map(|key| {
                let detail = facts
                    .get(key)
                    .and_then(|item| item.values.values().next().cloned());
                Suggestion::new(key, detail)
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

    fn facts() -> Translations {
        serde_json::from_str(
            r#"{
                "messages.welcome": {
                    "values": {"en": "Welcome!", "fr": "Bienvenue !"},
                    "file": "lang/en/messages.php",
                    "line": 4
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_group_key_detection() {
        assert!(is_group_key("messages.welcome"));
        assert!(!is_group_key("Welcome back!"));
        assert!(!is_group_key("Hello. How are you?"));
        assert!(!is_group_key("messages."));
        assert!(!is_group_key("courier::messages.sent"));
    }

    #[test]
    fn test_package_keys_are_not_diagnosed() {
        let feature = TranslationFeature::new().unwrap();
        let doc = Document::parse("<?php\n__('courier::messages.sent');\n", &PhpParser);
        let matches = match_calls(doc.calls(), feature.descriptors());
        assert_eq!(matches.len(), 1);
        assert!(!feature.accepts(&matches[0], DetectionMode::Diagnostic));
        assert!(feature.accepts(&matches[0], DetectionMode::Hover));
    }

    #[test]
    fn test_only_group_keys_are_diagnosed() {
        let feature = TranslationFeature::new().unwrap();
        let source = "<?php\n__('messages.welcome');\n__('messages.missing');\ntrans('Some sentence.');\nLang::get(key: 'auth.failed');\n";
        let doc = Document::parse(source, &PhpParser);
        let facts = facts();

        let messages: Vec<String> = match_calls(doc.calls(), feature.descriptors())
            .iter()
            .filter(|m| feature.accepts(m, DetectionMode::Diagnostic))
            .filter_map(|m| feature.diagnostic(m, &facts))
            .map(|f| f.message)
            .collect();
        assert_eq!(
            messages,
            vec![
                "Translation key 'messages.missing' not found".to_string(),
                "Translation key 'auth.failed' not found".to_string(),
            ]
        );
    }

    #[test]
    fn test_hover_lists_locales() {
        let feature = TranslationFeature::new().unwrap();
        let doc = Document::parse("<?php\ntrans_choice('messages.welcome', 2);\n", &PhpParser);
        let matches = match_calls(doc.calls(), feature.descriptors());

        let hover = feature.hover(&matches[0], &facts()).unwrap();
        assert!(hover.contains("- `en`: Welcome!"));
        assert!(hover.contains("- `fr`: Bienvenue !"));
        assert_eq!(feature.link(&matches[0], &facts()).unwrap().line, 3);
    }
}
