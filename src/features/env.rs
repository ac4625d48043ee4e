//! `env('APP_NAME')` and `Env::get`

use std::collections::HashMap;
use std::path::PathBuf;

use glob::PatternError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{suggest_keys, DetectionMode, FactTarget, Feature, Finding, Suggestion};
use crate::category::FactCategory;
use crate::completion::CompletionContext;
use crate::descriptor::{ArgumentSlot, ShapeDescriptor};
use crate::env_parser::parse_project_env;
use crate::error::{DescriptorError, LoaderError};
use crate::loader::{LoadFuture, Loader};
use crate::matcher::CallSiteMatch;

pub const ENV_CLASS: &str = "Illuminate\\Support\\Env";

/// File a variable is assumed to live in when the loader did not say
const DEFAULT_ENV_FILE: &str = ".env";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvValue {
    pub value: String,
    /// 1-based
    pub line_number: u32,
    #[serde(default)]
    pub file: Option<String>,
}

pub type EnvVariables = HashMap<String, EnvValue>;

pub fn category() -> Result<FactCategory, PatternError> {
    FactCategory::new("env", &[".env", ".env.*"])
}

/// Reads the project's env files directly; no PHP involved.
pub struct EnvLoader {
    root: PathBuf,
}

impl EnvLoader {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl Loader<EnvVariables> for EnvLoader {
    fn load(&self) -> LoadFuture<EnvVariables> {
        let root = self.root.clone();
        Box::pin(async move {
            let merged = tokio::task::spawn_blocking(move || parse_project_env(&root))
                .await
                .map_err(|e| LoaderError::Io(e.to_string()))?
                .map_err(|e| LoaderError::Io(format!("{:#}", e)))?;

            debug!("EnvLoader: {} variables", merged.len());
            Ok(merged
                .into_iter()
                .map(|(name, (entry, file))| {
                    let value = EnvValue {
                        value: entry.value,
                        line_number: entry.line,
                        file: Some(file.to_string()),
                    };
                    (name, value)
                })
                .collect())
        })
    }
}

pub struct EnvFeature {
    descriptors: Vec<ShapeDescriptor>,
}

impl EnvFeature {
    pub fn new() -> Result<Self, DescriptorError> {
        let key = ArgumentSlot::NamedOrPosition {
            name: "key".to_string(),
            index: 0,
        };

        Ok(Self {
            descriptors: vec![
                ShapeDescriptor::function(["env"], key.clone())?,
                ShapeDescriptor::method([ENV_CLASS], ["get"], key)?,
            ],
        })
    }
}

/// `env('X', 'fallback')` is deliberately tolerant of a missing variable.
fn has_fallback(m: &CallSiteMatch<'_>) -> bool {
    m.call.named("default").is_some() || m.call.positional(1).is_some()
}

impl Feature for EnvFeature {
    type Facts = EnvVariables;

    fn name(&self) -> &'static str {
        "env"
    }

    fn descriptors(&self) -> &[ShapeDescriptor] {
        &self.descriptors
    }

    fn accepts(&self, m: &CallSiteMatch<'_>, mode: DetectionMode) -> bool {
        mode != DetectionMode::Diagnostic || !has_fallback(m)
    }

    fn link(&self, m: &CallSiteMatch<'_>, facts: &EnvVariables) -> Option<FactTarget> {
        let variable = facts.get(m.value())?;
        let file = variable.file.as_deref().unwrap_or(DEFAULT_ENV_FILE);
        Some(FactTarget::new(file, variable.line_number.saturating_sub(1)))
    }

    fn hover(&self, m: &CallSiteMatch<'_>, facts: &EnvVariables) -> Option<String> {
        let variable = facts.get(m.value())?;
        let file = variable.file.as_deref().unwrap_or(DEFAULT_ENV_FILE);
        Some(format!(
            "**env** `{}`\n\n```\n{}\n```\n\n{}:{}",
            m.value(),
            variable.value,
            file,
            variable.line_number
        ))
    }

    fn diagnostic(&self, m: &CallSiteMatch<'_>, facts: &EnvVariables) -> Option<Finding> {
        if facts.contains_key(m.value()) {
            return None;
        }
        Some(Finding::warning(format!(
            "Environment variable '{}' not found",
            m.value()
        )))
    }

    fn completions(&self, context: &CompletionContext, facts: &EnvVariables) -> Vec<Suggestion> {
        suggest_keys(facts.keys(), &context.partial)
            .into_iter()
            .map(|name| Suggestion::new(name, facts.get(name).map(|v| v.value.clone())))
            .collect()
    }
}
