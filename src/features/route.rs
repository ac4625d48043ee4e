//! Named routes: `route('home')`, `to_route()`, `Route::has`, `URL::route`...

use std::collections::HashMap;
use std::path::PathBuf;

use glob::PatternError;
use serde::Deserialize;

use super::{suggest_keys, zero_based, FactTarget, Feature, Finding, Suggestion};
use crate::category::FactCategory;
use crate::completion::CompletionContext;
use crate::descriptor::{ArgumentSlot, ShapeDescriptor};
use crate::error::DescriptorError;
use crate::loader::PhpScriptLoader;
use crate::matcher::CallSiteMatch;

const SCRIPT: &str = include_str!("../../php/routes.php");

pub const ROUTE_FACADE: &str = "Illuminate\\Support\\Facades\\Route";
pub const URL_FACADE: &str = "Illuminate\\Support\\Facades\\URL";
pub const REDIRECT_FACADE: &str = "Illuminate\\Support\\Facades\\Redirect";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteItem {
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub methods: Vec<String>,
    pub action: String,
    #[serde(default)]
    pub parameters: Vec<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Vec<RouteItem>")]
pub struct RouteTable {
    routes: HashMap<String, RouteItem>,
}

impl From<Vec<RouteItem>> for RouteTable {
    fn from(routes: Vec<RouteItem>) -> Self {
        Self {
            routes: routes.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }
}

impl RouteTable {
    pub fn get(&self, name: &str) -> Option<&RouteItem> {
        self.routes.get(name)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

pub fn category() -> Result<FactCategory, PatternError> {
    Ok(FactCategory::new("routes", &["routes/**/*.php"])?.with_composer())
}

pub fn loader(php: &str, root: PathBuf) -> PhpScriptLoader<RouteTable> {
    PhpScriptLoader::new(php, root, SCRIPT)
}

pub struct RouteFeature {
    descriptors: Vec<ShapeDescriptor>,
}

impl RouteFeature {
    pub fn new() -> Result<Self, DescriptorError> {
        let name = ArgumentSlot::NamedOrPosition {
            name: "name".to_string(),
            index: 0,
        };

        Ok(Self {
            descriptors: vec![
                ShapeDescriptor::function(["route", "to_route"], name.clone())?,
                ShapeDescriptor::method([ROUTE_FACADE], ["has"], ArgumentSlot::Position(0))?,
                ShapeDescriptor::method(
                    [URL_FACADE],
                    ["route", "signedRoute", "temporarySignedRoute"],
                    name,
                )?,
                ShapeDescriptor::method(
                    [REDIRECT_FACADE],
                    ["route"],
                    ArgumentSlot::NamedOrPosition {
                        name: "route".to_string(),
                        index: 0,
                    },
                )?,
            ],
        })
    }
}

fn signature(route: &RouteItem) -> String {
    format!("{} /{}", route.methods.join("|"), route.uri.trim_start_matches('/'))
}

impl Feature for RouteFeature {
    type Facts = RouteTable;

    fn name(&self) -> &'static str {
        "route"
    }

    fn descriptors(&self) -> &[ShapeDescriptor] {
        &self.descriptors
    }

    fn link(&self, m: &CallSiteMatch<'_>, facts: &RouteTable) -> Option<FactTarget> {
        let route = facts.get(m.value())?;
        let file = route.file.as_ref()?;
        Some(FactTarget::new(file, zero_based(route.line)))
    }

    fn hover(&self, m: &CallSiteMatch<'_>, facts: &RouteTable) -> Option<String> {
        let route = facts.get(m.value())?;
        let mut text = format!("**route** `{}`\n\n`{}`\n\n{}", route.name, signature(route), route.action);
        if !route.parameters.is_empty() {
            text.push_str(&format!("\n\nParameters: {}", route.parameters.join(", ")));
        }
        Some(text)
    }

    fn diagnostic(&self, m: &CallSiteMatch<'_>, facts: &RouteTable) -> Option<Finding> {
        if facts.get(m.value()).is_some() {
            return None;
        }
        Some(Finding::warning(format!("Route '{}' not found", m.value())))
    }

    fn completions(&self, context: &CompletionContext, facts: &RouteTable) -> Vec<Suggestion> {
        suggest_keys(facts.routes.keys(), &context.partial)
            .into_iter()
            .filter_map(|name| facts.get(name))
            .map(|route| Suggestion::new(&route.name, Some(signature(route))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::matcher::match_calls;
    use crate::parser::PhpParser;

    fn table() -> RouteTable {
        serde_json::from_str(
            r#"[{
                "name": "users.show",
                "uri": "users/{user}",
                "methods": ["GET"],
                "action": "App\\Http\\Controllers\\UserController@show",
                "parameters": ["user"],
                "file": "app/Http/Controllers/UserController.php",
                "line": 21
            }]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_every_call_shape_matches() {
        let feature = RouteFeature::new().unwrap();
        let source = "<?php\nroute('a');\nto_route('b');\nRoute::has('c');\nURL::signedRoute('d');\nRedirect::route(route: 'e');\n";
        let doc = Document::parse(source, &PhpParser);
        let values: Vec<&str> = match_calls(doc.calls(), feature.descriptors())
            .iter()
            .map(|m| m.value())
            .collect();
        assert_eq!(values, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_hover_and_link() {
        let feature = RouteFeature::new().unwrap();
        let doc = Document::parse("<?php\nreturn redirect(route('users.show', $user));\n", &PhpParser);
        let matches = match_calls(doc.calls(), feature.descriptors());
        let facts = table();

        let hover = feature.hover(&matches[0], &facts).unwrap();
        assert!(hover.contains("GET /users/{user}"));
        assert!(hover.contains("Parameters: user"));

        let link = feature.link(&matches[0], &facts).unwrap();
        assert_eq!(link.line, 20);
    }

    #[test]
    fn test_unknown_route() {
        let feature = RouteFeature::new().unwrap();
        let doc = Document::parse("<?php\nroute('users.edit');\n", &PhpParser);
        let matches = match_calls(doc.calls(), feature.descriptors());
        assert_eq!(
            feature.diagnostic(&matches[0], &table()).map(|f| f.message),
            Some("Route 'users.edit' not found".to_string())
        );
    }
}
