//! One place that owns every category cache of a project
//!
//! The server builds a [`KnowledgeRegistry`] once the project root is known
//! and hands out clones of the typed caches to features and type-erased
//! handles to the file watcher and the refresh command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::cache::{CacheOptions, CategoryHandle, KnowledgeCache};
use crate::config::Settings;
use crate::error::LoaderError;
use crate::features::binding::{self as binding_feature, Bindings};
use crate::features::config::{self as config_feature, ConfigRepository};
use crate::features::env::{self as env_feature, EnvLoader, EnvVariables};
use crate::features::middleware::{self as middleware_feature, MiddlewareTable};
use crate::features::route::{self as route_feature, RouteTable};
use crate::features::translation::{self as translation_feature, Translations};
use crate::features::view::{self as view_feature, ViewIndex, ViewLoader};
use crate::features::{
    BindingFeature, ConfigFeature, DocumentFeature, EnvFeature, FeatureRunner, MiddlewareFeature,
    RouteFeature, TranslationFeature, ViewFeature,
};

pub struct KnowledgeRegistry {
    root: PathBuf,
    pub configs: KnowledgeCache<ConfigRepository>,
    pub env: KnowledgeCache<EnvVariables>,
    pub routes: KnowledgeCache<RouteTable>,
    pub views: KnowledgeCache<ViewIndex>,
    pub translations: KnowledgeCache<Translations>,
    pub middleware: KnowledgeCache<MiddlewareTable>,
    pub bindings: KnowledgeCache<Bindings>,
}

impl KnowledgeRegistry {
    /// Spawn every cache; each starts its first load immediately and the
    /// loads run in parallel.
    pub fn start(root: &Path, settings: &Settings) -> Result<Self> {
        let options: CacheOptions = settings.cache_options();
        let php = settings.php_command.as_str();
        let root = root.to_path_buf();

        info!("Starting knowledge caches for {:?} (php: {})", root, php);

        Ok(Self {
            configs: KnowledgeCache::spawn(
                config_feature::category()?,
                ConfigRepository::default(),
                config_feature::loader(php, root.clone()),
                options,
            ),
            env: KnowledgeCache::spawn(
                env_feature::category()?,
                EnvVariables::default(),
                EnvLoader::new(root.clone()),
                options,
            ),
            routes: KnowledgeCache::spawn(
                route_feature::category()?,
                RouteTable::default(),
                route_feature::loader(php, root.clone()),
                options,
            ),
            views: KnowledgeCache::spawn(
                view_feature::category()?,
                ViewIndex::default(),
                ViewLoader::new(root.clone()),
                options,
            ),
            translations: KnowledgeCache::spawn(
                translation_feature::category()?,
                Translations::default(),
                translation_feature::loader(php, root.clone()),
                options,
            ),
            middleware: KnowledgeCache::spawn(
                middleware_feature::category()?,
                MiddlewareTable::default(),
                middleware_feature::loader(php, root.clone()),
                options,
            ),
            bindings: KnowledgeCache::spawn(
                binding_feature::category()?,
                Bindings::default(),
                binding_feature::loader(php, root.clone()),
                options,
            ),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn handles(&self) -> Vec<Arc<dyn CategoryHandle>> {
        let handles: Vec<Arc<dyn CategoryHandle>> = vec![
            Arc::new(self.configs.clone()),
            Arc::new(self.env.clone()),
            Arc::new(self.routes.clone()),
            Arc::new(self.views.clone()),
            Arc::new(self.translations.clone()),
            Arc::new(self.middleware.clone()),
            Arc::new(self.bindings.clone()),
        ];
        handles
    }

    /// Every editor feature, bound to its cache.
    pub fn features(&self) -> Result<Vec<Arc<dyn DocumentFeature>>> {
        let features: Vec<Arc<dyn DocumentFeature>> = vec![
            Arc::new(FeatureRunner::new(ConfigFeature::new()?, self.configs.clone(), &self.root)),
            Arc::new(FeatureRunner::new(EnvFeature::new()?, self.env.clone(), &self.root)),
            Arc::new(FeatureRunner::new(RouteFeature::new()?, self.routes.clone(), &self.root)),
            Arc::new(FeatureRunner::new(ViewFeature::new()?, self.views.clone(), &self.root)),
            Arc::new(FeatureRunner::new(
                TranslationFeature::new()?,
                self.translations.clone(),
                &self.root,
            )),
            Arc::new(FeatureRunner::new(
                MiddlewareFeature::new()?,
                self.middleware.clone(),
                &self.root,
            )),
            Arc::new(FeatureRunner::new(BindingFeature::new()?, self.bindings.clone(), &self.root)),
        ];
        Ok(features)
    }

    /// Reload every category in parallel, bypassing debounce. Returns one
    /// outcome per category, in registry order.
    pub async fn force_reload_all(&self) -> Vec<(&'static str, Result<u64, LoaderError>)> {
        force_reload_handles(self.handles()).await
    }

    pub fn shutdown(&self) {
        for handle in self.handles() {
            handle.shutdown();
        }
    }
}

/// Force-reload handles taken out of a registry. Outcomes keep the order
/// of `handles`.
pub async fn force_reload_handles(
    handles: Vec<Arc<dyn CategoryHandle>>,
) -> Vec<(&'static str, Result<u64, LoaderError>)> {
    let tasks: Vec<_> = handles
        .into_iter()
        .map(|handle| {
            let name = handle.category().name();
            let task = tokio::spawn(async move { handle.force_reload().await });
            (name, task)
        })
        .collect();

    let mut outcomes = Vec::with_capacity(tasks.len());
    for (name, task) in tasks {
        let outcome = task.await.unwrap_or_else(|e| Err(LoaderError::Io(e.to_string())));
        if let Err(e) = &outcome {
            warn!("Forced reload of '{}' failed: {}", name, e);
        }
        outcomes.push((name, outcome));
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::parser::PhpParser;

    const ALL_CATEGORIES: [&str; 7] =
        ["configs", "env", "routes", "views", "translations", "middleware", "bindings"];

    fn settings() -> Settings {
        Settings {
            php_command: "definitely-not-a-php-binary".to_string(),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_registry_without_php_still_becomes_ready() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "APP_NAME=Demo\n").unwrap();

        let registry = KnowledgeRegistry::start(dir.path(), &settings()).unwrap();

        let env = registry.env.when_ready().await;
        assert_eq!(env.version(), 1);
        assert_eq!(env["APP_NAME"].value, "Demo");

        let configs = registry.configs.when_ready().await;
        assert!(configs.is_ready());
        assert_eq!(configs.version(), 0);
        assert!(configs.is_empty());
    }

    #[tokio::test]
    async fn test_failed_loads_produce_no_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let registry = KnowledgeRegistry::start(dir.path(), &settings()).unwrap();
        let doc = Document::parse(
            "<?php\nconfig('app.name');\nroute('home');\n__('auth.failed');\n",
            &PhpParser,
        );

        for feature in registry.features().unwrap() {
            let diagnostics = feature.diagnostics(&doc).await;
            assert!(diagnostics.is_empty(), "{}: {:?}", feature.name(), diagnostics);
        }
        assert_eq!(registry.configs.version(), 0);
        registry.shutdown();
    }

    #[tokio::test]
    async fn test_detached_handles_reload_without_registry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "APP_NAME=Demo\n").unwrap();
        let registry = KnowledgeRegistry::start(dir.path(), &settings()).unwrap();
        registry.env.when_ready().await;

        let handles: Vec<Arc<dyn CategoryHandle>> = vec![Arc::new(registry.env.clone())];
        let outcomes = force_reload_handles(handles).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, "env");
        assert_eq!(outcomes[0].1, Ok(2));
        registry.shutdown();
    }

    #[tokio::test]
    async fn test_force_reload_all_reports_each_category() {
        let dir = tempfile::tempdir().unwrap();
        let registry = KnowledgeRegistry::start(dir.path(), &settings()).unwrap();

        let outcomes = registry.force_reload_all().await;
        let names: Vec<&str> = outcomes.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, ALL_CATEGORIES);

        for (name, outcome) in &outcomes {
            match *name {
                "env" | "views" => assert!(outcome.is_ok(), "{} should reload", name),
                _ => assert!(matches!(outcome, Err(LoaderError::Spawn { .. }))),
            }
        }
        registry.shutdown();
    }

    #[tokio::test]
    async fn test_features_cover_every_category() {
        let dir = tempfile::tempdir().unwrap();
        let registry = KnowledgeRegistry::start(dir.path(), &settings()).unwrap();
        let features = registry.features().unwrap();
        let categories: Vec<&str> = features.iter().map(|f| f.handle().category().name()).collect();
        assert_eq!(categories, ALL_CATEGORIES);
    }
}
