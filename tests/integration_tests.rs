//! Integration tests against the fixture project under tests/fixtures/project.
//!
//! The fixture has no `vendor/`, so the PHP-backed categories (configs,
//! routes, translations, middleware, bindings) settle on their empty
//! defaults. Env and views are
//! read straight from disk and exercise the full flow:
//! cache -> matcher -> feature -> LSP values.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lsp_types::{DiagnosticSeverity, Position};
use tokio::sync::Semaphore;

use laravel_facts::features::env::{EnvFeature, EnvVariables};
use laravel_facts::features::{DocumentFeature, FeatureRunner};
use laravel_facts::{
    find_project_root, loader_fn, parser_for_path, BladeParser, CacheOptions, Document,
    FactCategory, FileEventRouter, InvalidationReason, KnowledgeCache, KnowledgeRegistry,
    LoaderError, PhpParser, Settings,
};

/// Path to the fixture Laravel project
fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/project")
}

fn read_fixture(relative_path: &str) -> String {
    let path = fixture_path().join(relative_path);
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e))
}

fn fixture_document(relative_path: &str) -> Document {
    let parser = parser_for_path(relative_path).unwrap();
    Document::parse(read_fixture(relative_path), parser)
}

fn settings_without_php() -> Settings {
    Settings {
        php_command: "definitely-not-a-php-binary".to_string(),
        ..Settings::default()
    }
}

fn copy_dir(from: &Path, to: &Path) {
    for entry in walkdir::WalkDir::new(from) {
        let entry = entry.unwrap();
        let target = to.join(entry.path().strip_prefix(from).unwrap());
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).unwrap();
        } else {
            fs::copy(entry.path(), &target).unwrap();
        }
    }
}

// ============================================================================
// Fixture validation
// ============================================================================

#[test]
fn test_fixture_is_a_laravel_project() {
    let controller = fixture_path().join("app/Http/Controllers/HomeController.php");
    assert_eq!(find_project_root(&controller), Some(fixture_path()));
}

// ============================================================================
// Env end-to-end: diagnostics wait for the first load
// ============================================================================

#[tokio::test]
async fn test_env_not_found_only_after_first_load() {
    let gate = Arc::new(Semaphore::new(0));
    let loader = {
        let gate = Arc::clone(&gate);
        loader_fn(move || {
            let gate = Arc::clone(&gate);
            async move {
                gate.acquire().await.map_err(|_| LoaderError::Stopped)?.forget();
                let variables: EnvVariables =
                    serde_json::from_str(r#"{"APP_NAME": {"value": "Demo", "lineNumber": 3}}"#)?;
                Ok::<_, LoaderError>(variables)
            }
        })
    };
    let cache = KnowledgeCache::spawn(
        FactCategory::new("env", &[".env", ".env.*"]).unwrap(),
        EnvVariables::new(),
        loader,
        CacheOptions::default(),
    );
    let runner = Arc::new(FeatureRunner::new(EnvFeature::new().unwrap(), cache, "/project"));
    let doc = Arc::new(Document::parse("<?php\nenv('APP_NAME');\nenv('MISSING');\n", &PhpParser));

    let pending = {
        let runner = Arc::clone(&runner);
        let doc = Arc::clone(&doc);
        tokio::spawn(async move { runner.diagnostics(&doc).await })
    };

    // Nothing is reported against the empty default
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pending.is_finished());
    assert!(!runner.cache().is_ready());

    gate.add_permits(1);
    let diagnostics = pending.await.unwrap();

    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].message, "Environment variable 'MISSING' not found");
    assert_eq!(diagnostics[0].range.start, Position::new(2, 5));

    let link = runner.link_at(&doc, Position::new(1, 7)).unwrap();
    assert_eq!(link.path, Path::new("/project/.env"));
    assert_eq!(link.line, 2);
}

// ============================================================================
// Registry over the fixture
// ============================================================================

#[tokio::test]
async fn test_registry_env_and_views_from_fixture() {
    let registry = KnowledgeRegistry::start(&fixture_path(), &settings_without_php()).unwrap();

    let env = registry.env.when_ready().await;
    assert_eq!(env["APP_NAME"].value, "Demo");
    assert_eq!(env["MAIL_MAILER"].value, "smtp");
    assert_eq!(env["MAIL_MAILER"].file.as_deref(), Some(".env.example"));

    let views = registry.views.when_ready().await;
    assert!(views.contains_key("welcome"));
    assert!(views.contains_key("layouts.app"));
    assert!(views.contains_key("emails.welcome"));

    // PHP categories settle on their defaults without a php binary
    let routes = registry.routes.when_ready().await;
    assert!(routes.is_ready());
    assert_eq!(routes.version(), 0);

    registry.shutdown();
}

#[tokio::test]
async fn test_fixture_diagnostics() {
    let registry = KnowledgeRegistry::start(&fixture_path(), &settings_without_php()).unwrap();
    let features = registry.features().unwrap();
    let env = features.iter().find(|f| f.name() == "env").unwrap();
    let view = features.iter().find(|f| f.name() == "view").unwrap();

    // config/app.php: only the variable without fallback and without a
    // definition is reported
    let config_file = fixture_document("config/app.php");
    let messages: Vec<String> = env
        .diagnostics(&config_file)
        .await
        .into_iter()
        .map(|d| d.message)
        .collect();
    assert_eq!(messages, vec!["Environment variable 'APP_TIMEZONE' not found".to_string()]);

    // The controller uses an aliased View facade and known views
    let controller = fixture_document("app/Http/Controllers/HomeController.php");
    assert!(env.diagnostics(&controller).await.is_empty());
    assert!(view.diagnostics(&controller).await.is_empty());

    // A route-level view that does not exist is an error
    let routes = fixture_document("routes/web.php");
    let diagnostics = view.diagnostics(&routes).await;
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].message, "View 'about' not found");
    assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::ERROR));

    registry.shutdown();
}

#[tokio::test]
async fn test_fixture_links_and_completion() {
    let registry = KnowledgeRegistry::start(&fixture_path(), &settings_without_php()).unwrap();
    registry.env.when_ready().await;
    registry.views.when_ready().await;
    let features = registry.features().unwrap();
    let env = features.iter().find(|f| f.name() == "env").unwrap();
    let view = features.iter().find(|f| f.name() == "view").unwrap();

    let controller = fixture_document("app/Http/Controllers/HomeController.php");

    let env_links = env.links(&controller);
    assert_eq!(env_links.len(), 2);
    assert_eq!(env_links[0].path, fixture_path().join(".env"));
    assert_eq!(env_links[0].line, 2);
    assert_eq!(env_links[1].path, fixture_path().join(".env.example"));

    let view_links = view.links(&controller);
    let targets: Vec<PathBuf> = view_links.iter().map(|l| l.path.clone()).collect();
    assert_eq!(
        targets,
        vec![
            fixture_path().join("resources/views/emails/welcome.blade.php"),
            fixture_path().join("resources/views/welcome.blade.php"),
        ]
    );

    let typing = Document::parse("<?php\n$debug = env('APP_", &PhpParser);
    let items = env.completions(&typing, Position::new(1, 18)).unwrap();
    let labels: Vec<&str> = items.iter().map(|i| i.label.as_str()).collect();
    assert_eq!(labels, vec!["APP_DEBUG", "APP_ENV", "APP_KEY", "APP_NAME", "APP_URL"]);

    registry.shutdown();
}

#[tokio::test]
async fn test_blade_templates_from_fixture() {
    let registry = KnowledgeRegistry::start(&fixture_path(), &settings_without_php()).unwrap();
    registry.views.when_ready().await;
    let features = registry.features().unwrap();
    let env = features.iter().find(|f| f.name() == "env").unwrap();
    let view = features.iter().find(|f| f.name() == "view").unwrap();

    let welcome = fixture_document("resources/views/welcome.blade.php");
    assert!(welcome.tree().and_then(|t| t.code.as_ref()).is_some());

    let links = view.links(&welcome);
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].path, fixture_path().join("resources/views/layouts/app.blade.php"));
    assert_eq!(links[0].origin.start, Position::new(0, 10));
    assert!(view.diagnostics(&welcome).await.is_empty());

    let template = Document::parse(
        "<footer>\n  {{ env('APP_NAME') }} / {{ env('APP_REGION') }}\n</footer>\n",
        &BladeParser,
    );
    let diagnostics = env.diagnostics(&template).await;
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].message, "Environment variable 'APP_REGION' not found");
    assert_eq!(diagnostics[0].range.start, Position::new(1, 34));

    let typing = Document::parse("<p>{{ env('APP_N", &BladeParser);
    let items = env.completions(&typing, Position::new(0, 16)).unwrap();
    let labels: Vec<&str> = items.iter().map(|i| i.label.as_str()).collect();
    assert_eq!(labels, vec!["APP_NAME"]);

    registry.shutdown();
}

// ============================================================================
// Invalidation
// ============================================================================

#[tokio::test]
async fn test_watcher_routes_fixture_paths() {
    let registry = KnowledgeRegistry::start(&fixture_path(), &settings_without_php()).unwrap();
    let router = FileEventRouter::new(fixture_path(), registry.handles());

    assert_eq!(router.route(&fixture_path().join(".env")), vec!["configs", "env"]);
    assert_eq!(router.route(&fixture_path().join(".env.example")), vec!["env"]);
    assert_eq!(
        router.route(&fixture_path().join("routes/web.php")),
        vec!["routes"]
    );
    assert_eq!(
        router.route(&fixture_path().join("composer.json")),
        vec!["routes", "views", "translations", "middleware", "bindings"]
    );
    assert_eq!(
        router.route(&fixture_path().join("bootstrap/app.php")),
        vec!["middleware"]
    );
    assert_eq!(
        router.route(&fixture_path().join("lang/en/messages.php")),
        vec!["translations"]
    );
    assert!(router.route(&fixture_path().join("app/Http/Controllers/HomeController.php")).is_empty());

    registry.shutdown();
}

#[tokio::test]
async fn test_env_edit_is_picked_up_after_invalidation() {
    let dir = tempfile::tempdir().unwrap();
    copy_dir(&fixture_path(), dir.path());

    let settings = Settings {
        debounce_ms: 10,
        ..settings_without_php()
    };
    let registry = KnowledgeRegistry::start(dir.path(), &settings).unwrap();
    let before = registry.env.when_ready().await;
    assert!(!before.contains_key("APP_TIMEZONE"));

    let mut env = read_fixture(".env");
    env.push_str("APP_TIMEZONE=UTC\n");
    fs::write(dir.path().join(".env"), env).unwrap();

    let version = registry
        .env
        .invalidate(InvalidationReason::Manual)
        .settled()
        .await;
    assert!(version > before.version());

    let after = registry.env.current();
    assert_eq!(after["APP_TIMEZONE"].value, "UTC");
    // Readers holding the old snapshot keep a consistent view
    assert!(!before.contains_key("APP_TIMEZONE"));

    registry.shutdown();
}
