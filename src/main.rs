use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tower_lsp::jsonrpc;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer, LspService, Server};
use tracing::{debug, info, warn};

use laravel_facts::config::{find_project_root, LspSettings, Settings};
use laravel_facts::features::{DocumentFeature, FactLink};
use laravel_facts::{
    force_reload_handles, parser_for_path, CategoryHandle, Document, FileEventRouter,
    KnowledgeRegistry, ProjectWatcher,
};

/// Command that force-reloads every category
const REFRESH_COMMAND: &str = "laravel.refresh";

// ============================================================================
// PART 1: Server state
// ============================================================================

/// Everything that exists once a Laravel project root is known
struct Project {
    root: PathBuf,
    registry: KnowledgeRegistry,
    features: Vec<Arc<dyn DocumentFeature>>,
    _watcher: Option<ProjectWatcher>,
    /// Re-publishes diagnostics whenever a category version advances
    listener: JoinHandle<()>,
}

impl Drop for Project {
    fn drop(&mut self) {
        self.listener.abort();
        self.registry.shutdown();
    }
}

#[derive(Clone)]
struct LaravelFactsServer {
    /// LSP client for sending messages to the editor
    client: Client,
    /// Open documents with their parse and version
    documents: Arc<RwLock<HashMap<Url, (Arc<Document>, i32)>>>,
    /// Root reported by the editor, before any project is started
    root_path: Arc<RwLock<Option<PathBuf>>>,
    settings: Arc<RwLock<Settings>>,
    project: Arc<RwLock<Option<Project>>>,
    /// Pending debounced diagnostic tasks (uri -> task handle)
    pending_diagnostics: Arc<RwLock<HashMap<Url, JoinHandle<()>>>>,
}

impl LaravelFactsServer {
    fn new(client: Client) -> Self {
        Self {
            client,
            documents: Arc::new(RwLock::new(HashMap::new())),
            root_path: Arc::new(RwLock::new(None)),
            settings: Arc::new(RwLock::new(Settings::default())),
            project: Arc::new(RwLock::new(None)),
            pending_diagnostics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Apply new settings. Cache options are fixed per registry, so a change
    /// to them restarts the project.
    async fn update_settings(&self, settings: Settings) {
        let previous = std::mem::replace(&mut *self.settings.write().await, settings.clone());
        if previous == settings {
            return;
        }
        info!("Settings updated: {:?}", settings);

        let caches_changed = previous.php_command != settings.php_command
            || previous.cache_options() != settings.cache_options();
        if !caches_changed {
            return;
        }

        let root = self.project.read().await.as_ref().map(|p| p.root.clone());
        if let Some(root) = root {
            info!("Restarting knowledge caches with new settings");
            self.start_project(&root).await;
        }
    }

    async fn start_project(&self, root: &Path) {
        let settings = self.settings.read().await.clone();

        let registry = match KnowledgeRegistry::start(root, &settings) {
            Ok(registry) => registry,
            Err(e) => {
                warn!("Could not start knowledge caches: {:#}", e);
                return;
            }
        };
        let features = match registry.features() {
            Ok(features) => features,
            Err(e) => {
                warn!("Could not build features: {:#}", e);
                return;
            }
        };

        let watcher = match ProjectWatcher::start(FileEventRouter::new(root, registry.handles())) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("File watching disabled: {}", e);
                None
            }
        };
        let listener = self.spawn_version_listener(registry.handles());

        // Replacing drops the previous project, which stops its caches
        *self.project.write().await = Some(Project {
            root: root.to_path_buf(),
            registry,
            features,
            _watcher: watcher,
            listener,
        });
        info!("Laravel project ready at {:?}", root);
    }

    /// Start a project for the file's Laravel root if none is running yet
    async fn try_discover_from_file(&self, file_path: &Path) {
        if self.project.read().await.is_some() {
            return;
        }
        if let Some(root) = find_project_root(file_path) {
            *self.root_path.write().await = Some(root.clone());
            self.start_project(&root).await;
        }
    }

    fn spawn_version_listener(&self, handles: Vec<Arc<dyn CategoryHandle>>) -> JoinHandle<()> {
        let server = self.clone();
        tokio::spawn(async move {
            let (tx, mut rx) = mpsc::unbounded_channel();
            for handle in handles {
                let tx = tx.clone();
                let mut changes = handle.changes();
                tokio::spawn(async move {
                    // Ends when the cache actor stops
                    while changes.changed().await.is_ok() {
                        if tx.send(handle.category().name()).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            while let Some(category) = rx.recv().await {
                debug!("Category '{}' published, revalidating open documents", category);
                server.revalidate_open_documents().await;
            }
        })
    }

    async fn features(&self) -> Vec<Arc<dyn DocumentFeature>> {
        self.project
            .read()
            .await
            .as_ref()
            .map(|p| p.features.clone())
            .unwrap_or_default()
    }

    async fn document(&self, uri: &Url) -> Option<Arc<Document>> {
        self.documents.read().await.get(uri).map(|(doc, _)| Arc::clone(doc))
    }

    // ========================================================================
    // PART 2: Diagnostics
    // ========================================================================

    /// Cancel any pending run for the file and schedule a new one after the
    /// debounce delay
    async fn schedule_debounced_diagnostics(&self, uri: &Url) {
        let delay = self.settings.read().await.diagnostics_debounce();

        if let Some(handle) = self.pending_diagnostics.write().await.remove(uri) {
            handle.abort();
        }

        let uri_for_spawn = uri.clone();
        let server = self.clone();
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            server.validate_and_publish_diagnostics(&uri_for_spawn).await;
        });

        self.pending_diagnostics.write().await.insert(uri.clone(), handle);
    }

    async fn revalidate_open_documents(&self) {
        let uris: Vec<Url> = self.documents.read().await.keys().cloned().collect();
        for uri in uris {
            self.schedule_debounced_diagnostics(&uri).await;
        }
    }

    /// Compute diagnostics from every feature and publish them, unless the
    /// document changed in the meantime
    async fn validate_and_publish_diagnostics(&self, uri: &Url) {
        let Some((doc, version)) = self.documents.read().await.get(uri).cloned() else {
            return;
        };

        let mut diagnostics = Vec::new();
        for feature in self.features().await {
            diagnostics.extend(feature.diagnostics(&doc).await);
        }

        let current = self.documents.read().await.get(uri).map(|(_, v)| *v);
        if current != Some(version) {
            debug!("Skipping stale diagnostics for {}", uri);
            return;
        }

        debug!("Publishing {} diagnostics for {}", diagnostics.len(), uri);
        self.client
            .publish_diagnostics(uri.clone(), diagnostics, Some(version))
            .await;
    }

    async fn update_document(&self, uri: Url, text: String, version: i32) {
        let Some(parser) = parser_for_path(uri.path()) else {
            return;
        };
        let doc = Arc::new(Document::parse(text, parser));
        self.documents.write().await.insert(uri.clone(), (doc, version));
        self.schedule_debounced_diagnostics(&uri).await;
    }
}

fn target_uri(link: &FactLink) -> Option<Url> {
    Url::from_file_path(&link.path).ok()
}

fn line_range(line: u32) -> Range {
    Range::new(Position::new(line, 0), Position::new(line, 0))
}

// ============================================================================
// PART 3: LanguageServer implementation
// ============================================================================

#[tower_lsp::async_trait]
impl LanguageServer for LaravelFactsServer {
    async fn initialize(&self, params: InitializeParams) -> jsonrpc::Result<InitializeResult> {
        info!("Laravel facts: INITIALIZE");

        if let Some(init_options) = params.initialization_options {
            match LspSettings::from_value(init_options) {
                Ok(settings) => {
                    info!("Initial settings: {:?}", settings.laravel);
                    *self.settings.write().await = settings.laravel;
                }
                Err(e) => debug!("Could not parse initialization_options: {}", e),
            }
        }

        if let Some(path) = params.root_uri.and_then(|uri| uri.to_file_path().ok()) {
            info!("Root path set to {:?}", path);
            *self.root_path.write().await = Some(path);
        }

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(TextDocumentSyncKind::FULL)),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                definition_provider: Some(OneOf::Left(true)),
                document_link_provider: Some(DocumentLinkOptions {
                    resolve_provider: Some(false),
                    work_done_progress_options: Default::default(),
                }),
                completion_provider: Some(CompletionOptions {
                    trigger_characters: Some(vec!["'".to_string(), "\"".to_string()]),
                    ..Default::default()
                }),
                execute_command_provider: Some(ExecuteCommandOptions {
                    commands: vec![REFRESH_COMMAND.to_string()],
                    ..Default::default()
                }),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        let Some(root) = self.root_path.read().await.clone() else {
            info!("No root path set, waiting for a file to discover the project");
            return;
        };

        match find_project_root(&root) {
            Some(project_root) => self.start_project(&project_root).await,
            None => info!("{:?} is not a Laravel project, waiting for a file", root),
        }
    }

    async fn shutdown(&self) -> jsonrpc::Result<()> {
        info!("Laravel facts: shutting down");

        for (_, handle) in self.pending_diagnostics.write().await.drain() {
            handle.abort();
        }
        self.documents.write().await.clear();
        self.project.write().await.take();

        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        debug!("did_open: {}", uri);

        if let Ok(file_path) = uri.to_file_path() {
            self.try_discover_from_file(&file_path).await;
        }
        self.update_document(uri, params.text_document.text, params.text_document.version)
            .await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;

        // Full sync: the last change carries the whole text
        if let Some(change) = params.content_changes.into_iter().last() {
            self.update_document(uri, change.text, version).await;
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.documents.write().await.remove(&uri);
        if let Some(handle) = self.pending_diagnostics.write().await.remove(&uri) {
            handle.abort();
        }
        self.client.publish_diagnostics(uri, Vec::new(), None).await;
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        match LspSettings::from_value(params.settings) {
            Ok(settings) => self.update_settings(settings.laravel).await,
            Err(e) => warn!("Ignoring invalid settings: {}", e),
        }
    }

    async fn hover(&self, params: HoverParams) -> jsonrpc::Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(doc) = self.document(&uri).await else {
            return Ok(None);
        };

        for feature in self.features().await {
            if let Some((range, text)) = feature.hover_at(&doc, position) {
                return Ok(Some(Hover {
                    contents: HoverContents::Markup(MarkupContent {
                        kind: MarkupKind::Markdown,
                        value: text,
                    }),
                    range: Some(range),
                }));
            }
        }
        Ok(None)
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> jsonrpc::Result<Option<GotoDefinitionResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(doc) = self.document(&uri).await else {
            return Ok(None);
        };

        for feature in self.features().await {
            let Some(link) = feature.link_at(&doc, position) else {
                continue;
            };
            let Some(target) = target_uri(&link) else {
                continue;
            };
            return Ok(Some(GotoDefinitionResponse::Link(vec![LocationLink {
                origin_selection_range: Some(link.origin),
                target_uri: target,
                target_range: line_range(link.line),
                target_selection_range: line_range(link.line),
            }])));
        }
        Ok(None)
    }

    async fn document_link(&self, params: DocumentLinkParams) -> jsonrpc::Result<Option<Vec<DocumentLink>>> {
        let Some(doc) = self.document(&params.text_document.uri).await else {
            return Ok(None);
        };

        let mut links = Vec::new();
        for feature in self.features().await {
            for link in feature.links(&doc) {
                let Some(mut target) = target_uri(&link) else {
                    continue;
                };
                target.set_fragment(Some(&format!("L{}", link.line + 1)));
                links.push(DocumentLink {
                    range: link.origin,
                    target: Some(target),
                    tooltip: Some(format!("{}:{}", link.path.display(), link.line + 1)),
                    data: None,
                });
            }
        }
        Ok(Some(links))
    }

    async fn completion(&self, params: CompletionParams) -> jsonrpc::Result<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let Some(doc) = self.document(&uri).await else {
            return Ok(None);
        };

        for feature in self.features().await {
            if let Some(items) = feature.completions(&doc, position) {
                return Ok(Some(CompletionResponse::Array(items)));
            }
        }
        Ok(None)
    }

    async fn execute_command(&self, params: ExecuteCommandParams) -> jsonrpc::Result<Option<serde_json::Value>> {
        if params.command != REFRESH_COMMAND {
            return Err(jsonrpc::Error::invalid_params(format!(
                "unknown command: {}",
                params.command
            )));
        }

        // Loads can take seconds; the project lock is released before waiting
        let handles = {
            let project = self.project.read().await;
            match project.as_ref() {
                Some(project) => project.registry.handles(),
                None => {
                    self.client
                        .show_message(MessageType::WARNING, "No Laravel project detected")
                        .await;
                    return Ok(None);
                }
            }
        };
        let outcomes = force_reload_handles(handles).await;

        let failures: Vec<String> = outcomes
            .iter()
            .filter_map(|(name, outcome)| outcome.as_ref().err().map(|e| format!("{}: {}", name, e)))
            .collect();

        if failures.is_empty() {
            self.client
                .show_message(MessageType::INFO, "Laravel project knowledge refreshed")
                .await;
        } else {
            self.client
                .show_message(
                    MessageType::WARNING,
                    format!("Laravel refresh failed for {}", failures.join("; ")),
                )
                .await;
        }

        let versions: serde_json::Map<String, serde_json::Value> = outcomes
            .into_iter()
            .filter_map(|(name, outcome)| outcome.ok().map(|v| (name.to_string(), v.into())))
            .collect();
        Ok(Some(serde_json::Value::Object(versions)))
    }
}

// ============================================================================
// PART 4: Entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the LSP protocol.
    // RUST_LOG overrides the default `info` level.
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("========================================");
    info!("Laravel facts language server starting");
    info!("========================================");

    let (service, socket) = LspService::new(LaravelFactsServer::new);

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    Server::new(stdin, stdout, socket).serve(service).await;

    info!("Laravel facts language server stopped");
    Ok(())
}
