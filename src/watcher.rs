//! File-system invalidation
//!
//! [`FileEventRouter`] decides which categories a changed path concerns.
//! [`ProjectWatcher`] feeds it from a recursive `notify` watcher on the
//! project root. Coalescing is left to the caches' own debounce.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::CategoryHandle;
use crate::category::{is_composer_file, FileEventKind, InvalidationReason};

/// Directories that never hold project knowledge, or only churn
const IGNORED_DIRS: [&str; 4] = ["vendor", "node_modules", "storage", ".git"];

/// True for paths under an ignored directory. Composer's generated autoload
/// files inside `vendor/` are the exception.
pub fn is_ignored(relative: &Path) -> bool {
    let normalized = relative.to_string_lossy().replace('\\', "/");
    if is_composer_file(&normalized) {
        return false;
    }

    match relative.components().next() {
        Some(Component::Normal(first)) => IGNORED_DIRS.iter().any(|dir| first == *dir),
        _ => false,
    }
}

/// Maps file events to the categories they invalidate.
pub struct FileEventRouter {
    root: PathBuf,
    handles: Vec<Arc<dyn CategoryHandle>>,
}

impl FileEventRouter {
    pub fn new(root: impl Into<PathBuf>, handles: Vec<Arc<dyn CategoryHandle>>) -> Self {
        Self {
            root: root.into(),
            handles,
        }
    }

    /// Project-relative form of `path`, or `None` outside the project.
    pub fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        if path.is_absolute() {
            path.strip_prefix(&self.root).ok()
        } else {
            Some(path)
        }
    }

    /// Names of the categories a change to `path` concerns.
    pub fn route(&self, path: &Path) -> Vec<&'static str> {
        self.matching(path)
            .map(|handle| handle.category().name())
            .collect()
    }

    fn matching<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = &'a Arc<dyn CategoryHandle>> + 'a {
        let relative = self.relative(path).filter(|r| !is_ignored(r));
        self.handles
            .iter()
            .filter(move |handle| relative.is_some_and(|r| handle.category().is_affected_by(r)))
    }

    /// Invalidate every matching category. Returns how many were hit.
    pub fn dispatch(&self, kind: FileEventKind, path: &Path) -> usize {
        let mut hit = 0;
        for handle in self.matching(path) {
            debug!("{:?} {} -> {}", kind, path.display(), handle.category());
            // Fire and forget: the cache reports its own outcome
            let _pending = handle.invalidate(InvalidationReason::FileEvent {
                kind,
                path: path.to_path_buf(),
            });
            hit += 1;
        }
        hit
    }
}

fn event_kind(kind: &EventKind) -> Option<FileEventKind> {
    match kind {
        EventKind::Create(_) => Some(FileEventKind::Created),
        EventKind::Modify(_) => Some(FileEventKind::Modified),
        EventKind::Remove(_) => Some(FileEventKind::Deleted),
        _ => None,
    }
}

/// Recursive watcher on a project root. Dropping it stops watching.
pub struct ProjectWatcher {
    task: JoinHandle<()>,
}

impl ProjectWatcher {
    pub fn start(router: FileEventRouter) -> notify::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;
        watcher.watch(&router.root, RecursiveMode::Recursive)?;
        debug!("Watching {}", router.root.display());

        let task = tokio::spawn(async move {
            // The watcher lives exactly as long as this loop
            let _watcher: RecommendedWatcher = watcher;
            while let Some(res) = rx.recv().await {
                match res {
                    Ok(event) => {
                        let Some(kind) = event_kind(&event.kind) else {
                            continue;
                        };
                        for path in &event.paths {
                            router.dispatch(kind, path);
                        }
                    }
                    Err(e) => warn!("File watch error: {}", e),
                }
            }
        });

        Ok(Self { task })
    }
}

impl Drop for ProjectWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheOptions, KnowledgeCache};
    use crate::category::FactCategory;
    use crate::error::LoaderError;
    use crate::loader::loader_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_cache(category: FactCategory, calls: Arc<AtomicUsize>) -> Arc<dyn CategoryHandle> {
        Arc::new(KnowledgeCache::spawn(
            category,
            0usize,
            loader_fn(move || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, LoaderError>(n) }
            }),
            CacheOptions {
                debounce: Duration::from_millis(20),
                timeout: Duration::from_secs(5),
            },
        ))
    }

    fn router(configs: Arc<AtomicUsize>, routes: Arc<AtomicUsize>) -> FileEventRouter {
        let handles = vec![
            counting_cache(
                FactCategory::new("configs", &["config/**/*.php"]).unwrap().with_trigger(".env"),
                configs,
            ),
            counting_cache(
                FactCategory::new("routes", &["routes/**/*.php"]).unwrap().with_composer(),
                routes,
            ),
        ];
        FileEventRouter::new("/project", handles)
    }

    #[test]
    fn test_ignored_directories() {
        assert!(is_ignored(Path::new("vendor/laravel/framework/src/Foundation/Application.php")));
        assert!(is_ignored(Path::new("node_modules/vite/index.js")));
        assert!(is_ignored(Path::new("storage/framework/views/abc.php")));
        assert!(is_ignored(Path::new(".git/HEAD")));
        assert!(!is_ignored(Path::new("vendor/composer/autoload_classmap.php")));
        assert!(!is_ignored(Path::new("config/app.php")));
    }

    #[tokio::test]
    async fn test_route_by_pattern() {
        let router = router(Arc::default(), Arc::default());

        assert_eq!(router.route(Path::new("/project/config/app.php")), vec!["configs"]);
        assert_eq!(router.route(Path::new("/project/.env")), vec!["configs"]);
        assert_eq!(router.route(Path::new("/project/routes/web.php")), vec!["routes"]);
        assert_eq!(router.route(Path::new("/project/composer.lock")), vec!["routes"]);
        assert!(router.route(Path::new("/project/app/Models/User.php")).is_empty());
        assert!(router.route(Path::new("/elsewhere/config/app.php")).is_empty());
        assert!(router.route(Path::new("/project/vendor/pkg/config/app.php")).is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_invalidates_matching_cache() {
        let configs = Arc::new(AtomicUsize::new(0));
        let routes = Arc::new(AtomicUsize::new(0));
        let router = router(Arc::clone(&configs), Arc::clone(&routes));

        // Let the initial loads finish
        for handle in &router.handles {
            handle.changes().wait_for(|_| handle.is_ready()).await.unwrap();
        }

        let hit = router.dispatch(FileEventKind::Modified, Path::new("/project/config/app.php"));
        assert_eq!(hit, 1);

        let configs_handle = &router.handles[0];
        let mut changes = configs_handle.changes();
        changes.wait_for(|_| configs_handle.version() >= 2).await.unwrap();

        assert_eq!(configs.load(Ordering::SeqCst), 2);
        assert_eq!(routes.load(Ordering::SeqCst), 1);
    }
}
