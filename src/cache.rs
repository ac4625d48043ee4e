//! Knowledge cache: one per fact category
//!
//! # Actor pattern
//!
//! Each cache is a small actor. The [`KnowledgeCache`] handle is cheap to
//! clone and lives wherever features need it; the actor task owns the loader
//! and the load state machine and is the only writer of the published
//! snapshot:
//!
//! ```text
//!   Idle ──invalidate──▶ DebouncePending(deadline) ──deadline──▶ Loading
//!    ▲                          │ force_reload                     │ invalidate / force_reload
//!    │                          └────────────────────────▶ Loading ▼
//!    └──────── load settled ◀──────────────── LoadingWithPendingReload
//!                                  (settled: start the follow-up load at once)
//! ```
//!
//! Readers go through an `ArcSwap`, so `current()` never waits on the actor.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::category::{FactCategory, InvalidationReason};
use crate::error::LoaderError;
use crate::loader::Loader;
use crate::snapshot::Snapshot;

/// Default coalescing window for invalidation bursts
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Default upper bound for a single loader run
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    pub debounce: Duration,
    pub timeout: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }
}

// ============================================================================
// PART 1: Handle
// ============================================================================

enum Command {
    Invalidate {
        reason: InvalidationReason,
        reply: oneshot::Sender<u64>,
    },
    ForceReload {
        reply: oneshot::Sender<Result<u64, LoaderError>>,
    },
    Shutdown,
}

/// Handle to one category's cache.
pub struct KnowledgeCache<T> {
    category: Arc<FactCategory>,
    current: Arc<ArcSwap<Snapshot<T>>>,
    published: watch::Receiver<u64>,
    commands: mpsc::UnboundedSender<Command>,
}

impl<T> Clone for KnowledgeCache<T> {
    fn clone(&self) -> Self {
        Self {
            category: Arc::clone(&self.category),
            current: Arc::clone(&self.current),
            published: self.published.clone(),
            commands: self.commands.clone(),
        }
    }
}

impl<T> KnowledgeCache<T>
where
    T: Send + Sync + 'static,
{
    /// Spawn the actor on the current tokio runtime and start the first load.
    pub fn spawn<L>(category: FactCategory, default: T, loader: L, options: CacheOptions) -> Self
    where
        L: Loader<T>,
    {
        let category = Arc::new(category);
        let current = Arc::new(ArcSwap::from_pointee(Snapshot::unloaded(Arc::new(default))));
        let (published_tx, published_rx) = watch::channel(0);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let actor = CacheActor {
            category: Arc::clone(&category),
            loader: Arc::new(loader),
            options,
            current: Arc::clone(&current),
            published: published_tx,
            state: LoadState::Idle,
            reason: Some(InvalidationReason::Startup),
            running_waiters: Vec::new(),
            queued_waiters: Vec::new(),
            publications: 0,
        };
        tokio::spawn(actor.run(commands_rx));

        Self {
            category,
            current,
            published: published_rx,
            commands: commands_tx,
        }
    }

    pub fn category(&self) -> &FactCategory {
        &self.category
    }

    /// Latest published snapshot. Never waits, never fails.
    pub fn current(&self) -> Arc<Snapshot<T>> {
        self.current.load_full()
    }

    /// Wait until the first load has settled, then return the current
    /// snapshot.
    pub async fn when_ready(&self) -> Arc<Snapshot<T>> {
        let mut published = self.published.clone();
        let current = Arc::clone(&self.current);
        if published.wait_for(|_| current.load().is_ready()).await.is_err() {
            debug!("Cache '{}' stopped before becoming ready", self.category);
        }
        self.current()
    }

    /// Mark the category dirty. The returned handle may be dropped; awaiting
    /// it yields the version the resulting load settled on.
    pub fn invalidate(&self, reason: InvalidationReason) -> PendingReload {
        let (reply, rx) = oneshot::channel();
        let receiver = match self.commands.send(Command::Invalidate { reason, reply }) {
            Ok(()) => Some(rx),
            Err(_) => None,
        };
        PendingReload {
            receiver,
            current: self.version(),
        }
    }

    /// Reload without waiting for the debounce window. Loader failures are
    /// returned here instead of only being logged.
    pub async fn force_reload(&self) -> Result<Arc<Snapshot<T>>, LoaderError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::ForceReload { reply })
            .map_err(|_| LoaderError::Stopped)?;
        rx.await.map_err(|_| LoaderError::Stopped)??;
        Ok(self.current())
    }

    pub fn version(&self) -> u64 {
        self.current.load().version()
    }

    pub fn is_ready(&self) -> bool {
        self.current.load().is_ready()
    }

    /// Ticks every time a snapshot is published.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.published.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Completion of an invalidation.
#[derive(Debug)]
pub struct PendingReload {
    receiver: Option<oneshot::Receiver<u64>>,
    current: u64,
}

impl PendingReload {
    /// Version after the load that served this invalidation settled. Equal
    /// to the version before invalidation if that load failed.
    pub async fn settled(self) -> u64 {
        match self.receiver {
            Some(rx) => rx.await.unwrap_or(self.current),
            None => self.current,
        }
    }
}

// ============================================================================
// PART 2: Type-erased access
// ============================================================================

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What the watcher and refresh command need, whatever the item type.
pub trait CategoryHandle: Send + Sync {
    fn category(&self) -> &FactCategory;
    fn invalidate(&self, reason: InvalidationReason) -> PendingReload;
    fn force_reload(&self) -> BoxFuture<'_, Result<u64, LoaderError>>;
    fn version(&self) -> u64;
    fn is_ready(&self) -> bool;
    fn changes(&self) -> watch::Receiver<u64>;
    fn shutdown(&self);
}

impl<T> CategoryHandle for KnowledgeCache<T>
where
    T: Send + Sync + 'static,
{
    fn category(&self) -> &FactCategory {
        KnowledgeCache::category(self)
    }

    fn invalidate(&self, reason: InvalidationReason) -> PendingReload {
        KnowledgeCache::invalidate(self, reason)
    }

    fn force_reload(&self) -> BoxFuture<'_, Result<u64, LoaderError>> {
        Box::pin(async move {
            KnowledgeCache::force_reload(self)
                .await
                .map(|snapshot| snapshot.version())
        })
    }

    fn version(&self) -> u64 {
        KnowledgeCache::version(self)
    }

    fn is_ready(&self) -> bool {
        KnowledgeCache::is_ready(self)
    }

    fn changes(&self) -> watch::Receiver<u64> {
        KnowledgeCache::changes(self)
    }

    fn shutdown(&self) {
        KnowledgeCache::shutdown(self)
    }
}

// ============================================================================
// PART 3: Actor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    Idle,
    DebouncePending { deadline: Instant },
    Loading,
    LoadingWithPendingReload,
}

enum Waiter {
    Invalidate(oneshot::Sender<u64>),
    Force(oneshot::Sender<Result<u64, LoaderError>>),
}

type LoadOutcome<T> = (Result<T, LoaderError>, Duration);

struct CacheActor<T> {
    category: Arc<FactCategory>,
    loader: Arc<dyn Loader<T>>,
    options: CacheOptions,
    current: Arc<ArcSwap<Snapshot<T>>>,
    published: watch::Sender<u64>,
    state: LoadState,
    /// Why the next load runs; the first reason of a burst wins
    reason: Option<InvalidationReason>,
    /// Waiters served by the load that is running now
    running_waiters: Vec<Waiter>,
    /// Waiters served by the next load
    queued_waiters: Vec<Waiter>,
    publications: u64,
}

impl<T> CacheActor<T>
where
    T: Send + Sync + 'static,
{
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        // Unloaded -> Loading
        let mut in_flight = Some(self.start_load());

        loop {
            let deadline = match self.state {
                LoadState::DebouncePending { deadline } => Some(deadline),
                _ => None,
            };

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Invalidate { reason, reply }) => {
                        self.on_invalidate(reason, Waiter::Invalidate(reply));
                    }
                    Some(Command::ForceReload { reply }) => {
                        if self.on_force_reload(Waiter::Force(reply)) {
                            in_flight = Some(self.start_load());
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        if let Some(handle) = in_flight.take() {
                            handle.abort();
                        }
                        debug!("Cache '{}' shut down", self.category);
                        break;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    in_flight = Some(self.start_load());
                }
                outcome = join_load(&mut in_flight), if in_flight.is_some() => {
                    in_flight = self.on_load_settled(outcome);
                }
            }
        }
    }

    fn on_invalidate(&mut self, reason: InvalidationReason, waiter: Waiter) {
        debug!("Cache '{}' invalidated: {}", self.category, reason);
        self.reason.get_or_insert(reason);
        self.queued_waiters.push(waiter);

        self.state = match self.state {
            // The window is fixed from the first event so a steady stream of
            // saves cannot postpone the load forever
            LoadState::Idle => LoadState::DebouncePending {
                deadline: Instant::now() + self.options.debounce,
            },
            pending @ LoadState::DebouncePending { .. } => pending,
            LoadState::Loading | LoadState::LoadingWithPendingReload => {
                LoadState::LoadingWithPendingReload
            }
        };
    }

    /// Returns true when a load has to start right now.
    fn on_force_reload(&mut self, waiter: Waiter) -> bool {
        debug!("Cache '{}': forced reload", self.category);
        self.reason.get_or_insert(InvalidationReason::Manual);
        self.queued_waiters.push(waiter);

        match self.state {
            LoadState::Idle | LoadState::DebouncePending { .. } => true,
            LoadState::Loading | LoadState::LoadingWithPendingReload => {
                self.state = LoadState::LoadingWithPendingReload;
                false
            }
        }
    }

    fn start_load(&mut self) -> JoinHandle<LoadOutcome<T>> {
        self.state = LoadState::Loading;
        self.running_waiters = std::mem::take(&mut self.queued_waiters);
        let reason = self.reason.take().unwrap_or(InvalidationReason::Manual);
        debug!("Cache '{}' loading ({})", self.category, reason);

        let load = self.loader.load();
        let limit = self.options.timeout;
        tokio::spawn(async move {
            let started = Instant::now();
            let result = match timeout(limit, load).await {
                Ok(result) => result,
                Err(_) => Err(LoaderError::Timeout(limit)),
            };
            (result, started.elapsed())
        })
    }

    /// Publish the outcome, answer waiters and decide whether a follow-up
    /// load starts.
    fn on_load_settled(
        &mut self,
        (result, elapsed): LoadOutcome<T>,
    ) -> Option<JoinHandle<LoadOutcome<T>>> {
        let previous = self.current.load_full();
        let now = std::time::Instant::now();

        let outcome = match result {
            Ok(value) => {
                let version = previous.version() + 1;
                let ready_since = previous.ready_since().or(Some(now));
                self.publish(Snapshot::new(Arc::new(value), version, ready_since));
                info!(
                    "Cache '{}' loaded version {} in {:?}",
                    self.category, version, elapsed
                );
                Ok(version)
            }
            Err(e) => {
                warn!(
                    "Cache '{}' load failed after {:?}, keeping version {}: {}",
                    self.category,
                    elapsed,
                    previous.version(),
                    e
                );
                if !previous.is_ready() {
                    self.publish(previous.settled(now));
                }
                Err(e)
            }
        };

        let version = self.current.load().version();
        for waiter in self.running_waiters.drain(..) {
            match waiter {
                Waiter::Invalidate(reply) => {
                    let _ = reply.send(version);
                }
                Waiter::Force(reply) => {
                    let _ = reply.send(outcome.clone());
                }
            }
        }

        if self.state == LoadState::LoadingWithPendingReload {
            debug!("Cache '{}' dirty during load, reloading", self.category);
            Some(self.start_load())
        } else {
            self.state = LoadState::Idle;
            None
        }
    }

    fn publish(&mut self, snapshot: Snapshot<T>) {
        self.current.store(Arc::new(snapshot));
        self.publications += 1;
        self.published.send_replace(self.publications);
    }
}

async fn join_load<T>(slot: &mut Option<JoinHandle<LoadOutcome<T>>>) -> LoadOutcome<T> {
    match slot {
        Some(handle) => match handle.await {
            Ok(outcome) => outcome,
            Err(e) => (Err(LoaderError::Io(e.to_string())), Duration::ZERO),
        },
        None => std::future::pending().await,
    }
}

// ============================================================================
// PART 4: Tests
// ============================================================================
