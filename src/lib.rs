//! Laravel project knowledge for language tooling
//!
//! Two halves:
//!
//! - **Knowledge caches** ([`cache`]): one per fact category (config keys,
//!   env variables, named routes, views, translations, middleware,
//!   container bindings). Each keeps a versioned snapshot that readers get
//!   without waiting, reloads in the background when files change and
//!   never runs two loads at once.
//! - **Call-site detection** ([`matcher`], [`detect`]): finds the string
//!   literals in a PHP document that name one of those facts, using
//!   declarative shape descriptors instead of per-feature tree walks.
//!   Blade templates are read through their PHP projection ([`blade`]).
//!
//! [`features`] combines both into editor features; the `laravel-facts`
//! binary serves them over LSP.

// Core modules
pub mod blade;
pub mod cache;
pub mod category;
pub mod completion;
pub mod config;
pub mod descriptor;
pub mod detect;
pub mod document;
pub mod env_parser;
pub mod error;
pub mod loader;
pub mod matcher;
pub mod parser;
pub mod registry;
pub mod snapshot;
pub mod watcher;

// Editor features
pub mod features;

// Re-export commonly used types
pub use cache::{CacheOptions, CategoryHandle, KnowledgeCache, PendingReload};
pub use category::{FactCategory, FileEventKind, InvalidationReason};
pub use completion::{CompletionContext, CompletionSlot};
pub use config::{find_project_root, LspSettings, Settings};
pub use descriptor::{ArgumentSlot, ReceiverFilter, ShapeDescriptor};
pub use detect::{detect_all, detect_all_async, detect_at_position, detect_for_completion};
pub use document::{CallNode, CallTree, CallTreeParser, Document, Receiver};
pub use error::{DescriptorError, LoaderError, ParseError};
pub use loader::{loader_fn, FnLoader, Loader, PhpScriptLoader};
pub use matcher::{match_calls, CallSiteMatch};
pub use parser::{parser_for_path, BladeParser, PhpParser};
pub use registry::{force_reload_handles, KnowledgeRegistry};
pub use snapshot::Snapshot;
pub use watcher::{FileEventRouter, ProjectWatcher};
