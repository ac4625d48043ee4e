//! Laravel project discovery and server settings
//!
//! Settings arrive from the editor as JSON, either in `initializationOptions`
//! or via `workspace/didChangeConfiguration`, always nested under a
//! `laravel` key:
//!
//! ```json
//! { "laravel": { "phpCommand": "php8.3", "debounceMs": 300 } }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::cache::CacheOptions;

/// Find the Laravel project root by walking up from a file path
///
/// Looks for Laravel-specific markers:
/// - composer.json
/// - artisan file
/// - app/ and resources/ directories together
///
/// Returns None if no Laravel project root is found.
pub fn find_project_root(file_path: &Path) -> Option<PathBuf> {
    let mut current = file_path;

    if current.is_file() {
        current = current.parent()?;
    }

    loop {
        let has_composer = current.join("composer.json").exists();
        let has_artisan = current.join("artisan").exists();

        if has_composer && has_artisan {
            info!("Found Laravel project root at {:?} (composer.json + artisan)", current);
            return Some(current.to_path_buf());
        }

        if has_composer && current.join("app").is_dir() && current.join("resources").is_dir() {
            info!("Found Laravel project root at {:?} (composer.json + app + resources)", current);
            return Some(current.to_path_buf());
        }

        current = current.parent()?;
    }
}

const DEFAULT_PHP_COMMAND: &str = "php";
const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_LOADER_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_DIAGNOSTICS_DEBOUNCE_MS: u64 = 200;

/// The `laravel` settings object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// PHP binary used to boot the application for config, routes and
    /// translations
    pub php_command: String,
    /// Invalidation coalescing window per category
    pub debounce_ms: u64,
    /// Upper bound for a single loader run
    pub loader_timeout_ms: u64,
    /// Pause after the last keystroke before diagnostics are recomputed
    pub diagnostics_debounce_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            php_command: DEFAULT_PHP_COMMAND.to_string(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            loader_timeout_ms: DEFAULT_LOADER_TIMEOUT_MS,
            diagnostics_debounce_ms: DEFAULT_DIAGNOSTICS_DEBOUNCE_MS,
        }
    }
}

impl Settings {
    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            debounce: Duration::from_millis(self.debounce_ms),
            timeout: Duration::from_millis(self.loader_timeout_ms),
        }
    }

    pub fn diagnostics_debounce(&self) -> Duration {
        Duration::from_millis(self.diagnostics_debounce_ms)
    }
}

/// Wrapper for the full settings object sent by the editor
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LspSettings {
    #[serde(default)]
    pub laravel: Settings,
}

impl LspSettings {
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

// ============================================================================
// Tests
// ============================================================================
