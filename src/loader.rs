//! Loaders produce the value a knowledge cache publishes
//!
//! The cache treats a loader as an opaque async function. Two concrete
//! flavours ship here: [`FnLoader`] for closures and [`PhpScriptLoader`],
//! which boots the target Laravel application in a `php` child process and
//! decodes the JSON the script prints.

use std::future::Future;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use serde::de::DeserializeOwned;
use tokio::process::Command;
use tracing::debug;

use crate::error::LoaderError;

pub type LoadFuture<T> = Pin<Box<dyn Future<Output = Result<T, LoaderError>> + Send + 'static>>;

pub trait Loader<T>: Send + Sync + 'static {
    fn load(&self) -> LoadFuture<T>;
}

// ============================================================================
// Closure loader
// ============================================================================

/// Wraps `Fn() -> impl Future<Output = Result<T, LoaderError>>`.
pub struct FnLoader<F>(pub F);

impl<T, F, Fut> Loader<T> for FnLoader<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, LoaderError>> + Send + 'static,
{
    fn load(&self) -> LoadFuture<T> {
        Box::pin((self.0)())
    }
}

pub fn loader_fn<T, F, Fut>(f: F) -> FnLoader<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, LoaderError>> + Send + 'static,
{
    FnLoader(f)
}

// ============================================================================
// PHP script loader
// ============================================================================

const OUTPUT_START: &str = "__LARAVEL_FACTS_START__";
const OUTPUT_END: &str = "__LARAVEL_FACTS_END__";

/// Boots the application the same way `artisan` does, then hands over to the
/// category script.
const BOOTSTRAP: &str = include_str!("../php/bootstrap.php");

/// Runs a PHP snippet against the project and decodes its JSON output.
pub struct PhpScriptLoader<T> {
    php: String,
    project_root: PathBuf,
    script: &'static str,
    _output: PhantomData<fn() -> T>,
}

impl<T> PhpScriptLoader<T> {
    pub fn new(php: impl Into<String>, project_root: PathBuf, script: &'static str) -> Self {
        Self {
            php: php.into(),
            project_root,
            script,
            _output: PhantomData,
        }
    }

    /// The code passed to `php -r`: bootstrap, start marker, category script,
    /// end marker. `-r` does not accept open tags, so they are stripped.
    pub fn program(&self) -> String {
        format!(
            "{}\necho '{}';\n{}\necho '{}';\n",
            strip_open_tag(BOOTSTRAP),
            OUTPUT_START,
            strip_open_tag(self.script),
            OUTPUT_END
        )
    }
}

impl<T> Loader<T> for PhpScriptLoader<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn load(&self) -> LoadFuture<T> {
        let php = self.php.clone();
        let root = self.project_root.clone();
        let program = self.program();

        Box::pin(async move {
            debug!("Running PHP loader in {:?}", root);

            // kill_on_drop: a timed-out load drops this future, which must not
            // leave a php process behind
            let output = Command::new(&php)
                .arg("-r")
                .arg(&program)
                .current_dir(&root)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| LoaderError::Spawn {
                    command: php.clone(),
                    reason: e.to_string(),
                })?;

            if !output.status.success() {
                return Err(LoaderError::Process {
                    status: output.status.to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }

            let stdout = String::from_utf8_lossy(&output.stdout);
            let json = extract_output(&stdout).ok_or(LoaderError::MissingOutput)?;
            Ok(serde_json::from_str(json)?)
        })
    }
}

/// Text between the start and end markers. Deprecation notices and other
/// noise printed while booting land outside them.
pub fn extract_output(stdout: &str) -> Option<&str> {
    let start = stdout.find(OUTPUT_START)? + OUTPUT_START.len();
    let end = stdout[start..].find(OUTPUT_END)? + start;
    Some(stdout[start..end].trim())
}

fn strip_open_tag(script: &str) -> &str {
    script.trim_start().trim_start_matches("<?php").trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_extract_output_ignores_noise() {
        let stdout = "PHP Deprecated: foo\n__LARAVEL_FACTS_START__{\"a\":1}__LARAVEL_FACTS_END__\n";
        assert_eq!(extract_output(stdout), Some("{\"a\":1}"));
    }

    #[test]
    fn test_extract_output_requires_both_markers() {
        assert_eq!(extract_output("__LARAVEL_FACTS_START__{}"), None);
        assert_eq!(extract_output("{}"), None);
    }

    #[test]
    fn test_program_strips_open_tags() {
        let loader: PhpScriptLoader<HashMap<String, String>> =
            PhpScriptLoader::new("php", PathBuf::from("/tmp"), "<?php\necho json_encode([]);\n");
        let program = loader.program();
        assert!(!program.contains("<?php"));
        assert!(program.contains("echo json_encode([]);"));
        assert!(program.find(OUTPUT_START) < program.find("json_encode"));
    }

    #[tokio::test]
    async fn test_fn_loader() {
        let loader = loader_fn(|| async { Ok::<_, LoaderError>(42) });
        assert_eq!(loader.load().await, Ok(42));
    }

    #[tokio::test]
    async fn test_missing_php_binary_is_spawn_error() {
        let loader: PhpScriptLoader<HashMap<String, String>> = PhpScriptLoader::new(
            "definitely-not-a-php-binary",
            std::env::temp_dir(),
            "echo json_encode([]);",
        );
        assert!(matches!(loader.load().await, Err(LoaderError::Spawn { .. })));
    }
}
