//! Error types shared across the crate
//!
//! Loader failures are recoverable: a cache keeps serving its previous
//! snapshot. Parse failures never leave the detection engine.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single loader invocation.
///
/// `Clone` so one failed load can be reported to every `force_reload`
/// caller that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error("failed to start `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    #[error("loader process exited with {status}: {stderr}")]
    Process { status: String, stderr: String },

    #[error("loader produced no output between markers")]
    MissingOutput,

    #[error("failed to decode loader output: {0}")]
    Decode(String),

    #[error("I/O error while loading: {0}")]
    Io(String),

    #[error("loader timed out after {0:?}")]
    Timeout(Duration),

    #[error("loader task stopped before completing")]
    Stopped,
}

impl From<serde_json::Error> for LoaderError {
    fn from(e: serde_json::Error) -> Self {
        LoaderError::Decode(e.to_string())
    }
}

impl From<std::io::Error> for LoaderError {
    fn from(e: std::io::Error) -> Self {
        LoaderError::Io(e.to_string())
    }
}

/// A shape descriptor that can never match anything.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("descriptor has no method or function names")]
    NoNames,

    #[error("descriptor restricts receivers to an empty class set")]
    NoClasses,

    #[error("descriptor argument name is empty")]
    EmptyArgumentName,
}

/// The parser could not produce a tree for a document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("parser unavailable: {0}")]
    Unavailable(String),

    #[error("parser returned no tree")]
    NoTree,
}
