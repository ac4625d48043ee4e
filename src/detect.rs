//! Detection engine
//!
//! Four query modes over one document, all driven by the same matcher:
//!
//! - [`detect_all`]: every match, against whatever the cache holds now
//!   (links, highlighting)
//! - [`detect_all_async`]: same, but waits for the first load so "not found"
//!   findings are never computed against the empty default (diagnostics)
//! - [`detect_at_position`]: the match under the cursor (hover, definition)
//! - [`detect_for_completion`]: tolerant of unfinished code (completion)
//!
//! A document that failed to parse has no calls, so every mode returns an
//! empty result for it.

use lsp_types::Position;

use crate::cache::KnowledgeCache;
use crate::completion::{completion_context, CompletionContext};
use crate::descriptor::ShapeDescriptor;
use crate::document::{range_contains, Document};
use crate::matcher::{match_calls, CallSiteMatch};
use crate::snapshot::Snapshot;

/// Run `callback` over every match against one snapshot. Matches for which
/// the callback returns `None` produce nothing.
pub fn detect_in<T, R, F>(
    doc: &Document,
    descriptors: &[ShapeDescriptor],
    snapshot: &Snapshot<T>,
    mut callback: F,
) -> Vec<R>
where
    F: FnMut(&CallSiteMatch<'_>, &Snapshot<T>) -> Option<R>,
{
    match_calls(doc.calls(), descriptors)
        .iter()
        .filter_map(|m| callback(m, snapshot))
        .collect()
}

pub fn detect_all<T, R, F>(
    doc: &Document,
    descriptors: &[ShapeDescriptor],
    cache: &KnowledgeCache<T>,
    callback: F,
) -> Vec<R>
where
    T: Send + Sync + 'static,
    F: FnMut(&CallSiteMatch<'_>, &Snapshot<T>) -> Option<R>,
{
    detect_in(doc, descriptors, &cache.current(), callback)
}

pub async fn detect_all_async<T, R, F>(
    doc: &Document,
    descriptors: &[ShapeDescriptor],
    cache: &KnowledgeCache<T>,
    callback: F,
) -> Vec<R>
where
    T: Send + Sync + 'static,
    F: FnMut(&CallSiteMatch<'_>, &Snapshot<T>) -> Option<R>,
{
    // Parse failures need no facts
    if doc.calls().is_empty() {
        return Vec::new();
    }
    let snapshot = cache.when_ready().await;
    detect_in(doc, descriptors, &snapshot, callback)
}

/// First match whose literal contains `position` and for which `callback`
/// returns a result.
pub fn detect_at_position<T, R, F>(
    doc: &Document,
    position: Position,
    descriptors: &[ShapeDescriptor],
    cache: &KnowledgeCache<T>,
    mut callback: F,
) -> Option<R>
where
    T: Send + Sync + 'static,
    F: FnMut(&CallSiteMatch<'_>, &Snapshot<T>) -> Option<R>,
{
    let snapshot = cache.current();
    match_calls(doc.calls(), descriptors)
        .iter()
        .filter(|m| range_contains(&m.range(), position))
        .find_map(|m| callback(m, &snapshot))
}

pub fn detect_for_completion(
    doc: &Document,
    position: Position,
    descriptors: &[ShapeDescriptor],
) -> Option<CompletionContext> {
    if doc.parse_error().is_some() {
        return None;
    }
    completion_context(doc, position, descriptors)
}
