//! Immutable, versioned views of one fact category

use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

/// One published state of a category.
///
/// Snapshots are never mutated; a load publishes a new one. `version` only
/// grows on successful loads. `ready_since` is set once the first load has
/// settled, successfully or not, and carried forward from then on.
#[derive(Debug)]
pub struct Snapshot<T> {
    value: Arc<T>,
    version: u64,
    ready_since: Option<Instant>,
}

impl<T> Snapshot<T> {
    /// The not-yet-loaded snapshot holding the category default.
    pub fn unloaded(default: Arc<T>) -> Self {
        Self {
            value: default,
            version: 0,
            ready_since: None,
        }
    }

    pub fn new(value: Arc<T>, version: u64, ready_since: Option<Instant>) -> Self {
        Self {
            value,
            version,
            ready_since,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn shared_value(&self) -> Arc<T> {
        Arc::clone(&self.value)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// At least one load succeeded. A ready snapshot at version 0 is the
    /// default left in place by a failed first load.
    pub fn has_loaded(&self) -> bool {
        self.version > 0
    }

    pub fn is_ready(&self) -> bool {
        self.ready_since.is_some()
    }

    pub fn ready_since(&self) -> Option<Instant> {
        self.ready_since
    }

    /// Same value and version, marked ready. Used when the first load fails
    /// and the default has to become the settled state.
    pub(crate) fn settled(&self, at: Instant) -> Self {
        Self {
            value: Arc::clone(&self.value),
            version: self.version,
            ready_since: self.ready_since.or(Some(at)),
        }
    }
}

impl<T> Deref for Snapshot<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}
