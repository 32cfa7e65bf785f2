//! Versioned immutable snapshot for hot-reloaded state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// An `Arc<T>` that can be swapped wholesale while readers hold older copies.
///
/// `version` starts at 1 and increases by one on every swap.
#[derive(Debug)]
pub struct Snapshot<T> {
    current: RwLock<Arc<T>>,
    version: AtomicU64,
}

impl<T> Snapshot<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
            version: AtomicU64::new(1),
        }
    }

    /// Current value. Cheap: clones an `Arc`.
    pub fn load(&self) -> Arc<T> {
        // A panic while holding the lock cannot leave a half-swapped Arc.
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the value and bump the version. Returns the new version.
    pub fn store(&self, value: T) -> u64 {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(value);
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}
