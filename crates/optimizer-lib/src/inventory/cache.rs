use std::sync::{Arc, RwLock};

/// Holds the current value behind a reader-writer lock and swaps it whole.
///
/// Readers clone the `Arc` under the read lock and release it immediately,
/// so they never hold the lock while using the value and always see one
/// complete publication.
#[derive(Debug)]
pub struct SnapshotCache<T> {
    current: RwLock<Arc<T>>,
}

impl<T> SnapshotCache<T> {
    pub fn new(initial: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn read(&self) -> Arc<T> {
        // A poisoned lock still guards a complete Arc
        let guard = self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the current value, returning the previous one
    pub fn publish(&self, value: T) -> Arc<T> {
        let next = Arc::new(value);
        let mut guard = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *guard, next)
    }
}

impl<T: Default> Default for SnapshotCache<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
