use std::sync::{Arc, Weak};

use parking_lot::RwLock;

/// A weak reference to a value, supporting concurrent store and upgrade.
///
/// Both operations are linearizable: an `upgrade` racing a `store` returns
/// either the old or the new target, never a torn state. Used wherever a
/// component wants to observe a cache-owned value without keeping it alive
/// (e.g. a batching point watching its resident sub-BVH).
pub struct AtomicWeakRef<T> {
    ptr: RwLock<Weak<T>>,
}

impl<T> Default for AtomicWeakRef<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AtomicWeakRef<T> {
    /// An empty reference; `upgrade` returns `None` until the first `store`.
    pub fn new() -> Self {
        Self {
            ptr: RwLock::new(Weak::new()),
        }
    }

    /// Atomically replace the target.
    pub fn store(&self, strong: &Arc<T>) {
        *self.ptr.write() = Arc::downgrade(strong);
    }

    /// Reset to the empty state.
    pub fn clear(&self) {
        *self.ptr.write() = Weak::new();
    }

    /// Returns a strong reference if the target is still alive.
    pub fn upgrade(&self) -> Option<Arc<T>> {
        self.ptr.read().upgrade()
    }
}

// ---

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_follows_liveness() {
        let weak = AtomicWeakRef::<u32>::new();
        assert!(weak.upgrade().is_none());

        let strong = Arc::new(42);
        weak.store(&strong);
        assert_eq!(weak.upgrade().as_deref(), Some(&42));

        drop(strong);
        assert!(weak.upgrade().is_none(), "target died, upgrade must fail");
    }

    #[test]
    fn store_replaces_target() {
        let first = Arc::new(1);
        let second = Arc::new(2);

        let weak = AtomicWeakRef::new();
        weak.store(&first);
        weak.store(&second);
        drop(first);

        assert_eq!(weak.upgrade().as_deref(), Some(&2));
    }

    #[test]
    fn concurrent_store_and_upgrade() {
        let weak = Arc::new(AtomicWeakRef::<usize>::new());
        let strongs: Vec<_> = (0..64).map(Arc::new).collect();

        let writer = {
            let weak = weak.clone();
            let strongs = strongs.clone();
            std::thread::spawn(move || {
                for strong in &strongs {
                    weak.store(strong);
                }
            })
        };

        // Any successful upgrade must observe one of the published values.
        for _ in 0..10_000 {
            if let Some(value) = weak.upgrade() {
                assert!(*value < 64);
            }
        }

        writer.join().unwrap();
    }
}
