use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;

use crate::stats::StatsCounters;
use crate::{CacheError, CacheResult, CacheStats, CacheVariant, CacheableId, VariantMember};

// ---

/// The simpler sibling of [`LruCache`](crate::LruCache): eviction is
/// first-in-first-out, regardless of use.
///
/// Worse hit rates than LRU under reuse-heavy workloads, but the history is
/// a lock-free queue instead of a linked list under a mutex, so hits never
/// take any global lock at all. Useful for streaming-shaped access patterns
/// (each value used for a burst, then not again for a long while) — and as a
/// baseline when judging whether the LRU bookkeeping pays for itself.
///
/// Shares the slot protocol with the LRU cache: per-slot load locks, a
/// double-checked upgrade, and publish-weak-last.
pub struct FifoCache<V: CacheVariant> {
    max_bytes: u64,
    current_bytes: AtomicU64,

    slots: Box<[FifoSlot<V>]>,
    factories: Box<[FifoFactory<V>]>,

    /// Insertion-ordered strong references; the eviction order.
    history: SegQueue<(CacheableId, V, u64)>,

    stats: StatsCounters,
}

struct FifoSlot<V: CacheVariant> {
    load_lock: Mutex<()>,
    value: parking_lot::RwLock<V::Weak>,
}

type FifoFactory<V> = Box<dyn Fn() -> Result<V, crate::BoxedError> + Send + Sync>;

/// Registration phase; mirrors [`CacheBuilder`](crate::CacheBuilder).
pub struct FifoCacheBuilder<V: CacheVariant> {
    max_bytes: u64,
    factories: Mutex<Vec<FifoFactory<V>>>,
}

impl<V: CacheVariant> FifoCacheBuilder<V> {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            factories: Mutex::new(Vec::new()),
        }
    }

    pub fn register<T>(
        &self,
        factory: impl Fn() -> Result<T, crate::BoxedError> + Send + Sync + 'static,
    ) -> CacheableId
    where
        V: VariantMember<T>,
    {
        let mut factories = self.factories.lock();
        let id = CacheableId(factories.len() as u32);
        factories.push(Box::new(move || {
            factory().map(|value| V::pack(Arc::new(value)))
        }));
        id
    }

    pub fn build(self) -> Arc<FifoCache<V>> {
        let factories: Box<[FifoFactory<V>]> = self.factories.into_inner().into();
        let slots = (0..factories.len())
            .map(|_| FifoSlot {
                load_lock: Mutex::new(()),
                value: parking_lot::RwLock::new(V::empty_weak()),
            })
            .collect();

        Arc::new(FifoCache {
            max_bytes: self.max_bytes,
            current_bytes: AtomicU64::new(0),
            slots,
            factories,
            history: SegQueue::new(),
            stats: StatsCounters::default(),
        })
    }
}

impl<V: CacheVariant> FifoCache<V> {
    pub fn get<T>(&self, id: CacheableId) -> CacheResult<Arc<T>>
    where
        V: VariantMember<T>,
    {
        let slot = self
            .slots
            .get(id.0 as usize)
            .ok_or(CacheError::NotRegistered(id))?;

        if let Some(variant) = V::upgrade(&slot.value.read()) {
            self.stats.num_hits.fetch_add(1, Ordering::Relaxed);
            return Self::unpack(id, variant);
        }

        let load_guard = slot.load_lock.lock();
        if let Some(variant) = V::upgrade(&slot.value.read()) {
            self.stats.num_hits.fetch_add(1, Ordering::Relaxed);
            return Self::unpack(id, variant);
        }

        self.stats.num_loads.fetch_add(1, Ordering::Relaxed);
        let variant = (self.factories[id.0 as usize])().map_err(|source| {
            self.stats.num_failed_loads.fetch_add(1, Ordering::Relaxed);
            CacheError::FactoryFailed { id, source }
        })?;

        let size_bytes = variant.size_bytes();
        self.history.push((id, variant.clone(), size_bytes));
        *slot.value.write() = variant.downgrade();
        drop(load_guard);

        let new_total = self.current_bytes.fetch_add(size_bytes, Ordering::AcqRel) + size_bytes;
        if new_total > self.max_bytes {
            self.evict((new_total - self.max_bytes).min(size_bytes));
        }

        Self::unpack(id, variant)
    }

    pub fn is_resident(&self, id: CacheableId) -> bool {
        self.slots
            .get(id.0 as usize)
            .is_some_and(|slot| V::upgrade(&slot.value.read()).is_some())
    }

    #[inline]
    pub fn current_bytes(&self) -> u64 {
        self.current_bytes.load(Ordering::Acquire)
    }

    #[inline]
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.current_bytes(), self.max_bytes)
    }

    /// Pop history entries, oldest first, until enough bytes are reclaimed.
    pub fn evict(&self, bytes_to_reclaim: u64) {
        if bytes_to_reclaim == 0 {
            return;
        }

        let mut reclaimed = 0_u64;
        let mut num_entries = 0_u64;
        while reclaimed < bytes_to_reclaim {
            let Some((_id, value, size_bytes)) = self.history.pop() else {
                break;
            };
            reclaimed += size_bytes;
            num_entries += 1;
            drop(value);
        }

        if reclaimed == 0 {
            pyr_log::warn_once!("fifo cache budget starved: nothing left to evict");
            return;
        }

        self.current_bytes.fetch_sub(reclaimed, Ordering::AcqRel);
        self.stats
            .num_evicted_entries
            .fetch_add(num_entries, Ordering::Relaxed);
    }

    pub fn evict_all(&self) {
        self.evict(u64::MAX);
    }

    fn unpack<T>(id: CacheableId, variant: V) -> CacheResult<Arc<T>>
    where
        V: VariantMember<T>,
    {
        let registered_as = variant.type_name();
        variant
            .unpack()
            .ok_or(CacheError::WrongType { id, registered_as })
    }
}
