use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use pyr_stream::LoaderPool;

use crate::recency::{EntryIndex, RecencyList};
use crate::stats::StatsCounters;
use crate::{CacheError, CacheResult, CacheStats, CacheVariant, CacheableId, VariantMember};

// ---

#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// The byte budget. May be transiently exceeded by at most one value's
    /// size per racing thread; every eviction pass restores it, unless
    /// everything left is pinned by in-flight tasks.
    pub max_bytes: u64,

    /// Threads backing the asynchronous load path.
    pub loader_thread_count: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 1024 * 1024 * 1024,
            loader_thread_count: 2,
        }
    }
}

// ---

/// A factory materializes one registered value.
///
/// It receives the cache so that composite resources (a sub-BVH) can pull
/// their parts (geometry groups) through the same budget.
pub(crate) type Factory<V> =
    Box<dyn Fn(&LruCache<V>) -> Result<V, crate::BoxedError> + Send + Sync>;

/// One registered id: a load lock and a weak, typed view of the value.
///
/// Slots never move once the cache is built; only the weak target (and the
/// corresponding recency entry, held elsewhere) come and go.
struct CacheSlot<V: CacheVariant> {
    /// Serializes cold loads so each id has at most one factory in flight.
    load_lock: Mutex<()>,

    /// The currently-materialized value, if any. Decays on its own once the
    /// recency list (and every borrower) has dropped the last strong ref.
    value: RwLock<V::Weak>,
}

/// Registration phase; see [`LruCache`].
///
/// All registration happens here, before the cache is built: no slot is ever
/// added once rendering has started, which is what lets `get` read the slot
/// table without taking any lock.
pub struct CacheBuilder<V: CacheVariant> {
    config: CacheConfig,
    factories: Mutex<Vec<Factory<V>>>,
    alloc_callback: Option<Box<dyn Fn(u64) + Send + Sync>>,
    evict_callback: Option<Box<dyn Fn(u64) + Send + Sync>>,
}

impl<V: CacheVariant> CacheBuilder<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            factories: Mutex::new(Vec::new()),
            alloc_callback: None,
            evict_callback: None,
        }
    }

    /// Called with the size of every fresh materialization; for external
    /// memory tracking.
    pub fn with_alloc_callback(mut self, callback: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.alloc_callback = Some(Box::new(callback));
        self
    }

    /// Called with the number of bytes reclaimed by every eviction pass.
    pub fn with_evict_callback(mut self, callback: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.evict_callback = Some(Box::new(callback));
        self
    }

    /// Register a factory for one resource of type `T`.
    ///
    /// Thread-safe (registration is serialized by a mutex), so build-phase
    /// loaders may register from worker threads — but no `get` may be issued
    /// against an id whose registration has not completed, which is trivially
    /// true here: `get` needs the built cache.
    pub fn register<T>(
        &self,
        factory: impl Fn(&LruCache<V>) -> Result<T, crate::BoxedError> + Send + Sync + 'static,
    ) -> CacheableId
    where
        V: VariantMember<T>,
    {
        let mut factories = self.factories.lock();
        let id = CacheableId(factories.len() as u32);
        factories.push(Box::new(move |cache: &LruCache<V>| {
            factory(cache).map(|value| V::pack(Arc::new(value)))
        }));
        id
    }

    /// Freeze registration and hand out the cache.
    pub fn build(self) -> Arc<LruCache<V>> {
        let factories: Box<[Factory<V>]> = self.factories.into_inner().into();
        let num_slots = factories.len();

        let slots = (0..num_slots)
            .map(|_| CacheSlot {
                load_lock: Mutex::new(()),
                value: RwLock::new(V::empty_weak()),
            })
            .collect();

        // Sized so the worst case (every registered resource in flight at
        // once) cannot block a submitter; see `LoaderPool`.
        let loader_pool = LoaderPool::new(
            self.config.loader_thread_count.max(1),
            num_slots.max(64),
        );

        pyr_log::debug!(
            "resource cache: {} resources registered, budget {}",
            pyr_format::format_usize(num_slots),
            pyr_format::format_bytes(self.config.max_bytes as _),
        );

        Arc::new(LruCache {
            max_bytes: self.config.max_bytes,
            current_bytes: AtomicU64::new(0),
            slots,
            factories,
            recency: Mutex::new(RecencyState {
                list: RecencyList::default(),
                entry_per_slot: vec![None; num_slots],
            }),
            loader_pool,
            stats: StatsCounters::default(),
            alloc_callback: self.alloc_callback,
            evict_callback: self.evict_callback,
        })
    }
}

// ---

struct RecencyState<V> {
    list: RecencyList<V>,

    /// Per-slot index of the live recency entry, if any. Lives under the same
    /// mutex as the list itself so the two can never disagree.
    entry_per_slot: Vec<Option<EntryIndex>>,
}

/// The LRU resource cache. See the crate docs for the big picture.
pub struct LruCache<V: CacheVariant> {
    max_bytes: u64,
    current_bytes: AtomicU64,

    slots: Box<[CacheSlot<V>]>,
    factories: Box<[Factory<V>]>,

    recency: Mutex<RecencyState<V>>,

    pub(crate) loader_pool: LoaderPool,
    pub(crate) stats: StatsCounters,

    alloc_callback: Option<Box<dyn Fn(u64) + Send + Sync>>,
    evict_callback: Option<Box<dyn Fn(u64) + Send + Sync>>,
}

impl<V: CacheVariant> LruCache<V> {
    /// Blocking access: returns a strong reference, materializing the value
    /// on this thread if it isn't resident.
    ///
    /// At most one load per id is ever in flight (per-slot load lock plus a
    /// post-lock re-check); concurrent callers of a cold id block until the
    /// winner has published, then share its value.
    pub fn get<T>(&self, id: CacheableId) -> CacheResult<Arc<T>>
    where
        V: VariantMember<T>,
    {
        let slot = self
            .slots
            .get(id.0 as usize)
            .ok_or(CacheError::NotRegistered(id))?;

        // Fast path: resident.
        if let Some(variant) = V::upgrade(&slot.value.read()) {
            self.stats.num_hits.fetch_add(1, Ordering::Relaxed);
            self.touch(id, &variant);
            return Self::unpack(id, variant);
        }

        let load_guard = slot.load_lock.lock();

        // Another thread may have loaded while we waited for the lock.
        if let Some(variant) = V::upgrade(&slot.value.read()) {
            self.stats.num_hits.fetch_add(1, Ordering::Relaxed);
            self.touch(id, &variant);
            return Self::unpack(id, variant);
        }

        // Cold: materialize on this thread.
        self.stats.num_loads.fetch_add(1, Ordering::Relaxed);
        let variant = (self.factories[id.0 as usize])(self).map_err(|source| {
            self.stats.num_failed_loads.fetch_add(1, Ordering::Relaxed);
            CacheError::FactoryFailed { id, source }
        })?;

        let size_bytes = variant.size_bytes();

        {
            let mut recency = self.recency.lock();
            let entry = recency.list.push_front(id, variant.clone(), size_bytes);
            recency.entry_per_slot[id.0 as usize] = Some(entry);
        }
        if let Some(callback) = &self.alloc_callback {
            callback(size_bytes);
        }

        // Publishing the weak reference is the last step: a failed load never
        // leaves partial state behind.
        *slot.value.write() = variant.downgrade();
        drop(load_guard);

        let new_total = self.current_bytes.fetch_add(size_bytes, Ordering::AcqRel) + size_bytes;
        if new_total > self.max_bytes {
            // If another thread drove us over the budget, it will also evict;
            // we only pay for our own contribution.
            let overshoot = (new_total - self.max_bytes).min(size_bytes);
            self.evict(overshoot);
        }

        Self::unpack(id, variant)
    }

    /// Non-blocking access: the value if it is resident (counts as a use),
    /// `None` if a load would be needed.
    pub fn try_get<T>(&self, id: CacheableId) -> CacheResult<Option<Arc<T>>>
    where
        V: VariantMember<T>,
    {
        let slot = self
            .slots
            .get(id.0 as usize)
            .ok_or(CacheError::NotRegistered(id))?;

        match V::upgrade(&slot.value.read()) {
            Some(variant) => {
                self.stats.num_hits.fetch_add(1, Ordering::Relaxed);
                self.touch(id, &variant);
                Self::unpack(id, variant).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Is the value currently materialized?
    pub fn is_resident(&self, id: CacheableId) -> bool {
        self.slots
            .get(id.0 as usize)
            .is_some_and(|slot| V::upgrade(&slot.value.read()).is_some())
    }

    pub fn num_registered(&self) -> usize {
        self.slots.len()
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

    /// Evict least-recently-used entries until at least `bytes_to_reclaim`
    /// bytes have been let go of, or nothing evictable remains.
    ///
    /// Values still held by an in-flight task stay alive until that task
    /// drops them; the cache merely stops accounting for them.
    pub fn evict(&self, bytes_to_reclaim: u64) {
        if bytes_to_reclaim == 0 {
            return;
        }

        let mut reclaimed = 0_u64;
        let mut num_entries = 0_u64;

        {
            let mut recency = self.recency.lock();
            while reclaimed < bytes_to_reclaim {
                let Some((id, value, size_bytes)) = recency.list.pop_tail() else {
                    break;
                };
                recency.entry_per_slot[id.0 as usize] = None;
                reclaimed += size_bytes;
                num_entries += 1;
                // The strong ref drops here; if it was the last one, the
                // value's bytes are freed.
                drop(value);
            }
        }

        if reclaimed == 0 {
            pyr_log::warn_once!(
                "cache budget starved: nothing evictable, everything resident is pinned"
            );
            return;
        }

        self.current_bytes.fetch_sub(reclaimed, Ordering::AcqRel);
        self.stats
            .num_evicted_entries
            .fetch_add(num_entries, Ordering::Relaxed);
        if let Some(callback) = &self.evict_callback {
            callback(reclaimed);
        }

        pyr_log::trace!(
            "evicted {} across {num_entries} entries",
            pyr_format::format_bytes(reclaimed as _),
        );
    }

    /// Drop every strong reference the cache owns. Pinned values survive
    /// with their borrowers (and their bytes are no longer accounted).
    pub fn evict_all(&self) {
        self.evict(u64::MAX);
    }

    // ---

    /// Mark `id` as most recently used.
    ///
    /// If the entry was evicted while the value stayed pinned elsewhere, the
    /// cache re-adopts it (and accounts for it again): it is demonstrably
    /// resident and in use.
    fn touch(&self, id: CacheableId, variant: &V) {
        let readopted_bytes = {
            let mut recency = self.recency.lock();
            if let Some(entry) = recency.entry_per_slot[id.0 as usize] {
                recency.list.move_to_front(entry);
                0
            } else {
                let size_bytes = variant.size_bytes();
                let entry = recency.list.push_front(id, variant.clone(), size_bytes);
                recency.entry_per_slot[id.0 as usize] = Some(entry);
                size_bytes
            }
        };

        if readopted_bytes > 0 {
            let new_total =
                self.current_bytes.fetch_add(readopted_bytes, Ordering::AcqRel) + readopted_bytes;
            if new_total > self.max_bytes {
                self.evict((new_total - self.max_bytes).min(readopted_bytes));
            }
        }
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

impl<V: CacheVariant> std::fmt::Debug for LruCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("num_registered", &self.num_registered())
            .field("stats", &self.stats())
            .finish()
    }
}
