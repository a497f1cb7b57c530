//! The pyrite resource cache: a typed-variant LRU over opaque ids, backed by
//! a pluggable serializer.
//!
//! The cache is what makes out-of-core rendering possible: geometry groups
//! and their sub-BVHs are registered up front as *factories*, and only
//! materialized (and re-materialized) on access, within a byte budget.
//!
//! Two access paths:
//! * [`LruCache::get`] blocks the calling thread until the value is resident.
//!   Cheap when the value is hot; on a cold hit the calling (worker) thread
//!   pays for the load while the rest of the task graph keeps running.
//! * [`LruCache::add_access_stages`] builds the asynchronous path: a pair of
//!   task-graph stages that forward hot values immediately and push cold ones
//!   through the loader pool without ever blocking a worker.
//!
//! Values are shared (`Arc`); eviction only drops the cache's own strong
//! reference. Anything still in use by an in-flight task stays alive until
//! that task drops it — the cache simply stops accounting for it.

mod cache;
mod cacheable;
mod error;
mod fifo;
mod flow;
mod recency;
mod serializer;
mod stats;
mod variant;

pub use cache::{CacheBuilder, CacheConfig, LruCache};
pub use fifo::{FifoCache, FifoCacheBuilder};
pub use cacheable::Cacheable;
pub use error::{BoxedError, CacheError, CacheResult};
pub use serializer::{Allocation, Arena, ArenaSlice, Deserializer, MemorySerializer, Serializer};
pub use stats::CacheStats;
pub use variant::{CacheVariant, VariantMember};

// ---

/// Identifies one registered cacheable resource.
///
/// Dense: assigned in registration order, starting at zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheableId(pub u32);

impl nohash_hasher::IsEnabled for CacheableId {}

impl std::fmt::Display for CacheableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
