use crate::{Allocation, CacheResult, Deserializer, Serializer};

/// What the cache (and the builders feeding it) need from a resource whose
/// in-memory representation can be reclaimed and later rebuilt, without the
/// resource losing its identity.
///
/// The lifecycle: `serialize` once while the value is resident (storing its
/// byte layout and remembering the returned [`Allocation`]), then any number
/// of `evict` / `make_resident` round trips.
///
/// Methods take `&self`: cacheables are shared (`Arc`) between scene objects,
/// geometry groups and in-flight tasks, so residency lives behind interior
/// mutability. Identity-level state (bounds, primitive counts, the
/// allocation) must stay readable while evicted.
pub trait Cacheable {
    /// Heap footprint of the resident representation; zero while evicted.
    fn size_bytes(&self) -> u64;

    /// Write the value's byte layout into `out` and remember the locator.
    fn serialize(&self, out: &dyn Serializer) -> CacheResult<Allocation>;

    /// Drop the in-memory representation, keeping identity and locator.
    ///
    /// Borrowers that pinned the representation (see the shape contract) keep
    /// it alive; the value itself no longer owns it.
    fn evict(&self);

    /// Rebuild the in-memory representation from the serialized form.
    fn make_resident(&self, source: &dyn Deserializer) -> CacheResult<()>;
}
