use std::sync::Arc;

/// The closed set of value types a cache instance can hold.
///
/// Implemented by an enum with one `Arc<T>`-holding member per cacheable
/// type. The cache stores *weak* counterparts in its slots and strong
/// variants in its recency list; the member chosen at registration time is
/// the slot's type tag, so access never needs a dynamic cast.
pub trait CacheVariant: Clone + Send + Sync + 'static {
    /// The weak counterpart: same members over `Weak<T>`, plus an empty state.
    type Weak: Send + Sync;

    /// The weak state every slot starts out in; never upgrades.
    fn empty_weak() -> Self::Weak;

    fn downgrade(&self) -> Self::Weak;

    /// Returns a strong variant if the target is still alive.
    fn upgrade(weak: &Self::Weak) -> Option<Self>;

    /// Heap footprint of the held value; what the byte budget counts.
    fn size_bytes(&self) -> u64;

    /// Name of the held type, for log lines and error messages.
    fn type_name(&self) -> &'static str;
}

/// Typed entry points into a [`CacheVariant`]: pack a concrete value in,
/// unpack one back out.
pub trait VariantMember<T>: CacheVariant {
    fn pack(value: Arc<T>) -> Self;

    /// `None` if this variant currently holds a different member.
    fn unpack(self) -> Option<Arc<T>>;
}
