use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated by every access.
#[derive(Default)]
pub(crate) struct StatsCounters {
    pub num_hits: AtomicU64,
    pub num_loads: AtomicU64,
    pub num_evicted_entries: AtomicU64,
    pub num_failed_loads: AtomicU64,
}

impl StatsCounters {
    pub fn snapshot(&self, current_bytes: u64, max_bytes: u64) -> CacheStats {
        CacheStats {
            current_bytes,
            max_bytes,
            num_hits: self.num_hits.load(Ordering::Relaxed),
            num_loads: self.num_loads.load(Ordering::Relaxed),
            num_evicted_entries: self.num_evicted_entries.load(Ordering::Relaxed),
            num_failed_loads: self.num_failed_loads.load(Ordering::Relaxed),
        }
    }
}

/// A snapshot of the cache's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub current_bytes: u64,
    pub max_bytes: u64,
    pub num_hits: u64,
    /// Factory invocations, i.e. cold accesses.
    pub num_loads: u64,
    pub num_evicted_entries: u64,
    pub num_failed_loads: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            current_bytes,
            max_bytes,
            num_hits,
            num_loads,
            num_evicted_entries,
            num_failed_loads,
        } = *self;
        write!(
            f,
            "{} / {} used, {} hits, {} loads ({} failed), {} evictions",
            pyr_format::format_bytes(current_bytes as _),
            pyr_format::format_bytes(max_bytes as _),
            pyr_format::format_usize(num_hits as _),
            pyr_format::format_usize(num_loads as _),
            num_failed_loads,
            pyr_format::format_usize(num_evicted_entries as _),
        )
    }
}
