//! The data plumbing underneath the pyrite task graph and resource cache.
//!
//! * [`DataStream`]: an unordered multi-producer queue with per-thread
//!   staging buffers, so that hot producers never contend on a shared lock.
//! * [`AtomicWeakRef`]: a weak reference supporting concurrent store and
//!   upgrade.
//! * [`LoaderPool`]: a small fixed pool of threads that runs resource-load
//!   closures, so that blocking I/O never parks a task-graph worker.

mod atomic_weak;
mod data_stream;
mod loader_pool;

pub use atomic_weak::AtomicWeakRef;
pub use data_stream::DataStream;
pub use loader_pool::LoaderPool;

use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_THREAD_SLOT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_SLOT: usize = NEXT_THREAD_SLOT.fetch_add(1, Ordering::Relaxed);
}

/// A small dense index identifying the calling thread.
///
/// Streams key their staging buffers off of this. Assigned on first use,
/// never reused; the process is expected to run a bounded set of threads
/// (task-graph workers, loader threads, the main thread).
pub fn thread_slot() -> usize {
    THREAD_SLOT.with(|slot| *slot)
}
