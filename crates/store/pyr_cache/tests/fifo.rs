mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pyr_cache::{BoxedError, FifoCache, FifoCacheBuilder};

use common::{Blob, TestResource};

// ---

fn register_blob(
    builder: &FifoCacheBuilder<TestResource>,
    byte: u8,
    len: usize,
) -> (pyr_cache::CacheableId, Arc<AtomicUsize>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let id = builder.register::<Blob>({
        let counter = counter.clone();
        move || -> Result<Blob, BoxedError> {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(Blob::filled(byte, len))
        }
    });
    (id, counter)
}

/// FIFO evicts in insertion order, use notwithstanding — the defining
/// difference from the LRU cache.
#[test]
fn eviction_ignores_recency_of_use() {
    pyr_log::setup_logging();

    let builder = FifoCacheBuilder::new(8);
    let (a, _counter_a) = register_blob(&builder, b'a', 4);
    let (b, _counter_b) = register_blob(&builder, b'b', 4);
    let (c, _counter_c) = register_blob(&builder, b'c', 4);
    let cache = builder.build();

    cache.get::<Blob>(a).unwrap();
    cache.get::<Blob>(b).unwrap();

    // Touch A again; under LRU this would protect it. Not here.
    cache.get::<Blob>(a).unwrap();

    cache.get::<Blob>(c).unwrap(); // overflows the budget

    assert!(!cache.is_resident(a), "A entered first, A leaves first");
    assert!(cache.is_resident(b));
    assert!(cache.is_resident(c));
    assert!(cache.current_bytes() <= cache.max_bytes());
}

/// Hits are lock-free and never grow the history.
#[test]
fn repeated_hits_do_not_inflate_accounting() {
    pyr_log::setup_logging();

    let builder = FifoCacheBuilder::new(1024);
    let (id, counter) = register_blob(&builder, 1, 16);
    let cache = builder.build();

    for _ in 0..100 {
        let value = cache.get::<Blob>(id).unwrap();
        assert_eq!(value.bytes.len(), 16);
    }

    assert_eq!(counter.load(Ordering::Relaxed), 1);
    assert_eq!(cache.current_bytes(), 16);
    assert_eq!(cache.stats().num_hits, 99);
}

/// The slot protocol (load lock + double check) is shared with the LRU side.
#[test]
fn concurrent_cold_gets_share_one_load() {
    pyr_log::setup_logging();

    const NUM_THREADS: usize = 8;

    let builder = FifoCacheBuilder::new(1024);
    let (id, counter) = register_blob(&builder, 2, 32);
    let cache = builder.build();

    let barrier = Arc::new(std::sync::Barrier::new(NUM_THREADS));
    std::thread::scope(|scope| {
        for _ in 0..NUM_THREADS {
            let cache = cache.clone();
            let barrier = barrier.clone();
            scope.spawn(move || {
                barrier.wait();
                cache.get::<Blob>(id).unwrap();
            });
        }
    });

    assert_eq!(counter.load(Ordering::Relaxed), 1);
}

/// `evict_all` drops everything; the next get reloads.
#[test]
fn evict_all_resets() {
    pyr_log::setup_logging();

    let builder = FifoCacheBuilder::new(1024);
    let (id, counter) = register_blob(&builder, 3, 8);
    let cache: Arc<FifoCache<TestResource>> = builder.build();

    cache.get::<Blob>(id).unwrap();
    cache.evict_all();

    assert_eq!(cache.current_bytes(), 0);
    assert!(!cache.is_resident(id));

    cache.get::<Blob>(id).unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 2);
}
