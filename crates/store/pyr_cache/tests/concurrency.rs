mod common;

use std::sync::Arc;

use common::{builder_with_budget, register_blob, Blob, FactoryCounters};

// ---

/// 16 threads hammer a cold id at once: the factory runs exactly once and
/// everybody shares the same value.
#[test]
fn concurrent_duplicate_get() {
    pyr_log::setup_logging();

    const NUM_THREADS: usize = 16;

    let counters = FactoryCounters::default();
    let builder = builder_with_budget(1024);
    let id = register_blob(&builder, &counters, 0x55, 64);
    let cache = builder.build();

    let barrier = Arc::new(std::sync::Barrier::new(NUM_THREADS));
    let values: Vec<Arc<Blob>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..NUM_THREADS)
            .map(|_| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                scope.spawn(move || {
                    barrier.wait();
                    cache.get::<Blob>(id).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(counters.invocations(id), 1, "one factory invocation, ever");
    for value in &values[1..] {
        assert!(Arc::ptr_eq(&values[0], value));
    }
}

/// The weak-upgrade race: an eviction storm cannot invalidate a strong
/// reference someone is holding, and the slot decays only once they let go.
#[test]
fn eviction_races_with_pinned_values() {
    pyr_log::setup_logging();

    let counters = FactoryCounters::default();
    let builder = builder_with_budget(64);
    let pinned_id = register_blob(&builder, &counters, 1, 64);
    let churn_id = register_blob(&builder, &counters, 2, 64);
    let cache = builder.build();

    let pinned = cache.get::<Blob>(pinned_id).unwrap();

    std::thread::scope(|scope| {
        let churner = {
            let cache = cache.clone();
            scope.spawn(move || {
                for _ in 0..1_000 {
                    let _ = cache.get::<Blob>(churn_id).unwrap();
                    cache.evict_all();
                }
            })
        };

        // Meanwhile our pin stays intact no matter what the churner does.
        for _ in 0..1_000 {
            assert!(pinned.bytes.iter().all(|&b| b == 1));
        }

        churner.join().unwrap();
    });

    drop(pinned);
    cache.evict_all();
    let reloads_before = counters.invocations(pinned_id);
    let _ = cache.get::<Blob>(pinned_id).unwrap();
    assert_eq!(
        counters.invocations(pinned_id),
        reloads_before + 1,
        "once the pin is gone and the cache evicted, the factory must run again"
    );
}

/// Budget invariant under concurrent churn: after the dust settles the cache
/// is back under its limit, and no access ever failed.
#[test]
fn budget_holds_under_concurrent_churn() {
    pyr_log::setup_logging();

    const NUM_THREADS: usize = 8;
    const NUM_RESOURCES: usize = 32;
    const VALUE_SIZE: usize = 100;

    let counters = FactoryCounters::default();
    let builder = builder_with_budget(4 * VALUE_SIZE as u64);
    let ids: Vec<_> = (0..NUM_RESOURCES)
        .map(|i| register_blob(&builder, &counters, i as u8, VALUE_SIZE))
        .collect();
    let cache = builder.build();

    std::thread::scope(|scope| {
        for thread_index in 0..NUM_THREADS {
            let cache = cache.clone();
            let ids = ids.clone();
            scope.spawn(move || {
                for round in 0..200 {
                    let id = ids[(thread_index * 7 + round * 13) % ids.len()];
                    let value = cache.get::<Blob>(id).unwrap();
                    assert_eq!(value.bytes.len(), VALUE_SIZE);
                }
            });
        }
    });

    // No thread is holding anything anymore; one eviction pass must be able
    // to restore the budget.
    cache.evict(cache.current_bytes().saturating_sub(cache.max_bytes()));
    assert!(cache.current_bytes() <= cache.max_bytes());
}
