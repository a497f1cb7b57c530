mod common;

use std::sync::Arc;

use parking_lot::Mutex;

use pyr_cache::CacheableId;
use pyr_task_graph::{TaskGraph, TaskGraphConfig};

use common::{builder_with_budget, register_blob, Blob, FactoryCounters};

// ---

/// The async access path: hot ids are forwarded immediately, cold ids go
/// through the loader pool, and every request produces exactly one output.
#[test]
fn async_access_delivers_every_request() {
    pyr_log::setup_logging();

    const NUM_RESOURCES: usize = 8;
    const NUM_REQUESTS: usize = 200;

    let counters = FactoryCounters::default();
    let builder = builder_with_budget(u64::MAX);
    let ids: Vec<_> = (0..NUM_RESOURCES)
        .map(|i| register_blob(&builder, &counters, i as u8, 16))
        .collect();
    let cache = builder.build();

    let mut graph = TaskGraph::new();

    let delivered = Arc::new(Mutex::new(Vec::<(usize, Arc<Blob>)>::new()));
    let output = graph.add_task::<(usize, Arc<Blob>)>("output", {
        let delivered = delivered.clone();
        move |chunks, _ctx| {
            let mut delivered = delivered.lock();
            for chunk in chunks {
                delivered.extend(chunk);
            }
        }
    });

    let failed = graph.add_task::<(usize, CacheableId)>("failed", |chunks, _ctx| {
        let num: usize = chunks.iter().map(Vec::len).sum();
        assert_eq!(num, 0, "no load may fail in this test");
    });

    let access = cache.add_access_stages(&mut graph, "blobs", output, failed);

    // Warm one id up front so both the hot and cold paths are taken.
    let _warm = cache.get::<Blob>(ids[0]).unwrap();

    for request in 0..NUM_REQUESTS {
        access.enqueue_one((request, ids[request % NUM_RESOURCES]));
    }
    access.flush();
    graph.run(&TaskGraphConfig { num_workers: 4 });

    let delivered = delivered.lock();
    assert_eq!(delivered.len(), NUM_REQUESTS);

    let mut seen = vec![false; NUM_REQUESTS];
    for (request, value) in delivered.iter() {
        assert!(!seen[*request], "request {request} answered twice");
        seen[*request] = true;
        assert_eq!(value.bytes[0], (*request % NUM_RESOURCES) as u8);
    }

    // Every id was loaded at most once: concurrent cold requests for the
    // same id must pile onto one factory invocation.
    for id in &ids {
        assert_eq!(counters.invocations(*id), 1);
    }
}

/// A factory error on the async path lands on the failed-load stage; the
/// graph still quiesces.
#[test]
fn async_load_failure_routes_to_failed_stage() {
    pyr_log::setup_logging();

    let builder = builder_with_budget(u64::MAX);
    let bad_id = builder.register::<Blob>(|_cache| Err("no such chunk".into()));
    let cache = builder.build();

    let mut graph = TaskGraph::new();

    let output = graph.add_task::<(u32, Arc<Blob>)>("output", |chunks, _ctx| {
        let num: usize = chunks.iter().map(Vec::len).sum();
        assert_eq!(num, 0, "nothing can load successfully in this test");
    });

    let failures = Arc::new(Mutex::new(Vec::<(u32, CacheableId)>::new()));
    let failed = graph.add_task::<(u32, CacheableId)>("failed", {
        let failures = failures.clone();
        move |chunks, _ctx| {
            let mut failures = failures.lock();
            for chunk in chunks {
                failures.extend(chunk);
            }
        }
    });

    let access = cache.add_access_stages(&mut graph, "blobs", output, failed);

    access.enqueue([(1, bad_id), (2, bad_id)]);
    access.flush();
    graph.run(&TaskGraphConfig { num_workers: 2 });

    let failures = failures.lock();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|(_, id)| *id == bad_id));
}
