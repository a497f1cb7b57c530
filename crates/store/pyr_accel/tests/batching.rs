use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use glam::{UVec3, Vec3};
use parking_lot::Mutex;

use pyr_accel::{AccelBuilder, AccelConfig, BatchingAccel, RenderCacheBuilder};
use pyr_cache::{
    Allocation, ArenaSlice, CacheConfig, CacheResult, Deserializer, MemorySerializer, Serializer,
};
use pyr_scene::{Material, Ray, RayHit, Scene, SceneBuilder, TriangleShape};
use pyr_task_graph::{TaskGraph, TaskGraphConfig};

// ---

/// A wall perpendicular to +x at `x`, plus a mirrored far-side sliver so the
/// shape's bounds stretch across the origin.
fn wall_shape(x: f32) -> Arc<TriangleShape> {
    Arc::new(TriangleShape::new(
        vec![UVec3::new(0, 1, 2), UVec3::new(3, 4, 5)],
        vec![
            Vec3::new(x, -100.0, -100.0),
            Vec3::new(x, 100.0, -100.0),
            Vec3::new(x, 0.0, 100.0),
            Vec3::new(-x, -100.0, -100.0),
            Vec3::new(-x, 100.0, -100.0),
            Vec3::new(-x, 0.0, 100.0),
        ],
        vec![],
        vec![],
    ))
}

/// Two slabs at y = ±offset; a ray along the x axis passes between them.
fn slab_shape(offset: f32) -> Arc<TriangleShape> {
    Arc::new(TriangleShape::new(
        vec![UVec3::new(0, 1, 2), UVec3::new(3, 4, 5)],
        vec![
            Vec3::new(-50.0, offset, -50.0),
            Vec3::new(50.0, offset, -50.0),
            Vec3::new(0.0, offset, 50.0),
            Vec3::new(-50.0, -offset, -50.0),
            Vec3::new(50.0, -offset, -50.0),
            Vec3::new(0.0, -offset, 50.0),
        ],
        vec![],
        vec![],
    ))
}

fn two_shape_scene(shapes: Vec<Arc<TriangleShape>>) -> Scene {
    let mut builder = SceneBuilder::new();
    for shape in shapes {
        let object = builder.add_object(shape, Material::default());
        builder.attach_object_to_root(object);
    }
    builder.build().unwrap()
}

struct Harness {
    graph: TaskGraph,
    accel: BatchingAccel<u32, u32>,
    cache: Arc<pyr_accel::RenderCache>,
    hits: Arc<Mutex<Vec<(Ray, RayHit, u32)>>>,
    misses: Arc<Mutex<Vec<(Ray, u32)>>>,
    any_hits: Arc<Mutex<Vec<u32>>>,
    any_misses: Arc<Mutex<Vec<u32>>>,
}

fn build_harness(scene: &Scene, max_bytes: u64, primitives_per_point: u64) -> Harness {
    let mut graph = TaskGraph::new();

    let hits = Arc::new(Mutex::new(Vec::new()));
    let hit = graph.add_task::<(Ray, RayHit, u32)>("hit", {
        let hits = hits.clone();
        move |chunks, _ctx| {
            let mut hits = hits.lock();
            for chunk in chunks {
                hits.extend(chunk);
            }
        }
    });

    let misses = Arc::new(Mutex::new(Vec::new()));
    let miss = graph.add_task::<(Ray, u32)>("miss", {
        let misses = misses.clone();
        move |chunks, _ctx| {
            let mut misses = misses.lock();
            for chunk in chunks {
                misses.extend(chunk);
            }
        }
    });

    let any_hits = Arc::new(Mutex::new(Vec::new()));
    let any_hit = graph.add_task::<(Ray, u32)>("any-hit", {
        let any_hits = any_hits.clone();
        move |chunks, _ctx| {
            let mut any_hits = any_hits.lock();
            for chunk in chunks {
                any_hits.extend(chunk.into_iter().map(|(_, state)| state));
            }
        }
    });

    let any_misses = Arc::new(Mutex::new(Vec::new()));
    let any_miss = graph.add_task::<(Ray, u32)>("any-miss", {
        let any_misses = any_misses.clone();
        move |chunks, _ctx| {
            let mut any_misses = any_misses.lock();
            for chunk in chunks {
                any_misses.extend(chunk.into_iter().map(|(_, state)| state));
            }
        }
    });

    let arena = Arc::new(MemorySerializer::default());
    let cache_builder = RenderCacheBuilder::new(CacheConfig {
        max_bytes,
        loader_thread_count: 1,
    });

    let accel = AccelBuilder::new(AccelConfig {
        primitives_per_batching_point: primitives_per_point,
    })
    .build(
        scene,
        &arena,
        &cache_builder,
        &mut graph,
        hit,
        miss,
        any_hit,
        any_miss,
    )
    .unwrap();

    let cache = cache_builder.build();
    accel.attach_cache(cache.clone());

    Harness {
        graph,
        accel,
        cache,
        hits,
        misses,
        any_hits,
        any_misses,
    }
}

fn run_config() -> TaskGraphConfig {
    TaskGraphConfig { num_workers: 3 }
}

// ---

/// A ray overlapping two batching points is delivered to both; exactly one
/// yields the hit and the other reports a miss.
#[test]
fn ray_scatter_over_two_batching_points() {
    pyr_log::setup_logging();

    // Both shapes' bounds contain the origin, so the ray enters both points.
    let scene = two_shape_scene(vec![wall_shape(5.0), slab_shape(5.0)]);
    let harness = build_harness(&scene, u64::MAX, 1);
    assert_eq!(harness.accel.num_batching_points(), 2);

    let ray = Ray::new(Vec3::ZERO, Vec3::X);
    let entered = harness.accel.intersect(&ray, &7);
    assert_eq!(entered, 2, "the ray must be enqueued at both points");
    harness.accel.flush_local_queues();

    harness.graph.run(&run_config());

    let hits = harness.hits.lock();
    assert_eq!(hits.len(), 1, "exactly one point produces the hit");
    let (hit_ray, hit, state) = &hits[0];
    assert_eq!(*state, 7);
    assert!((hit.t - 5.0).abs() < 1e-3, "wall sits at x = 5");
    assert!(hit_ray.t_far <= 5.001, "t_far narrowed to the hit");

    assert_eq!(harness.misses.lock().len(), 1, "the other point misses");

    // Ray conservation, counting per-point deliveries.
    let stats = harness.accel.stats();
    assert_eq!(stats.rays_enqueued, 2);
    assert_eq!(stats.hits_routed + stats.misses_routed, stats.rays_enqueued);
}

/// Four batching points cycled through a budget that fits roughly one of
/// them: everything still renders, each point loads at least once, and the
/// budget holds once the flushes are done.
#[test]
fn out_of_core_budget_bound() {
    pyr_log::setup_logging();

    // Four separated walls; the balancing slivers keep each shape's bounds
    // around its own x region only.
    let mut builder = SceneBuilder::new();
    for i in 0..4 {
        let x = 10.0 + 10.0 * i as f32;
        let shape = Arc::new(TriangleShape::new(
            vec![UVec3::new(0, 1, 2)],
            vec![
                Vec3::new(x, -100.0, -100.0),
                Vec3::new(x, 100.0, -100.0),
                Vec3::new(x, 0.0, 100.0),
            ],
            vec![],
            vec![],
        ));
        let object = builder.add_object(shape, Material::default());
        builder.attach_object_to_root(object);
    }
    let scene = builder.build().unwrap();

    // ~one geometry + sub-BVH pair; two pairs do not fit.
    let harness = build_harness(&scene, 192, 1);
    assert_eq!(harness.accel.num_batching_points(), 4);

    for i in 0..4 {
        let ray = Ray::new(Vec3::new(5.0 + 10.0 * i as f32, 0.0, 0.0), Vec3::X);
        let entered = harness.accel.intersect(&ray, &i);
        assert!(entered >= 1, "ray {i} must reach its wall's point");
    }
    harness.accel.flush_local_queues();

    harness.graph.run(&run_config());

    assert_eq!(harness.hits.lock().len(), 4, "every wall is hit once");

    let cache_stats = harness.cache.stats();
    assert!(
        cache_stats.num_loads >= 8,
        "each of the 4 points must load its geometry and sub-BVH at least once, saw {}",
        cache_stats.num_loads,
    );
    assert!(
        cache_stats.num_evicted_entries > 0,
        "the budget must have forced evictions"
    );
    assert!(
        harness.cache.current_bytes() <= harness.cache.max_bytes(),
        "the budget holds after the eviction passes"
    );
}

/// Occlusion rays shortcut on the first intersection and route to the
/// any-hit/any-miss stages.
#[test]
fn any_hit_routes_occlusion() {
    pyr_log::setup_logging();

    let scene = two_shape_scene(vec![wall_shape(5.0), slab_shape(5.0)]);
    let harness = build_harness(&scene, u64::MAX, 1);

    // Straight into the wall: occluded.
    harness.accel.intersect_any(&Ray::new(Vec3::ZERO, Vec3::X), &1);
    // Between the slabs, away from the wall: free.
    harness.accel.intersect_any(&Ray::new(Vec3::ZERO, Vec3::Z), &2);
    harness.accel.flush_local_queues();

    harness.graph.run(&run_config());

    assert!(harness.any_hits.lock().contains(&1));
    assert!(!harness.any_hits.lock().contains(&2));

    let stats = harness.accel.stats();
    assert_eq!(
        stats.any_hits_routed + stats.any_misses_routed,
        stats.any_rays_enqueued,
        "any-hit conservation"
    );
    let _ = harness.any_misses.lock().len(); // either slab point may report
}

// ---

/// An arena that can be told to start failing loads.
struct FlakyArena {
    inner: MemorySerializer,
    failing: AtomicBool,
}

impl Serializer for FlakyArena {
    fn store(&self, bytes: &[u8]) -> Allocation {
        self.inner.store(bytes)
    }
}

impl Deserializer for FlakyArena {
    fn load(&self, allocation: Allocation) -> CacheResult<ArenaSlice> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(pyr_cache::CacheError::SerializerIo(
                "simulated storage failure".to_owned(),
            ));
        }
        self.inner.load(allocation)
    }
}

/// A batching point whose geometry fails to load treats its rays as misses
/// and rendering carries on.
#[test]
fn failed_load_degrades_to_misses() {
    pyr_log::setup_logging();

    let scene = two_shape_scene(vec![wall_shape(5.0)]);

    let mut graph = TaskGraph::new();
    let hits = Arc::new(Mutex::new(Vec::<(Ray, RayHit, u32)>::new()));
    let hit = graph.add_task("hit", {
        let hits = hits.clone();
        move |chunks: Vec<Vec<(Ray, RayHit, u32)>>, _ctx| {
            hits.lock().extend(chunks.into_iter().flatten());
        }
    });
    let misses = Arc::new(Mutex::new(Vec::<(Ray, u32)>::new()));
    let miss = graph.add_task("miss", {
        let misses = misses.clone();
        move |chunks: Vec<Vec<(Ray, u32)>>, _ctx| {
            misses.lock().extend(chunks.into_iter().flatten());
        }
    });
    let any_hit = graph.add_task::<(Ray, u32)>("any-hit", |_chunks, _ctx| {});
    let any_miss = graph.add_task::<(Ray, u32)>("any-miss", |_chunks, _ctx| {});

    let arena = Arc::new(FlakyArena {
        inner: MemorySerializer::default(),
        failing: AtomicBool::new(false),
    });
    let cache_builder = RenderCacheBuilder::new(CacheConfig::default());

    let accel = AccelBuilder::new(AccelConfig {
        primitives_per_batching_point: 1,
    })
    .build(
        &scene,
        &arena,
        &cache_builder,
        &mut graph,
        hit,
        miss,
        any_hit,
        any_miss,
    )
    .unwrap();
    accel.attach_cache(cache_builder.build());

    // Storage goes away *after* the build serialized everything.
    arena.failing.store(true, Ordering::Relaxed);

    let entered = accel.intersect(&Ray::new(Vec3::ZERO, Vec3::X), &1);
    assert_eq!(entered, 1);
    accel.flush_local_queues();

    graph.run(&run_config());

    assert!(hits.lock().is_empty());
    assert_eq!(misses.lock().len(), 1, "the ray degrades to a miss");
    assert!(accel.stats().num_failed_flushes >= 1);
}
