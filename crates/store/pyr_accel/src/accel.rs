use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use rayon::prelude::*;

use pyr_cache::{Arena, Cacheable as _};
use pyr_scene::{Aabb, Ray, RayHit, Scene, Shape as _};
use pyr_stream::AtomicWeakRef;
use pyr_task_graph::{TaskGraph, TaskHandle};

use crate::bvh::{Bvh, BvhItem};
use crate::geometry::{GroupGeometry, GroupShapeDesc, SubBvh};
use crate::resource::{RenderCache, RenderCacheBuilder};
use crate::{AccelError, AccelResult, BatchingPoint};

// ---

#[derive(Clone, Debug)]
pub struct AccelConfig {
    /// Target primitive count per batching point. The partitioner splits the
    /// flattened scene until every group is at or under this (a single
    /// larger-than-target shape stays whole).
    pub primitives_per_batching_point: u64,
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            primitives_per_batching_point: 5_000_000,
        }
    }
}

// ---

#[derive(Default)]
struct StatsCounters {
    rays_enqueued: AtomicU64,
    any_rays_enqueued: AtomicU64,
    hits_routed: AtomicU64,
    misses_routed: AtomicU64,
    any_hits_routed: AtomicU64,
    any_misses_routed: AtomicU64,
    num_flushes: AtomicU64,
    num_failed_flushes: AtomicU64,
}

/// Traversal counters; the ray-conservation invariant is
/// `rays_enqueued == hits_routed + misses_routed` (and likewise for the
/// any-hit pair) once the graph has quiesced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccelStats {
    /// Per-point deliveries: a ray spanning several points counts once per
    /// point it entered.
    pub rays_enqueued: u64,
    pub any_rays_enqueued: u64,
    pub hits_routed: u64,
    pub misses_routed: u64,
    pub any_hits_routed: u64,
    pub any_misses_routed: u64,
    pub num_flushes: u64,
    pub num_failed_flushes: u64,
}

impl StatsCounters {
    fn snapshot(&self) -> AccelStats {
        AccelStats {
            rays_enqueued: self.rays_enqueued.load(Ordering::Relaxed),
            any_rays_enqueued: self.any_rays_enqueued.load(Ordering::Relaxed),
            hits_routed: self.hits_routed.load(Ordering::Relaxed),
            misses_routed: self.misses_routed.load(Ordering::Relaxed),
            any_hits_routed: self.any_hits_routed.load(Ordering::Relaxed),
            any_misses_routed: self.any_misses_routed.load(Ordering::Relaxed),
            num_flushes: self.num_flushes.load(Ordering::Relaxed),
            num_failed_flushes: self.num_failed_flushes.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for AccelStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} rays delivered ({} hits, {} misses), {} occlusion rays, {} flushes ({} failed)",
            pyr_format::format_usize(self.rays_enqueued as _),
            pyr_format::format_usize(self.hits_routed as _),
            pyr_format::format_usize(self.misses_routed as _),
            pyr_format::format_usize(self.any_rays_enqueued as _),
            pyr_format::format_usize(self.num_flushes as _),
            self.num_failed_flushes,
        )
    }
}

// ---

/// The built structure: an immutable top-level BVH whose leaves are
/// batching points. `S` is the integrator's closest-hit user state, `A` its
/// any-hit state; both travel alongside every queued ray.
pub struct BatchingAccel<S, A> {
    top_level: Bvh,
    points: Vec<BatchingPoint<S, A>>,
    cache_slot: Arc<OnceLock<Arc<RenderCache>>>,
    stats: Arc<StatsCounters>,
}

impl<S, A> BatchingAccel<S, A>
where
    S: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    /// Give the flush stages their cache; must happen after
    /// [`RenderCacheBuilder::build`](pyr_cache::CacheBuilder::build) and
    /// before the graph first runs.
    pub fn attach_cache(&self, cache: Arc<RenderCache>) {
        if self.cache_slot.set(cache).is_err() {
            pyr_log::warn!("acceleration structure already had a cache attached");
        }
    }

    /// Enqueue a closest-hit query at every batching point the ray's slab
    /// test reaches. Returns the number of points entered — zero means the
    /// ray escaped the scene without ever being queued.
    pub fn intersect(&self, ray: &Ray, state: &S) -> usize {
        let mut entered = 0;
        self.top_level.traverse(ray, |point_index, _t_far| {
            let point = &self.points[point_index as usize];
            point.closest_queue.enqueue_one((ray.clone(), state.clone()));
            entered += 1;
            false
        });
        self.stats
            .rays_enqueued
            .fetch_add(entered as u64, Ordering::Relaxed);
        entered
    }

    /// The any-hit variant: first occluder wins, per batching point.
    pub fn intersect_any(&self, ray: &Ray, state: &A) -> usize {
        let mut entered = 0;
        self.top_level.traverse(ray, |point_index, _t_far| {
            let point = &self.points[point_index as usize];
            point.any_queue.enqueue_one((ray.clone(), state.clone()));
            entered += 1;
            false
        });
        self.stats
            .any_rays_enqueued
            .fetch_add(entered as u64, Ordering::Relaxed);
        entered
    }

    /// Flush the calling thread's staged enqueues so the scheduler can see
    /// them. Kernels don't need this (workers flush after every kernel);
    /// call it after seeding rays from outside the graph.
    pub fn flush_local_queues(&self) {
        for point in &self.points {
            point.closest_queue.flush();
            point.any_queue.flush();
        }
    }

    pub fn points(&self) -> &[BatchingPoint<S, A>] {
        &self.points
    }

    pub fn num_batching_points(&self) -> usize {
        self.points.len()
    }

    pub fn num_ready_points(&self) -> usize {
        self.points.iter().filter(|point| point.is_ready()).count()
    }

    pub fn world_bounds(&self) -> Aabb {
        self.top_level.bounds()
    }

    pub fn stats(&self) -> AccelStats {
        self.stats.snapshot()
    }
}

// ---

struct GroupLeaf {
    desc: GroupShapeDesc,
    bounds: Aabb,
    num_primitives: u64,
}

pub struct AccelBuilder {
    config: AccelConfig,
}

impl AccelBuilder {
    pub fn new(config: AccelConfig) -> Self {
        Self { config }
    }

    /// Build the whole structure against a scene:
    ///
    /// 1. flatten the scene DAG into `(object, transform)` leaves,
    /// 2. serialize every distinct shape into the arena (and evict it — from
    ///    here on, geometry is resident only while the cache says so),
    /// 3. partition the leaves into batching groups of roughly
    ///    [`AccelConfig::primitives_per_batching_point`] primitives,
    /// 4. register each group's geometry and sub-BVH factories with the
    ///    cache and its two flush stages with the task graph,
    /// 5. build the top-level BVH over the group bounds.
    ///
    /// Call [`BatchingAccel::attach_cache`] once the cache builder is built.
    pub fn build<S, A, Store>(
        &self,
        scene: &Scene,
        arena: &Arc<Store>,
        cache_builder: &RenderCacheBuilder,
        graph: &mut TaskGraph,
        hit: TaskHandle<(Ray, RayHit, S)>,
        miss: TaskHandle<(Ray, S)>,
        any_hit: TaskHandle<(Ray, A)>,
        any_miss: TaskHandle<(Ray, A)>,
    ) -> AccelResult<BatchingAccel<S, A>>
    where
        S: Clone + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
        Store: Arena + 'static,
    {
        let flattened = scene.flatten();
        if flattened.is_empty() {
            return Err(AccelError::EmptyScene);
        }

        // Serialize every distinct shape exactly once (instancing shares).
        let mut seen = ahash::HashSet::default();
        for (object, _) in &flattened {
            if seen.insert(Arc::as_ptr(&object.shape).cast::<()>() as usize) {
                object.shape.serialize(&**arena)?;
            }
        }

        let mut leaves: Vec<GroupLeaf> = flattened
            .par_iter()
            .map(|(object, world_from_object)| GroupLeaf {
                desc: GroupShapeDesc {
                    object: object.clone(),
                    world_from_object: *world_from_object,
                },
                bounds: object.shape.bounds().transformed(world_from_object),
                num_primitives: object.shape.num_primitives() as u64,
            })
            .collect();

        let mut groups = Vec::new();
        split_into_groups(
            &mut leaves,
            self.config.primitives_per_batching_point,
            &mut groups,
        );

        let cache_slot: Arc<OnceLock<Arc<RenderCache>>> = Arc::new(OnceLock::new());
        let stats = Arc::new(StatsCounters::default());

        let mut points = Vec::with_capacity(groups.len());
        let mut top_level_items = Vec::with_capacity(groups.len());

        for (point_index, group) in groups.into_iter().enumerate() {
            if group.is_empty() {
                return Err(AccelError::EmptyBatchingPoint);
            }

            let bounds = group
                .iter()
                .fold(Aabb::EMPTY, |bounds, leaf| bounds.union(&leaf.bounds));
            let num_primitives: u64 = group.iter().map(|leaf| leaf.num_primitives).sum();

            let descs: Arc<[GroupShapeDesc]> =
                group.into_iter().map(|leaf| leaf.desc).collect();

            let geometry_id = cache_builder.register::<GroupGeometry>({
                let descs = descs.clone();
                let arena = arena.clone();
                move |_cache| GroupGeometry::resident(&descs, &*arena).map_err(Into::into)
            });
            let sub_bvh_id = cache_builder.register::<SubBvh>(move |cache| {
                let geometry = cache.get::<GroupGeometry>(geometry_id)?;
                Ok(SubBvh::build(geometry))
            });

            let resident = Arc::new(AtomicWeakRef::new());

            let closest_queue = graph.add_task(format!("flush-point-{point_index}"), {
                let cache_slot = cache_slot.clone();
                let stats = stats.clone();
                let resident = resident.clone();
                let hit = hit.clone();
                let miss = miss.clone();
                move |chunks: Vec<Vec<(Ray, S)>>, _ctx| {
                    stats.num_flushes.fetch_add(1, Ordering::Relaxed);
                    let Some(cache) = cache_slot.get() else {
                        pyr_log::error!("flush ran before a cache was attached");
                        return;
                    };

                    match cache.get::<SubBvh>(sub_bvh_id) {
                        Ok(sub_bvh) => {
                            resident.store(&sub_bvh);
                            for chunk in chunks {
                                for (mut ray, state) in chunk {
                                    match sub_bvh.intersect_closest(&mut ray) {
                                        Some(ray_hit) => {
                                            stats.hits_routed.fetch_add(1, Ordering::Relaxed);
                                            hit.enqueue_one((ray, ray_hit, state));
                                        }
                                        None => {
                                            stats.misses_routed.fetch_add(1, Ordering::Relaxed);
                                            miss.enqueue_one((ray, state));
                                        }
                                    }
                                }
                            }
                            // The strong reference drops here; the cache is
                            // free to evict if another point needs the room.
                        }
                        Err(err) => {
                            // Policy: rays of a point whose geometry cannot
                            // load are misses for that point (they may still
                            // hit elsewhere).
                            stats.num_failed_flushes.fetch_add(1, Ordering::Relaxed);
                            pyr_log::warn!(
                                "batching point {point_index}: sub-BVH failed to load, \
                                 routing its rays as misses: {}",
                                pyr_log::format_error(&err)
                            );
                            for chunk in chunks {
                                for (ray, state) in chunk {
                                    stats.misses_routed.fetch_add(1, Ordering::Relaxed);
                                    miss.enqueue_one((ray, state));
                                }
                            }
                        }
                    }
                }
            });

            let any_queue = graph.add_task(format!("flush-any-point-{point_index}"), {
                let cache_slot = cache_slot.clone();
                let stats = stats.clone();
                let resident = resident.clone();
                let any_hit = any_hit.clone();
                let any_miss = any_miss.clone();
                move |chunks: Vec<Vec<(Ray, A)>>, _ctx| {
                    stats.num_flushes.fetch_add(1, Ordering::Relaxed);
                    let Some(cache) = cache_slot.get() else {
                        pyr_log::error!("flush ran before a cache was attached");
                        return;
                    };

                    match cache.get::<SubBvh>(sub_bvh_id) {
                        Ok(sub_bvh) => {
                            resident.store(&sub_bvh);
                            for chunk in chunks {
                                for (ray, state) in chunk {
                                    if sub_bvh.intersect_any(&ray) {
                                        stats.any_hits_routed.fetch_add(1, Ordering::Relaxed);
                                        any_hit.enqueue_one((ray, state));
                                    } else {
                                        stats.any_misses_routed.fetch_add(1, Ordering::Relaxed);
                                        any_miss.enqueue_one((ray, state));
                                    }
                                }
                            }
                        }
                        Err(err) => {
                            stats.num_failed_flushes.fetch_add(1, Ordering::Relaxed);
                            pyr_log::warn!(
                                "batching point {point_index}: sub-BVH failed to load, \
                                 routing its occlusion rays as unoccluded: {}",
                                pyr_log::format_error(&err)
                            );
                            for chunk in chunks {
                                for (ray, state) in chunk {
                                    stats.any_misses_routed.fetch_add(1, Ordering::Relaxed);
                                    any_miss.enqueue_one((ray, state));
                                }
                            }
                        }
                    }
                }
            });

            top_level_items.push(BvhItem {
                bounds,
                index: point_index as u32,
            });
            points.push(BatchingPoint {
                geometry_id,
                sub_bvh_id,
                bounds,
                num_primitives,
                closest_queue,
                any_queue,
                resident,
            });
        }

        // Masters go cold: from here on, geometry only comes back through
        // the cache, group by group.
        for (object, _) in &flattened {
            object.shape.evict();
        }

        let top_level = Bvh::build(&top_level_items);

        pyr_log::debug!(
            "acceleration structure: {} batching points over {} instanced shapes ({} primitives total)",
            points.len(),
            pyr_format::format_usize(flattened.len()),
            pyr_format::format_usize(points.iter().map(|p| p.num_primitives).sum::<u64>() as usize),
        );

        Ok(BatchingAccel {
            top_level,
            points,
            cache_slot,
            stats,
        })
    }
}

/// Recursively split the flattened leaves into groups of at most `target`
/// primitives (single oversized leaves stay whole), choosing each cut with a
/// binned SAH over the leaves' centroids.
fn split_into_groups(leaves: &mut [GroupLeaf], target: u64, groups: &mut Vec<Vec<GroupLeaf>>) {
    let total: u64 = leaves.iter().map(|leaf| leaf.num_primitives).sum();
    if total <= target || leaves.len() == 1 {
        groups.push(leaves.iter().map(|leaf| GroupLeaf {
            desc: leaf.desc.clone(),
            bounds: leaf.bounds,
            num_primitives: leaf.num_primitives,
        }).collect());
        return;
    }

    let split = partition_group_leaves(leaves);
    let (left, right) = leaves.split_at_mut(split);
    split_into_groups(left, target, groups);
    split_into_groups(right, target, groups);
}

const NUM_GROUP_BINS: usize = 16;

/// Pick a binned SAH split along the widest centroid axis, weighting every
/// leaf's surface-area cost by its primitive count (the same scheme as the
/// per-primitive BVH builder, coarsened to whole shapes). Partitions
/// `leaves` in place and returns a split index in `1..len`.
///
/// Degenerate inputs (coincident centroids, or every leaf in one bin) fall
/// back to a primitive-count median so recursion always makes progress.
fn partition_group_leaves(leaves: &mut [GroupLeaf]) -> usize {
    let mut centroid_bounds = Aabb::EMPTY;
    for leaf in leaves.iter() {
        centroid_bounds.extend(leaf.bounds.center());
    }
    let extent = centroid_bounds.extent();
    let axis = if extent.x >= extent.y && extent.x >= extent.z {
        0
    } else if extent.y >= extent.z {
        1
    } else {
        2
    };

    let axis_min = centroid_bounds.min[axis];
    let axis_extent = extent[axis];

    if axis_extent > 0.0 {
        let bin_of = |leaf: &GroupLeaf| -> usize {
            let normalized = (leaf.bounds.center()[axis] - axis_min) / axis_extent;
            ((normalized * NUM_GROUP_BINS as f32) as usize).min(NUM_GROUP_BINS - 1)
        };

        let mut bin_bounds = [Aabb::EMPTY; NUM_GROUP_BINS];
        let mut bin_primitives = [0_u64; NUM_GROUP_BINS];
        for leaf in leaves.iter() {
            let bin = bin_of(leaf);
            bin_bounds[bin] = bin_bounds[bin].union(&leaf.bounds);
            bin_primitives[bin] += leaf.num_primitives;
        }

        let mut best: Option<(usize, f32)> = None;
        for split_after in 0..NUM_GROUP_BINS - 1 {
            let (mut left_bounds, mut left_primitives) = (Aabb::EMPTY, 0_u64);
            for bin in 0..=split_after {
                left_bounds = left_bounds.union(&bin_bounds[bin]);
                left_primitives += bin_primitives[bin];
            }
            let (mut right_bounds, mut right_primitives) = (Aabb::EMPTY, 0_u64);
            for bin in split_after + 1..NUM_GROUP_BINS {
                right_bounds = right_bounds.union(&bin_bounds[bin]);
                right_primitives += bin_primitives[bin];
            }
            if left_primitives == 0 || right_primitives == 0 {
                continue;
            }

            let cost = left_bounds.surface_area() * left_primitives as f32
                + right_bounds.surface_area() * right_primitives as f32;
            if best.is_none_or(|(_, best_cost)| cost < best_cost) {
                best = Some((split_after, cost));
            }
        }

        if let Some((split_after, _)) = best {
            let split =
                crate::bvh::partition_in_place(leaves, |leaf| bin_of(leaf) <= split_after);
            if split > 0 && split < leaves.len() {
                return split;
            }
        }
    }

    // Fallback: sort along the axis and cut at the primitive-count median.
    leaves.sort_unstable_by(|a, b| {
        a.bounds.center()[axis]
            .partial_cmp(&b.bounds.center()[axis])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let total: u64 = leaves.iter().map(|leaf| leaf.num_primitives).sum();
    let mut split = leaves.len() / 2;
    let mut accumulated = 0_u64;
    for (index, leaf) in leaves.iter().enumerate() {
        accumulated += leaf.num_primitives;
        if accumulated * 2 >= total {
            split = index + 1;
            break;
        }
    }
    split.clamp(1, leaves.len() - 1)
}
