use std::sync::Arc;

use pyr_cache::CacheableId;
use pyr_scene::{Aabb, Ray};
use pyr_stream::AtomicWeakRef;
use pyr_task_graph::TaskHandle;

use crate::SubBvh;

/// One leaf of the top-level BVH: a geometry cluster whose triangles and
/// sub-BVH live in the cache, plus the queues rays accumulate in until the
/// cluster's flush stage runs.
///
/// Membership is fixed at build time; only the queues and the cache's idea
/// of residency ever change.
pub struct BatchingPoint<S, A> {
    pub(crate) geometry_id: CacheableId,
    pub(crate) sub_bvh_id: CacheableId,
    pub(crate) bounds: Aabb,
    pub(crate) num_primitives: u64,

    /// Pending closest-hit rays; the input stream of this point's flush stage.
    pub(crate) closest_queue: TaskHandle<(Ray, S)>,

    /// Pending any-hit rays; the input stream of this point's occlusion stage.
    pub(crate) any_queue: TaskHandle<(Ray, A)>,

    /// Watches the sub-BVH without keeping it alive: the "is my geometry
    /// resident right now" flag.
    pub(crate) resident: Arc<AtomicWeakRef<SubBvh>>,
}

impl<S, A> BatchingPoint<S, A> {
    pub fn geometry_id(&self) -> CacheableId {
        self.geometry_id
    }

    pub fn sub_bvh_id(&self) -> CacheableId {
        self.sub_bvh_id
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn num_primitives(&self) -> u64 {
        self.num_primitives
    }

    /// Is this point's sub-BVH resident right now?
    pub fn is_ready(&self) -> bool {
        self.resident.upgrade().is_some()
    }
}
