use std::any::Any;
use std::sync::Arc;

use glam::{Vec2, Vec3};

use pyr_cache::{Cacheable, CacheResult, Deserializer};

use crate::{Aabb, Ray};

/// A shape-local intersection; barycentrics only, no object back-reference
/// yet (the traversal attaches that when it routes the hit).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrimitiveHit {
    pub t: f32,
    pub u: f32,
    pub v: f32,
}

/// Everything an integrator wants to know about the surface under a hit.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceInteraction {
    pub position: Vec3,
    pub geometric_normal: Vec3,
    pub shading_normal: Vec3,
    pub uv: Vec2,
    /// Direction back along the incoming ray.
    pub wo: Vec3,
}

/// The capability set the traversal needs from geometry.
///
/// A shape is also a [`Cacheable`]: its in-memory buffers can be reclaimed
/// and rebuilt from serialized form without the shape losing its identity —
/// bounds and primitive count stay available throughout, since the
/// acceleration structure is built from them and outlives any residency.
pub trait Shape: Cacheable + Send + Sync {
    /// Object-space bounds; valid even while evicted.
    fn bounds(&self) -> Aabb;

    /// Valid even while evicted.
    fn num_primitives(&self) -> u32;

    fn primitive_bounds(&self, primitive_index: u32) -> Aabb;

    /// Intersect one primitive, honoring `ray.t_near..t_far`.
    ///
    /// Returns `None` for a miss — and for an evicted shape, which the
    /// traversal never asks (it only flushes rays against resident
    /// geometry).
    fn intersect_primitive(&self, ray: &Ray, primitive_index: u32) -> Option<PrimitiveHit>;

    fn fill_surface_interaction(&self, ray: &Ray, hit: &PrimitiveHit, primitive_index: u32)
        -> SurfaceInteraction;

    /// Is the in-memory representation currently present?
    fn is_resident(&self) -> bool;

    /// Make the shape resident and return a pin that keeps it that way.
    ///
    /// A shape shared by several geometry groups (instancing) stays resident
    /// for as long as *any* group pins it; once the last pin drops, the
    /// shape's buffers die with it and the next pin rebuilds them from the
    /// serialized form.
    fn pin_resident(&self, source: &dyn Deserializer) -> CacheResult<ShapePin>;
}

/// Keeps one shape's in-memory representation alive. See
/// [`Shape::pin_resident`].
pub struct ShapePin {
    _keep_alive: Arc<dyn Any + Send + Sync>,
    size_bytes: u64,
}

impl ShapePin {
    pub fn new(keep_alive: Arc<dyn Any + Send + Sync>, size_bytes: u64) -> Self {
        Self {
            _keep_alive: keep_alive,
            size_bytes,
        }
    }

    /// Heap bytes held alive by this pin.
    #[inline]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}
