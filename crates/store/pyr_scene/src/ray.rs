use std::sync::Arc;

use glam::Vec3;

use crate::{SceneObject, SurfaceInteraction};

/// One intersection query, alive for the duration of its traversal.
///
/// `t_far` is narrowed as closer hits are found — including across batching
/// points: a ray delivered to several geometry clusters relies on the
/// integrator keeping only the smallest `t` it hears back about.
#[derive(Clone, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    pub t_near: f32,
    pub t_far: f32,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction,
            t_near: 1e-4,
            t_far: f32::INFINITY,
        }
    }

    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + t * self.direction
    }
}

/// A resolved intersection, pointing back at the object that produced it.
///
/// Carries the filled-in [`SurfaceInteraction`]: the traversal resolves it
/// while the geometry is resident, because by the time an integrator stage
/// shades the hit, the cluster that produced it may already be evicted.
#[derive(Clone)]
pub struct RayHit {
    pub primitive_index: u32,
    /// Barycentric coordinates on the primitive.
    pub u: f32,
    pub v: f32,
    pub t: f32,
    pub object: Arc<SceneObject>,
    pub interaction: SurfaceInteraction,
}

impl std::fmt::Debug for RayHit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RayHit")
            .field("primitive_index", &self.primitive_index)
            .field("u", &self.u)
            .field("v", &self.v)
            .field("t", &self.t)
            .finish_non_exhaustive()
    }
}
