//! The two-level batching acceleration structure.
//!
//! Instead of traversing one monolithic BVH (which would require every byte
//! of geometry to be resident at once), rays walk a small immutable top-level
//! BVH whose leaves are *batching points*: geometry clusters whose triangles
//! and sub-BVH live in the resource cache. Rays pile up in a queue at every
//! point they touch; the task-graph scheduler flushes whichever point has the
//! most pending rays, loading its cluster on demand and routing the
//! hit/miss results onward to the integrator's stages.
//!
//! A ray spanning several clusters is delivered to each of them; the
//! integrator reconciles by keeping the smallest `t` it hears back about
//! (that is why [`pyr_scene::RayHit`] carries `t` at all).

mod accel;
mod batching;
mod bvh;
mod geometry;
mod resource;

pub use accel::{AccelBuilder, AccelConfig, AccelStats, BatchingAccel};
pub use batching::BatchingPoint;
pub use bvh::{Bvh, BvhItem};
pub use geometry::{GroupGeometry, SubBvh};
pub use resource::{RenderCache, RenderCacheBuilder, RenderResource};

// ---

#[derive(thiserror::Error, Debug)]
pub enum AccelError {
    /// A batching point with zero shapes; fatal at build time.
    #[error("batching group resolved to zero shapes")]
    EmptyBatchingPoint,

    /// A scene shape could not be serialized into the cache's arena.
    #[error(transparent)]
    Cache(#[from] pyr_cache::CacheError),

    /// The scene flattened to nothing.
    #[error("scene flattened to zero shapes")]
    EmptyScene,
}

pub type AccelResult<T> = Result<T, AccelError>;
