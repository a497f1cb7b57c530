//! The pyrite crate family behind one door.
//!
//! Pyrite renders scenes an order of magnitude larger than main memory. The
//! interesting part is not the shading, it is the substrate: a two-level
//! acceleration structure that *batches* rays at geometry clusters
//! ([`accel`]), a typed-variant LRU cache that streams those clusters through
//! a byte budget ([`cache`]), and a task-graph scheduler that always drains
//! the fullest stage so the machine stays busy while geometry loads
//! ([`task_graph`]).

pub use pyr_accel as accel;
pub use pyr_cache as cache;
pub use pyr_log as log;
pub use pyr_metrics as metrics;
pub use pyr_render as render;
pub use pyr_scene as scene;
pub use pyr_stream as stream;
pub use pyr_task_graph as task_graph;

/// The types most applications touch.
pub mod prelude {
    pub use pyr_accel::{AccelBuilder, AccelConfig, BatchingAccel};
    pub use pyr_cache::{CacheBuilder, CacheConfig, CacheableId, LruCache, MemorySerializer};
    pub use pyr_render::{Film, PerspectiveCamera, RenderConfig, Renderer};
    pub use pyr_scene::{
        AreaLight, InfiniteLight, Material, Ray, RayHit, Scene, SceneBuilder, TriangleShape,
    };
    pub use pyr_task_graph::{TaskGraph, TaskGraphConfig};
}
