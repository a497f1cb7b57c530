//! The scene contract the pyrite traversal consumes: a DAG of nodes with
//! explicit instancing, shapes behind a capability trait, and the
//! cacheable-geometry lifecycle (serialize / evict / make-resident) that
//! lets the acceleration structure stream shape data through the cache.

mod bounds;
mod material;
mod ray;
mod scene;
mod shape;
mod triangle;

pub use bounds::Aabb;
pub use material::{AreaLight, InfiniteLight, Material};
pub use ray::{Ray, RayHit};
pub use scene::{NodeHandle, Scene, SceneBuilder, SceneNode, SceneObject};
pub use shape::{PrimitiveHit, Shape, ShapePin, SurfaceInteraction};
pub use triangle::TriangleShape;

// ---

#[derive(thiserror::Error, Debug)]
pub enum SceneError {
    /// A scene with nothing to render is a build error, not a render-time
    /// surprise.
    #[error("scene contains no objects")]
    EmptyScene,

    /// The node graph must be a DAG; instancing is expressed through shared
    /// children, never through back-edges.
    #[error("scene graph contains a cycle through node {node_index}")]
    CyclicGraph { node_index: usize },

    #[error("node handle {node_index} does not belong to this builder")]
    UnknownNode { node_index: usize },
}

pub type SceneResult<T> = Result<T, SceneError>;
