//! The integrator glue on top of the out-of-core substrate.
//!
//! The traversal core only moves `(ray, state)` pairs around; this crate
//! supplies the four integrator stages (hit / miss / any-hit / any-miss) it
//! routes into, a pinhole camera to make primary rays, a film to accumulate
//! into, and the smallest integrator that exercises every core path: albedo
//! shading plus one shadowed sun sample per hit.
//!
//! Because a ray can be delivered to several batching points, every pixel
//! keeps a little reconciliation record: how many per-point reports are
//! still outstanding, and the smallest-`t` hit seen so far. Only when the
//! last report arrives does the pixel resolve.

mod camera;
mod film;
mod renderer;

pub use camera::PerspectiveCamera;
pub use film::Film;
pub use renderer::{Renderer, RendererStats};

use glam::Vec3;

// ---

/// Closest-hit user state: which pixel the ray belongs to.
///
/// Opaque to the traversal; it just rides along.
#[derive(Clone, Copy, Debug)]
pub struct RayState {
    pub pixel: u32,
}

/// Any-hit user state: the light contribution at stake.
#[derive(Clone, Copy, Debug)]
pub struct AnyRayState {
    pub pixel: u32,
    pub contribution: Vec3,
}

// ---

#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub samples_per_pixel: u32,

    /// Direction *towards* the sun.
    pub sun_direction: Vec3,
    pub sun_radiance: Vec3,

    /// Constant ambient term so unshadowed geometry is never pitch black.
    pub ambient: Vec3,

    pub num_workers: usize,

    /// The resource cache's byte budget.
    pub cache_bytes: u64,
    pub loader_threads: usize,
    pub primitives_per_batching_point: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            samples_per_pixel: 4,
            sun_direction: Vec3::new(0.3, 0.9, 0.2).normalize(),
            sun_radiance: Vec3::splat(2.0),
            ambient: Vec3::splat(0.08),
            num_workers: pyr_task_graph::TaskGraphConfig::default().num_workers,
            cache_bytes: 1024 * 1024 * 1024,
            loader_threads: 2,
            primitives_per_batching_point: 5_000_000,
        }
    }
}

// ---

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Accel(#[from] pyr_accel::AccelError),
}

pub type RenderResult<T> = Result<T, RenderError>;
