use glam::Vec3;

/// A plain data carrier: the traversal core never looks inside, it only
/// moves references around for the integrator to consume.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub albedo: Vec3,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            albedo: Vec3::splat(0.5),
        }
    }
}

/// Emission attached to a scene object's surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AreaLight {
    pub radiance: Vec3,
}

/// A light at infinity; contributes to rays that miss everything.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InfiniteLight {
    pub radiance: Vec3,
}
