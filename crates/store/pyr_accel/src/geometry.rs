use std::sync::Arc;

use glam::{Mat3, Mat4};

use pyr_cache::{CacheResult, Deserializer};
use pyr_scene::{Aabb, PrimitiveHit, Ray, RayHit, SceneObject, Shape as _, ShapePin};

use crate::bvh::{Bvh, BvhItem};

// ---

/// Which object, under which accumulated transform, belongs to a batching
/// group. Captured by the group's factory; tiny and always resident.
#[derive(Clone)]
pub(crate) struct GroupShapeDesc {
    pub object: Arc<SceneObject>,
    pub world_from_object: Mat4,
}

/// One resident member of a [`GroupGeometry`].
pub struct GroupShape {
    pub object: Arc<SceneObject>,
    pub world_from_object: Mat4,
    object_from_world: Mat4,
    /// Transforms object-space normals into world space.
    normal_matrix: Mat3,
    pin: ShapePin,
}

impl GroupShape {
    fn ray_to_object(&self, ray: &Ray, t_far: f32) -> Ray {
        // The direction is deliberately left unnormalized: that keeps `t`
        // values identical in object and world space.
        Ray {
            origin: self.object_from_world.transform_point3(ray.origin),
            direction: self.object_from_world.transform_vector3(ray.direction),
            t_near: ray.t_near,
            t_far,
        }
    }
}

/// The resident triangle data of one batching group: every member shape
/// pinned into memory.
///
/// Dropping the last strong reference releases the pins; shapes shared with
/// another (still resident) group survive through *its* pins.
pub struct GroupGeometry {
    shapes: Vec<GroupShape>,
}

impl GroupGeometry {
    /// Materialize: pin every member shape, rebuilding evicted buffers from
    /// the serialized form.
    pub(crate) fn resident(
        descs: &[GroupShapeDesc],
        source: &dyn Deserializer,
    ) -> CacheResult<Self> {
        let shapes = descs
            .iter()
            .map(|desc| {
                let pin = desc.object.shape.pin_resident(source)?;
                Ok(GroupShape {
                    object: desc.object.clone(),
                    world_from_object: desc.world_from_object,
                    object_from_world: desc.world_from_object.inverse(),
                    normal_matrix: Mat3::from_mat4(desc.world_from_object.inverse().transpose()),
                    pin,
                })
            })
            .collect::<CacheResult<Vec<_>>>()?;

        Ok(Self { shapes })
    }

    pub fn num_shapes(&self) -> usize {
        self.shapes.len()
    }

    pub fn size_bytes(&self) -> u64 {
        self.shapes.iter().map(|shape| shape.pin.size_bytes()).sum()
    }

    pub fn world_bounds(&self) -> Aabb {
        self.shapes.iter().fold(Aabb::EMPTY, |bounds, shape| {
            bounds.union(&shape.object.shape.bounds().transformed(&shape.world_from_object))
        })
    }
}

// ---

/// The BVH over one batching group's primitives, built (and rebuilt) from
/// the group's resident geometry.
///
/// Holds its geometry strongly: a sub-BVH without triangles is useless, so
/// the two are evicted together or not at all — while the geometry may
/// *additionally* stay cached on its own for a cheap sub-BVH rebuild.
pub struct SubBvh {
    geometry: Arc<GroupGeometry>,
    /// `(shape_index, primitive_index)` per BVH item.
    primitive_refs: Vec<(u32, u32)>,
    bvh: Bvh,
}

impl SubBvh {
    pub(crate) fn build(geometry: Arc<GroupGeometry>) -> Self {
        let mut primitive_refs = Vec::new();
        let mut items = Vec::new();

        for (shape_index, shape) in geometry.shapes.iter().enumerate() {
            for primitive_index in 0..shape.object.shape.num_primitives() {
                let bounds = shape
                    .object
                    .shape
                    .primitive_bounds(primitive_index)
                    .transformed(&shape.world_from_object);
                items.push(BvhItem {
                    bounds,
                    index: primitive_refs.len() as u32,
                });
                primitive_refs.push((shape_index as u32, primitive_index));
            }
        }

        let bvh = Bvh::build(&items);
        Self {
            geometry,
            primitive_refs,
            bvh,
        }
    }

    pub fn num_primitives(&self) -> usize {
        self.primitive_refs.len()
    }

    pub fn world_bounds(&self) -> Aabb {
        self.bvh.bounds()
    }

    /// Nodes and refs only; the triangle data is accounted by the
    /// [`GroupGeometry`] cache entry.
    pub fn size_bytes(&self) -> u64 {
        self.bvh.size_bytes()
            + (self.primitive_refs.len() * std::mem::size_of::<(u32, u32)>()) as u64
    }

    /// Closest hit within this group; narrows `ray.t_far` on success.
    pub fn intersect_closest(&self, ray: &mut Ray) -> Option<RayHit> {
        let mut best: Option<(u32, PrimitiveHit)> = None;

        self.bvh.traverse(ray, |item, t_far| {
            let (shape_index, primitive_index) = self.primitive_refs[item as usize];
            let shape = &self.geometry.shapes[shape_index as usize];

            let object_ray = shape.ray_to_object(ray, *t_far);
            if let Some(hit) = shape
                .object
                .shape
                .intersect_primitive(&object_ray, primitive_index)
            {
                *t_far = hit.t;
                best = Some((item, hit));
            }
            false
        });

        let (item, primitive_hit) = best?;
        let (shape_index, primitive_index) = self.primitive_refs[item as usize];
        let shape = &self.geometry.shapes[shape_index as usize];

        ray.t_far = primitive_hit.t;

        // Resolve the interaction in object space, then bring it to world
        // space (the hit position straight from the world-space ray).
        let object_ray = shape.ray_to_object(ray, f32::INFINITY);
        let object_interaction = shape.object.shape.fill_surface_interaction(
            &object_ray,
            &primitive_hit,
            primitive_index,
        );

        let interaction = pyr_scene::SurfaceInteraction {
            position: ray.at(primitive_hit.t),
            geometric_normal: (shape.normal_matrix * object_interaction.geometric_normal)
                .normalize_or_zero(),
            shading_normal: (shape.normal_matrix * object_interaction.shading_normal)
                .normalize_or_zero(),
            uv: object_interaction.uv,
            wo: -ray.direction.normalize_or_zero(),
        };

        Some(RayHit {
            primitive_index,
            u: primitive_hit.u,
            v: primitive_hit.v,
            t: primitive_hit.t,
            object: shape.object.clone(),
            interaction,
        })
    }

    /// Does anything in this group occlude the ray? Shortcuts on the first
    /// intersection found.
    pub fn intersect_any(&self, ray: &Ray) -> bool {
        let mut occluded = false;

        self.bvh.traverse(ray, |item, t_far| {
            let (shape_index, primitive_index) = self.primitive_refs[item as usize];
            let shape = &self.geometry.shapes[shape_index as usize];

            let object_ray = shape.ray_to_object(ray, *t_far);
            if shape
                .object
                .shape
                .intersect_primitive(&object_ray, primitive_index)
                .is_some()
            {
                occluded = true;
                return true;
            }
            false
        });

        occluded
    }
}
