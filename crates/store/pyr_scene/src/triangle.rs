use std::io::Cursor;
use std::sync::{Arc, Weak};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::{Mat3, Mat4, UVec3, Vec2, Vec3};
use parking_lot::RwLock;

use pyr_byte_size::SizeBytes;
use pyr_cache::{Allocation, CacheError, CacheResult, Cacheable, Deserializer, Serializer};

use crate::shape::ShapePin;
use crate::{Aabb, PrimitiveHit, Ray, Shape, SurfaceInteraction};

// ---

/// The resident vertex/index buffers of a [`TriangleShape`].
struct MeshData {
    indices: Vec<UVec3>,
    positions: Vec<Vec3>,
    /// Per-vertex shading normals; empty, or one per position.
    normals: Vec<Vec3>,
    /// Per-vertex texture coordinates; empty, or one per position.
    tex_coords: Vec<Vec2>,
}

impl MeshData {
    fn heap_size_bytes(&self) -> u64 {
        self.indices.heap_size_bytes()
            + self.positions.heap_size_bytes()
            + self.normals.heap_size_bytes()
            + self.tex_coords.heap_size_bytes()
    }

    /// Little-endian layout: four u32 counts, then each buffer in turn.
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16 + self.heap_size_bytes() as usize);

        // Writing into a Vec cannot fail.
        bytes.write_u32::<LittleEndian>(self.indices.len() as u32).ok();
        bytes.write_u32::<LittleEndian>(self.positions.len() as u32).ok();
        bytes.write_u32::<LittleEndian>(self.normals.len() as u32).ok();
        bytes.write_u32::<LittleEndian>(self.tex_coords.len() as u32).ok();

        for triplet in &self.indices {
            for component in triplet.to_array() {
                bytes.write_u32::<LittleEndian>(component).ok();
            }
        }
        for buffer in [&self.positions, &self.normals] {
            for vector in buffer {
                for component in vector.to_array() {
                    bytes.write_f32::<LittleEndian>(component).ok();
                }
            }
        }
        for vector in &self.tex_coords {
            for component in vector.to_array() {
                bytes.write_f32::<LittleEndian>(component).ok();
            }
        }

        bytes
    }

    fn from_bytes(bytes: &[u8]) -> CacheResult<Self> {
        let mut cursor = Cursor::new(bytes);
        let read_u32 = |cursor: &mut Cursor<&[u8]>| {
            cursor
                .read_u32::<LittleEndian>()
                .map_err(|err| CacheError::SerializerIo(format!("truncated mesh data: {err}")))
        };

        let num_indices = read_u32(&mut cursor)? as usize;
        let num_positions = read_u32(&mut cursor)? as usize;
        let num_normals = read_u32(&mut cursor)? as usize;
        let num_tex_coords = read_u32(&mut cursor)? as usize;

        let read_f32 = |cursor: &mut Cursor<&[u8]>| {
            cursor
                .read_f32::<LittleEndian>()
                .map_err(|err| CacheError::SerializerIo(format!("truncated mesh data: {err}")))
        };

        let mut indices = Vec::with_capacity(num_indices);
        for _ in 0..num_indices {
            let mut triplet = [0_u32; 3];
            for component in &mut triplet {
                *component = cursor.read_u32::<LittleEndian>().map_err(|err| {
                    CacheError::SerializerIo(format!("truncated mesh data: {err}"))
                })?;
            }
            indices.push(UVec3::from_array(triplet));
        }

        let read_vec3s = |cursor: &mut Cursor<&[u8]>, count: usize| -> CacheResult<Vec<Vec3>> {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                let x = read_f32(cursor)?;
                let y = read_f32(cursor)?;
                let z = read_f32(cursor)?;
                out.push(Vec3::new(x, y, z));
            }
            Ok(out)
        };

        let positions = read_vec3s(&mut cursor, num_positions)?;
        let normals = read_vec3s(&mut cursor, num_normals)?;

        let mut tex_coords = Vec::with_capacity(num_tex_coords);
        for _ in 0..num_tex_coords {
            let u = read_f32(&mut cursor)?;
            let v = read_f32(&mut cursor)?;
            tex_coords.push(Vec2::new(u, v));
        }

        Ok(Self {
            indices,
            positions,
            normals,
            tex_coords,
        })
    }
}

// ---

/// Resident: the shape owns its buffers. Evicted: whoever pinned the buffers
/// owns them; the weak handle re-attaches as long as any pin is alive.
enum Residency {
    Owned(Arc<MeshData>),
    Evicted(Weak<MeshData>),
}

struct ResidencyState {
    residency: Residency,
    allocation: Option<Allocation>,
}

/// An indexed triangle mesh; the one concrete shape the traversal core
/// exercises.
pub struct TriangleShape {
    bounds: Aabb,
    num_primitives: u32,
    state: RwLock<ResidencyState>,
}

/// A cloned snapshot of the resident buffers; test & tooling surface.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshBuffers {
    pub indices: Vec<UVec3>,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tex_coords: Vec<Vec2>,
}

impl TriangleShape {
    /// `normals` and `tex_coords` are optional: pass empty vectors, or one
    /// entry per position.
    pub fn new(
        indices: Vec<UVec3>,
        positions: Vec<Vec3>,
        normals: Vec<Vec3>,
        tex_coords: Vec<Vec2>,
    ) -> Self {
        debug_assert!(normals.is_empty() || normals.len() == positions.len());
        debug_assert!(tex_coords.is_empty() || tex_coords.len() == positions.len());

        let bounds = Aabb::from_points(positions.iter().copied());
        let num_primitives = indices.len() as u32;

        Self {
            bounds,
            num_primitives,
            state: RwLock::new(ResidencyState {
                residency: Residency::Owned(Arc::new(MeshData {
                    indices,
                    positions,
                    normals,
                    tex_coords,
                })),
                allocation: None,
            }),
        }
    }

    /// A copy with `transform` baked into the vertex data.
    ///
    /// `None` if the shape is evicted and nothing pins it.
    pub fn transformed(&self, transform: &Mat4) -> Option<Self> {
        let mesh = self.mesh()?;

        let normal_matrix = Mat3::from_mat4(transform.inverse().transpose());
        let positions = mesh
            .positions
            .iter()
            .map(|&p| transform.transform_point3(p))
            .collect();
        let normals = mesh
            .normals
            .iter()
            .map(|&n| (normal_matrix * n).normalize_or_zero())
            .collect();

        Some(Self::new(
            mesh.indices.clone(),
            positions,
            normals,
            mesh.tex_coords.clone(),
        ))
    }

    /// A new shape holding only the given primitives (vertices remapped).
    ///
    /// `None` if the shape is evicted and nothing pins it.
    pub fn sub_shape(&self, primitive_indices: &[u32]) -> Option<Self> {
        let mesh = self.mesh()?;

        let mut remap = vec![u32::MAX; mesh.positions.len()];
        let mut positions = Vec::new();
        let mut normals = Vec::new();
        let mut tex_coords = Vec::new();
        let mut indices = Vec::with_capacity(primitive_indices.len());

        for &primitive_index in primitive_indices {
            let triplet = mesh.indices[primitive_index as usize];
            let mut remapped = [0_u32; 3];
            for (slot, old_index) in remapped.iter_mut().zip(triplet.to_array()) {
                let old_index = old_index as usize;
                if remap[old_index] == u32::MAX {
                    remap[old_index] = positions.len() as u32;
                    positions.push(mesh.positions[old_index]);
                    if !mesh.normals.is_empty() {
                        normals.push(mesh.normals[old_index]);
                    }
                    if !mesh.tex_coords.is_empty() {
                        tex_coords.push(mesh.tex_coords[old_index]);
                    }
                }
                *slot = remap[old_index];
            }
            indices.push(UVec3::from_array(remapped));
        }

        Some(Self::new(indices, positions, normals, tex_coords))
    }

    /// Cloned snapshot of the resident buffers, if resident.
    pub fn buffers(&self) -> Option<MeshBuffers> {
        let mesh = self.mesh()?;
        Some(MeshBuffers {
            indices: mesh.indices.clone(),
            positions: mesh.positions.clone(),
            normals: mesh.normals.clone(),
            tex_coords: mesh.tex_coords.clone(),
        })
    }

    fn mesh(&self) -> Option<Arc<MeshData>> {
        match &self.state.read().residency {
            Residency::Owned(mesh) => Some(mesh.clone()),
            Residency::Evicted(weak) => weak.upgrade(),
        }
    }

    fn triangle(&self, mesh: &MeshData, primitive_index: u32) -> [Vec3; 3] {
        let triplet = mesh.indices[primitive_index as usize];
        [
            mesh.positions[triplet.x as usize],
            mesh.positions[triplet.y as usize],
            mesh.positions[triplet.z as usize],
        ]
    }
}

// ---

#[inline]
fn permute(v: Vec3, kx: usize, ky: usize, kz: usize) -> Vec3 {
    Vec3::new(v[kx], v[ky], v[kz])
}

/// Watertight ray/triangle intersection, honoring the ray's
/// `t_near..t_far` interval.
///
/// The vertices are sheared into a frame where the ray travels +z and the
/// hit test reduces to 2D edge functions. Edge functions that come out
/// exactly zero are re-evaluated in double precision, so a ray crossing an
/// edge shared by two triangles registers against at least one of them —
/// no cracks between adjacent primitives.
fn intersect_triangle(ray: &Ray, p0: Vec3, p1: Vec3, p2: Vec3) -> Option<PrimitiveHit> {
    // Vertices relative to the ray origin, with the dominant direction
    // component permuted into z.
    let abs_direction = ray.direction.abs();
    let kz = if abs_direction.x >= abs_direction.y && abs_direction.x >= abs_direction.z {
        0
    } else if abs_direction.y >= abs_direction.z {
        1
    } else {
        2
    };
    let kx = (kz + 1) % 3;
    let ky = (kx + 1) % 3;

    let d = permute(ray.direction, kx, ky, kz);
    if d.z == 0.0 {
        return None; // degenerate direction
    }
    let mut p0t = permute(p0 - ray.origin, kx, ky, kz);
    let mut p1t = permute(p1 - ray.origin, kx, ky, kz);
    let mut p2t = permute(p2 - ray.origin, kx, ky, kz);

    // Shear so the ray becomes (0, 0, 1).
    let sx = -d.x / d.z;
    let sy = -d.y / d.z;
    let sz = 1.0 / d.z;
    p0t.x += sx * p0t.z;
    p0t.y += sy * p0t.z;
    p1t.x += sx * p1t.z;
    p1t.y += sy * p1t.z;
    p2t.x += sx * p2t.z;
    p2t.y += sy * p2t.z;

    // 2D edge functions around the origin.
    let mut e0 = p1t.x * p2t.y - p1t.y * p2t.x;
    let mut e1 = p2t.x * p0t.y - p2t.y * p0t.x;
    let mut e2 = p0t.x * p1t.y - p0t.y * p1t.x;

    // Exact-zero ties (the ray hitting an edge dead on) decide in f64.
    if e0 == 0.0 || e1 == 0.0 || e2 == 0.0 {
        e0 = (f64::from(p1t.x) * f64::from(p2t.y) - f64::from(p1t.y) * f64::from(p2t.x)) as f32;
        e1 = (f64::from(p2t.x) * f64::from(p0t.y) - f64::from(p2t.y) * f64::from(p0t.x)) as f32;
        e2 = (f64::from(p0t.x) * f64::from(p1t.y) - f64::from(p0t.y) * f64::from(p1t.x)) as f32;
    }

    if (e0 < 0.0 || e1 < 0.0 || e2 < 0.0) && (e0 > 0.0 || e1 > 0.0 || e2 > 0.0) {
        return None; // origin outside the triangle
    }
    let det = e0 + e1 + e2;
    if det == 0.0 {
        return None; // edge-on
    }

    // Scaled hit distance; compare against the interval before dividing so
    // the sign of `det` never flips the test.
    p0t.z *= sz;
    p1t.z *= sz;
    p2t.z *= sz;
    let t_scaled = e0 * p0t.z + e1 * p1t.z + e2 * p2t.z;
    if det < 0.0 && (t_scaled >= 0.0 || t_scaled < ray.t_far * det) {
        return None;
    }
    if det > 0.0 && (t_scaled <= 0.0 || t_scaled > ray.t_far * det) {
        return None;
    }

    let inv_det = 1.0 / det;
    let t = t_scaled * inv_det;
    if t <= ray.t_near || t >= ray.t_far {
        return None;
    }

    Some(PrimitiveHit {
        t,
        u: e1 * inv_det,
        v: e2 * inv_det,
    })
}

impl Shape for TriangleShape {
    fn bounds(&self) -> Aabb {
        self.bounds
    }

    fn num_primitives(&self) -> u32 {
        self.num_primitives
    }

    fn primitive_bounds(&self, primitive_index: u32) -> Aabb {
        match self.mesh() {
            Some(mesh) => Aabb::from_points(self.triangle(&mesh, primitive_index)),
            None => {
                pyr_log::error_once!("primitive bounds requested from an evicted shape");
                Aabb::EMPTY
            }
        }
    }

    fn intersect_primitive(&self, ray: &Ray, primitive_index: u32) -> Option<PrimitiveHit> {
        let mesh = self.mesh()?;
        let [p0, p1, p2] = self.triangle(&mesh, primitive_index);
        intersect_triangle(ray, p0, p1, p2)
    }

    fn fill_surface_interaction(
        &self,
        ray: &Ray,
        hit: &PrimitiveHit,
        primitive_index: u32,
    ) -> SurfaceInteraction {
        let position = ray.at(hit.t);
        let wo = -ray.direction.normalize_or_zero();

        let Some(mesh) = self.mesh() else {
            pyr_log::error_once!("surface interaction requested from an evicted shape");
            return SurfaceInteraction {
                position,
                geometric_normal: wo,
                shading_normal: wo,
                uv: Vec2::new(hit.u, hit.v),
                wo,
            };
        };

        let [p0, p1, p2] = self.triangle(&mesh, primitive_index);
        let geometric_normal = (p1 - p0).cross(p2 - p0).normalize_or_zero();

        let triplet = mesh.indices[primitive_index as usize];
        let w = 1.0 - hit.u - hit.v;

        let shading_normal = if mesh.normals.is_empty() {
            geometric_normal
        } else {
            (w * mesh.normals[triplet.x as usize]
                + hit.u * mesh.normals[triplet.y as usize]
                + hit.v * mesh.normals[triplet.z as usize])
                .normalize_or_zero()
        };

        let uv = if mesh.tex_coords.is_empty() {
            Vec2::new(hit.u, hit.v)
        } else {
            w * mesh.tex_coords[triplet.x as usize]
                + hit.u * mesh.tex_coords[triplet.y as usize]
                + hit.v * mesh.tex_coords[triplet.z as usize]
        };

        SurfaceInteraction {
            position,
            geometric_normal,
            shading_normal,
            uv,
            wo,
        }
    }

    fn is_resident(&self) -> bool {
        self.mesh().is_some()
    }

    fn pin_resident(&self, source: &dyn Deserializer) -> CacheResult<ShapePin> {
        if let Some(mesh) = self.mesh() {
            let size_bytes = mesh.heap_size_bytes();
            return Ok(ShapePin::new(mesh, size_bytes));
        }

        let mut state = self.state.write();

        // Another pinner may have rebuilt while we waited for the lock.
        if let Residency::Evicted(weak) = &state.residency {
            if let Some(mesh) = weak.upgrade() {
                let size_bytes = mesh.heap_size_bytes();
                return Ok(ShapePin::new(mesh, size_bytes));
            }
        }

        let allocation = state.allocation.ok_or_else(|| {
            CacheError::SerializerIo("shape was evicted but never serialized".to_owned())
        })?;
        let bytes = source.load(allocation)?;
        let mesh = Arc::new(MeshData::from_bytes(&bytes)?);

        // The pin owns the buffers; the shape only watches them.
        state.residency = Residency::Evicted(Arc::downgrade(&mesh));

        let size_bytes = mesh.heap_size_bytes();
        Ok(ShapePin::new(mesh, size_bytes))
    }
}

impl Cacheable for TriangleShape {
    fn size_bytes(&self) -> u64 {
        self.mesh().map_or(0, |mesh| mesh.heap_size_bytes())
    }

    fn serialize(&self, out: &dyn Serializer) -> CacheResult<Allocation> {
        let mesh = self.mesh().ok_or_else(|| {
            CacheError::SerializerIo("cannot serialize an evicted shape".to_owned())
        })?;

        let allocation = out.store(&mesh.to_bytes());
        self.state.write().allocation = Some(allocation);
        Ok(allocation)
    }

    fn evict(&self) {
        let mut state = self.state.write();
        if state.allocation.is_none() {
            pyr_log::warn_once!("refusing to evict a shape that was never serialized");
            return;
        }
        let downgraded = match &state.residency {
            Residency::Owned(mesh) => Some(Arc::downgrade(mesh)),
            Residency::Evicted(_) => None,
        };
        if let Some(weak) = downgraded {
            // Existing pins (and nothing else) keep the buffers alive now.
            state.residency = Residency::Evicted(weak);
        }
    }

    fn make_resident(&self, source: &dyn Deserializer) -> CacheResult<()> {
        let mut state = self.state.write();

        let upgraded = match &state.residency {
            Residency::Owned(_) => return Ok(()),
            Residency::Evicted(weak) => weak.upgrade(),
        };
        if let Some(mesh) = upgraded {
            state.residency = Residency::Owned(mesh);
            return Ok(());
        }

        let allocation = state.allocation.ok_or_else(|| {
            CacheError::SerializerIo("shape was evicted but never serialized".to_owned())
        })?;
        let bytes = source.load(allocation)?;
        state.residency = Residency::Owned(Arc::new(MeshData::from_bytes(&bytes)?));
        Ok(())
    }
}

// ---
