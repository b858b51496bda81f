//! Mesh assets and meshlet building.
//!
//! A [`MeshAsset`] is split into meshlets per sub-mesh when it is created, so
//! every meshlet belongs to exactly one material slot. Meshlets are built
//! greedily in index order: a meshlet is closed as soon as the next triangle
//! would exceed [`MESHLET_MAX_VERTICES`] or [`MESHLET_MAX_TRIANGLES`].

use glam::{Vec2, Vec3};
use rustc_hash::FxHashMap;

use crate::gpu_types::{MESHLET_MAX_TRIANGLES, MESHLET_MAX_VERTICES, pack_triangle};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    #[must_use]
    pub const fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

/// A contiguous index range drawn with one material slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubMesh {
    pub index_start: u32,
    pub index_count: u32,
    pub material_slot: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Meshlet {
    pub center: Vec3,
    pub radius: f32,
    /// Offset into [`MeshAsset::meshlet_vertices`].
    pub vertex_offset: u32,
    /// Offset into [`MeshAsset::meshlet_triangles`].
    pub triangle_offset: u32,
    pub vertex_count: u32,
    pub triangle_count: u32,
    pub material_slot: u32,
}

#[derive(Debug, Clone)]
pub struct MeshAsset {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub sub_meshes: Vec<SubMesh>,
    pub meshlets: Vec<Meshlet>,
    /// Meshlet-local vertex -> mesh vertex.
    pub meshlet_vertices: Vec<u32>,
    /// One packed word per triangle (see [`pack_triangle`]).
    pub meshlet_triangles: Vec<u32>,
    pub bounding_center: Vec3,
    pub bounding_radius: f32,
}

impl MeshAsset {
    /// Builds a mesh with one sub-mesh covering all indices.
    #[must_use]
    pub fn new(name: impl Into<String>, vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        let sub_meshes = vec![SubMesh {
            index_start: 0,
            index_count: indices.len() as u32,
            material_slot: 0,
        }];
        Self::with_sub_meshes(name, vertices, indices, sub_meshes)
    }

    /// Builds a mesh and its meshlets. Trailing indices that do not form a full
    /// triangle and triangles referencing missing vertices are dropped.
    #[must_use]
    pub fn with_sub_meshes(
        name: impl Into<String>,
        vertices: Vec<Vertex>,
        indices: Vec<u32>,
        sub_meshes: Vec<SubMesh>,
    ) -> Self {
        let name = name.into();
        let (bounding_center, bounding_radius) =
            bounding_sphere(vertices.iter().map(|v| v.position));

        let mut builder = MeshletBuilder::new(&vertices);
        builder.build(&name, &indices, &sub_meshes);
        let MeshletBuilder {
            meshlets,
            meshlet_vertices,
            meshlet_triangles,
            ..
        } = builder;

        Self {
            name,
            vertices,
            indices,
            sub_meshes,
            meshlets,
            meshlet_vertices,
            meshlet_triangles,
            bounding_center,
            bounding_radius,
        }
    }

    #[must_use]
    pub fn triangle_count(&self) -> u32 {
        self.meshlets.iter().map(|m| m.triangle_count).sum()
    }

    #[must_use]
    pub fn material_slot_count(&self) -> u32 {
        self.sub_meshes
            .iter()
            .map(|s| s.material_slot + 1)
            .max()
            .unwrap_or(0)
    }
}

struct MeshletBuilder<'v> {
    positions: &'v [Vertex],
    local: FxHashMap<u32, u32>,
    vertices: Vec<u32>,
    triangles: Vec<u32>,
    material_slot: u32,
    meshlets: Vec<Meshlet>,
    meshlet_vertices: Vec<u32>,
    meshlet_triangles: Vec<u32>,
}

impl<'v> MeshletBuilder<'v> {
    fn new(positions: &'v [Vertex]) -> Self {
        Self {
            positions,
            local: FxHashMap::default(),
            vertices: Vec::with_capacity(MESHLET_MAX_VERTICES as usize),
            triangles: Vec::with_capacity(MESHLET_MAX_TRIANGLES as usize),
            material_slot: 0,
            meshlets: Vec::new(),
            meshlet_vertices: Vec::new(),
            meshlet_triangles: Vec::new(),
        }
    }

    fn build(&mut self, name: &str, indices: &[u32], sub_meshes: &[SubMesh]) {
        let vertex_count = self.positions.len() as u32;

        for sub_mesh in sub_meshes {
            let start = sub_mesh.index_start as usize;
            let end = start.saturating_add(sub_mesh.index_count as usize);
            let Some(range) = indices.get(start..end) else {
                log::warn!("Mesh '{name}': sub-mesh range {start}..{end} is out of bounds");
                continue;
            };

            for tri in range.chunks_exact(3) {
                if tri.iter().any(|&i| i >= vertex_count) {
                    log::warn!("Mesh '{name}': dropping triangle with invalid index");
                    continue;
                }
                self.push([tri[0], tri[1], tri[2]], sub_mesh.material_slot);
            }
            self.flush();
        }
    }

    fn push(&mut self, tri: [u32; 3], material_slot: u32) {
        let new_vertices = tri
            .iter()
            .enumerate()
            .filter(|&(i, v)| !self.local.contains_key(v) && !tri[..i].contains(v))
            .count() as u32;

        let full = self.vertices.len() as u32 + new_vertices > MESHLET_MAX_VERTICES
            || self.triangles.len() as u32 >= MESHLET_MAX_TRIANGLES;
        if full || material_slot != self.material_slot {
            self.flush();
        }
        self.material_slot = material_slot;

        let mut local = [0u32; 3];
        for (slot, &v) in local.iter_mut().zip(tri.iter()) {
            let next = self.vertices.len() as u32;
            *slot = *self.local.entry(v).or_insert(next);
            if *slot == next {
                self.vertices.push(v);
            }
        }
        self.triangles.push(pack_triangle(local[0], local[1], local[2]));
    }

    fn flush(&mut self) {
        if self.triangles.is_empty() {
            return;
        }

        let positions = self.positions;
        let (center, radius) =
            bounding_sphere(self.vertices.iter().map(|&v| positions[v as usize].position));

        self.meshlets.push(Meshlet {
            center,
            radius,
            vertex_offset: self.meshlet_vertices.len() as u32,
            triangle_offset: self.meshlet_triangles.len() as u32,
            vertex_count: self.vertices.len() as u32,
            triangle_count: self.triangles.len() as u32,
            material_slot: self.material_slot,
        });
        self.meshlet_vertices.append(&mut self.vertices);
        self.meshlet_triangles.append(&mut self.triangles);
        self.local.clear();
    }
}

/// Sphere around the AABB center enclosing every point.
fn bounding_sphere(points: impl Iterator<Item = Vec3> + Clone) -> (Vec3, f32) {
    let mut min = Vec3::splat(f32::MAX);
    let mut max = Vec3::splat(f32::MIN);
    let mut any = false;
    for p in points.clone() {
        min = min.min(p);
        max = max.max(p);
        any = true;
    }
    if !any {
        return (Vec3::ZERO, 0.0);
    }
    let center = (min + max) * 0.5;
    let radius = points.map(|p| p.distance(center)).fold(0.0f32, f32::max);
    (center, radius)
}

// ============================================================================
// Procedural Meshes
// ============================================================================

impl MeshAsset {
    /// Axis-aligned rectangle in the XY plane facing +Z, spanning `min..max`.
    #[must_use]
    pub fn quad(name: impl Into<String>, min: Vec2, max: Vec2) -> Self {
        let n = Vec3::Z;
        let vertices = vec![
            Vertex::new(Vec3::new(min.x, min.y, 0.0), n, Vec2::new(0.0, 1.0)),
            Vertex::new(Vec3::new(max.x, min.y, 0.0), n, Vec2::new(1.0, 1.0)),
            Vertex::new(Vec3::new(max.x, max.y, 0.0), n, Vec2::new(1.0, 0.0)),
            Vertex::new(Vec3::new(min.x, max.y, 0.0), n, Vec2::new(0.0, 0.0)),
        ];
        Self::new(name, vertices, vec![0, 1, 2, 0, 2, 3])
    }

    /// Single triangle facing +Z (counter-clockwise seen from +Z).
    #[must_use]
    pub fn triangle(name: impl Into<String>, a: Vec3, b: Vec3, c: Vec3) -> Self {
        let n = Vec3::Z;
        let vertices = vec![
            Vertex::new(a, n, Vec2::ZERO),
            Vertex::new(b, n, Vec2::X),
            Vertex::new(c, n, Vec2::Y),
        ];
        Self::new(name, vertices, vec![0, 1, 2])
    }

    /// Axis-aligned cube centered at the origin.
    #[must_use]
    pub fn cube(name: impl Into<String>, size: f32) -> Self {
        let h = size * 0.5;
        let faces = [
            (Vec3::X, Vec3::Y),
            (Vec3::NEG_X, Vec3::Y),
            (Vec3::Y, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::Z),
            (Vec3::Z, Vec3::Y),
            (Vec3::NEG_Z, Vec3::Y),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, up) in faces {
            let right = up.cross(normal);
            let base = vertices.len() as u32;
            for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
                let p = normal * h + right * (u * 2.0 - 1.0) * h + up * (v * 2.0 - 1.0) * h;
                vertices.push(Vertex::new(p, normal, Vec2::new(u, 1.0 - v)));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self::new(name, vertices, indices)
    }

    /// UV sphere centered at the origin.
    #[must_use]
    pub fn uv_sphere(name: impl Into<String>, radius: f32, segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);

        let mut vertices = Vec::with_capacity(((segments + 1) * (rings + 1)) as usize);
        for r in 0..=rings {
            let v = r as f32 / rings as f32;
            let theta = v * std::f32::consts::PI;
            for s in 0..=segments {
                let u = s as f32 / segments as f32;
                let phi = u * std::f32::consts::TAU;
                let n = Vec3::new(theta.sin() * phi.cos(), theta.cos(), -theta.sin() * phi.sin());
                vertices.push(Vertex::new(n * radius, n, Vec2::new(u, v)));
            }
        }

        let mut indices = Vec::with_capacity((segments * rings * 6) as usize);
        let stride = segments + 1;
        for r in 0..rings {
            for s in 0..segments {
                let a = r * stride + s;
                let b = a + stride;
                indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
            }
        }
        Self::new(name, vertices, indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu_types::unpack_triangle;

    #[test]
    fn quad_is_one_meshlet() {
        let mesh = MeshAsset::quad("quad", Vec2::ZERO, Vec2::ONE);
        assert_eq!(mesh.meshlets.len(), 1);
        assert_eq!(mesh.meshlets[0].triangle_count, 2);
        assert_eq!(mesh.meshlets[0].vertex_count, 4);
    }

    #[test]
    fn meshlets_respect_limits_and_cover_every_triangle() {
        let mesh = MeshAsset::uv_sphere("sphere", 1.0, 32, 16);
        let expected_triangles = (mesh.indices.len() / 3) as u32;
        assert_eq!(mesh.triangle_count(), expected_triangles);
        assert!(mesh.meshlets.len() > 1);

        for m in &mesh.meshlets {
            assert!(m.vertex_count <= MESHLET_MAX_VERTICES);
            assert!(m.triangle_count <= MESHLET_MAX_TRIANGLES);
            for t in 0..m.triangle_count {
                let word = mesh.meshlet_triangles[(m.triangle_offset + t) as usize];
                for local in unpack_triangle(word) {
                    assert!(local < m.vertex_count, "local index escapes meshlet");
                }
            }
        }
    }

    #[test]
    fn meshlet_spheres_enclose_their_vertices() {
        let mesh = MeshAsset::cube("cube", 2.0);
        for m in &mesh.meshlets {
            for i in 0..m.vertex_count {
                let v = mesh.meshlet_vertices[(m.vertex_offset + i) as usize];
                let p = mesh.vertices[v as usize].position;
                assert!(p.distance(m.center) <= m.radius + 1e-5);
            }
        }
    }

    #[test]
    fn sub_meshes_never_share_meshlets() {
        let base = MeshAsset::quad("q", Vec2::ZERO, Vec2::ONE);
        let mesh = MeshAsset::with_sub_meshes(
            "two",
            base.vertices.clone(),
            base.indices.clone(),
            vec![
                SubMesh {
                    index_start: 0,
                    index_count: 3,
                    material_slot: 0,
                },
                SubMesh {
                    index_start: 3,
                    index_count: 3,
                    material_slot: 1,
                },
            ],
        );
        assert_eq!(mesh.meshlets.len(), 2);
        assert_eq!(mesh.meshlets[0].material_slot, 0);
        assert_eq!(mesh.meshlets[1].material_slot, 1);
        assert_eq!(mesh.material_slot_count(), 2);
    }
}
