//! GPU record layouts shared by the scene builder, the shaders and the software device.
//!
//! Every struct is `#[repr(C)]`, `Pod`, and a multiple of 16 bytes so the same
//! bytes can be bound as WGSL storage arrays without extra padding rules.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// Maximum vertices referenced by one meshlet.
pub const MESHLET_MAX_VERTICES: u32 = 64;
/// Maximum triangles in one meshlet.
pub const MESHLET_MAX_TRIANGLES: u32 = 64;

/// Bits of a compacted index value holding the meshlet-local vertex.
pub const INDEX_VERTEX_BITS: u32 = 6;
/// Bits of a compacted index value (and visibility texel) holding the triangle.
pub const INDEX_TRIANGLE_BITS: u32 = 6;
/// Bits holding the surviving-meshlet slot.
pub const SURVIVING_SLOT_BITS: u32 = 19;
/// Upper bound on meshlets a scene may contain (every one could survive).
pub const MAX_SCENE_MESHLETS: u32 = 1 << SURVIVING_SLOT_BITS;

/// Background sentinel of the visibility buffer.
pub const VISIBILITY_BACKGROUND: u32 = u32::MAX;

/// Packs a compacted index value: `slot << 12 | triangle << 6 | local_vertex`.
#[inline]
#[must_use]
pub const fn encode_compacted_index(slot: u32, triangle: u32, local_vertex: u32) -> u32 {
    (slot << (INDEX_TRIANGLE_BITS + INDEX_VERTEX_BITS)) | (triangle << INDEX_VERTEX_BITS) | local_vertex
}

/// Inverse of [`encode_compacted_index`]: `(slot, triangle, local_vertex)`.
#[inline]
#[must_use]
pub const fn decode_compacted_index(value: u32) -> (u32, u32, u32) {
    let local_vertex = value & ((1 << INDEX_VERTEX_BITS) - 1);
    let triangle = (value >> INDEX_VERTEX_BITS) & ((1 << INDEX_TRIANGLE_BITS) - 1);
    let slot = value >> (INDEX_TRIANGLE_BITS + INDEX_VERTEX_BITS);
    (slot, triangle, local_vertex)
}

/// Packs a visibility texel: `slot << 6 | triangle`.
#[inline]
#[must_use]
pub const fn encode_visibility(slot: u32, triangle: u32) -> u32 {
    (slot << INDEX_TRIANGLE_BITS) | triangle
}

/// Inverse of [`encode_visibility`], `None` for background.
#[inline]
#[must_use]
pub const fn decode_visibility(texel: u32) -> Option<(u32, u32)> {
    if texel == VISIBILITY_BACKGROUND {
        None
    } else {
        Some((texel >> INDEX_TRIANGLE_BITS, texel & ((1 << INDEX_TRIANGLE_BITS) - 1)))
    }
}

/// Packs three meshlet-local vertex indices into one triangle word.
#[inline]
#[must_use]
pub const fn pack_triangle(a: u32, b: u32, c: u32) -> u32 {
    a | (b << 8) | (c << 16)
}

/// Unpacks a triangle word into meshlet-local vertex indices.
#[inline]
#[must_use]
pub const fn unpack_triangle(word: u32) -> [u32; 3] {
    [word & 0xFF, (word >> 8) & 0xFF, (word >> 16) & 0xFF]
}

// ============================================================================
// Geometry
// ============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GpuVertex {
    pub position: [f32; 3],
    pub u: f32,
    pub normal: [f32; 3],
    pub v: f32,
}

/// One meshlet: bounding sphere plus ranges into the meshlet vertex/triangle streams.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GpuMeshlet {
    pub center: [f32; 3],
    pub radius: f32,
    /// First entry in the scene-wide meshlet vertex stream.
    pub vertex_offset: u32,
    /// First entry in the scene-wide meshlet triangle stream.
    pub triangle_offset: u32,
    pub vertex_count: u32,
    pub triangle_count: u32,
    /// Material slot of the sub-mesh this meshlet was built from.
    pub material_local_index: u32,
    pub _pad: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuMesh {
    pub meshlet_start: u32,
    pub meshlet_count: u32,
    /// First vertex of this mesh in the scene-wide vertex buffer.
    pub vertex_offset: u32,
    /// First index (triangle * 3) of this mesh in the scene-wide triangle stream.
    pub index_offset: u32,
}

/// Per-instance record the cullers and rasterizers read.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ObjectDrawData {
    pub transform: Mat4,
    pub normal_transform: Mat4,
    /// Object-space bounding sphere (xyz center, w radius).
    pub bounding_sphere: [f32; 4],
    pub mesh_id: u32,
    pub material_table_offset: u32,
    pub object_id: u32,
    pub layer: u32,
}

impl Default for ObjectDrawData {
    fn default() -> Self {
        Self {
            transform: Mat4::IDENTITY,
            normal_transform: Mat4::IDENTITY,
            bounding_sphere: [0.0; 4],
            mesh_id: 0,
            material_table_offset: 0,
            object_id: 0,
            layer: 0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GpuMaterial {
    pub base_color: [f32; 4],
    /// rgb emissive color, w strength.
    pub emissive: [f32; 4],
    /// x metallic, y roughness, zw unused.
    pub params: [f32; 4],
}

/// Scene-wide counters ("GPU scene" buffer).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuSceneHeader {
    pub object_count: u32,
    pub mesh_count: u32,
    pub meshlet_count: u32,
    pub material_count: u32,
    pub index_count: u32,
    pub vertex_count: u32,
    pub _pad: [u32; 2],
}

// ============================================================================
// Indirect Commands
// ============================================================================

/// Layout of an indexed indirect draw.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct IndirectIndexedCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

/// Layout of an indirect dispatch.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct IndirectDispatchCommand {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sizes_are_16_byte_multiples() {
        assert_eq!(std::mem::size_of::<GpuVertex>(), 32);
        assert_eq!(std::mem::size_of::<GpuMeshlet>(), 48);
        assert_eq!(std::mem::size_of::<GpuMesh>(), 16);
        assert_eq!(std::mem::size_of::<ObjectDrawData>(), 160);
        assert_eq!(std::mem::size_of::<GpuMaterial>(), 48);
        assert_eq!(std::mem::size_of::<GpuSceneHeader>(), 32);
    }

    #[test]
    fn compacted_index_fields_do_not_overlap() {
        let value = encode_compacted_index(MAX_SCENE_MESHLETS - 1, 63, 63);
        assert_eq!(decode_compacted_index(value), (MAX_SCENE_MESHLETS - 1, 63, 63));
        assert_ne!(value, u32::MAX);
    }

    #[test]
    fn visibility_never_collides_with_background() {
        let texel = encode_visibility(MAX_SCENE_MESHLETS - 1, MESHLET_MAX_TRIANGLES - 1);
        assert_ne!(texel, VISIBILITY_BACKGROUND);
        assert_eq!(decode_visibility(texel), Some((MAX_SCENE_MESHLETS - 1, 63)));
        assert_eq!(decode_visibility(VISIBILITY_BACKGROUND), None);
    }

    #[test]
    fn triangle_words_round_trip() {
        assert_eq!(unpack_triangle(pack_triangle(1, 63, 7)), [1, 63, 7]);
    }
}
