//! Visibility Pipeline
//!
//! The passes that turn the packed render scene into a shaded image. Every
//! stage is a `GraphPass`: a `setup` function declares resources through the
//! `PassBuilder` and returns a `Copy` pass-data struct, whose `execute` step
//! records commands using the read-only `PassResources` table.
//!
//! ```text
//! Upload ─► Object Cull ─► Meshlet Cull Args ─► Meshlet Cull ─► Compaction Args ─► Primitive Compaction
//!                                                                                        │
//!                     ┌──────────────────────────────┬───────────────────────────────────┤
//!                     ▼                              ▼                                   ▼
//!                  Shadow                        Pre-Depth ─────────────────────► Visibility
//!                     │                              │                                   │
//!                     │                              │     Material Count ◄──────────────┘
//!                     │                              │           │
//!                     │                              │     Material Prefix Sum ─► Pixel Collect ─► Material Args
//!                     │                              │                                                 │
//!                     │                              ├──► GTAO Prefilter ─► GTAO Main ─► GTAO Denoise  │
//!                     │                              │                                       │        ▼
//!                     └──────────────────────────────┴──────────────► Shading ◄──────────────┴──── GBuffer
//!                                                                           │
//!                                                         Skybox (with a radiance cube)
//!                                                                           │
//!                                                                           ▼
//!                                                                  Present Transition
//! ```

pub mod culling;
pub mod gbuffer;
pub mod gtao;
pub mod indirect_args;
pub mod material_sort;
pub mod prefix_sum;
pub mod scene_buffers;
pub mod shading;
pub mod shadow;
pub mod skybox;
pub mod stats;
pub mod uniforms;
pub mod visibility;

use crate::command::GeometryBindings;
use crate::graph::{Access, BufferHandle, PassBuilder, PassResources};

/// Pass names, as reported by `FrameReport::passes`.
pub mod names {
    pub const UPLOAD: &str = "Upload";
    pub const OBJECT_CULL: &str = "Object Cull";
    pub const MESHLET_CULL_ARGS: &str = "Meshlet Cull Args";
    pub const MESHLET_CULL: &str = "Meshlet Cull";
    pub const COMPACTION_ARGS: &str = "Compaction Args";
    pub const PRIMITIVE_COMPACTION: &str = "Primitive Compaction";
    pub const SHADOW: &str = "Shadow";
    pub const PRE_DEPTH: &str = "Pre-Depth";
    pub const VISIBILITY: &str = "Visibility";
    pub const MATERIAL_COUNT: &str = "Material Count";
    pub const MATERIAL_PREFIX_SUM: &str = "Material Prefix Sum";
    pub const PIXEL_COLLECT: &str = "Pixel Collect";
    pub const MATERIAL_ARGS: &str = "Material Args";
    pub const GBUFFER: &str = "GBuffer";
    pub const GTAO_PREFILTER: &str = "GTAO Prefilter";
    pub const GTAO_MAIN: &str = "GTAO Main";
    pub const GTAO_DENOISE: &str = "GTAO Denoise";
    pub const SHADING: &str = "Shading";
    pub const SKYBOX: &str = "Skybox";
    pub const READ_STATISTICS: &str = "Read Statistics";
    pub const CLEAR_OUTPUT: &str = "Clear Output";
    /// Last pass of every frame: moves the final image to its presentable layout.
    pub const PRESENT: &str = "Present Transition";

    /// Every pass that only runs when the scene has render objects.
    pub const SCENE_PASSES: [&str; 15] = [
        OBJECT_CULL,
        MESHLET_CULL_ARGS,
        MESHLET_CULL,
        COMPACTION_ARGS,
        PRIMITIVE_COMPACTION,
        SHADOW,
        PRE_DEPTH,
        VISIBILITY,
        MATERIAL_COUNT,
        MATERIAL_PREFIX_SUM,
        PIXEL_COLLECT,
        MATERIAL_ARGS,
        GBUFFER,
        SHADING,
        SKYBOX,
    ];
}

/// Resource labels of the frame's transient resources, usable with
/// `FrameReport::buffer` / `FrameReport::image`.
pub mod labels {
    pub const FRAME_UNIFORMS: &str = "Frame Uniforms";
    pub const SHADOW_UNIFORMS: &str = "Shadow Uniforms";
    pub const DIRECTIONAL_LIGHTS: &str = "Directional Lights";
    pub const POINT_LIGHTS: &str = "Point Lights";
    pub const SPOT_LIGHTS: &str = "Spot Lights";
    pub const MESHLET_MAPPING: &str = "Meshlet Mapping";
    pub const MESHLET_MAPPING_COUNT: &str = "Meshlet Mapping Count";
    pub const CULL_STATISTICS: &str = "Cull Statistics";
    pub const MESHLET_CULL_ARGS: &str = "Meshlet Cull Args";
    pub const SURVIVING_MESHLETS: &str = "Surviving Meshlets";
    pub const SURVIVING_COUNT: &str = "Surviving Meshlet Count";
    pub const COMPACTION_ARGS: &str = "Compaction Args";
    pub const COMPACTED_INDICES: &str = "Compacted Indices";
    pub const DRAW_ARGS: &str = "Draw Args";
    pub const DEPTH: &str = "Scene Depth";
    pub const VIEW_NORMALS: &str = "View Normals";
    pub const VISIBILITY: &str = "Visibility Buffer";
    pub const MATERIAL_COUNT: &str = "Material Count";
    pub const MATERIAL_START: &str = "Material Start";
    pub const MATERIAL_CURSOR: &str = "Material Cursor";
    pub const PIXEL_COLLECTION: &str = "Pixel Collection";
    pub const MATERIAL_ARGS: &str = "Material Args";
    pub const GBUFFER_ALBEDO: &str = "GBuffer Albedo";
    pub const GBUFFER_MATERIAL: &str = "GBuffer Material";
    pub const GBUFFER_NORMAL: &str = "GBuffer Normal";
    pub const GTAO_DEPTH_MIPS: &str = "GTAO Depth Mips";
    pub const GTAO_TERM: &str = "GTAO Term";
    pub const GTAO_EDGES: &str = "GTAO Edges";
    pub const GTAO_OUTPUT: &str = "GTAO Output";
    pub const SHADOW_MAP: &str = "Shadow Map";
    pub const FINAL_IMAGE: &str = "Final Image";
}

/// Graph handles of the imported, persistent scene buffers.
#[derive(Debug, Clone, Copy)]
pub struct SceneHandles {
    pub header: BufferHandle,
    pub objects: BufferHandle,
    pub meshes: BufferHandle,
    pub meshlets: BufferHandle,
    pub meshlet_vertices: BufferHandle,
    pub meshlet_triangles: BufferHandle,
    pub vertices: BufferHandle,
    pub material_table: BufferHandle,
    pub materials: BufferHandle,
}

/// Everything a vertex-pulling raster draw of the compacted geometry reads.
#[derive(Debug, Clone, Copy)]
pub struct GeometryHandles {
    pub objects: BufferHandle,
    pub meshes: BufferHandle,
    pub meshlets: BufferHandle,
    pub meshlet_vertices: BufferHandle,
    pub meshlet_triangles: BufferHandle,
    pub vertices: BufferHandle,
    pub surviving: BufferHandle,
    pub indices: BufferHandle,
    pub draw_args: BufferHandle,
}

impl GeometryHandles {
    #[must_use]
    pub fn new(scene: &SceneHandles, surviving: BufferHandle, indices: BufferHandle, draw_args: BufferHandle) -> Self {
        Self {
            objects: scene.objects,
            meshes: scene.meshes,
            meshlets: scene.meshlets,
            meshlet_vertices: scene.meshlet_vertices,
            meshlet_triangles: scene.meshlet_triangles,
            vertices: scene.vertices,
            surviving,
            indices,
            draw_args,
        }
    }

    pub fn declare_raster_reads(&self, builder: &mut PassBuilder<'_, '_>) {
        for buffer in [
            self.objects,
            self.meshes,
            self.meshlets,
            self.meshlet_vertices,
            self.meshlet_triangles,
            self.vertices,
            self.surviving,
        ] {
            builder.read_storage(buffer);
        }
        builder.read_buffer(self.indices, Access::IndexBuffer);
        builder.read_buffer(self.draw_args, Access::IndirectArgs);
    }

    #[must_use]
    pub fn bindings(&self, resources: &PassResources<'_>) -> GeometryBindings {
        GeometryBindings {
            objects: resources.buffer(self.objects),
            meshes: resources.buffer(self.meshes),
            meshlets: resources.buffer(self.meshlets),
            meshlet_vertices: resources.buffer(self.meshlet_vertices),
            meshlet_triangles: resources.buffer(self.meshlet_triangles),
            vertices: resources.buffer(self.vertices),
            surviving: resources.buffer(self.surviving),
        }
    }
}
