//! Backend-neutral command stream.
//!
//! Passes never talk to a device directly; they append [`GpuCommand`]s through
//! the `RenderContext`. Each compute kernel is a typed [`Kernel`] variant that
//! names its physical bindings and carries a small `Pod` parameter block,
//! which the wgpu backend uploads to binding 0 of the kernel's bind group.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use kiln_core::{BufferId, ImageId, PipelineId};
use smallvec::SmallVec;

use crate::graph::{Access, PassKind};

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalResource {
    Buffer(BufferId),
    Image(ImageId),
}

/// Transition of one resource between two graph accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    pub resource: PhysicalResource,
    pub before: Access,
    pub after: Access,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Float([f32; 4]),
    Uint(u32),
    Depth(f32),
}

#[derive(Debug, Clone, Copy)]
pub enum GpuCommand<'a> {
    BeginPass { name: &'static str, kind: PassKind },
    EndPass,
    Barrier(Barrier),
    /// Zero-fills a whole buffer.
    ClearBuffer { buffer: BufferId },
    WriteBuffer { buffer: BufferId, offset: u64, data: &'a [u8] },
    /// Clears every layer and mip of an image.
    ClearImage { image: ImageId, value: ClearValue },
    Dispatch { kernel: Kernel, groups: [u32; 3] },
    DispatchIndirect { kernel: Kernel, args: BufferId, offset: u64 },
    Draw(RasterDraw),
    /// Copies a buffer range back to the host; payloads are returned by `submit`.
    Readback { buffer: BufferId, offset: u64, size: u64, tag: u32 },
}

/// One frame's linear command list.
#[derive(Debug, Default)]
pub struct CommandStream<'a> {
    commands: Vec<GpuCommand<'a>>,
}

impl<'a> CommandStream<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, command: GpuCommand<'a>) {
        self.commands.push(command);
    }

    #[must_use]
    pub fn commands(&self) -> &[GpuCommand<'a>] {
        &self.commands
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn barrier_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, GpuCommand::Barrier(_)))
            .count()
    }
}

// ============================================================================
// Workgroup Sizes
// ============================================================================

/// Threads per group of the object and meshlet cullers.
pub const CULL_GROUP_SIZE: u32 = 256;
/// Side of the square tile used by every full-screen kernel.
pub const SCREEN_TILE_SIZE: u32 = 8;
/// Threads per group of a material's GBuffer dispatch.
pub const MATERIAL_GROUP_SIZE: u32 = 32;
/// Threads per group of the per-material argument generator.
pub const MATERIAL_ARGS_GROUP_SIZE: u32 = 64;
/// Threads of the single-group prefix sum.
pub const PREFIX_SUM_GROUP_SIZE: u32 = 256;

// ============================================================================
// Kernel Parameters
// ============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CullParams {
    pub item_count: u32,
    pub collect_statistics: u32,
    pub _pad: [u32; 2],
}

/// `u32` slots of the culling statistics buffer.
pub const STATS_OBJECTS_TESTED: usize = 0;
pub const STATS_OBJECTS_VISIBLE: usize = 1;
pub const STATS_MESHLETS_TESTED: usize = 2;
pub const STATS_MESHLETS_VISIBLE: usize = 3;
pub const STATS_TRIANGLES_VISIBLE: usize = 4;
pub const STATS_SLOT_COUNT: usize = 8;

/// Indices are in `u32` units into the count and args buffers.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct IndirectArgsParams {
    pub group_size: u32,
    pub wrapped: u32,
    pub count_index: u32,
    pub args_index: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CompactParams {
    pub index_capacity: u32,
    pub _pad: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ScreenParams {
    pub width: u32,
    pub height: u32,
    pub material_count: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PrefixSumParams {
    pub count: u32,
    pub _pad: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MaterialArgsParams {
    pub material_count: u32,
    pub group_size: u32,
    pub _pad: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GBufferParams {
    pub material_index: u32,
    pub width: u32,
    pub height: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ShadeParams {
    pub width: u32,
    pub height: u32,
    pub shading_mode: u32,
    pub directional_count: u32,
    pub point_count: u32,
    pub spot_count: u32,
    pub shadows_enabled: u32,
    pub ao_enabled: u32,
    pub ibl_intensity: f32,
    pub visualization_mode: u32,
    pub _pad: [u32; 2],
    pub clear_color: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SkyboxParams {
    pub width: u32,
    pub height: u32,
    pub intensity: f32,
    /// Radiance mip sampled for the background.
    pub lod: f32,
}

/// View-space reconstruction and tuning constants shared by every GTAO stage.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GtaoParams {
    pub viewport_size: [u32; 2],
    pub viewport_pixel_size: [f32; 2],
    /// `(depthLinearizeMul, depthLinearizeAdd)`.
    pub depth_unpack: [f32; 2],
    pub ndc_to_view_mul: [f32; 2],
    pub ndc_to_view_add: [f32; 2],
    pub ndc_to_view_mul_x_pixel_size: [f32; 2],
    pub effect_radius: f32,
    pub effect_falloff_range: f32,
    pub radius_multiplier: f32,
    pub final_value_power: f32,
    pub denoise_blur_beta: f32,
    pub sample_distribution_power: f32,
    pub thin_occluder_compensation: f32,
    pub depth_mip_sampling_offset: f32,
    pub noise_index: u32,
    pub slice_count: u32,
    pub steps_per_slice: u32,
    pub orthographic: u32,
    /// Destination mip of the downsample kernel.
    pub mip: u32,
    pub _pad: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RasterParams {
    pub view_projection: Mat4,
    pub view: Mat4,
}

// ============================================================================
// Kernels
// ============================================================================

/// Every compute kernel the pipeline dispatches, with its physical bindings.
#[derive(Debug, Clone, Copy)]
pub enum Kernel {
    CullObjects {
        params: CullParams,
        frame: BufferId,
        objects: BufferId,
        meshes: BufferId,
        mapping: BufferId,
        mapping_count: BufferId,
        stats: BufferId,
    },
    GenerateIndirectArgs {
        params: IndirectArgsParams,
        count: BufferId,
        args: BufferId,
    },
    CullMeshlets {
        params: CullParams,
        frame: BufferId,
        objects: BufferId,
        meshes: BufferId,
        meshlets: BufferId,
        mapping: BufferId,
        mapping_count: BufferId,
        surviving: BufferId,
        surviving_count: BufferId,
        stats: BufferId,
    },
    CompactPrimitives {
        params: CompactParams,
        meshlets: BufferId,
        meshlet_triangles: BufferId,
        surviving: BufferId,
        surviving_count: BufferId,
        indices: BufferId,
        draw: BufferId,
    },
    CountMaterials {
        params: ScreenParams,
        visibility: ImageId,
        surviving: BufferId,
        objects: BufferId,
        meshlets: BufferId,
        material_table: BufferId,
        material_count: BufferId,
    },
    PrefixSum {
        params: PrefixSumParams,
        input: BufferId,
        output: BufferId,
    },
    CollectPixels {
        params: ScreenParams,
        visibility: ImageId,
        surviving: BufferId,
        objects: BufferId,
        meshlets: BufferId,
        material_table: BufferId,
        material_start: BufferId,
        material_cursor: BufferId,
        pixels: BufferId,
    },
    GenerateMaterialArgs {
        params: MaterialArgsParams,
        material_count: BufferId,
        args: BufferId,
    },
    GenerateGBuffer {
        params: GBufferParams,
        /// Material-provided pipeline; `None` selects the built-in one.
        pipeline: Option<PipelineId>,
        frame: BufferId,
        material_count: BufferId,
        material_start: BufferId,
        pixels: BufferId,
        visibility: ImageId,
        surviving: BufferId,
        objects: BufferId,
        meshes: BufferId,
        meshlets: BufferId,
        meshlet_vertices: BufferId,
        meshlet_triangles: BufferId,
        vertices: BufferId,
        materials: BufferId,
        base_color: ImageId,
        albedo: ImageId,
        material: ImageId,
        normal: ImageId,
    },
    Shade {
        params: ShadeParams,
        frame: BufferId,
        depth: ImageId,
        albedo: ImageId,
        material: ImageId,
        normal: ImageId,
        ao: ImageId,
        /// Read by the triangle and meshlet id overlays.
        visibility: ImageId,
        directional_lights: BufferId,
        point_lights: BufferId,
        spot_lights: BufferId,
        shadow_map: ImageId,
        shadow: BufferId,
        irradiance: ImageId,
        radiance: ImageId,
        output: ImageId,
    },
    /// Fills pixels at the depth clear value with the radiance cube.
    Skybox {
        params: SkyboxParams,
        frame: BufferId,
        depth: ImageId,
        radiance: ImageId,
        output: ImageId,
    },
    GtaoPrefilterDepth {
        params: GtaoParams,
        depth: ImageId,
        output: ImageId,
    },
    GtaoDownsampleDepth {
        params: GtaoParams,
        depth_mips: ImageId,
    },
    GtaoMain {
        params: GtaoParams,
        depth_mips: ImageId,
        normals: ImageId,
        ao_term: ImageId,
        edges: ImageId,
    },
    GtaoDenoise {
        params: GtaoParams,
        ao_term: ImageId,
        edges: ImageId,
        output: ImageId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerKind {
    LinearClamp,
    LinearRepeat,
    ShadowCompare,
}

/// One bind group entry after the parameter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    Uniform(BufferId),
    StorageRead(BufferId),
    StorageReadWrite(BufferId),
    /// Sampled view; `mip = None` spans every mip.
    Texture { image: ImageId, mip: Option<u32> },
    StorageTexture { image: ImageId, mip: u32 },
    Sampler(SamplerKind),
}

impl Binding {
    /// Resource written through this binding, if any.
    #[must_use]
    pub fn written(&self) -> Option<PhysicalResource> {
        match *self {
            Self::StorageReadWrite(id) => Some(PhysicalResource::Buffer(id)),
            Self::StorageTexture { image, .. } => Some(PhysicalResource::Image(image)),
            _ => None,
        }
    }

    /// Resource read through this binding, if any.
    #[must_use]
    pub fn read(&self) -> Option<PhysicalResource> {
        match *self {
            Self::Uniform(id) | Self::StorageRead(id) | Self::StorageReadWrite(id) => {
                Some(PhysicalResource::Buffer(id))
            }
            Self::Texture { image, .. } => Some(PhysicalResource::Image(image)),
            Self::StorageTexture { .. } | Self::Sampler(_) => None,
        }
    }
}

pub type BindingList = SmallVec<[Binding; 20]>;

impl Kernel {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CullObjects { .. } => "cull_objects",
            Self::GenerateIndirectArgs { .. } => "generate_indirect_args",
            Self::CullMeshlets { .. } => "cull_meshlets",
            Self::CompactPrimitives { .. } => "compact_primitives",
            Self::CountMaterials { .. } => "count_materials",
            Self::PrefixSum { .. } => "prefix_sum",
            Self::CollectPixels { .. } => "collect_pixels",
            Self::GenerateMaterialArgs { .. } => "generate_material_args",
            Self::GenerateGBuffer { .. } => "generate_gbuffer",
            Self::Shade { .. } => "shade",
            Self::Skybox { .. } => "skybox",
            Self::GtaoPrefilterDepth { .. } => "gtao_prefilter_depth",
            Self::GtaoDownsampleDepth { .. } => "gtao_downsample_depth",
            Self::GtaoMain { .. } => "gtao_main",
            Self::GtaoDenoise { .. } => "gtao_denoise",
        }
    }

    /// Raw bytes of the parameter block bound at binding 0.
    #[must_use]
    pub fn params_bytes(&self) -> &[u8] {
        match self {
            Self::CullObjects { params, .. } | Self::CullMeshlets { params, .. } => {
                bytemuck::bytes_of(params)
            }
            Self::GenerateIndirectArgs { params, .. } => bytemuck::bytes_of(params),
            Self::CompactPrimitives { params, .. } => bytemuck::bytes_of(params),
            Self::CountMaterials { params, .. } | Self::CollectPixels { params, .. } => {
                bytemuck::bytes_of(params)
            }
            Self::PrefixSum { params, .. } => bytemuck::bytes_of(params),
            Self::GenerateMaterialArgs { params, .. } => bytemuck::bytes_of(params),
            Self::GenerateGBuffer { params, .. } => bytemuck::bytes_of(params),
            Self::Shade { params, .. } => bytemuck::bytes_of(params),
            Self::Skybox { params, .. } => bytemuck::bytes_of(params),
            Self::GtaoPrefilterDepth { params, .. }
            | Self::GtaoDownsampleDepth { params, .. }
            | Self::GtaoMain { params, .. }
            | Self::GtaoDenoise { params, .. } => bytemuck::bytes_of(params),
        }
    }

    /// Bindings 1.. in shader declaration order.
    #[must_use]
    pub fn bindings(&self) -> BindingList {
        use Binding::{Sampler, StorageRead, StorageReadWrite, StorageTexture, Texture, Uniform};

        let mut list = BindingList::new();
        match *self {
            Self::CullObjects { frame, objects, meshes, mapping, mapping_count, stats, .. } => {
                list.extend([
                    Uniform(frame),
                    StorageRead(objects),
                    StorageRead(meshes),
                    StorageReadWrite(mapping),
                    StorageReadWrite(mapping_count),
                    StorageReadWrite(stats),
                ]);
            }
            Self::GenerateIndirectArgs { count, args, .. } => {
                list.extend([StorageRead(count), StorageReadWrite(args)]);
            }
            Self::CullMeshlets {
                frame,
                objects,
                meshes,
                meshlets,
                mapping,
                mapping_count,
                surviving,
                surviving_count,
                stats,
                ..
            } => {
                list.extend([
                    Uniform(frame),
                    StorageRead(objects),
                    StorageRead(meshes),
                    StorageRead(meshlets),
                    StorageRead(mapping),
                    StorageRead(mapping_count),
                    StorageReadWrite(surviving),
                    StorageReadWrite(surviving_count),
                    StorageReadWrite(stats),
                ]);
            }
            Self::CompactPrimitives {
                meshlets,
                meshlet_triangles,
                surviving,
                surviving_count,
                indices,
                draw,
                ..
            } => {
                list.extend([
                    StorageRead(meshlets),
                    StorageRead(meshlet_triangles),
                    StorageRead(surviving),
                    StorageRead(surviving_count),
                    StorageReadWrite(indices),
                    StorageReadWrite(draw),
                ]);
            }
            Self::CountMaterials {
                visibility,
                surviving,
                objects,
                meshlets,
                material_table,
                material_count,
                ..
            } => {
                list.extend([
                    Texture { image: visibility, mip: Some(0) },
                    StorageRead(surviving),
                    StorageRead(objects),
                    StorageRead(meshlets),
                    StorageRead(material_table),
                    StorageReadWrite(material_count),
                ]);
            }
            Self::PrefixSum { input, output, .. } => {
                list.extend([StorageRead(input), StorageReadWrite(output)]);
            }
            Self::CollectPixels {
                visibility,
                surviving,
                objects,
                meshlets,
                material_table,
                material_start,
                material_cursor,
                pixels,
                ..
            } => {
                list.extend([
                    Texture { image: visibility, mip: Some(0) },
                    StorageRead(surviving),
                    StorageRead(objects),
                    StorageRead(meshlets),
                    StorageRead(material_table),
                    StorageRead(material_start),
                    StorageReadWrite(material_cursor),
                    StorageReadWrite(pixels),
                ]);
            }
            Self::GenerateMaterialArgs { material_count, args, .. } => {
                list.extend([StorageRead(material_count), StorageReadWrite(args)]);
            }
            Self::GenerateGBuffer {
                frame,
                material_count,
                material_start,
                pixels,
                visibility,
                surviving,
                objects,
                meshes,
                meshlets,
                meshlet_vertices,
                meshlet_triangles,
                vertices,
                materials,
                base_color,
                albedo,
                material,
                normal,
                ..
            } => {
                list.extend([
                    Uniform(frame),
                    StorageRead(material_count),
                    StorageRead(material_start),
                    StorageRead(pixels),
                    Texture { image: visibility, mip: Some(0) },
                    StorageRead(surviving),
                    StorageRead(objects),
                    StorageRead(meshes),
                    StorageRead(meshlets),
                    StorageRead(meshlet_vertices),
                    StorageRead(meshlet_triangles),
                    StorageRead(vertices),
                    StorageRead(materials),
                    Texture { image: base_color, mip: None },
                    Sampler(SamplerKind::LinearRepeat),
                    StorageTexture { image: albedo, mip: 0 },
                    StorageTexture { image: material, mip: 0 },
                    StorageTexture { image: normal, mip: 0 },
                ]);
            }
            Self::Shade {
                frame,
                depth,
                albedo,
                material,
                normal,
                ao,
                visibility,
                directional_lights,
                point_lights,
                spot_lights,
                shadow_map,
                shadow,
                irradiance,
                radiance,
                output,
                ..
            } => {
                list.extend([
                    Uniform(frame),
                    Texture { image: depth, mip: Some(0) },
                    Texture { image: albedo, mip: Some(0) },
                    Texture { image: material, mip: Some(0) },
                    Texture { image: normal, mip: Some(0) },
                    Texture { image: ao, mip: Some(0) },
                    Texture { image: visibility, mip: Some(0) },
                    StorageRead(directional_lights),
                    StorageRead(point_lights),
                    StorageRead(spot_lights),
                    Texture { image: shadow_map, mip: Some(0) },
                    Sampler(SamplerKind::ShadowCompare),
                    Uniform(shadow),
                    Texture { image: irradiance, mip: None },
                    Texture { image: radiance, mip: None },
                    Sampler(SamplerKind::LinearClamp),
                    StorageTexture { image: output, mip: 0 },
                ]);
            }
            Self::Skybox { frame, depth, radiance, output, .. } => {
                list.extend([
                    Uniform(frame),
                    Texture { image: depth, mip: Some(0) },
                    Texture { image: radiance, mip: None },
                    Sampler(SamplerKind::LinearClamp),
                    StorageTexture { image: output, mip: 0 },
                ]);
            }
            Self::GtaoPrefilterDepth { depth, output, .. } => {
                list.extend([
                    Texture { image: depth, mip: Some(0) },
                    StorageTexture { image: output, mip: 0 },
                ]);
            }
            Self::GtaoDownsampleDepth { params, depth_mips } => {
                list.extend([
                    Texture { image: depth_mips, mip: Some(params.mip.saturating_sub(1)) },
                    StorageTexture { image: depth_mips, mip: params.mip },
                ]);
            }
            Self::GtaoMain { depth_mips, normals, ao_term, edges, .. } => {
                list.extend([
                    Texture { image: depth_mips, mip: None },
                    Texture { image: normals, mip: Some(0) },
                    StorageTexture { image: ao_term, mip: 0 },
                    StorageTexture { image: edges, mip: 0 },
                ]);
            }
            Self::GtaoDenoise { ao_term, edges, output, .. } => {
                list.extend([
                    Texture { image: ao_term, mip: Some(0) },
                    Texture { image: edges, mip: Some(0) },
                    StorageTexture { image: output, mip: 0 },
                ]);
            }
        }
        list
    }
}

// ============================================================================
// Raster Draws
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RasterKind {
    /// Depth `Less` plus view-space normals.
    PreDepth,
    /// Depth `Equal` against pre-depth, writes visibility texels.
    Visibility,
    /// Depth-only into one layer of the cascade array.
    Shadow,
}

/// Vertex-pulling buffers shared by every raster draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryBindings {
    pub objects: BufferId,
    pub meshes: BufferId,
    pub meshlets: BufferId,
    pub meshlet_vertices: BufferId,
    pub meshlet_triangles: BufferId,
    pub vertices: BufferId,
    pub surviving: BufferId,
}

/// One indexed indirect draw of the compacted index buffer.
#[derive(Debug, Clone, Copy)]
pub struct RasterDraw {
    pub kind: RasterKind,
    pub params: RasterParams,
    pub geometry: GeometryBindings,
    pub indices: BufferId,
    pub draw_args: BufferId,
    pub depth: ImageId,
    pub depth_layer: u32,
    pub color: Option<ImageId>,
}

impl RasterDraw {
    /// Resources the draw reads (geometry, indices, indirect args).
    pub fn reads(&self) -> impl Iterator<Item = PhysicalResource> + '_ {
        let g = &self.geometry;
        let mut reads: SmallVec<[PhysicalResource; 10]> = [
            g.objects,
            g.meshes,
            g.meshlets,
            g.meshlet_vertices,
            g.meshlet_triangles,
            g.vertices,
            g.surviving,
            self.indices,
            self.draw_args,
        ]
        .into_iter()
        .map(PhysicalResource::Buffer)
        .collect();
        if self.kind == RasterKind::Visibility {
            reads.push(PhysicalResource::Image(self.depth));
        }
        reads.into_iter()
    }

    pub fn writes(&self) -> impl Iterator<Item = PhysicalResource> + '_ {
        let depth = (self.kind != RasterKind::Visibility).then_some(self.depth);
        depth
            .into_iter()
            .chain(self.color)
            .map(PhysicalResource::Image)
    }
}
