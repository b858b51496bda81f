//! GBuffer Generation
//!
//! One indirect dispatch per individual material, each reading its own
//! `(start, count)` range of the pixel collection. Threads are 1D in groups
//! of `MATERIAL_GROUP_SIZE`; thread `i < count[m]` shades pixel
//! `pixels[start[m] + i]`.
//!
//! | Target           | Format      | Content                                  |
//! |------------------|-------------|------------------------------------------|
//! | GBuffer Albedo   | Rgba8Unorm  | base color × texture                     |
//! | GBuffer Material | Rgba16Float | metallic, roughness, emissive.rg         |
//! | GBuffer Normal   | Rgba16Float | world normal, emissive.b                 |
//!
//! The targets are cleared once ahead of the first material's dispatch, so
//! pixels no material covers keep the clear value.

use super::indirect_args::DISPATCH_COMMAND_STRIDE;
use super::scene_buffers::MaterialBinding;
use super::{labels, SceneHandles};
use crate::command::{ClearValue, GBufferParams, Kernel};
use crate::device::{ImageDesc, ImageFormat, ImageUsage};
use crate::graph::{
    Access, BufferHandle, GraphPass, ImageHandle, PassBuilder, PassResources, RenderContext,
};

/// Images written by the GBuffer pass.
#[derive(Debug, Clone, Copy)]
pub struct GBufferTargets {
    pub albedo: ImageHandle,
    pub material: ImageHandle,
    pub normal: ImageHandle,
}

/// Material-sort outputs the GBuffer pass consumes.
#[derive(Debug, Clone, Copy)]
pub struct SortedPixels {
    pub material_count: BufferHandle,
    pub material_start: BufferHandle,
    pub pixels: BufferHandle,
    pub args: BufferHandle,
}

#[derive(Clone, Copy)]
pub struct GBufferPass<'a> {
    frame: BufferHandle,
    scene: SceneHandles,
    surviving: BufferHandle,
    visibility: ImageHandle,
    sorted: SortedPixels,
    targets: GBufferTargets,
    materials: &'a [MaterialBinding],
    size: (u32, u32),
}

impl<'a> GBufferPass<'a> {
    pub fn setup(
        builder: &mut PassBuilder<'_, 'a>,
        frame: BufferHandle,
        scene: &SceneHandles,
        surviving: BufferHandle,
        visibility: ImageHandle,
        sorted: SortedPixels,
        materials: &[MaterialBinding],
        (width, height): (u32, u32),
    ) -> Self {
        builder.read_buffer(frame, Access::Uniform);
        for handle in [
            sorted.material_count,
            sorted.material_start,
            sorted.pixels,
            surviving,
            scene.objects,
            scene.meshes,
            scene.meshlets,
            scene.meshlet_vertices,
            scene.meshlet_triangles,
            scene.vertices,
            scene.materials,
        ] {
            builder.read_storage(handle);
        }
        builder.sample_image(visibility);
        builder.read_buffer(sorted.args, Access::IndirectArgs);

        let target = |label, format| {
            ImageDesc::d2(label, width, height, format, ImageUsage::STORAGE | ImageUsage::SAMPLED)
        };
        let albedo = builder.create_image(target(labels::GBUFFER_ALBEDO, ImageFormat::Rgba8Unorm));
        let material = builder.create_image(target(labels::GBUFFER_MATERIAL, ImageFormat::Rgba16Float));
        let normal = builder.create_image(target(labels::GBUFFER_NORMAL, ImageFormat::Rgba16Float));
        for image in [albedo, material, normal] {
            builder.write_image(image, Access::ShaderWrite);
        }

        Self {
            frame,
            scene: *scene,
            surviving,
            visibility,
            sorted,
            targets: GBufferTargets {
                albedo,
                material,
                normal,
            },
            materials: builder.alloc_copy(materials),
            size: (width, height),
        }
    }

    #[must_use]
    pub fn targets(&self) -> GBufferTargets {
        self.targets
    }
}

impl<'a> GraphPass<'a> for GBufferPass<'a> {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        let albedo = resources.image(self.targets.albedo);
        let material = resources.image(self.targets.material);
        let normal = resources.image(self.targets.normal);
        let args = resources.buffer(self.sorted.args);
        let (width, height) = self.size;

        // once per frame, ahead of the first material
        for image in [albedo, material, normal] {
            ctx.clear_image(image, ClearValue::Float([0.0; 4]));
        }
        for (index, binding) in self.materials.iter().enumerate() {
            let kernel = Kernel::GenerateGBuffer {
                params: GBufferParams {
                    material_index: index as u32,
                    width,
                    height,
                    _pad: 0,
                },
                pipeline: binding.pipeline,
                frame: resources.buffer(self.frame),
                material_count: resources.buffer(self.sorted.material_count),
                material_start: resources.buffer(self.sorted.material_start),
                pixels: resources.buffer(self.sorted.pixels),
                visibility: resources.image(self.visibility),
                surviving: resources.buffer(self.surviving),
                objects: resources.buffer(self.scene.objects),
                meshes: resources.buffer(self.scene.meshes),
                meshlets: resources.buffer(self.scene.meshlets),
                meshlet_vertices: resources.buffer(self.scene.meshlet_vertices),
                meshlet_triangles: resources.buffer(self.scene.meshlet_triangles),
                vertices: resources.buffer(self.scene.vertices),
                materials: resources.buffer(self.scene.materials),
                base_color: binding.base_color,
                albedo,
                material,
                normal,
            };
            ctx.dispatch_indirect(kernel, args, index as u64 * DISPATCH_COMMAND_STRIDE);
        }
    }
}
