//! Shading Pass
//!
//! The frame's terminal GPU work: one full-screen compute dispatch that
//! combines the GBuffer with depth, lights, cascaded shadows, ambient
//! occlusion and image-based lighting into the final image. Pixels at the
//! depth clear value receive the clear color. The visibility buffer is read
//! only by the triangle and meshlet id overlays.
//!
//! The final image is owned by the renderer and imported into the graph, so
//! this pass is a side effect and never culled.

use super::gbuffer::GBufferTargets;
use super::material_sort::screen_groups;
use super::uniforms::LightHandles;
use crate::command::{Kernel, ShadeParams};
use crate::graph::{
    Access, BufferHandle, GraphPass, ImageHandle, PassBuilder, PassResources, RenderContext,
};

/// Everything the lighting loop samples besides the GBuffer.
#[derive(Debug, Clone, Copy)]
pub struct LightingInputs {
    pub frame: BufferHandle,
    pub depth: ImageHandle,
    pub ao: ImageHandle,
    pub visibility: ImageHandle,
    pub lights: LightHandles,
    pub shadow_map: ImageHandle,
    pub shadow_uniforms: BufferHandle,
    pub irradiance: ImageHandle,
    pub radiance: ImageHandle,
}

#[derive(Clone, Copy)]
pub struct ShadingPass {
    inputs: LightingInputs,
    gbuffer: GBufferTargets,
    output: ImageHandle,
    params: ShadeParams,
}

impl ShadingPass {
    pub fn setup(
        builder: &mut PassBuilder<'_, '_>,
        inputs: LightingInputs,
        gbuffer: GBufferTargets,
        output: ImageHandle,
        params: ShadeParams,
    ) -> Self {
        builder.read_buffer(inputs.frame, Access::Uniform);
        builder.read_buffer(inputs.shadow_uniforms, Access::Uniform);
        for light in [inputs.lights.directional, inputs.lights.point, inputs.lights.spot] {
            builder.read_storage(light);
        }
        for image in [
            inputs.depth,
            inputs.ao,
            inputs.visibility,
            inputs.shadow_map,
            inputs.irradiance,
            inputs.radiance,
            gbuffer.albedo,
            gbuffer.material,
            gbuffer.normal,
        ] {
            builder.sample_image(image);
        }
        builder.write_image(output, Access::ShaderWrite);
        builder.set_side_effect();

        Self {
            inputs,
            gbuffer,
            output,
            params,
        }
    }
}

impl<'a> GraphPass<'a> for ShadingPass {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        let i = &self.inputs;
        ctx.dispatch(
            Kernel::Shade {
                params: self.params,
                frame: resources.buffer(i.frame),
                depth: resources.image(i.depth),
                albedo: resources.image(self.gbuffer.albedo),
                material: resources.image(self.gbuffer.material),
                normal: resources.image(self.gbuffer.normal),
                ao: resources.image(i.ao),
                visibility: resources.image(i.visibility),
                directional_lights: resources.buffer(i.lights.directional),
                point_lights: resources.buffer(i.lights.point),
                spot_lights: resources.buffer(i.lights.spot),
                shadow_map: resources.image(i.shadow_map),
                shadow: resources.buffer(i.shadow_uniforms),
                irradiance: resources.image(i.irradiance),
                radiance: resources.image(i.radiance),
                output: resources.image(self.output),
            },
            screen_groups(self.params.width, self.params.height),
        );
    }
}
