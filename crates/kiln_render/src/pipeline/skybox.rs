//! Skybox Pass
//!
//! Runs after shading when the scene's skylight has a radiance cube: every
//! pixel still at the depth clear value is overwritten with the cube sampled
//! along its view ray.

use super::material_sort::screen_groups;
use crate::command::{Kernel, SkyboxParams};
use crate::graph::{
    Access, BufferHandle, GraphPass, ImageHandle, PassBuilder, PassResources, RenderContext,
};

#[derive(Clone, Copy)]
pub struct SkyboxPass {
    frame: BufferHandle,
    depth: ImageHandle,
    radiance: ImageHandle,
    output: ImageHandle,
    params: SkyboxParams,
}

impl SkyboxPass {
    pub fn setup(
        builder: &mut PassBuilder<'_, '_>,
        frame: BufferHandle,
        depth: ImageHandle,
        radiance: ImageHandle,
        output: ImageHandle,
        params: SkyboxParams,
    ) -> Self {
        builder.read_buffer(frame, Access::Uniform);
        builder.sample_image(depth);
        builder.sample_image(radiance);
        builder.write_image(output, Access::ShaderWrite);
        builder.set_side_effect();

        Self {
            frame,
            depth,
            radiance,
            output,
            params,
        }
    }
}

impl<'a> GraphPass<'a> for SkyboxPass {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        ctx.dispatch(
            Kernel::Skybox {
                params: self.params,
                frame: resources.buffer(self.frame),
                depth: resources.image(self.depth),
                radiance: resources.image(self.radiance),
                output: resources.image(self.output),
            },
            screen_groups(self.params.width, self.params.height),
        );
    }
}
