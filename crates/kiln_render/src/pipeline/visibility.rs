//! Pre-Depth & Visibility Raster
//!
//! Two raster passes over the same compacted index buffer:
//!
//! - **Pre-Depth** writes depth (`Less`) and view-space normals; GTAO and the
//!   shading pass consume both.
//! - **Visibility** re-rasterizes with depth `Equal` and writes one `R32Uint`
//!   texel per covered pixel, `slot << 6 | triangle`. Uncovered pixels keep
//!   [`VISIBILITY_BACKGROUND`].

use kiln_scene::VISIBILITY_BACKGROUND;

use super::{labels, GeometryHandles};
use crate::command::{ClearValue, RasterDraw, RasterKind, RasterParams};
use crate::device::{ImageDesc, ImageFormat, ImageUsage};
use crate::graph::{Access, GraphPass, ImageHandle, PassBuilder, PassResources, RenderContext};

#[derive(Clone, Copy)]
pub struct PreDepthPass {
    geometry: GeometryHandles,
    params: RasterParams,
    depth: ImageHandle,
    normals: ImageHandle,
}

impl PreDepthPass {
    pub fn setup(
        builder: &mut PassBuilder<'_, '_>,
        geometry: GeometryHandles,
        params: RasterParams,
        width: u32,
        height: u32,
    ) -> Self {
        geometry.declare_raster_reads(builder);
        let depth = builder.create_image(ImageDesc::d2(
            labels::DEPTH,
            width,
            height,
            ImageFormat::Depth32Float,
            ImageUsage::DEPTH_TARGET | ImageUsage::SAMPLED,
        ));
        let normals = builder.create_image(ImageDesc::d2(
            labels::VIEW_NORMALS,
            width,
            height,
            ImageFormat::Rgba16Float,
            ImageUsage::COLOR_TARGET | ImageUsage::SAMPLED,
        ));
        builder.write_image(depth, Access::DepthWrite);
        builder.write_image(normals, Access::ColorTarget);

        Self {
            geometry,
            params,
            depth,
            normals,
        }
    }

    #[must_use]
    pub fn depth(&self) -> ImageHandle {
        self.depth
    }

    #[must_use]
    pub fn normals(&self) -> ImageHandle {
        self.normals
    }
}

impl<'a> GraphPass<'a> for PreDepthPass {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        let depth = resources.image(self.depth);
        let normals = resources.image(self.normals);
        ctx.clear_image(depth, ClearValue::Depth(1.0));
        ctx.clear_image(normals, ClearValue::Float([0.0; 4]));
        ctx.draw(RasterDraw {
            kind: RasterKind::PreDepth,
            params: self.params,
            geometry: self.geometry.bindings(resources),
            indices: resources.buffer(self.geometry.indices),
            draw_args: resources.buffer(self.geometry.draw_args),
            depth,
            depth_layer: 0,
            color: Some(normals),
        });
    }
}

#[derive(Clone, Copy)]
pub struct VisibilityPass {
    geometry: GeometryHandles,
    params: RasterParams,
    depth: ImageHandle,
    visibility: ImageHandle,
}

impl VisibilityPass {
    pub fn setup(
        builder: &mut PassBuilder<'_, '_>,
        geometry: GeometryHandles,
        params: RasterParams,
        depth: ImageHandle,
        width: u32,
        height: u32,
    ) -> Self {
        geometry.declare_raster_reads(builder);
        builder.read_image(depth, Access::DepthRead);
        let visibility = builder.create_image(ImageDesc::d2(
            labels::VISIBILITY,
            width,
            height,
            ImageFormat::R32Uint,
            ImageUsage::COLOR_TARGET | ImageUsage::SAMPLED,
        ));
        builder.write_image(visibility, Access::ColorTarget);

        Self {
            geometry,
            params,
            depth,
            visibility,
        }
    }

    #[must_use]
    pub fn visibility(&self) -> ImageHandle {
        self.visibility
    }
}

impl<'a> GraphPass<'a> for VisibilityPass {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        let visibility = resources.image(self.visibility);
        ctx.clear_image(visibility, ClearValue::Uint(VISIBILITY_BACKGROUND));
        ctx.draw(RasterDraw {
            kind: RasterKind::Visibility,
            params: self.params,
            geometry: self.geometry.bindings(resources),
            indices: resources.buffer(self.geometry.indices),
            draw_args: resources.buffer(self.geometry.draw_args),
            depth: resources.image(self.depth),
            depth_layer: 0,
            color: Some(visibility),
        });
    }
}
