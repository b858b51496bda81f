//! Ground-Truth Ambient Occlusion
//!
//! Three compute passes after pre-depth, following XeGTAO:
//!
//! 1. **Prefilter**: linearizes pre-depth into mip 0 of an `R32Float`
//!    pyramid, then builds mips 1..[`GTAO_DEPTH_MIP_LEVELS`] with a
//!    falloff-weighted 2×2 downsample.
//! 2. **Main**: slices the hemisphere around each pixel, marches the pyramid
//!    and writes the visibility term (`R32Uint`, × 255) plus packed edges.
//! 3. **Denoise**: edge-aware 3×3 blur into the AO image the shading pass
//!    samples.
//!
//! The view-space reconstruction constants are derived once per frame from
//! the unjittered projection; see [`GtaoParams`].

use glam::Mat4;
use kiln_core::math::{OrthoBounds, div_round_up};
use kiln_scene::Camera;

use super::labels;
use super::material_sort::screen_groups;
use crate::command::{GtaoParams, Kernel, SCREEN_TILE_SIZE};
use crate::device::{ImageDesc, ImageFormat, ImageUsage};
use crate::graph::{Access, GraphPass, ImageHandle, PassBuilder, PassResources, RenderContext};
use crate::settings::GtaoSettings;

/// Mips of the linear depth pyramid.
pub const GTAO_DEPTH_MIP_LEVELS: u32 = 5;

/// Builds the per-frame parameter block shared by all three stages.
#[must_use]
pub fn gtao_params(
    projection: Mat4,
    orthographic: bool,
    (width, height): (u32, u32),
    frame_index: u64,
    settings: &GtaoSettings,
) -> GtaoParams {
    let (width, height) = (width.max(1), height.max(1));
    let pixel_size = [1.0 / width as f32, 1.0 / height as f32];

    let (depth_unpack, mul, add) = if orthographic {
        let bounds = OrthoBounds::from_projection(projection);
        (
            [projection.z_axis.z, projection.w_axis.z],
            [bounds.max.x - bounds.min.x, -(bounds.max.y - bounds.min.y)],
            [bounds.min.x, bounds.max.y],
        )
    } else {
        let tan_half_x = 1.0 / projection.x_axis.x;
        let tan_half_y = 1.0 / projection.y_axis.y;
        (
            [-projection.w_axis.z, -projection.z_axis.z],
            [2.0 * tan_half_x, -2.0 * tan_half_y],
            [-tan_half_x, tan_half_y],
        )
    };

    GtaoParams {
        viewport_size: [width, height],
        viewport_pixel_size: pixel_size,
        depth_unpack,
        ndc_to_view_mul: mul,
        ndc_to_view_add: add,
        ndc_to_view_mul_x_pixel_size: [mul[0] * pixel_size[0], mul[1] * pixel_size[1]],
        effect_radius: settings.effect_radius,
        effect_falloff_range: settings.effect_falloff_range,
        radius_multiplier: settings.radius_multiplier,
        final_value_power: settings.final_value_power,
        denoise_blur_beta: settings.denoise_blur_beta,
        sample_distribution_power: settings.sample_distribution_power,
        thin_occluder_compensation: settings.thin_occluder_compensation,
        depth_mip_sampling_offset: settings.depth_mip_sampling_offset,
        noise_index: (frame_index % 64) as u32,
        slice_count: settings.slice_count.max(1),
        steps_per_slice: settings.steps_per_slice.max(1),
        orthographic: u32::from(orthographic),
        mip: 0,
        _pad: [0; 3],
    }
}

/// [`gtao_params`] for `camera`.
#[must_use]
pub fn camera_gtao_params(
    camera: &Camera,
    size: (u32, u32),
    frame_index: u64,
    settings: &GtaoSettings,
) -> GtaoParams {
    gtao_params(camera.projection_matrix(), camera.is_orthographic(), size, frame_index, settings)
}

fn screen_image(label: &'static str, params: &GtaoParams, format: ImageFormat) -> ImageDesc {
    let [w, h] = params.viewport_size;
    ImageDesc::d2(label, w, h, format, ImageUsage::STORAGE | ImageUsage::SAMPLED)
}

// ============================================================================
// Prefilter
// ============================================================================

#[derive(Clone, Copy)]
pub struct GtaoPrefilterPass {
    params: GtaoParams,
    depth: ImageHandle,
    depth_mips: ImageHandle,
}

impl GtaoPrefilterPass {
    pub fn setup(builder: &mut PassBuilder<'_, '_>, params: GtaoParams, depth: ImageHandle) -> Self {
        builder.sample_image(depth);
        let depth_mips = builder.create_image(
            screen_image(labels::GTAO_DEPTH_MIPS, &params, ImageFormat::R32Float)
                .with_mips(GTAO_DEPTH_MIP_LEVELS),
        );
        builder.write_image(depth_mips, Access::ShaderWrite);
        Self {
            params,
            depth,
            depth_mips,
        }
    }

    #[must_use]
    pub fn depth_mips(&self) -> ImageHandle {
        self.depth_mips
    }
}

impl<'a> GraphPass<'a> for GtaoPrefilterPass {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        let depth_mips = resources.image(self.depth_mips);
        let [width, height] = self.params.viewport_size;
        ctx.dispatch(
            Kernel::GtaoPrefilterDepth {
                params: self.params,
                depth: resources.image(self.depth),
                output: depth_mips,
            },
            screen_groups(width, height),
        );
        for mip in 1..GTAO_DEPTH_MIP_LEVELS {
            let (w, h) = ((width >> mip).max(1), (height >> mip).max(1));
            ctx.dispatch(
                Kernel::GtaoDownsampleDepth {
                    params: GtaoParams { mip, ..self.params },
                    depth_mips,
                },
                [div_round_up(w, SCREEN_TILE_SIZE), div_round_up(h, SCREEN_TILE_SIZE), 1],
            );
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[derive(Clone, Copy)]
pub struct GtaoMainPass {
    params: GtaoParams,
    depth_mips: ImageHandle,
    normals: ImageHandle,
    ao_term: ImageHandle,
    edges: ImageHandle,
}

impl GtaoMainPass {
    pub fn setup(
        builder: &mut PassBuilder<'_, '_>,
        params: GtaoParams,
        depth_mips: ImageHandle,
        normals: ImageHandle,
    ) -> Self {
        builder.sample_image(depth_mips);
        builder.sample_image(normals);
        let ao_term = builder.create_image(screen_image(labels::GTAO_TERM, &params, ImageFormat::R32Uint));
        let edges = builder.create_image(screen_image(labels::GTAO_EDGES, &params, ImageFormat::R32Float));
        builder.write_image(ao_term, Access::ShaderWrite);
        builder.write_image(edges, Access::ShaderWrite);
        Self {
            params,
            depth_mips,
            normals,
            ao_term,
            edges,
        }
    }
}

impl<'a> GraphPass<'a> for GtaoMainPass {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        let [width, height] = self.params.viewport_size;
        ctx.dispatch(
            Kernel::GtaoMain {
                params: self.params,
                depth_mips: resources.image(self.depth_mips),
                normals: resources.image(self.normals),
                ao_term: resources.image(self.ao_term),
                edges: resources.image(self.edges),
            },
            screen_groups(width, height),
        );
    }
}

// ============================================================================
// Denoise
// ============================================================================

#[derive(Clone, Copy)]
pub struct GtaoDenoisePass {
    params: GtaoParams,
    ao_term: ImageHandle,
    edges: ImageHandle,
    output: ImageHandle,
}

impl GtaoDenoisePass {
    pub fn setup(builder: &mut PassBuilder<'_, '_>, main: &GtaoMainPass) -> Self {
        builder.sample_image(main.ao_term);
        builder.sample_image(main.edges);
        let output = builder.create_image(screen_image(labels::GTAO_OUTPUT, &main.params, ImageFormat::R32Uint));
        builder.write_image(output, Access::ShaderWrite);
        Self {
            params: main.params,
            ao_term: main.ao_term,
            edges: main.edges,
            output,
        }
    }

    #[must_use]
    pub fn output(&self) -> ImageHandle {
        self.output
    }
}

impl<'a> GraphPass<'a> for GtaoDenoisePass {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        let [width, height] = self.params.viewport_size;
        ctx.dispatch(
            Kernel::GtaoDenoise {
                params: self.params,
                ao_term: resources.image(self.ao_term),
                edges: resources.image(self.edges),
                output: resources.image(self.output),
            },
            screen_groups(width, height),
        );
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;

    #[test]
    fn perspective_constants_follow_the_field_of_view() {
        let camera = Camera::perspective(std::f32::consts::FRAC_PI_2, 2.0, 0.1, 100.0);
        let params = camera_gtao_params(&camera, (200, 100), 70, &GtaoSettings::default());

        // tan(45°) = 1 vertically, aspect 2 horizontally
        assert!((params.ndc_to_view_mul[0] - 4.0).abs() < 1e-4);
        assert!((params.ndc_to_view_mul[1] + 2.0).abs() < 1e-4);
        assert!((params.ndc_to_view_add[0] + 2.0).abs() < 1e-4);
        assert!((params.ndc_to_view_add[1] - 1.0).abs() < 1e-4);
        assert!((params.ndc_to_view_mul_x_pixel_size[0] - 4.0 / 200.0).abs() < 1e-6);
        assert_eq!(params.noise_index, 6);
        assert_eq!(params.orthographic, 0);
    }

    #[test]
    fn orthographic_constants_span_the_view_box() {
        let camera = Camera::orthographic(-4.0, 4.0, -2.0, 2.0, 1.0, 11.0);
        let params = camera_gtao_params(&camera, (64, 32), 0, &GtaoSettings::default());

        assert_eq!(params.orthographic, 1);
        let mul = Vec2::from(params.ndc_to_view_mul);
        let add = Vec2::from(params.ndc_to_view_add);
        // screen (0, 0) is the top-left corner of the box
        assert!((add - Vec2::new(-4.0, 2.0)).length() < 1e-4);
        assert!((mul * Vec2::ONE + add - Vec2::new(4.0, -2.0)).length() < 1e-4);
    }

    #[test]
    fn degenerate_settings_are_clamped() {
        let settings = GtaoSettings {
            slice_count: 0,
            steps_per_slice: 0,
            ..GtaoSettings::default()
        };
        let params = gtao_params(Mat4::IDENTITY, true, (0, 0), 0, &settings);
        assert_eq!(params.viewport_size, [1, 1]);
        assert_eq!(params.slice_count, 1);
        assert_eq!(params.steps_per_slice, 1);
    }
}
