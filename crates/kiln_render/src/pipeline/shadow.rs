//! Cascaded Shadow Maps
//!
//! Pure cascade math plus the shadow pass. The first shadow-casting
//! directional light owns up to [`MAX_CASCADES`] cascades; each cascade is a
//! texel-snapped orthographic volume fitted around one slice of the camera
//! frustum and rendered into one layer of a `Depth32Float` array.
//!
//! Casters are the camera-culled geometry: the shadow pass reuses the
//! compacted index buffer and indirect draw of the main view.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use kiln_core::math::OrthoBounds;
use kiln_scene::Camera;

use crate::command::{ClearValue, RasterDraw, RasterKind, RasterParams};
use crate::graph::{Access, GraphPass, ImageHandle, PassBuilder, PassResources, RenderContext};
use crate::pipeline::GeometryHandles;
use crate::settings::ShadowSettings;

/// Maximum cascade count of the shadow-casting directional light.
pub const MAX_CASCADES: u32 = 4;

/// Shadow parameters read by the shading kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ShadowUniforms {
    pub view_projection: [Mat4; MAX_CASCADES as usize],
    /// View-space far distance of each cascade.
    pub splits: [f32; MAX_CASCADES as usize],
    pub cascade_count: u32,
    pub depth_bias: f32,
    pub enabled: u32,
    pub _pad: u32,
}

// ============================================================================
// Cascade Split Computation
// ============================================================================

/// Cascade far distances using the practical split scheme.
///
/// `lambda` blends between uniform (`0.0`) and logarithmic (`1.0`)
/// distribution. The last used split always lands on `far`.
#[must_use]
pub fn compute_cascade_splits(
    cascade_count: u32,
    near: f32,
    far: f32,
    lambda: f32,
) -> [f32; MAX_CASCADES as usize] {
    let mut splits = [0.0f32; MAX_CASCADES as usize];
    let n = cascade_count.min(MAX_CASCADES) as usize;

    for (i, split) in splits.iter_mut().enumerate().take(n) {
        let p = (i + 1) as f32 / n as f32;
        let log_split = near * (far / near).powf(p);
        let uni_split = near + (far - near) * p;
        *split = lambda * log_split + (1.0 - lambda) * uni_split;
    }
    if n > 0 {
        splits[n - 1] = far;
    }
    splits
}

// ============================================================================
// Frustum Corners in World Space
// ============================================================================

/// The 8 world-space corners of the camera frustum between two view depths.
#[must_use]
pub fn frustum_corners_world(camera: &Camera, slice_near: f32, slice_far: f32) -> [Vec3; 8] {
    let projection = camera.projection_matrix();
    let (near_half, far_half, offset) = if camera.is_orthographic() {
        let bounds = OrthoBounds::from_projection(projection);
        let half = (bounds.max - bounds.min) * 0.5;
        let centre = (bounds.max + bounds.min) * 0.5;
        (half, half, centre)
    } else {
        let tan_half_fov = 1.0 / projection.y_axis.y;
        let aspect = projection.y_axis.y / projection.x_axis.x;
        let near = glam::Vec2::new(tan_half_fov * aspect, tan_half_fov) * slice_near;
        let far = glam::Vec2::new(tan_half_fov * aspect, tan_half_fov) * slice_far;
        (near, far, glam::Vec2::ZERO)
    };

    // RH view space: -Z is forward
    let face = |half: glam::Vec2, depth: f32| {
        [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)]
            .map(|(sx, sy)| Vec3::new(offset.x + sx * half.x, offset.y + sy * half.y, -depth))
    };
    let near = face(near_half, slice_near);
    let far = face(far_half, slice_far);

    let inverse_view = camera.view.inverse();
    let mut corners = [Vec3::ZERO; 8];
    for (corner, view) in corners.iter_mut().zip(near.iter().chain(far.iter())) {
        *corner = inverse_view.transform_point3(*view);
    }
    corners
}

// ============================================================================
// Cascade View-Projection
// ============================================================================

/// Light view and orthographic view-projection of one cascade.
///
/// The volume is the light-space AABB of the slice corners, extended towards
/// the light by `caster_extension` and snapped to the texel grid so the map
/// does not shimmer while the camera moves.
#[must_use]
pub fn build_cascade_vp(
    light_direction: Vec3,
    frustum_corners: &[Vec3; 8],
    shadow_map_size: u32,
    caster_extension: f32,
) -> (Mat4, Mat4) {
    let direction = light_direction.normalize_or(Vec3::NEG_Z);
    let center = frustum_corners.iter().copied().sum::<Vec3>() / 8.0;
    let up = if direction.y.abs() > 0.99 { Vec3::X } else { Vec3::Y };
    let light_view = Mat4::look_at_rh(center - direction, center, up);

    let mut ls_min = Vec3::splat(f32::MAX);
    let mut ls_max = Vec3::splat(f32::MIN);
    for corner in frustum_corners {
        let ls = light_view.transform_point3(*corner);
        ls_min = ls_min.min(ls);
        ls_max = ls_max.max(ls);
    }

    // In RH light view, max.z faces the light.
    let base_z_range = (ls_max.z - ls_min.z).max(1.0);
    ls_max.z += caster_extension.max(base_z_range);
    ls_min.z -= base_z_range;

    let size = shadow_map_size.max(1) as f32;
    let texel_x = (ls_max.x - ls_min.x) / size;
    let texel_y = (ls_max.y - ls_min.y) / size;
    if texel_x > 0.0 {
        ls_min.x = (ls_min.x / texel_x).floor() * texel_x;
        ls_max.x = (ls_max.x / texel_x).ceil() * texel_x;
    }
    if texel_y > 0.0 {
        ls_min.y = (ls_min.y / texel_y).floor() * texel_y;
        ls_max.y = (ls_max.y / texel_y).ceil() * texel_y;
    }

    let projection = Mat4::orthographic_rh(ls_min.x, ls_max.x, ls_min.y, ls_max.y, -ls_max.z, -ls_min.z);
    (light_view, projection * light_view)
}

/// Per-cascade light matrices plus the uniforms the shading kernel reads.
#[derive(Debug, Clone, Copy)]
pub struct CascadeSetup {
    pub light_views: [Mat4; MAX_CASCADES as usize],
    pub uniforms: ShadowUniforms,
}

impl CascadeSetup {
    /// Fits the cascades of `light_direction` around `camera`.
    #[must_use]
    pub fn new(camera: &Camera, light_direction: Vec3, settings: &ShadowSettings) -> Self {
        let cascade_count = settings.cascade_count.clamp(1, MAX_CASCADES);
        let near = camera.near().max(0.1);
        let far = settings
            .max_distance
            .map_or(camera.far(), |d| d.min(camera.far()))
            .max(near + 1e-3);
        let splits = compute_cascade_splits(cascade_count, near, far, settings.split_lambda);

        let mut light_views = [Mat4::IDENTITY; MAX_CASCADES as usize];
        let mut view_projection = [Mat4::IDENTITY; MAX_CASCADES as usize];
        let mut slice_near = near;
        for c in 0..cascade_count as usize {
            let corners = frustum_corners_world(camera, slice_near, splits[c]);
            let (view, vp) =
                build_cascade_vp(light_direction, &corners, settings.resolution, settings.caster_extension);
            light_views[c] = view;
            view_projection[c] = vp;
            slice_near = splits[c];
        }

        Self {
            light_views,
            uniforms: ShadowUniforms {
                view_projection,
                splits,
                cascade_count,
                depth_bias: settings.depth_bias,
                enabled: 1,
                _pad: 0,
            },
        }
    }

    /// Uniforms of a frame without shadows.
    #[must_use]
    pub fn disabled() -> ShadowUniforms {
        ShadowUniforms::default()
    }
}

// ============================================================================
// Shadow Pass
// ============================================================================

/// Depth-only raster of the compacted geometry into every cascade layer.
#[derive(Clone, Copy)]
pub struct ShadowPass {
    geometry: GeometryHandles,
    shadow_map: ImageHandle,
    cascades: CascadeSetup,
}

impl ShadowPass {
    pub fn setup(
        builder: &mut PassBuilder<'_, '_>,
        geometry: GeometryHandles,
        shadow_map: ImageHandle,
        cascades: CascadeSetup,
    ) -> Self {
        geometry.declare_raster_reads(builder);
        builder.write_image(shadow_map, Access::DepthWrite);
        Self {
            geometry,
            shadow_map,
            cascades,
        }
    }

    #[must_use]
    pub fn shadow_map(&self) -> ImageHandle {
        self.shadow_map
    }
}

impl<'a> GraphPass<'a> for ShadowPass {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        let depth = resources.image(self.shadow_map);
        ctx.clear_image(depth, ClearValue::Depth(1.0));
        for layer in 0..self.cascades.uniforms.cascade_count {
            ctx.draw(RasterDraw {
                kind: RasterKind::Shadow,
                params: RasterParams {
                    view_projection: self.cascades.uniforms.view_projection[layer as usize],
                    view: self.cascades.light_views[layer as usize],
                },
                geometry: self.geometry.bindings(resources),
                indices: resources.buffer(self.geometry.indices),
                draw_args: resources.buffer(self.geometry.draw_args),
                depth,
                depth_layer: layer,
                color: None,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_end_on_the_far_plane() {
        let splits = compute_cascade_splits(4, 0.1, 100.0, 0.5);
        assert_eq!(splits[3], 100.0);
        assert!(splits.windows(2).all(|w| w[0] < w[1]), "{splits:?}");
    }

    #[test]
    fn uniform_lambda_splits_evenly() {
        let splits = compute_cascade_splits(2, 2.0, 10.0, 0.0);
        assert!((splits[0] - 6.0).abs() < 1e-5);
        assert_eq!(splits[2], 0.0, "unused cascades stay zero");
    }

    #[test]
    fn cascade_volume_contains_its_slice() {
        let camera = Camera::perspective(1.0, 1.5, 0.1, 50.0)
            .looking_at(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, Vec3::Y);
        let corners = frustum_corners_world(&camera, 0.1, 10.0);
        let (_, vp) = build_cascade_vp(Vec3::new(-0.3, -1.0, -0.2), &corners, 1024, 20.0);
        for corner in corners {
            let ndc = vp.project_point3(corner);
            assert!(ndc.x.abs() <= 1.0 + 1e-4 && ndc.y.abs() <= 1.0 + 1e-4, "{ndc:?}");
            assert!((0.0..=1.0).contains(&ndc.z), "{ndc:?}");
        }
    }

    #[test]
    fn orthographic_corners_follow_the_view_box() {
        let camera = Camera::orthographic(-2.0, 2.0, -1.0, 1.0, 0.1, 10.0);
        let corners = frustum_corners_world(&camera, 1.0, 5.0);
        assert!((corners[0] - Vec3::new(-2.0, -1.0, -1.0)).length() < 1e-4, "{:?}", corners[0]);
        assert!((corners[6] - Vec3::new(2.0, 1.0, -5.0)).length() < 1e-4, "{:?}", corners[6]);
    }

    #[test]
    fn max_distance_caps_the_last_split() {
        let camera = Camera::perspective(1.0, 1.0, 0.1, 1000.0);
        let settings = ShadowSettings {
            cascade_count: 3,
            max_distance: Some(60.0),
            ..Default::default()
        };
        let setup = CascadeSetup::new(&camera, Vec3::NEG_Y, &settings);
        assert_eq!(setup.uniforms.cascade_count, 3);
        assert_eq!(setup.uniforms.splits[2], 60.0);
        assert_eq!(setup.uniforms.enabled, 1);
    }
}
