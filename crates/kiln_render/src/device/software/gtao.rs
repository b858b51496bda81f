//! Ground-truth ambient occlusion kernels.
//!
//! Viewspace here follows the XeGTAO convention: +Z into the screen, +Y up,
//! depths are positive linear distances. Normals coming from the pre-depth
//! pass are right-handed view-space and get their Z flipped on load.

use std::f32::consts::{FRAC_PI_2, PI};

use glam::{UVec2, Vec2, Vec3, Vec4, Vec4Swizzles};
use kiln_core::{ImageId, Result};

use super::SoftwareDevice;
use super::memory::SoftImage;
use crate::command::{GtaoParams, SCREEN_TILE_SIZE};

/// Scale of the effect radius used when weighting depth during downsampling.
const DEPTH_RANGE_SCALE: f32 = 0.75;
/// AO below this is clamped so fully occluded pixels keep some ambient.
const MIN_VISIBILITY: f32 = 0.03;

// ─── Viewspace Reconstruction ──────────────────────────────────────────────

/// Positive linear depth from a hardware depth value.
#[must_use]
pub fn linearize_depth(params: &GtaoParams, depth: f32) -> f32 {
    let [mul, add] = params.depth_unpack;
    if params.orthographic != 0 {
        // (mul, add) carry the projection's (z_axis.z, w_axis.z)
        -(depth - add) / mul
    } else {
        mul / (add - depth)
    }
}

fn viewspace_position(params: &GtaoParams, screen: Vec2, depth: f32) -> Vec3 {
    let mul = Vec2::from(params.ndc_to_view_mul);
    let add = Vec2::from(params.ndc_to_view_add);
    let xy = if params.orthographic != 0 {
        mul * screen + add
    } else {
        (mul * screen + add) * depth
    };
    xy.extend(depth)
}

/// Per-edge (left, right, top, bottom) continuity weights in `[0, 1]`.
fn calculate_edges(center: f32, left: f32, right: f32, top: f32, bottom: f32) -> Vec4 {
    let edges = Vec4::new(left, right, top, bottom) - center;
    let slope_lr = (edges.y - edges.x) * 0.5;
    let slope_tb = (edges.w - edges.z) * 0.5;
    let adjusted = edges + Vec4::new(slope_lr, -slope_lr, slope_tb, -slope_tb);
    let edges = edges.abs().min(adjusted.abs());
    (Vec4::splat(1.25) - edges / (center * 0.011)).clamp(Vec4::ZERO, Vec4::ONE)
}

/// Packs four edges into 2 bits each, stored as a normalized float.
#[must_use]
pub fn pack_edges(edges: Vec4) -> f32 {
    let e = (edges.clamp(Vec4::ZERO, Vec4::ONE) * 2.9).round();
    e.dot(Vec4::new(64.0, 16.0, 4.0, 1.0)) / 255.0
}

#[must_use]
pub fn unpack_edges(packed: f32) -> Vec4 {
    let value = (packed * 255.5) as u32;
    Vec4::new(
        ((value >> 6) & 3) as f32,
        ((value >> 4) & 3) as f32,
        ((value >> 2) & 3) as f32,
        (value & 3) as f32,
    ) / 3.0
}

/// Interleaved gradient noise, offset per frame.
fn spatio_temporal_noise(pixel: UVec2, frame: u32) -> Vec2 {
    let p = pixel.as_vec2() + 5.588_238 * (frame % 64) as f32;
    let slice = (52.982_918 * (0.067_110_56 * p.x + 0.005_837_15 * p.y).fract()).fract();
    let step = (slice + 0.618_034).fract();
    Vec2::new(slice, step)
}

impl SoftwareDevice {
    pub(super) fn gtao_prefilter_depth(
        &mut self,
        params: &GtaoParams,
        depth: ImageId,
        output: ImageId,
        groups: [u32; 3],
    ) -> Result<()> {
        let source = self.image(depth)?;
        let mut out = self.image(output)?.clone();
        for p in screen_threads(groups, params) {
            let d = source.load_f32(p.x, p.y, 0, 0);
            out.store_f32(p.x, p.y, 0, 0, linearize_depth(params, d).max(0.0));
        }
        *self.image_mut(output)? = out;
        Ok(())
    }

    pub(super) fn gtao_downsample_depth(
        &mut self,
        params: &GtaoParams,
        depth_mips: ImageId,
        groups: [u32; 3],
    ) -> Result<()> {
        let mip = params.mip.max(1);
        let image = self.image_mut(depth_mips)?;
        let (w, h) = image.extent(mip);

        let effect_radius = DEPTH_RANGE_SCALE * params.effect_radius * params.radius_multiplier;
        let falloff_range = params.effect_falloff_range * effect_radius;
        let falloff_from = effect_radius * (1.0 - params.effect_falloff_range);
        let falloff_mul = -1.0 / falloff_range.max(1e-4);
        let falloff_add = falloff_from / falloff_range.max(1e-4) + 1.0;

        let tile = SCREEN_TILE_SIZE;
        for y in 0..(groups[1] * tile).min(h) {
            for x in 0..(groups[0] * tile).min(w) {
                let d = [(0, 0), (1, 0), (0, 1), (1, 1)]
                    .map(|(dx, dy)| image.load_f32(x * 2 + dx, y * 2 + dy, 0, mip - 1));
                let max_depth = d.iter().copied().fold(0.0f32, f32::max);
                let weights = d.map(|di| ((max_depth - di) * falloff_mul + falloff_add).clamp(0.0, 1.0));
                let weight_sum: f32 = weights.iter().sum();
                let value = if weight_sum > 0.0 {
                    d.iter().zip(weights).map(|(di, wi)| di * wi).sum::<f32>() / weight_sum
                } else {
                    max_depth
                };
                image.store_f32(x, y, 0, mip, value);
            }
        }
        Ok(())
    }

    pub(super) fn gtao_main(
        &mut self,
        params: &GtaoParams,
        depth_mips: ImageId,
        normals: ImageId,
        ao_term: ImageId,
        edges: ImageId,
        groups: [u32; 3],
    ) -> Result<()> {
        let depth = self.image(depth_mips)?;
        let normals_img = self.image(normals)?;
        let mut ao_out = self.image(ao_term)?.clone();
        let mut edges_out = self.image(edges)?.clone();

        for p in screen_threads(groups, params) {
            let (visibility, packed_edges) = gtao_pixel(params, depth, normals_img, p);
            ao_out.store_u32(p.x, p.y, (visibility.clamp(0.0, 1.0) * 255.0 + 0.5) as u32);
            edges_out.store_f32(p.x, p.y, 0, 0, packed_edges);
        }

        *self.image_mut(ao_term)? = ao_out;
        *self.image_mut(edges)? = edges_out;
        Ok(())
    }

    pub(super) fn gtao_denoise(
        &mut self,
        params: &GtaoParams,
        ao_term: ImageId,
        edges: ImageId,
        output: ImageId,
        groups: [u32; 3],
    ) -> Result<()> {
        let ao = self.image(ao_term)?;
        let edges_img = self.image(edges)?;
        let mut out = self.image(output)?.clone();
        let [w, h] = params.viewport_size;

        let ao_at = |x: i64, y: i64| {
            let x = x.clamp(0, i64::from(w) - 1) as u32;
            let y = y.clamp(0, i64::from(h) - 1) as u32;
            ao.load_u32(x, y) as f32 / 255.0
        };
        let edges_at = |x: i64, y: i64| {
            let x = x.clamp(0, i64::from(w) - 1) as u32;
            let y = y.clamp(0, i64::from(h) - 1) as u32;
            unpack_edges(edges_img.load_f32(x, y, 0, 0))
        };

        for p in screen_threads(groups, params) {
            let (x, y) = (i64::from(p.x), i64::from(p.y));
            let c = edges_at(x, y);
            // symmetric weights: both sides of an edge must agree
            let e = Vec4::new(
                c.x * edges_at(x - 1, y).y,
                c.y * edges_at(x + 1, y).x,
                c.z * edges_at(x, y - 1).w,
                c.w * edges_at(x, y + 1).z,
            );
            let diagonal = 0.425;
            let corners = Vec4::new(
                diagonal * (e.x * edges_at(x - 1, y).z + e.z * edges_at(x, y - 1).x),
                diagonal * (e.z * edges_at(x, y - 1).y + e.y * edges_at(x + 1, y).z),
                diagonal * (e.w * edges_at(x, y + 1).x + e.x * edges_at(x - 1, y).w),
                diagonal * (e.y * edges_at(x + 1, y).w + e.w * edges_at(x, y + 1).y),
            );

            let blur = params.denoise_blur_beta.max(1e-4);
            let mut sum = ao_at(x, y) * blur;
            let mut weight = blur;
            for (value, wgt) in [
                (ao_at(x - 1, y), e.x),
                (ao_at(x + 1, y), e.y),
                (ao_at(x, y - 1), e.z),
                (ao_at(x, y + 1), e.w),
                (ao_at(x - 1, y - 1), corners.x),
                (ao_at(x + 1, y - 1), corners.y),
                (ao_at(x - 1, y + 1), corners.z),
                (ao_at(x + 1, y + 1), corners.w),
            ] {
                sum += value * wgt;
                weight += wgt;
            }
            let value = sum / weight;
            out.store_u32(p.x, p.y, (value.clamp(0.0, 1.0) * 255.0 + 0.5) as u32);
        }

        *self.image_mut(output)? = out;
        Ok(())
    }
}

/// Point-filtered fetch from the pyramid at normalized screen position `uv`.
fn load_depth_mip(depth: &SoftImage, uv: Vec2, mip: f32) -> f32 {
    let mip = mip.round() as u32;
    let (w, h) = depth.extent(mip);
    let texel = (uv.clamp(Vec2::ZERO, Vec2::ONE) * Vec2::new(w as f32, h as f32)).as_uvec2();
    depth.load_f32(texel.x.min(w - 1), texel.y.min(h - 1), 0, mip)
}

fn screen_threads(groups: [u32; 3], params: &GtaoParams) -> impl Iterator<Item = UVec2> {
    let [w, h] = params.viewport_size;
    let tile = SCREEN_TILE_SIZE;
    let (gw, gh) = ((groups[0] * tile).min(w), (groups[1] * tile).min(h));
    (0..gh).flat_map(move |y| (0..gw).map(move |x| UVec2::new(x, y)))
}

/// Horizon search for one pixel: `(visibility, packed edges)`.
fn gtao_pixel(params: &GtaoParams, depth: &SoftImage, normals: &SoftImage, pixel: UVec2) -> (f32, f32) {
    let [w, h] = params.viewport_size;
    let pixel_size = Vec2::from(params.viewport_pixel_size);
    let load = |x: i64, y: i64| {
        let x = x.clamp(0, i64::from(w) - 1) as u32;
        let y = y.clamp(0, i64::from(h) - 1) as u32;
        depth.load_f32(x, y, 0, 0)
    };
    let (x, y) = (i64::from(pixel.x), i64::from(pixel.y));
    let center_z = load(x, y);
    let edges = calculate_edges(center_z, load(x - 1, y), load(x + 1, y), load(x, y - 1), load(x, y + 1));
    let packed_edges = pack_edges(edges);

    let n = normals.load(pixel.x, pixel.y, 0, 0).xyz();
    if n == Vec3::ZERO || !center_z.is_finite() || center_z <= 0.0 {
        return (1.0, packed_edges);
    }
    let normal = Vec3::new(n.x, n.y, -n.z).normalize();

    let screen = (pixel.as_vec2() + 0.5) * pixel_size;
    let center = viewspace_position(params, screen, center_z);
    let view_vec = (-center).normalize_or(Vec3::NEG_Z);

    let effect_radius = params.effect_radius * params.radius_multiplier;
    let falloff_range = params.effect_falloff_range * effect_radius;
    let falloff_from = effect_radius * (1.0 - params.effect_falloff_range);
    let falloff_mul = -1.0 / falloff_range.max(1e-4);
    let falloff_add = falloff_from / falloff_range.max(1e-4) + 1.0;

    let view_pixel_size = if params.orthographic != 0 {
        Vec2::from(params.ndc_to_view_mul_x_pixel_size)
    } else {
        Vec2::from(params.ndc_to_view_mul_x_pixel_size) * center_z
    };
    let screen_radius = effect_radius / view_pixel_size.x.abs().max(1e-6);
    if screen_radius < 1.0 {
        return (1.0, packed_edges);
    }
    let min_s = 1.3 / screen_radius;

    let noise = spatio_temporal_noise(pixel, params.noise_index);
    let slices = params.slice_count.max(1);
    let steps = params.steps_per_slice.max(1);
    let max_mip = (depth.desc.mip_levels - 1) as f32;
    let mut visibility = 0.0;

    for slice in 0..slices {
        let phi = (slice as f32 + noise.x) / slices as f32 * PI;
        let omega = Vec2::new(phi.cos(), -phi.sin()) * screen_radius;
        let direction = Vec3::new(phi.cos(), phi.sin(), 0.0);
        let ortho_direction = direction - direction.dot(view_vec) * view_vec;
        let axis = ortho_direction.cross(view_vec).normalize_or(Vec3::X);
        let projected_normal = normal - axis * normal.dot(axis);
        let sign_norm = ortho_direction.dot(projected_normal).signum();
        let projected_len = projected_normal.length();
        let cos_norm = (projected_normal.dot(view_vec) / projected_len.max(1e-6)).clamp(0.0, 1.0);
        let n_angle = sign_norm * cos_norm.acos();

        let low_cos0 = (n_angle + FRAC_PI_2).cos();
        let low_cos1 = (n_angle - FRAC_PI_2).cos();
        let mut horizon_cos0 = low_cos0;
        let mut horizon_cos1 = low_cos1;

        for step in 0..steps {
            let step_noise = (noise.y + (slice + step * steps) as f32 * 0.618_034).fract();
            let mut s = (step as f32 + step_noise) / steps as f32;
            s = s.powf(params.sample_distribution_power) + min_s;

            let offset_pixels = (omega * s).round();
            let mip = (offset_pixels.length().log2() - params.depth_mip_sampling_offset).clamp(0.0, max_mip);
            let offset = offset_pixels * pixel_size;

            for (side, sample_screen) in [(0, screen + offset), (1, screen - offset)] {
                let sample_z = load_depth_mip(depth, sample_screen, mip);
                let sample = viewspace_position(params, sample_screen, sample_z);
                let delta = sample - center;
                let distance = delta.length().max(1e-6);
                let horizon = delta / distance;
                let falloff_base =
                    Vec3::new(delta.x, delta.y, delta.z * (1.0 + params.thin_occluder_compensation)).length();
                let weight = (falloff_base * falloff_mul + falloff_add).clamp(0.0, 1.0);
                let shc = horizon.dot(view_vec);
                if side == 0 {
                    horizon_cos0 = horizon_cos0.max(low_cos0 + (shc - low_cos0) * weight);
                } else {
                    horizon_cos1 = horizon_cos1.max(low_cos1 + (shc - low_cos1) * weight);
                }
            }
        }

        let projected_len = projected_len + (1.0 - projected_len) * 0.05;
        let h0 = -horizon_cos1.clamp(-1.0, 1.0).acos();
        let h1 = horizon_cos0.clamp(-1.0, 1.0).acos();
        let h0 = n_angle + (h0 - n_angle).clamp(-FRAC_PI_2, FRAC_PI_2);
        let h1 = n_angle + (h1 - n_angle).clamp(-FRAC_PI_2, FRAC_PI_2);
        let arc0 = (cos_norm + 2.0 * h0 * n_angle.sin() - (2.0 * h0 - n_angle).cos()) / 4.0;
        let arc1 = (cos_norm + 2.0 * h1 * n_angle.sin() - (2.0 * h1 - n_angle).cos()) / 4.0;
        visibility += projected_len * (arc0 + arc1);
    }

    let visibility = (visibility / slices as f32).max(0.0).powf(params.final_value_power);
    (visibility.max(MIN_VISIBILITY), packed_edges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perspective_params(near: f32, far: f32) -> GtaoParams {
        let projection = glam::Mat4::perspective_rh(1.0, 1.0, near, far);
        GtaoParams {
            depth_unpack: [-projection.w_axis.z, -projection.z_axis.z],
            ..GtaoParams::default()
        }
    }

    #[test]
    fn linearized_depth_spans_the_clip_range() {
        let params = perspective_params(0.5, 100.0);
        assert!((linearize_depth(&params, 0.0) - 0.5).abs() < 1e-4);
        assert!((linearize_depth(&params, 1.0) - 100.0).abs() < 1e-2);
    }

    #[test]
    fn orthographic_depth_is_affine() {
        let projection = glam::Mat4::orthographic_rh(-1.0, 1.0, -1.0, 1.0, 1.0, 11.0);
        let params = GtaoParams {
            depth_unpack: [projection.z_axis.z, projection.w_axis.z],
            orthographic: 1,
            ..GtaoParams::default()
        };
        assert!((linearize_depth(&params, 0.0) - 1.0).abs() < 1e-5);
        assert!((linearize_depth(&params, 0.5) - 6.0).abs() < 1e-4);
    }

    #[test]
    fn edges_survive_packing_at_two_bits() {
        let edges = Vec4::new(1.0, 0.0, 1.0 / 3.0, 2.0 / 3.0);
        assert_eq!(unpack_edges(pack_edges(edges)), edges);
    }

    #[test]
    fn flat_depth_has_no_edges() {
        assert_eq!(calculate_edges(4.0, 4.0, 4.0, 4.0, 4.0), Vec4::ONE);
        assert_eq!(calculate_edges(4.0, 40.0, 4.0, 4.0, 4.0).x, 0.0);
    }
}
