//! Deferred lighting, debug overlays and the skybox fill.

use std::f32::consts::PI;

use glam::{UVec2, Vec2, Vec3, Vec4, Vec4Swizzles};
use kiln_core::math::id_color;
use kiln_core::{BufferId, ImageId, Result};
use kiln_scene::INDEX_TRIANGLE_BITS;

use super::SoftwareDevice;
use super::memory::{SoftBuffer, SoftImage};
use crate::command::{Kernel, SCREEN_TILE_SIZE, ShadeParams, SkyboxParams};
use crate::pipeline::shadow::ShadowUniforms;
use crate::pipeline::uniforms::{
    FrameUniforms, GpuDirectionalLight, GpuPointLight, GpuSpotLight,
};
use crate::settings::{LIGHT_COMPLEXITY_SATURATION, ShadingMode, VisualizationMode};

const MIN_ROUGHNESS: f32 = 0.045;

/// Overlay tint of cascades 0..4.
const CASCADE_TINTS: [Vec3; 4] = [
    Vec3::new(1.0, 0.25, 0.25),
    Vec3::new(0.25, 1.0, 0.25),
    Vec3::new(0.25, 0.25, 1.0),
    Vec3::new(1.0, 1.0, 0.25),
];

struct GBufferSample {
    albedo: Vec3,
    normal: Vec3,
    metallic: f32,
    roughness: f32,
    emissive: Vec3,
}

/// Everything the lighting loop reads besides the GBuffer.
struct LightingInputs<'d> {
    frame: FrameUniforms,
    params: ShadeParams,
    directional: Vec<GpuDirectionalLight>,
    point: Vec<GpuPointLight>,
    spot: Vec<GpuSpotLight>,
    shadow: ShadowUniforms,
    shadow_map: &'d SoftImage,
    irradiance: &'d SoftImage,
    radiance: &'d SoftImage,
}

impl SoftwareDevice {
    pub(super) fn shade(&mut self, kernel: &Kernel, groups: [u32; 3]) -> Result<()> {
        let Kernel::Shade {
            params,
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
        } = *kernel
        else {
            return Ok(());
        };

        let inputs = LightingInputs {
            frame: self.frame_uniforms(frame)?,
            params,
            directional: lights(self.buffer(directional_lights)?, params.directional_count),
            point: lights(self.buffer(point_lights)?, params.point_count),
            spot: lights(self.buffer(spot_lights)?, params.spot_count),
            shadow: self
                .buffer(shadow)?
                .read::<ShadowUniforms>(0)
                .unwrap_or_default(),
            shadow_map: self.image(shadow_map)?,
            irradiance: self.image(irradiance)?,
            radiance: self.image(radiance)?,
        };
        let depth_img = self.image(depth)?;
        let albedo_img = self.image(albedo)?;
        let material_img = self.image(material)?;
        let normal_img = self.image(normal)?;
        let ao_img = self.image(ao)?;
        let visibility_img = self.image(visibility)?;
        let mut out = self.image(output)?.clone();

        let tile = SCREEN_TILE_SIZE;
        for y in 0..groups[1] * tile {
            for x in 0..groups[0] * tile {
                if x >= params.width || y >= params.height {
                    continue;
                }
                let d = depth_img.load_f32(x, y, 0, 0);
                if d >= 1.0 {
                    out.store(x, y, 0, 0, Vec4::from(params.clear_color));
                    continue;
                }

                let a = albedo_img.load(x, y, 0, 0);
                let m = material_img.load(x, y, 0, 0);
                let n = normal_img.load(x, y, 0, 0);
                let gbuffer = GBufferSample {
                    albedo: a.xyz(),
                    normal: n.xyz().normalize_or(Vec3::Y),
                    metallic: m.x.clamp(0.0, 1.0),
                    roughness: m.y.clamp(MIN_ROUGHNESS, 1.0),
                    emissive: Vec3::new(m.z, m.w, n.w),
                };
                let occlusion = if params.ao_enabled != 0 {
                    ao_img.load_u32(x, y) as f32 / 255.0
                } else {
                    1.0
                };

                let world = inputs.world_position(UVec2::new(x, y), d);
                let color = match ShadingMode::from_index(params.shading_mode) {
                    ShadingMode::Shaded => inputs.lit(&gbuffer, world, occlusion).extend(1.0),
                    ShadingMode::Albedo => a.xyz().extend(1.0),
                    ShadingMode::Normals => (gbuffer.normal * 0.5 + 0.5).extend(1.0),
                    ShadingMode::Metalness => Vec3::splat(gbuffer.metallic).extend(1.0),
                    ShadingMode::Roughness => Vec3::splat(m.y).extend(1.0),
                    ShadingMode::Emissive => gbuffer.emissive.extend(1.0),
                    ShadingMode::AmbientOcclusion => Vec3::splat(occlusion).extend(1.0),
                };
                let color = inputs.visualize(color, world, visibility_img.load_u32(x, y));
                out.store(x, y, 0, 0, color);
            }
        }

        *self.image_mut(output)? = out;
        Ok(())
    }

    pub(super) fn skybox(
        &mut self,
        params: SkyboxParams,
        frame: BufferId,
        depth: ImageId,
        radiance: ImageId,
        output: ImageId,
        groups: [u32; 3],
    ) -> Result<()> {
        let frame = self.frame_uniforms(frame)?;
        let depth_img = self.image(depth)?;
        let radiance_img = self.image(radiance)?;
        let mut out = self.image(output)?.clone();
        let size = Vec2::new(params.width as f32, params.height as f32);

        let tile = SCREEN_TILE_SIZE;
        for y in 0..groups[1] * tile {
            for x in 0..groups[0] * tile {
                if x >= params.width || y >= params.height || depth_img.load_f32(x, y, 0, 0) < 1.0 {
                    continue;
                }
                let dir = view_direction(&frame, UVec2::new(x, y), size);
                let sky = radiance_img.sample_cube(dir, params.lod).xyz() * params.intensity;
                out.store(x, y, 0, 0, sky.extend(1.0));
            }
        }

        *self.image_mut(output)? = out;
        Ok(())
    }
}

/// World-space direction through the centre of `pixel`, from the near to the far plane.
fn view_direction(frame: &FrameUniforms, pixel: UVec2, size: Vec2) -> Vec3 {
    let uv = (pixel.as_vec2() + 0.5) / size;
    let ndc = Vec2::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0);
    let unproject = |z: f32| {
        let p = frame.inverse_view_projection * Vec4::new(ndc.x, ndc.y, z, 1.0);
        p.xyz() / p.w
    };
    (unproject(1.0) - unproject(0.0)).normalize_or(Vec3::NEG_Z)
}

fn lights<T: bytemuck::Pod>(buffer: &SoftBuffer, count: u32) -> Vec<T> {
    (0..count as usize).filter_map(|i| buffer.read::<T>(i)).collect()
}

impl LightingInputs<'_> {
    fn world_position(&self, pixel: UVec2, depth: f32) -> Vec3 {
        let size = Vec2::new(self.params.width as f32, self.params.height as f32);
        let uv = (pixel.as_vec2() + 0.5) / size;
        let ndc = Vec4::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
        let world = self.frame.inverse_view_projection * ndc;
        world.xyz() / world.w
    }

    fn lit(&self, surface: &GBufferSample, world: Vec3, occlusion: f32) -> Vec3 {
        let camera = Vec3::from_slice(&self.frame.camera_position[..3]);
        let v = (camera - world).normalize_or(Vec3::Z);
        let f0 = Vec3::splat(0.04).lerp(surface.albedo, surface.metallic);
        let diffuse = surface.albedo * (1.0 - surface.metallic);

        let mut color = Vec3::ZERO;
        for light in &self.directional {
            let l = -Vec4::from(light.direction).xyz();
            let radiance = Vec4::from(light.color_intensity);
            let mut visibility = 1.0;
            if light.direction[3] > 0.5 && self.params.shadows_enabled != 0 {
                visibility = self.shadow_visibility(world);
            }
            color += brdf(surface, f0, diffuse, v, l)
                * radiance.xyz()
                * radiance.w
                * visibility;
        }

        for light in &self.point {
            let position = Vec4::from(light.position_radius);
            let to_light = position.xyz() - world;
            let distance = to_light.length();
            let l = to_light / distance.max(1e-4);
            let radiance = Vec4::from(light.color_intensity);
            color += brdf(surface, f0, diffuse, v, l)
                * radiance.xyz()
                * radiance.w
                * range_attenuation(distance, position.w);
        }

        for light in &self.spot {
            let position = Vec4::from(light.position_range);
            let to_light = position.xyz() - world;
            let distance = to_light.length();
            let l = to_light / distance.max(1e-4);
            let radiance = Vec4::from(light.color_intensity);
            let axis = Vec4::from(light.direction).xyz();
            let cone = smoothstep(light.cone[1], light.cone[0], (-l).dot(axis));
            color += brdf(surface, f0, diffuse, v, l)
                * radiance.xyz()
                * radiance.w
                * range_attenuation(distance, position.w)
                * cone;
        }

        let ambient = self.ambient(surface, f0, diffuse, v) * occlusion;
        color + ambient + surface.emissive
    }

    fn ambient(&self, surface: &GBufferSample, f0: Vec3, diffuse: Vec3, v: Vec3) -> Vec3 {
        let n = surface.normal;
        let n_dot_v = n.dot(v).max(1e-4);
        let fresnel = fresnel_schlick_roughness(n_dot_v, f0, surface.roughness);
        let irradiance = self.irradiance.sample_cube(n, 0.0).xyz();
        let r = (-v).reflect(n);
        let max_mip = (self.radiance.desc.mip_levels - 1) as f32;
        let prefiltered = self.radiance.sample_cube(r, surface.roughness * max_mip).xyz();
        (diffuse * irradiance * (Vec3::ONE - fresnel) + prefiltered * fresnel) * self.params.ibl_intensity
    }

    /// First cascade whose split lies beyond the view depth of `world`.
    fn cascade_index(&self, world: Vec3) -> Option<usize> {
        let shadow = &self.shadow;
        let view_depth = -self.frame.view.transform_point3(world).z;
        let count = shadow.cascade_count.min(shadow.view_projection.len() as u32) as usize;
        (0..count).find(|&i| view_depth <= shadow.splits[i])
    }

    /// One compare tap in the cascade covering `world`; outside every cascade is lit.
    fn shadow_visibility(&self, world: Vec3) -> f32 {
        let shadow = &self.shadow;
        let Some(cascade) = self.cascade_index(world) else {
            return 1.0;
        };

        let clip = shadow.view_projection[cascade] * world.extend(1.0);
        let ndc = clip.xyz() / clip.w;
        let uv = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
        if uv.cmplt(Vec2::ZERO).any() || uv.cmpgt(Vec2::ONE).any() || ndc.z > 1.0 {
            return 1.0;
        }
        let (w, h) = self.shadow_map.extent(0);
        let texel = (uv * Vec2::new(w as f32, h as f32))
            .floor()
            .min(Vec2::new(w as f32 - 1.0, h as f32 - 1.0));
        let stored = self.shadow_map.load_f32(texel.x as u32, texel.y as u32, cascade as u32, 0);
        if ndc.z - shadow.depth_bias <= stored { 1.0 } else { 0.0 }
    }

    /// Directional lights plus every point and spot light whose range and
    /// cone reach `world`.
    fn light_count(&self, world: Vec3) -> u32 {
        let points = self
            .point
            .iter()
            .filter(|light| {
                let position = Vec4::from(light.position_radius);
                position.xyz().distance(world) < position.w
            })
            .count();
        let spots = self
            .spot
            .iter()
            .filter(|light| {
                let position = Vec4::from(light.position_range);
                let to_world = world - position.xyz();
                let distance = to_world.length();
                let axis = Vec4::from(light.direction).xyz();
                distance < position.w && (to_world / distance.max(1e-4)).dot(axis) > light.cone[1]
            })
            .count();
        self.directional.len() as u32 + points as u32 + spots as u32
    }

    fn visualize(&self, color: Vec4, world: Vec3, texel: u32) -> Vec4 {
        match VisualizationMode::from_index(self.params.visualization_mode) {
            VisualizationMode::None => color,
            VisualizationMode::Cascades => match self.cascade_index(world) {
                Some(cascade) => (color.xyz() * CASCADE_TINTS[cascade]).extend(1.0),
                None => color,
            },
            VisualizationMode::LightComplexity => heat_color(self.light_count(world)).extend(1.0),
            VisualizationMode::TriangleId => id_color(texel).extend(1.0),
            VisualizationMode::MeshletId => id_color(texel >> INDEX_TRIANGLE_BITS).extend(1.0),
        }
    }
}

/// Green at zero lights, red at [`LIGHT_COMPLEXITY_SATURATION`] and above.
fn heat_color(count: u32) -> Vec3 {
    let t = (count as f32 / LIGHT_COMPLEXITY_SATURATION as f32).min(1.0);
    Vec3::new(t, 1.0 - t, 0.0)
}

// ─── BRDF ──────────────────────────────────────────────────────────────────

fn brdf(surface: &GBufferSample, f0: Vec3, diffuse: Vec3, v: Vec3, l: Vec3) -> Vec3 {
    let n = surface.normal;
    let n_dot_l = n.dot(l).clamp(0.0, 1.0);
    if n_dot_l <= 0.0 {
        return Vec3::ZERO;
    }
    let h = (v + l).normalize_or(n);
    let n_dot_v = n.dot(v).max(1e-4);
    let n_dot_h = n.dot(h).clamp(0.0, 1.0);
    let v_dot_h = v.dot(h).clamp(0.0, 1.0);

    let a = surface.roughness * surface.roughness;
    let a2 = a * a;
    let d_denom = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    let distribution = a2 / (PI * d_denom * d_denom);
    let vis_v = n_dot_l * (n_dot_v * n_dot_v * (1.0 - a2) + a2).sqrt();
    let vis_l = n_dot_v * (n_dot_l * n_dot_l * (1.0 - a2) + a2).sqrt();
    let visibility = 0.5 / (vis_v + vis_l).max(1e-6);
    let fresnel = f0 + (Vec3::ONE - f0) * (1.0 - v_dot_h).powi(5);

    let specular = fresnel * distribution * visibility;
    let diffuse = (Vec3::ONE - fresnel) * diffuse / PI;
    (diffuse + specular) * n_dot_l
}

fn fresnel_schlick_roughness(cos_theta: f32, f0: Vec3, roughness: f32) -> Vec3 {
    let max = Vec3::splat(1.0 - roughness).max(f0);
    f0 + (max - f0) * (1.0 - cos_theta).clamp(0.0, 1.0).powi(5)
}

/// Inverse-square falloff windowed to reach zero at `range`.
pub(super) fn range_attenuation(distance: f32, range: f32) -> f32 {
    let ratio = distance / range.max(1e-4);
    let window = (1.0 - ratio.powi(4)).clamp(0.0, 1.0);
    window * window / (distance * distance).max(0.01)
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0).max(1e-4)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attenuation_reaches_zero_at_the_range() {
        assert_eq!(range_attenuation(5.0, 5.0), 0.0);
        assert!(range_attenuation(1.0, 5.0) > range_attenuation(2.0, 5.0));
    }

    #[test]
    fn heat_map_saturates() {
        assert_eq!(heat_color(0), Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(heat_color(LIGHT_COMPLEXITY_SATURATION), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(heat_color(LIGHT_COMPLEXITY_SATURATION * 3), Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn view_direction_follows_the_camera_axis() {
        let camera = kiln_scene::Camera::perspective(1.0, 1.0, 0.1, 100.0);
        let frame = FrameUniforms::new(&camera, 9, 9, 0);
        let centre = view_direction(&frame, UVec2::new(4, 4), Vec2::splat(9.0));
        assert!(centre.distance(Vec3::NEG_Z) < 1e-3);
        let top_left = view_direction(&frame, UVec2::ZERO, Vec2::splat(9.0));
        assert!(top_left.x < 0.0 && top_left.y > 0.0);
    }

    #[test]
    fn back_facing_lights_contribute_nothing() {
        let surface = GBufferSample {
            albedo: Vec3::ONE,
            normal: Vec3::Z,
            metallic: 0.0,
            roughness: 0.5,
            emissive: Vec3::ZERO,
        };
        let f0 = Vec3::splat(0.04);
        assert_eq!(brdf(&surface, f0, Vec3::ONE, Vec3::Z, Vec3::NEG_Z), Vec3::ZERO);
        assert!(brdf(&surface, f0, Vec3::ONE, Vec3::Z, Vec3::Z).x > 0.0);
    }
}
