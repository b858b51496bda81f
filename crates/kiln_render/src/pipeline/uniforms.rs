//! Uniform / Light Upload
//!
//! CPU-side serialization of the camera and the scene's lights into the
//! records the kernels read. The upload itself is the first graph pass.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec4};
use kiln_core::math::{FrustumPlanes, OrthoBounds};
use kiln_scene::{Camera, Light, Scene};

use super::labels;
use super::shadow::ShadowUniforms;
use crate::device::{BufferDesc, BufferUsage};
use crate::graph::{Access, BufferHandle, GraphPass, PassBuilder, PassResources, RenderContext};

/// `culling_mode` of [`FrameUniforms`].
pub const CULL_PERSPECTIVE: u32 = 0;
pub const CULL_ORTHOGRAPHIC: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub view: Mat4,
    /// Jittered projection.
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub inverse_view_projection: Mat4,
    pub inverse_view: Mat4,
    pub camera_position: [f32; 4],
    /// Two-plane frustum constants, see [`FrustumPlanes::to_array`].
    pub frustum: [f32; 4],
    /// View-space XY box of an orthographic camera (min.xy, max.xy).
    pub ortho_bounds: [f32; 4],
    /// (width, height, 1/width, 1/height).
    pub viewport: [f32; 4],
    pub near: f32,
    pub far: f32,
    pub culling_mode: u32,
    pub frame_index: u32,
    pub object_count: u32,
    pub meshlet_count: u32,
    pub material_count: u32,
    pub _pad: u32,
}

impl FrameUniforms {
    #[must_use]
    pub fn new(camera: &Camera, width: u32, height: u32, frame_index: u32) -> Self {
        // culling always uses the unjittered projection
        let projection = camera.projection_matrix();
        let jittered = camera.jittered_projection_matrix();
        let view_projection = jittered * camera.view;
        let position = camera.position();

        let (culling_mode, frustum, ortho_bounds) = if camera.is_orthographic() {
            let bounds = OrthoBounds::from_projection(projection);
            (
                CULL_ORTHOGRAPHIC,
                [0.0; 4],
                [bounds.min.x, bounds.min.y, bounds.max.x, bounds.max.y],
            )
        } else {
            (
                CULL_PERSPECTIVE,
                FrustumPlanes::from_projection(projection).to_array(),
                [0.0; 4],
            )
        };

        let size = Vec2::new(width.max(1) as f32, height.max(1) as f32);
        Self {
            view: camera.view,
            projection: jittered,
            view_projection,
            inverse_view_projection: view_projection.inverse(),
            inverse_view: camera.view.inverse(),
            camera_position: [position.x, position.y, position.z, 1.0],
            frustum,
            ortho_bounds,
            viewport: [size.x, size.y, 1.0 / size.x, 1.0 / size.y],
            near: camera.near(),
            far: camera.far(),
            culling_mode,
            frame_index,
            object_count: 0,
            meshlet_count: 0,
            material_count: 0,
            _pad: 0,
        }
    }

    #[must_use]
    pub fn with_scene_counts(mut self, objects: u32, meshlets: u32, materials: u32) -> Self {
        self.object_count = objects;
        self.meshlet_count = meshlets;
        self.material_count = materials;
        self
    }
}

// ============================================================================
// Lights
// ============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GpuDirectionalLight {
    /// xyz travel direction (normalized), w = casts shadows.
    pub direction: [f32; 4],
    pub color_intensity: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GpuPointLight {
    pub position_radius: [f32; 4],
    pub color_intensity: [f32; 4],
    /// x falloff exponent.
    pub params: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GpuSpotLight {
    pub position_range: [f32; 4],
    pub direction: [f32; 4],
    pub color_intensity: [f32; 4],
    /// x cos(inner), y cos(outer).
    pub cone: [f32; 4],
}

/// The frame's lights, split by kind. Each list is uploaded into its own
/// storage buffer (never empty on the GPU side; counts travel separately).
#[derive(Debug, Default, Clone)]
pub struct LightData {
    pub directional: Vec<GpuDirectionalLight>,
    pub point: Vec<GpuPointLight>,
    pub spot: Vec<GpuSpotLight>,
    /// Index into `directional` of the light that owns the shadow cascades.
    pub shadow_caster: Option<usize>,
}

impl LightData {
    /// Enumerates the scene's lights once.
    #[must_use]
    pub fn gather(scene: &Scene) -> Self {
        let mut data = Self::default();
        scene.for_each_light(|light| match light {
            Light::Directional(light) => {
                let direction = light.direction.normalize_or(glam::Vec3::NEG_Y);
                if light.cast_shadows && data.shadow_caster.is_none() {
                    data.shadow_caster = Some(data.directional.len());
                }
                data.directional.push(GpuDirectionalLight {
                    direction: direction.extend(f32::from(u8::from(light.cast_shadows))).to_array(),
                    color_intensity: light.color.extend(light.intensity).to_array(),
                });
            }
            Light::Point(light) => data.point.push(GpuPointLight {
                position_radius: light.position.extend(light.radius).to_array(),
                color_intensity: light.color.extend(light.intensity).to_array(),
                params: [light.falloff, 0.0, 0.0, 0.0],
            }),
            Light::Spot(light) => data.spot.push(GpuSpotLight {
                position_range: light.position.extend(light.range).to_array(),
                direction: light
                    .direction
                    .normalize_or(glam::Vec3::NEG_Z)
                    .extend(0.0)
                    .to_array(),
                color_intensity: light.color.extend(light.intensity).to_array(),
                cone: Vec4::new(light.inner_angle.cos(), light.outer_angle.cos(), 0.0, 0.0)
                    .to_array(),
            }),
        });
        data
    }

    #[must_use]
    pub fn counts(&self) -> (u32, u32, u32) {
        (
            self.directional.len() as u32,
            self.point.len() as u32,
            self.spot.len() as u32,
        )
    }
}

// ============================================================================
// Upload Pass
// ============================================================================

/// Light buffers created by the upload pass.
#[derive(Debug, Clone, Copy)]
pub struct LightHandles {
    pub directional: BufferHandle,
    pub point: BufferHandle,
    pub spot: BufferHandle,
}

/// First pass of every frame: writes the frame and shadow uniforms of the
/// current frame slot and the light lists.
#[derive(Clone, Copy)]
pub struct UploadPass<'a> {
    frame: BufferHandle,
    shadow: BufferHandle,
    lights: LightHandles,
    frame_bytes: &'a [u8],
    shadow_bytes: &'a [u8],
    light_bytes: [&'a [u8]; 3],
}

impl<'a> UploadPass<'a> {
    pub fn setup(
        builder: &mut PassBuilder<'_, 'a>,
        frame: BufferHandle,
        shadow: BufferHandle,
        uniforms: &FrameUniforms,
        shadow_uniforms: &ShadowUniforms,
        lights: &LightData,
    ) -> Self {
        let storage = |label, size: usize, count: usize| BufferDesc {
            label,
            size: (size * count.max(1)).max(16) as u64,
            usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
        };
        let directional = builder.create_buffer(storage(
            labels::DIRECTIONAL_LIGHTS,
            std::mem::size_of::<GpuDirectionalLight>(),
            lights.directional.len(),
        ));
        let point = builder.create_buffer(storage(
            labels::POINT_LIGHTS,
            std::mem::size_of::<GpuPointLight>(),
            lights.point.len(),
        ));
        let spot = builder.create_buffer(storage(
            labels::SPOT_LIGHTS,
            std::mem::size_of::<GpuSpotLight>(),
            lights.spot.len(),
        ));

        for handle in [frame, shadow, directional, point, spot] {
            builder.write_buffer(handle, Access::TransferWrite);
        }

        Self {
            frame,
            shadow,
            lights: LightHandles {
                directional,
                point,
                spot,
            },
            frame_bytes: builder.alloc_pod(uniforms),
            shadow_bytes: builder.alloc_pod(shadow_uniforms),
            light_bytes: [
                builder.alloc_slice(&lights.directional),
                builder.alloc_slice(&lights.point),
                builder.alloc_slice(&lights.spot),
            ],
        }
    }

    #[must_use]
    pub fn lights(&self) -> LightHandles {
        self.lights
    }
}

impl<'a> GraphPass<'a> for UploadPass<'a> {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        ctx.write_buffer(resources.buffer(self.frame), 0, self.frame_bytes);
        ctx.write_buffer(resources.buffer(self.shadow), 0, self.shadow_bytes);
        let targets = [self.lights.directional, self.lights.point, self.lights.spot];
        for (handle, bytes) in targets.into_iter().zip(self.light_bytes) {
            if !bytes.is_empty() {
                ctx.write_buffer(resources.buffer(handle), 0, bytes);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn frame_uniforms_are_uniform_compatible() {
        assert_eq!(std::mem::size_of::<FrameUniforms>() % 16, 0);
        assert_eq!(std::mem::size_of::<GpuSpotLight>(), 64);
    }

    #[test]
    fn orthographic_cameras_select_box_culling() {
        let camera = Camera::orthographic(0.0, 64.0, 0.0, 64.0, 0.1, 10.0);
        let uniforms = FrameUniforms::new(&camera, 64, 64, 0);
        assert_eq!(uniforms.culling_mode, CULL_ORTHOGRAPHIC);
        assert!((uniforms.ortho_bounds[2] - 64.0).abs() < 1e-4);

        let camera = Camera::perspective(1.0, 1.0, 0.1, 10.0);
        assert_eq!(FrameUniforms::new(&camera, 64, 64, 0).culling_mode, CULL_PERSPECTIVE);
    }

    #[test]
    fn jitter_moves_the_projection_but_not_the_culling_planes() {
        let camera = Camera::perspective(1.0, 1.0, 0.1, 10.0);
        let jittered = camera.with_jitter(Vec2::new(0.25, -0.25));
        let still = FrameUniforms::new(&camera, 64, 64, 0);
        let moving = FrameUniforms::new(&jittered, 64, 64, 0);

        assert_ne!(still.projection, moving.projection);
        assert_eq!(still.frustum, moving.frustum);
        assert_eq!(
            moving.frustum,
            FrustumPlanes::from_projection(camera.projection_matrix()).to_array()
        );
    }

    #[test]
    fn gathers_lights_by_kind() {
        let mut scene = Scene::new();
        scene.add_light(Light::directional(Vec3::new(0.0, -2.0, 0.0), Vec3::ONE, 3.0).with_shadows());
        scene.add_light(Light::point(Vec3::ZERO, Vec3::ONE, 1.0, 5.0));
        scene.add_light(Light::spot(Vec3::ZERO, Vec3::NEG_Z, Vec3::ONE, 1.0, 8.0));

        let lights = LightData::gather(&scene);
        assert_eq!(lights.counts(), (1, 1, 1));
        assert_eq!(lights.shadow_caster, Some(0));
        assert_eq!(lights.directional[0].direction, [0.0, -1.0, 0.0, 1.0]);
        assert_eq!(lights.directional[0].color_intensity[3], 3.0);
    }
}
