//! Scene Renderer
//!
//! Owns the device-side state that outlives a frame (default resources, the
//! GPU copy of the render scene, per-slot uniform buffers, the shadow map and
//! the final image) and records one frame graph per [`SceneRenderer::on_render_editor`].
//!
//! # Frame Flow
//!
//! ```text
//! apply latched resize / settings ─► repack scene if invalid ─► build graph
//!     ─► compile (cull, barriers, transients) ─► execute ─► recycle transients
//! ```
//!
//! A scene without render objects records a single "Clear Output" pass; none
//! of the culling, visibility or material-sort passes run. Both paths end with
//! the "Present Transition" pass, the frame's one explicit layout change.

use bumpalo::Bump;
use kiln_core::{BufferId, ImageId, Result};
use kiln_scene::{Camera, Scene, Skylight};

use crate::command::{CULL_GROUP_SIZE, ClearValue, RasterParams, ShadeParams, SkyboxParams};
use crate::defaults::DefaultResources;
use crate::device::{BufferDesc, ImageDesc, ImageFormat, ImageUsage, RenderDevice};
use crate::graph::{
    Access, FrameOutput, FrameReport, GraphPass, ImageHandle, PassBuilder, PassKind,
    PassResources, RenderContext, RenderGraph, TransientPool,
};
use crate::pipeline::culling::{CompactPass, MeshletCullPass, ObjectCullPass};
use crate::pipeline::gbuffer::{GBufferPass, SortedPixels};
use crate::pipeline::gtao::{
    GtaoDenoisePass, GtaoMainPass, GtaoPrefilterPass, camera_gtao_params,
};
use crate::pipeline::indirect_args::{DispatchSizing, IndirectArgsPass, MaterialArgsPass};
use crate::pipeline::material_sort::{MaterialCountPass, PixelCollectPass};
use crate::pipeline::prefix_sum::PrefixSumPass;
use crate::pipeline::scene_buffers::{GpuScene, MaterialBinding};
use crate::pipeline::shading::{LightingInputs, ShadingPass};
use crate::pipeline::shadow::{CascadeSetup, MAX_CASCADES, ShadowPass, ShadowUniforms};
use crate::pipeline::skybox::SkyboxPass;
use crate::pipeline::stats::{FrameStatistics, ReadStatisticsPass, STATISTICS_READBACK_TAG};
use crate::pipeline::uniforms::{FrameUniforms, LightData, UploadPass};
use crate::pipeline::visibility::{PreDepthPass, VisibilityPass};
use crate::pipeline::{GeometryHandles, labels, names};
use crate::settings::{RendererSettings, ShadingMode};

/// Format of the image [`SceneRenderer::final_image`] returns.
pub const FINAL_IMAGE_FORMAT: ImageFormat = ImageFormat::Rgba8Unorm;

/// Uniform buffers of one frame-in-flight slot.
#[derive(Debug, Clone, Copy)]
struct FrameSlot {
    frame_uniforms: BufferId,
    shadow_uniforms: BufferId,
}

impl FrameSlot {
    fn create<D: RenderDevice + ?Sized>(device: &mut D) -> Result<Self> {
        Ok(Self {
            frame_uniforms: device.create_buffer(&BufferDesc::uniform::<FrameUniforms>(labels::FRAME_UNIFORMS))?,
            shadow_uniforms: device.create_buffer(&BufferDesc::uniform::<ShadowUniforms>(labels::SHADOW_UNIFORMS))?,
        })
    }

    fn destroy<D: RenderDevice + ?Sized>(self, device: &mut D) {
        device.destroy_buffer(self.frame_uniforms);
        device.destroy_buffer(self.shadow_uniforms);
    }
}

fn create_final_image<D: RenderDevice + ?Sized>(device: &mut D, (width, height): (u32, u32)) -> Result<ImageId> {
    device.create_image(&ImageDesc::d2(
        labels::FINAL_IMAGE,
        width,
        height,
        FINAL_IMAGE_FORMAT,
        ImageUsage::STORAGE | ImageUsage::SAMPLED | ImageUsage::COLOR_TARGET | ImageUsage::COPY_SRC,
    ))
}

fn create_shadow_map<D: RenderDevice + ?Sized>(device: &mut D, settings: &RendererSettings) -> Result<ImageId> {
    let resolution = settings.shadows.resolution.max(1);
    device.create_image(
        &ImageDesc::d2(
            labels::SHADOW_MAP,
            resolution,
            resolution,
            ImageFormat::Depth32Float,
            ImageUsage::DEPTH_TARGET | ImageUsage::SAMPLED,
        )
        .with_layers(settings.shadows.cascade_count.clamp(1, MAX_CASCADES)),
    )
}

fn create_frame_slots<D: RenderDevice + ?Sized>(device: &mut D, settings: &RendererSettings) -> Result<Vec<FrameSlot>> {
    (0..settings.frames_in_flight.max(1))
        .map(|_| FrameSlot::create(device))
        .collect()
}

/// Fills the final image with the clear color. The only pass of a frame
/// without render objects.
#[derive(Clone, Copy)]
struct ClearOutputPass {
    output: ImageHandle,
    color: [f32; 4],
}

impl ClearOutputPass {
    fn setup(builder: &mut PassBuilder<'_, '_>, output: ImageHandle, color: [f32; 4]) -> Self {
        builder.write_image(output, Access::TransferWrite);
        builder.set_side_effect();
        Self { output, color }
    }
}

impl<'a> GraphPass<'a> for ClearOutputPass {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        ctx.clear_image(resources.image(self.output), ClearValue::Float(self.color));
    }
}

/// Transitions the final image to [`Access::Present`]. Records no work of its
/// own; the graph emits the layout barrier in front of it.
#[derive(Clone, Copy)]
struct PresentPass;

impl PresentPass {
    fn setup(builder: &mut PassBuilder<'_, '_>, output: ImageHandle) -> Self {
        builder.read_image(output, Access::Present);
        builder.set_side_effect();
        Self
    }
}

impl<'a> GraphPass<'a> for PresentPass {
    fn execute(&self, _ctx: &mut RenderContext<'_, 'a>, _resources: &PassResources<'_>) {}
}

/// Per-frame values resolved before the graph is built.
struct FrameInputs<'f> {
    camera: &'f Camera,
    lights: LightData,
    irradiance: ImageId,
    radiance: ImageId,
    ibl_intensity: f32,
    /// Skylight whose radiance cube is alive on the device.
    sky: Option<Skylight>,
    slot: FrameSlot,
}

/// Drives the visibility pipeline on a [`RenderDevice`].
///
/// ```rust,ignore
/// let mut renderer = SceneRenderer::new(SoftwareDevice::new(), 640, 360, RendererSettings::default())?;
/// renderer.on_render_editor(&mut scene, &camera)?;
/// let image = renderer.final_image();
/// ```
pub struct SceneRenderer<D: RenderDevice> {
    device: D,
    settings: RendererSettings,
    size: (u32, u32),

    pending_size: Option<(u32, u32)>,
    pending_settings: Option<RendererSettings>,
    invalidated: bool,

    defaults: DefaultResources,
    gpu_scene: Option<GpuScene>,
    frame_slots: Vec<FrameSlot>,
    shadow_map: ImageId,
    final_image: ImageId,

    pool: TransientPool,
    arena: Bump,
    frame_index: u64,
    last_report: FrameReport,
    statistics: Option<FrameStatistics>,
}

impl<D: RenderDevice> SceneRenderer<D> {
    pub fn new(mut device: D, width: u32, height: u32, settings: RendererSettings) -> Result<Self> {
        let size = (width.max(1), height.max(1));
        let defaults = DefaultResources::new(&mut device)?;
        let frame_slots = create_frame_slots(&mut device, &settings)?;
        let shadow_map = create_shadow_map(&mut device, &settings)?;
        let final_image = create_final_image(&mut device, size)?;

        log::info!(
            "SceneRenderer created on {} ({}x{}, {} frames in flight)",
            device.backend_name(),
            size.0,
            size.1,
            frame_slots.len()
        );

        Ok(Self {
            device,
            settings,
            size,
            pending_size: None,
            pending_settings: None,
            invalidated: false,
            defaults,
            gpu_scene: None,
            frame_slots,
            shadow_map,
            final_image,
            pool: TransientPool::new(),
            arena: Bump::new(),
            frame_index: 0,
            last_report: FrameReport::default(),
            statistics: None,
        })
    }

    // ========================================================================
    // Public API
    // ========================================================================

    /// Requests a new output size. Applied at the start of the next frame,
    /// once in-flight work has finished.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.pending_size = Some((width.max(1), height.max(1)));
    }

    /// Forces a repack and re-upload of the render scene on the next frame.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    /// Replaces the settings from the next frame on.
    pub fn set_settings(&mut self, settings: RendererSettings) {
        self.pending_settings = Some(settings);
    }

    /// Settings of the last rendered frame (latched changes not included).
    #[must_use]
    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    /// Current output size.
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// The image the last frame shaded into.
    #[must_use]
    pub fn final_image(&self) -> ImageId {
        self.final_image
    }

    /// Bytes of transient resources the last frame graph realized.
    #[must_use]
    pub fn frame_total_gpu_allocation_size(&self) -> u64 {
        self.last_report.transient_bytes
    }

    /// Culling counters of the last frame, if statistics were collected.
    #[must_use]
    pub fn frame_statistics(&self) -> Option<FrameStatistics> {
        self.statistics
    }

    #[must_use]
    pub fn last_report(&self) -> &FrameReport {
        &self.last_report
    }

    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    #[must_use]
    pub fn gpu_scene(&self) -> Option<&GpuScene> {
        self.gpu_scene.as_ref()
    }

    #[must_use]
    pub fn defaults(&self) -> &DefaultResources {
        &self.defaults
    }

    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Renders `scene` from `camera` into the final image.
    pub fn on_render_editor(&mut self, scene: &mut Scene, camera: &Camera) -> Result<()> {
        self.apply_pending_changes()?;

        let force = std::mem::take(&mut self.invalidated);
        if scene.prepare_render_scene(force) || self.gpu_scene.is_none() {
            if let Some(old) = self.gpu_scene.take() {
                old.destroy(&mut self.device);
            }
            self.gpu_scene = Some(GpuScene::upload(&mut self.device, scene.render_scene(), &self.defaults)?);
        }

        let skylight = scene.skylight().copied();
        let inputs = FrameInputs {
            camera,
            lights: LightData::gather(scene),
            irradiance: self
                .defaults
                .cube_or_black(&self.device, skylight.and_then(|s| s.irradiance)),
            radiance: self
                .defaults
                .cube_or_black(&self.device, skylight.and_then(|s| s.radiance)),
            ibl_intensity: skylight.map_or(0.0, |s| s.intensity),
            sky: skylight.filter(|s| s.radiance.is_some_and(|id| self.device.contains_image(id))),
            slot: self.frame_slots[self.settings.frame_slot(self.frame_index) % self.frame_slots.len()],
        };

        self.arena.reset();
        let mut graph = RenderGraph::new(&self.arena);
        let object_count = self.gpu_scene.as_ref().map_or(0, GpuScene::render_object_count);
        let output = graph.import_image(labels::FINAL_IMAGE, self.final_image);
        if object_count == 0 {
            let color = self.settings.clear_color;
            graph.add_pass(names::CLEAR_OUTPUT, PassKind::Transfer, |b| {
                ClearOutputPass::setup(b, output, color)
            });
        } else {
            self.record_scene_passes(&mut graph, &inputs, output);
        }
        graph.add_pass(names::PRESENT, PassKind::Transfer, |b| PresentPass::setup(b, output));

        let output = graph
            .compile(&mut self.device, &mut self.pool)
            .and_then(|compiled| compiled.execute(&mut self.device));
        self.pool
            .end_frame(&mut self.device, self.settings.transient_idle_frames);
        let FrameOutput { report, readbacks } = output?;

        self.statistics = self.settings.collect_statistics.then(|| {
            let total_meshlets = self.gpu_scene.as_ref().map_or(0, GpuScene::meshlet_count);
            readbacks
                .iter()
                .find(|r| r.tag == STATISTICS_READBACK_TAG)
                .map_or_else(FrameStatistics::default, |r| {
                    FrameStatistics::from_counters(&r.bytes, total_meshlets)
                })
        });

        log::trace!(
            "Frame {}: {} passes, {} culled, {} barriers, {} transient bytes",
            self.frame_index,
            report.passes.len(),
            report.culled_passes.len(),
            report.barrier_count,
            report.transient_bytes
        );
        self.last_report = report;
        self.frame_index += 1;
        Ok(())
    }

    /// Waits for the device and releases every resource the renderer owns.
    pub fn shutdown(mut self) -> Result<D> {
        self.device.wait_idle()?;
        self.pool.clear(&mut self.device);
        if let Some(scene) = self.gpu_scene.take() {
            scene.destroy(&mut self.device);
        }
        for slot in self.frame_slots.drain(..) {
            slot.destroy(&mut self.device);
        }
        self.device.destroy_image(self.shadow_map);
        self.device.destroy_image(self.final_image);
        let Self {
            mut device,
            defaults,
            ..
        } = self;
        defaults.destroy(&mut device);
        Ok(device)
    }

    // ========================================================================
    // Internal
    // ========================================================================

    /// Applies a latched resize or settings change.
    fn apply_pending_changes(&mut self) -> Result<()> {
        let size = self.pending_size.take().filter(|&size| size != self.size);
        let settings = self.pending_settings.take();
        let reallocate = settings
            .as_ref()
            .is_some_and(|s| s.requires_reallocation(&self.settings));

        if size.is_some() || reallocate {
            self.device.wait_idle()?;
        }

        if let Some(settings) = settings {
            if reallocate {
                for slot in self.frame_slots.drain(..) {
                    slot.destroy(&mut self.device);
                }
                self.device.destroy_image(self.shadow_map);
                self.frame_slots = create_frame_slots(&mut self.device, &settings)?;
                self.shadow_map = create_shadow_map(&mut self.device, &settings)?;
                log::debug!(
                    "Shadow map reallocated: {}² × {} cascades",
                    settings.shadows.resolution,
                    settings.shadows.cascade_count
                );
            }
            self.settings = settings;
        }

        if let Some(size) = size {
            self.device.destroy_image(self.final_image);
            self.final_image = create_final_image(&mut self.device, size)?;
            // every screen-sized transient changes shape
            self.pool.clear(&mut self.device);
            log::info!("SceneRenderer resized {}x{} -> {}x{}", self.size.0, self.size.1, size.0, size.1);
            self.size = size;
        }
        Ok(())
    }

    /// Records every pass of a frame with at least one render object.
    fn record_scene_passes<'a>(&self, graph: &mut RenderGraph<'a>, inputs: &FrameInputs<'_>, output: ImageHandle) {
        let Some(gpu) = self.gpu_scene.as_ref() else {
            return;
        };
        let settings = &self.settings;
        let size = self.size;
        let (width, height) = size;
        let camera = inputs.camera;
        let lights = &inputs.lights;

        let objects = gpu.render_object_count();
        let meshlets = gpu.meshlet_count();
        let materials = gpu.individual_material_count();
        let statistics = settings.collect_statistics;

        let uniforms = FrameUniforms::new(camera, width, height, self.frame_index as u32)
            .with_scene_counts(objects, meshlets, materials);
        let shadow_caster = lights
            .shadow_caster
            .filter(|_| settings.shadows.enabled)
            .and_then(|i| lights.directional.get(i));
        let cascades = shadow_caster.map(|light| {
            let [x, y, z, _] = light.direction;
            CascadeSetup::new(camera, glam::Vec3::new(x, y, z), &settings.shadows)
        });
        let shadow_uniforms = cascades.map_or_else(CascadeSetup::disabled, |c| c.uniforms);

        // ---- imports ----
        let frame = graph.import_buffer(labels::FRAME_UNIFORMS, inputs.slot.frame_uniforms);
        let shadow = graph.import_buffer(labels::SHADOW_UNIFORMS, inputs.slot.shadow_uniforms);
        let scene = gpu.import(graph);
        let irradiance = graph.import_image("Skylight Irradiance", inputs.irradiance);
        let radiance = graph.import_image("Skylight Radiance", inputs.radiance);

        // ---- upload ----
        let lights_handles = graph
            .add_pass(names::UPLOAD, PassKind::Transfer, |b| {
                UploadPass::setup(b, frame, shadow, &uniforms, &shadow_uniforms, lights)
            })
            .lights();

        // ---- culling ----
        let object_cull = *graph.add_pass(names::OBJECT_CULL, PassKind::Compute, |b| {
            ObjectCullPass::setup(b, frame, &scene, objects, meshlets, statistics)
        });
        let cull_args = graph
            .add_pass(names::MESHLET_CULL_ARGS, PassKind::Compute, |b| {
                IndirectArgsPass::setup(
                    b,
                    labels::MESHLET_CULL_ARGS,
                    object_cull.mapping_count(),
                    DispatchSizing::Groups(CULL_GROUP_SIZE),
                )
            })
            .args();
        let meshlet_cull = *graph.add_pass(names::MESHLET_CULL, PassKind::Compute, |b| {
            MeshletCullPass::setup(b, frame, &scene, &object_cull, cull_args, meshlets, statistics)
        });
        let compact_args = graph
            .add_pass(names::COMPACTION_ARGS, PassKind::Compute, |b| {
                IndirectArgsPass::setup(
                    b,
                    labels::COMPACTION_ARGS,
                    meshlet_cull.surviving_count(),
                    DispatchSizing::Wrapped,
                )
            })
            .args();
        let compact = *graph.add_pass(names::PRIMITIVE_COMPACTION, PassKind::Compute, |b| {
            CompactPass::setup(b, &scene, &meshlet_cull, compact_args, gpu.index_count())
        });
        let geometry = GeometryHandles::new(&scene, meshlet_cull.surviving(), compact.indices(), compact.draw_args());

        // ---- shadow ----
        let shadow_map = match cascades {
            Some(cascades) => {
                let map = graph.import_image(labels::SHADOW_MAP, self.shadow_map);
                graph
                    .add_pass(names::SHADOW, PassKind::Raster, |b| ShadowPass::setup(b, geometry, map, cascades))
                    .shadow_map()
            }
            None => graph.import_image(labels::SHADOW_MAP, self.defaults.shadow_fallback),
        };

        // ---- visibility ----
        let raster = RasterParams {
            view_projection: uniforms.view_projection,
            view: uniforms.view,
        };
        let pre_depth = *graph.add_pass(names::PRE_DEPTH, PassKind::Raster, |b| {
            PreDepthPass::setup(b, geometry, raster, width, height)
        });
        let visibility = graph
            .add_pass(names::VISIBILITY, PassKind::Raster, |b| {
                VisibilityPass::setup(b, geometry, raster, pre_depth.depth(), width, height)
            })
            .visibility();

        // ---- material sort ----
        let surviving = meshlet_cull.surviving();
        let material_count = graph
            .add_pass(names::MATERIAL_COUNT, PassKind::Compute, |b| {
                MaterialCountPass::setup(b, visibility, surviving, &scene, materials, size)
            })
            .material_count();
        let material_start = graph
            .add_pass(names::MATERIAL_PREFIX_SUM, PassKind::Compute, |b| {
                PrefixSumPass::setup(b, labels::MATERIAL_START, material_count, materials)
            })
            .output();
        let pixels = graph
            .add_pass(names::PIXEL_COLLECT, PassKind::Compute, |b| {
                PixelCollectPass::setup(b, visibility, surviving, &scene, material_start, materials, size)
            })
            .pixels();
        let material_args = graph
            .add_pass(names::MATERIAL_ARGS, PassKind::Compute, |b| {
                MaterialArgsPass::setup(b, material_count, materials)
            })
            .args();

        // ---- gbuffer ----
        let bindings: Vec<MaterialBinding> = (0..materials)
            .map(|id| gpu.material_binding(id, &self.device, &self.defaults))
            .collect();
        let sorted = SortedPixels {
            material_count,
            material_start,
            pixels,
            args: material_args,
        };
        let gbuffer = graph
            .add_pass(names::GBUFFER, PassKind::Compute, |b| {
                GBufferPass::setup(b, frame, &scene, surviving, visibility, sorted, &bindings, size)
            })
            .targets();

        // ---- ambient occlusion ----
        let ao = if settings.gtao.enabled {
            let params = camera_gtao_params(camera, size, self.frame_index, &settings.gtao);
            let depth_mips = graph
                .add_pass(names::GTAO_PREFILTER, PassKind::Compute, |b| {
                    GtaoPrefilterPass::setup(b, params, pre_depth.depth())
                })
                .depth_mips();
            let main = *graph.add_pass(names::GTAO_MAIN, PassKind::Compute, |b| {
                GtaoMainPass::setup(b, params, depth_mips, pre_depth.normals())
            });
            graph
                .add_pass(names::GTAO_DENOISE, PassKind::Compute, |b| GtaoDenoisePass::setup(b, &main))
                .output()
        } else {
            graph.import_image("Default AO", self.defaults.ao_fallback)
        };

        // ---- shading ----
        let (directional_count, point_count, spot_count) = lights.counts();
        let shade = ShadeParams {
            width,
            height,
            shading_mode: settings.shading_mode.index(),
            directional_count,
            point_count,
            spot_count,
            shadows_enabled: u32::from(cascades.is_some()),
            ao_enabled: u32::from(settings.gtao.enabled),
            ibl_intensity: inputs.ibl_intensity,
            visualization_mode: settings.visualization_mode.index(),
            _pad: [0; 2],
            clear_color: settings.clear_color,
        };
        let lighting = LightingInputs {
            frame,
            depth: pre_depth.depth(),
            ao,
            visibility,
            lights: lights_handles,
            shadow_map,
            shadow_uniforms: shadow,
            irradiance,
            radiance,
        };
        graph.add_pass(names::SHADING, PassKind::Compute, |b| {
            ShadingPass::setup(b, lighting, gbuffer, output, shade)
        });

        // ---- skybox ----
        if let Some(sky) = inputs.sky.filter(|_| settings.shading_mode == ShadingMode::Shaded) {
            let params = SkyboxParams {
                width,
                height,
                intensity: sky.intensity,
                lod: sky.lod,
            };
            graph.add_pass(names::SKYBOX, PassKind::Compute, |b| {
                SkyboxPass::setup(b, frame, pre_depth.depth(), radiance, output, params)
            });
        }

        if statistics {
            let stats = meshlet_cull.stats();
            graph.add_pass(names::READ_STATISTICS, PassKind::Transfer, |b| {
                ReadStatisticsPass::setup(b, stats)
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec2, Vec3, Vec4};
    use kiln_scene::{Material, MeshAsset, RenderObject};

    use super::*;
    use crate::device::SoftwareDevice;

    fn camera() -> Camera {
        Camera::perspective(1.0, 1.0, 0.1, 100.0).looking_at(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y)
    }

    fn quad_scene() -> Scene {
        let mut scene = Scene::new();
        let mesh = scene.assets.add_mesh(MeshAsset::quad("q", Vec2::splat(-1.0), Vec2::ONE));
        let material = scene.assets.add_material(Material::new("m", Vec4::ONE));
        scene.spawn(RenderObject::new(mesh, material, Mat4::IDENTITY));
        scene
    }

    #[test]
    fn empty_scenes_only_clear_the_output() {
        let settings = RendererSettings {
            clear_color: [0.0, 1.0, 0.0, 1.0],
            ..Default::default()
        };
        let mut renderer = SceneRenderer::new(SoftwareDevice::new(), 8, 8, settings).unwrap();
        renderer.on_render_editor(&mut Scene::new(), &camera()).unwrap();

        let report = renderer.last_report();
        assert_eq!(report.passes, vec![names::CLEAR_OUTPUT, names::PRESENT]);
        assert_eq!(report.barrier_count, 1);
        assert_eq!(renderer.device().presented_image(), Some(renderer.final_image()));
        let texel = renderer.device().read_texel(renderer.final_image(), 3, 3).unwrap();
        assert_eq!(texel, Vec4::new(0.0, 1.0, 0.0, 1.0));
        assert_eq!(renderer.frame_total_gpu_allocation_size(), 0);
    }

    #[test]
    fn scene_frames_end_with_the_present_transition() {
        let mut renderer =
            SceneRenderer::new(SoftwareDevice::new(), 8, 8, RendererSettings::default()).unwrap();
        renderer.on_render_editor(&mut quad_scene(), &camera()).unwrap();

        let report = renderer.last_report();
        assert_eq!(report.passes.last(), Some(&names::PRESENT));
        assert_eq!(report.passes.iter().filter(|&&p| p == names::PRESENT).count(), 1);
        assert_eq!(renderer.device().presented_image(), Some(renderer.final_image()));
    }

    #[test]
    fn resize_is_latched_until_the_next_frame() {
        let mut renderer =
            SceneRenderer::new(SoftwareDevice::new(), 8, 8, RendererSettings::default()).unwrap();
        let before = renderer.final_image();
        renderer.resize(16, 4);
        assert_eq!(renderer.size(), (8, 8));
        assert_eq!(renderer.final_image(), before);

        renderer.on_render_editor(&mut quad_scene(), &camera()).unwrap();
        assert_eq!(renderer.size(), (16, 4));
        let desc = renderer.device().image_desc(renderer.final_image()).unwrap();
        assert_eq!((desc.width, desc.height), (16, 4));
    }

    #[test]
    fn frame_slots_follow_frames_in_flight() {
        let settings = RendererSettings {
            frames_in_flight: 2,
            ..Default::default()
        };
        let mut renderer = SceneRenderer::new(SoftwareDevice::new(), 8, 8, settings).unwrap();
        let mut scene = quad_scene();
        for _ in 0..3 {
            renderer.on_render_editor(&mut scene, &camera()).unwrap();
        }
        assert_eq!(renderer.frame_index(), 3);
        assert_eq!(renderer.frame_slots.len(), 2);
    }

    #[test]
    fn shutdown_releases_everything() {
        let mut renderer =
            SceneRenderer::new(SoftwareDevice::new(), 8, 8, RendererSettings::default()).unwrap();
        renderer.on_render_editor(&mut quad_scene(), &camera()).unwrap();
        let device = renderer.shutdown().unwrap();
        assert_eq!(device.allocated_bytes(), 0);
    }
}
