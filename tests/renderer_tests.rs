//! Scene Renderer Tests
//!
//! Tests for:
//! - Asset fallbacks (missing meshes, unresolved materials, removed pipelines)
//! - Custom material GBuffer programs
//! - Latched invalidation and resize
//! - Shading debug views and visualization overlays
//! - Skybox fill behind the geometry
//! - Shadow and ambient occlusion passes

use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3, Vec4};
use kiln::render::device::software::{GBufferShader, GBufferTexels, SurfaceInput};
use kiln::render::pipeline::{labels, names};
use kiln::core::ImageId;
use kiln::core::math::id_color;
use kiln::render::{
    GtaoSettings, ImageDesc, ImageFormat, ImageUsage, RenderDevice, RendererSettings, SceneRenderer,
    ShadingMode, ShadowSettings, SoftwareDevice, VisualizationMode,
};
use kiln::scene::{
    Camera, Light, Material, MaterialHandle, MeshAsset, RenderObject, Scene, Skylight,
};

const SIZE: u32 = 16;
const EPSILON: f32 = 1.0 / 255.0 + 1e-4;
const CLEAR: [f32; 4] = [0.1, 0.2, 0.3, 1.0];

// ============================================================================
// Helpers
// ============================================================================

fn approx(a: Vec4, b: Vec4) -> bool {
    (a - b).abs().max_element() < EPSILON
}

fn camera() -> Camera {
    Camera::orthographic(-8.0, 8.0, -8.0, 8.0, 0.1, 50.0)
        .looking_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y)
}

fn settings(mode: ShadingMode) -> RendererSettings {
    RendererSettings {
        shading_mode: mode,
        clear_color: CLEAR,
        gtao: GtaoSettings {
            enabled: false,
            ..Default::default()
        },
        shadows: ShadowSettings {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn renderer(mode: ShadingMode) -> SceneRenderer<SoftwareDevice> {
    let _ = env_logger::builder().is_test(true).try_init();
    SceneRenderer::new(SoftwareDevice::new(), SIZE, SIZE, settings(mode)).unwrap()
}

/// Quad covering the left half of the view; the right half stays background.
fn half_screen_scene(material: Material) -> (Scene, MaterialHandle) {
    let mut scene = Scene::new();
    let mesh = scene
        .assets
        .add_mesh(MeshAsset::quad("half", Vec2::new(-8.0, -8.0), Vec2::new(0.0, 8.0)));
    let handle = scene.assets.add_material(material);
    scene.spawn(RenderObject::new(mesh, handle, Mat4::IDENTITY));
    (scene, handle)
}

fn covered(renderer: &SceneRenderer<SoftwareDevice>) -> Vec4 {
    renderer.device().read_texel(renderer.final_image(), 4, 8).unwrap()
}

fn background(renderer: &SceneRenderer<SoftwareDevice>) -> Vec4 {
    renderer.device().read_texel(renderer.final_image(), 12, 8).unwrap()
}

struct SolidGreen;

impl GBufferShader for SolidGreen {
    fn shade(&self, input: &SurfaceInput) -> GBufferTexels {
        GBufferTexels {
            albedo: Vec4::new(0.0, 1.0, 0.0, 1.0),
            material: Vec4::new(0.0, 1.0, 0.0, 0.0),
            normal: input.normal.extend(0.0),
        }
    }
}

// ============================================================================
// Debug Views
// ============================================================================

#[test]
fn albedo_view_shows_base_color_over_clear() {
    let (mut scene, _) = half_screen_scene(Material::new("orange", Vec4::new(1.0, 0.5, 0.0, 1.0)));
    let mut renderer = renderer(ShadingMode::Albedo);
    renderer.on_render_editor(&mut scene, &camera()).unwrap();

    assert!(approx(covered(&renderer), Vec4::new(1.0, 0.5, 0.0, 1.0)));
    assert!(approx(background(&renderer), Vec4::from(CLEAR)));
}

#[test]
fn normal_view_maps_facing_normals() {
    let (mut scene, _) = half_screen_scene(Material::new("m", Vec4::ONE));
    let mut renderer = renderer(ShadingMode::Normals);
    renderer.on_render_editor(&mut scene, &camera()).unwrap();

    assert!(approx(covered(&renderer), Vec4::new(0.5, 0.5, 1.0, 1.0)));
}

#[test]
fn material_channel_views() {
    let material = Material::new("m", Vec4::ONE)
        .with_pbr(1.0, 0.25)
        .with_emissive(Vec3::new(1.0, 0.0, 0.5), 1.0);
    let (mut scene, _) = half_screen_scene(material);

    let cases = [
        (ShadingMode::Metalness, Vec4::ONE),
        (ShadingMode::Roughness, Vec4::new(0.25, 0.25, 0.25, 1.0)),
        (ShadingMode::Emissive, Vec4::new(1.0, 0.0, 0.5, 1.0)),
        (ShadingMode::AmbientOcclusion, Vec4::ONE),
    ];
    for (mode, expected) in cases {
        let mut renderer = renderer(mode);
        renderer.on_render_editor(&mut scene, &camera()).unwrap();
        let texel = covered(&renderer);
        assert!(approx(texel, expected), "{mode:?}: got {texel}, expected {expected}");
    }
}

#[test]
fn settings_changes_apply_on_the_next_frame() {
    let (mut scene, _) = half_screen_scene(Material::new("red", Vec4::new(1.0, 0.0, 0.0, 1.0)));
    let mut renderer = renderer(ShadingMode::Albedo);
    renderer.on_render_editor(&mut scene, &camera()).unwrap();

    renderer.set_settings(settings(ShadingMode::Normals));
    assert_eq!(renderer.settings().shading_mode, ShadingMode::Albedo);
    renderer.on_render_editor(&mut scene, &camera()).unwrap();
    assert_eq!(renderer.settings().shading_mode, ShadingMode::Normals);
    assert!(approx(covered(&renderer), Vec4::new(0.5, 0.5, 1.0, 1.0)));
}

// ============================================================================
// Visualization Overlays
// ============================================================================

fn overlay_renderer(visualization_mode: VisualizationMode) -> SceneRenderer<SoftwareDevice> {
    let settings = RendererSettings {
        visualization_mode,
        ..settings(ShadingMode::Albedo)
    };
    SceneRenderer::new(SoftwareDevice::new(), SIZE, SIZE, settings).unwrap()
}

fn visibility_texel(renderer: &SceneRenderer<SoftwareDevice>, x: u32, y: u32) -> u32 {
    let id = renderer.last_report().image(labels::VISIBILITY).unwrap();
    renderer.device().read_texel_u32(id, x, y).unwrap()
}

#[test]
fn id_overlays_color_pixels_by_their_visibility_texel() {
    let (mut scene, _) = half_screen_scene(Material::new("m", Vec4::ONE));

    let pixel = |renderer: &SceneRenderer<SoftwareDevice>, x, y| {
        renderer.device().read_texel(renderer.final_image(), x, y).unwrap()
    };
    // opposite corners of the quad lie on different sides of either diagonal
    let corners = [(0, 0), (7, 15)];

    let mut renderer = overlay_renderer(VisualizationMode::TriangleId);
    renderer.on_render_editor(&mut scene, &camera()).unwrap();
    let texels = corners.map(|(x, y)| visibility_texel(&renderer, x, y));
    assert_ne!(texels[0], texels[1]);
    for ((x, y), texel) in corners.into_iter().zip(texels) {
        assert!(approx(pixel(&renderer, x, y), id_color(texel).extend(1.0)));
    }
    assert!(!approx(pixel(&renderer, 0, 0), pixel(&renderer, 7, 15)));
    assert!(approx(background(&renderer), Vec4::from(CLEAR)));

    // both triangles of the quad share one meshlet
    let mut renderer = overlay_renderer(VisualizationMode::MeshletId);
    renderer.on_render_editor(&mut scene, &camera()).unwrap();
    let texel = visibility_texel(&renderer, 0, 0);
    assert_eq!(texel >> 6, visibility_texel(&renderer, 7, 15) >> 6);
    assert!(approx(pixel(&renderer, 0, 0), id_color(texel >> 6).extend(1.0)));
    assert!(approx(pixel(&renderer, 7, 15), pixel(&renderer, 0, 0)));
}

#[test]
fn light_complexity_counts_lights_reaching_the_pixel() {
    let (mut scene, _) = half_screen_scene(Material::new("m", Vec4::ONE));
    // centre of pixel (4, 8) is world (-3.5, -0.5)
    scene.add_light(Light::directional(Vec3::NEG_Z, Vec3::ONE, 1.0));
    scene.add_light(Light::point(Vec3::new(-3.5, -0.5, 1.0), Vec3::ONE, 1.0, 5.0));
    scene.add_light(Light::point(Vec3::new(6.0, 6.0, 1.0), Vec3::ONE, 1.0, 1.0));

    let mut renderer = overlay_renderer(VisualizationMode::LightComplexity);
    renderer.on_render_editor(&mut scene, &camera()).unwrap();

    // two of eight lights: a quarter of the way to red
    assert!(approx(covered(&renderer), Vec4::new(0.25, 0.75, 0.0, 1.0)));
}

#[test]
fn cascade_overlay_tints_each_cascade() {
    let mut scene = Scene::new();
    let near = scene
        .assets
        .add_mesh(MeshAsset::quad("near", Vec2::new(-8.0, -8.0), Vec2::new(0.0, 8.0)));
    let far = scene
        .assets
        .add_mesh(MeshAsset::quad("far", Vec2::new(0.0, -8.0), Vec2::new(8.0, 8.0)));
    let white = scene.assets.add_material(Material::new("white", Vec4::ONE));
    scene.spawn(RenderObject::new(near, white, Mat4::IDENTITY));
    // view depth 45 lands in the second of two even cascades over [0.1, 50]
    scene.spawn(RenderObject::new(far, white, Mat4::from_translation(Vec3::new(0.0, 0.0, -40.0))));
    scene.add_light(Light::directional(Vec3::new(0.0, -0.3, -1.0).normalize(), Vec3::ONE, 1.0).with_shadows());

    let settings = RendererSettings {
        visualization_mode: VisualizationMode::Cascades,
        shadows: ShadowSettings {
            enabled: true,
            cascade_count: 2,
            split_lambda: 0.0,
            resolution: 64,
            ..Default::default()
        },
        ..settings(ShadingMode::Albedo)
    };
    let mut renderer = SceneRenderer::new(SoftwareDevice::new(), SIZE, SIZE, settings).unwrap();
    renderer.on_render_editor(&mut scene, &camera()).unwrap();

    let far_pixel = renderer.device().read_texel(renderer.final_image(), 12, 8).unwrap();
    assert!(approx(covered(&renderer), Vec4::new(1.0, 0.25, 0.25, 1.0)));
    assert!(approx(far_pixel, Vec4::new(0.25, 1.0, 0.25, 1.0)));
}

#[test]
fn cascade_overlay_without_shadows_leaves_colors_alone() {
    let (mut scene, _) = half_screen_scene(Material::new("orange", Vec4::new(1.0, 0.5, 0.0, 1.0)));
    let mut renderer = overlay_renderer(VisualizationMode::Cascades);
    renderer.on_render_editor(&mut scene, &camera()).unwrap();

    assert!(approx(covered(&renderer), Vec4::new(1.0, 0.5, 0.0, 1.0)));
}

// ============================================================================
// Skybox
// ============================================================================

/// 1×1 cube whose face `i` is `(40 i, 255 - 40 i, 128)`.
fn face_colored_cube(device: &mut SoftwareDevice) -> ImageId {
    let cube = device
        .create_image(&ImageDesc::cube(
            "Sky",
            1,
            ImageFormat::Rgba8Unorm,
            ImageUsage::SAMPLED | ImageUsage::COPY_DST,
        ))
        .unwrap();
    for face in 0..6u8 {
        device.write_image(cube, u32::from(face), &[40 * face, 255 - 40 * face, 128, 255]).unwrap();
    }
    cube
}

#[test]
fn skybox_fills_the_background_with_the_radiance_cube() {
    let (mut scene, _) = half_screen_scene(Material::new("m", Vec4::ONE));
    let mut renderer = renderer(ShadingMode::Shaded);
    let cube = face_colored_cube(renderer.device_mut());
    scene.set_skylight(Some(Skylight::new(None, Some(cube), 1.0)));
    renderer.on_render_editor(&mut scene, &camera()).unwrap();

    let report = renderer.last_report();
    assert!(report.executed(names::SKYBOX));
    let shading = report.passes.iter().position(|&p| p == names::SHADING).unwrap();
    let skybox = report.passes.iter().position(|&p| p == names::SKYBOX).unwrap();
    assert!(shading < skybox);
    assert_eq!(report.passes.last(), Some(&names::PRESENT));

    // the camera looks down -Z: face 5
    assert!(approx(background(&renderer), Vec4::new(200.0 / 255.0, 55.0 / 255.0, 128.0 / 255.0, 1.0)));
    assert!(!approx(covered(&renderer), background(&renderer)));
}

#[test]
fn skybox_scales_with_the_skylight_intensity() {
    let (mut scene, _) = half_screen_scene(Material::new("m", Vec4::ONE));
    let mut renderer = renderer(ShadingMode::Shaded);
    let cube = face_colored_cube(renderer.device_mut());
    scene.set_skylight(Some(Skylight::new(None, Some(cube), 0.5)));
    renderer.on_render_editor(&mut scene, &camera()).unwrap();

    assert!(approx(background(&renderer), Vec4::new(100.0 / 255.0, 27.5 / 255.0, 64.0 / 255.0, 1.0)));
}

#[test]
fn skybox_is_skipped_without_a_radiance_cube_or_in_debug_views() {
    let (mut scene, _) = half_screen_scene(Material::new("m", Vec4::ONE));
    let mut renderer = renderer(ShadingMode::Shaded);
    renderer.on_render_editor(&mut scene, &camera()).unwrap();
    assert!(!renderer.last_report().executed(names::SKYBOX));
    assert!(approx(background(&renderer), Vec4::from(CLEAR)));

    let mut renderer = renderer_with_cube(ShadingMode::Albedo, &mut scene);
    renderer.on_render_editor(&mut scene, &camera()).unwrap();
    assert!(!renderer.last_report().executed(names::SKYBOX));
    assert!(approx(background(&renderer), Vec4::from(CLEAR)));

    // a destroyed cube reads as no skylight
    let mut renderer = renderer_with_cube(ShadingMode::Shaded, &mut scene);
    let cube = scene.skylight().and_then(|s| s.radiance).unwrap();
    renderer.device_mut().destroy_image(cube);
    renderer.on_render_editor(&mut scene, &camera()).unwrap();
    assert!(!renderer.last_report().executed(names::SKYBOX));
}

fn renderer_with_cube(mode: ShadingMode, scene: &mut Scene) -> SceneRenderer<SoftwareDevice> {
    let mut renderer = renderer(mode);
    let cube = face_colored_cube(renderer.device_mut());
    scene.set_skylight(Some(Skylight::new(None, Some(cube), 1.0)));
    renderer
}

// ============================================================================
// Asset Fallbacks
// ============================================================================

#[test]
fn objects_without_a_loaded_mesh_are_skipped() {
    let mut scene = Scene::new();
    let loading = scene.assets.reserve_mesh();
    let failed = scene.assets.reserve_mesh();
    scene.assets.fail_mesh(failed, "corrupt file");
    let material = scene.assets.add_material(Material::new("m", Vec4::ONE));
    scene.spawn(RenderObject::new(loading, material, Mat4::IDENTITY));
    scene.spawn(RenderObject::new(failed, material, Mat4::IDENTITY));

    let mut renderer = renderer(ShadingMode::Albedo);
    renderer.on_render_editor(&mut scene, &camera()).unwrap();
    assert_eq!(renderer.last_report().passes, vec![names::CLEAR_OUTPUT, names::PRESENT]);
    assert!(approx(covered(&renderer), Vec4::from(CLEAR)));
}

#[test]
fn unresolved_materials_use_the_default() {
    let mut scene = Scene::new();
    let mesh = scene
        .assets
        .add_mesh(MeshAsset::quad("half", Vec2::new(-8.0, -8.0), Vec2::new(0.0, 8.0)));
    let pending = scene.assets.reserve_material();
    scene.spawn(RenderObject::new(mesh, pending, Mat4::IDENTITY));

    let mut renderer = renderer(ShadingMode::Albedo);
    renderer.on_render_editor(&mut scene, &camera()).unwrap();
    assert_eq!(scene.render_scene().individual_material_count(), 1);
    assert!(approx(covered(&renderer), Vec4::ONE), "default material is white");
}

#[test]
fn custom_gbuffer_programs_run_per_material() {
    let mut renderer = renderer(ShadingMode::Albedo);
    let pipeline = renderer
        .device_mut()
        .register_gbuffer_shader(Arc::new(SolidGreen));
    let (mut scene, _) =
        half_screen_scene(Material::new("m", Vec4::new(1.0, 0.0, 0.0, 1.0)).with_pipeline(pipeline));

    renderer.on_render_editor(&mut scene, &camera()).unwrap();
    assert!(approx(covered(&renderer), Vec4::new(0.0, 1.0, 0.0, 1.0)));
}

#[test]
fn removed_pipelines_fall_back_to_the_standard_program() {
    let mut renderer = renderer(ShadingMode::Albedo);
    let pipeline = renderer
        .device_mut()
        .register_gbuffer_shader(Arc::new(SolidGreen));
    let (mut scene, _) =
        half_screen_scene(Material::new("m", Vec4::new(1.0, 0.0, 0.0, 1.0)).with_pipeline(pipeline));
    renderer.on_render_editor(&mut scene, &camera()).unwrap();

    renderer.device_mut().remove_pipeline(pipeline);
    renderer.on_render_editor(&mut scene, &camera()).unwrap();
    assert!(approx(covered(&renderer), Vec4::new(1.0, 0.0, 0.0, 1.0)));
}

// ============================================================================
// Invalidation and Resize
// ============================================================================

#[test]
fn invalidate_picks_up_silent_asset_edits() {
    let (mut scene, handle) = half_screen_scene(Material::new("m", Vec4::new(1.0, 0.0, 0.0, 1.0)));
    let mut renderer = renderer(ShadingMode::Albedo);
    renderer.on_render_editor(&mut scene, &camera()).unwrap();

    // the asset store alone does not invalidate the render scene
    scene
        .assets
        .update_material(handle, Material::new("m", Vec4::new(0.0, 0.0, 1.0, 1.0)));
    renderer.on_render_editor(&mut scene, &camera()).unwrap();
    assert!(approx(covered(&renderer), Vec4::new(1.0, 0.0, 0.0, 1.0)));

    renderer.invalidate();
    renderer.on_render_editor(&mut scene, &camera()).unwrap();
    assert!(approx(covered(&renderer), Vec4::new(0.0, 0.0, 1.0, 1.0)));
}

#[test]
fn scene_material_updates_invalidate_on_their_own() {
    let (mut scene, handle) = half_screen_scene(Material::new("m", Vec4::new(1.0, 0.0, 0.0, 1.0)));
    let mut renderer = renderer(ShadingMode::Albedo);
    renderer.on_render_editor(&mut scene, &camera()).unwrap();

    scene.update_material(handle, Material::new("m", Vec4::new(0.0, 1.0, 0.0, 1.0)));
    renderer.on_render_editor(&mut scene, &camera()).unwrap();
    assert!(approx(covered(&renderer), Vec4::new(0.0, 1.0, 0.0, 1.0)));
}

#[test]
fn screen_sized_transients_follow_a_resize() {
    let (mut scene, _) = half_screen_scene(Material::new("m", Vec4::ONE));
    let mut renderer = renderer(ShadingMode::Albedo);
    renderer.on_render_editor(&mut scene, &camera()).unwrap();
    let before = renderer.frame_total_gpu_allocation_size();
    assert!(before > 0);

    renderer.resize(SIZE * 2, SIZE * 2);
    renderer.on_render_editor(&mut scene, &camera()).unwrap();

    let visibility = renderer.last_report().image(labels::VISIBILITY).unwrap();
    let desc = renderer.device().image_desc(visibility).unwrap();
    assert_eq!((desc.width, desc.height), (SIZE * 2, SIZE * 2));
    assert!(renderer.frame_total_gpu_allocation_size() > before);
}

// ============================================================================
// Lighting
// ============================================================================

#[test]
fn directional_light_brightens_shaded_output() {
    let (mut scene, _) = half_screen_scene(Material::new("m", Vec4::ONE));
    let mut renderer = renderer(ShadingMode::Shaded);
    renderer.on_render_editor(&mut scene, &camera()).unwrap();
    let unlit = covered(&renderer);

    scene.add_light(Light::directional(Vec3::new(0.0, 0.0, -1.0), Vec3::ONE, 3.0));
    renderer.on_render_editor(&mut scene, &camera()).unwrap();
    let lit = covered(&renderer);

    assert!(lit.x > unlit.x, "lit {lit} should exceed unlit {unlit}");
    assert!(approx(background(&renderer), Vec4::from(CLEAR)));
}

#[test]
fn shadows_and_ambient_occlusion_record_their_passes() {
    let mut scene = Scene::new();
    let ground = scene
        .assets
        .add_mesh(MeshAsset::quad("ground", Vec2::splat(-6.0), Vec2::splat(6.0)));
    let cube = scene.assets.add_mesh(MeshAsset::cube("cube", 2.0));
    let material = scene.assets.add_material(Material::new("m", Vec4::ONE));
    scene.spawn(RenderObject::new(ground, material, Mat4::IDENTITY));
    scene.spawn(RenderObject::new(cube, material, Mat4::from_translation(Vec3::new(0.0, 0.0, 1.0))));
    scene.add_light(Light::directional(Vec3::new(0.3, -0.2, -1.0).normalize(), Vec3::ONE, 2.0).with_shadows());

    let settings = RendererSettings {
        shadows: ShadowSettings {
            resolution: 64,
            cascade_count: 2,
            ..Default::default()
        },
        ..settings(ShadingMode::Shaded)
    };
    let mut renderer = SceneRenderer::new(SoftwareDevice::new(), SIZE, SIZE, settings).unwrap();
    let camera = Camera::perspective(1.0, 1.0, 0.1, 50.0)
        .looking_at(Vec3::new(0.0, -6.0, 8.0), Vec3::ZERO, Vec3::Z);

    let mut settings = *renderer.settings();
    settings.gtao.enabled = true;
    renderer.set_settings(settings);
    renderer.on_render_editor(&mut scene, &camera).unwrap();

    let report = renderer.last_report();
    for pass in [names::SHADOW, names::GTAO_PREFILTER, names::GTAO_MAIN, names::GTAO_DENOISE] {
        assert!(report.executed(pass), "'{pass}' should run");
    }
    for y in 0..SIZE {
        for x in 0..SIZE {
            let texel = renderer.device().read_texel(renderer.final_image(), x, y).unwrap();
            assert!(texel.is_finite(), "pixel ({x}, {y}) is {texel}");
        }
    }
}
