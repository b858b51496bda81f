//! Visibility Pipeline Tests
//!
//! End-to-end frames on the software device.
//!
//! Tests for:
//! - Empty scenes recording only the output clear
//! - Material classification, prefix sum and pixel collection
//! - GBuffer dispatch sizing per material, empty materials included
//! - Visibility texels referencing surviving meshlets
//! - Determinism of culling and compaction across frames

use std::collections::HashSet;

use glam::{Mat4, Vec2, Vec3, Vec4};
use kiln::render::pipeline::{labels, names};
use kiln::render::{GtaoSettings, RendererSettings, SceneRenderer, ShadowSettings, SoftwareDevice};
use kiln::scene::{Camera, Material, MeshAsset, RenderObject, Scene};

const SIZE: u32 = 32;
const BACKGROUND: u32 = u32::MAX;

// ============================================================================
// Helpers
// ============================================================================

/// Orthographic camera where pixel (x, y) covers world `[x - 16, x - 15] × [15 - y, 16 - y]`.
fn ortho_camera() -> Camera {
    Camera::orthographic(-16.0, 16.0, -16.0, 16.0, 0.1, 100.0)
        .looking_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y)
}

fn perspective_camera() -> Camera {
    Camera::perspective(1.0, 1.0, 0.1, 100.0)
        .looking_at(Vec3::new(0.5, 1.5, 6.0), Vec3::ZERO, Vec3::Y)
}

fn settings() -> RendererSettings {
    RendererSettings {
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

fn render(scene: &mut Scene, camera: &Camera) -> SceneRenderer<SoftwareDevice> {
    let mut renderer = SceneRenderer::new(SoftwareDevice::new(), SIZE, SIZE, settings()).unwrap();
    renderer.on_render_editor(scene, camera).unwrap();
    renderer
}

fn read_u32(renderer: &SceneRenderer<SoftwareDevice>, label: &str) -> Vec<u32> {
    let id = renderer
        .last_report()
        .buffer(label)
        .unwrap_or_else(|| panic!("buffer '{label}' was not realized"));
    renderer.device().read_buffer_as::<u32>(id).unwrap()
}

fn read_pixels(renderer: &SceneRenderer<SoftwareDevice>) -> Vec<[u32; 2]> {
    let id = renderer.last_report().buffer(labels::PIXEL_COLLECTION).unwrap();
    renderer.device().read_buffer_as::<[u32; 2]>(id).unwrap()
}

fn visibility_texel(renderer: &SceneRenderer<SoftwareDevice>, x: u32, y: u32) -> u32 {
    let id = renderer.last_report().image(labels::VISIBILITY).unwrap();
    renderer.device().read_texel_u32(id, x, y).unwrap()
}

/// Material index of a visibility texel, resolved on the CPU through the
/// surviving meshlets and the packed scene.
fn classify(renderer: &SceneRenderer<SoftwareDevice>, scene: &Scene, texel: u32) -> Option<u32> {
    if texel == BACKGROUND {
        return None;
    }
    let packed = scene.render_scene().packed();
    let surviving_id = renderer.last_report().buffer(labels::SURVIVING_MESHLETS)?;
    let surviving = renderer.device().read_buffer_as::<[u32; 2]>(surviving_id).ok()?;
    let [object, meshlet] = *surviving.get((texel >> 6) as usize)?;
    let object = packed.object_draw_data.get(object as usize)?;
    let meshlet = packed.meshlets.get(meshlet as usize)?;
    packed
        .material_table
        .get((object.material_table_offset + meshlet.material_local_index) as usize)
        .copied()
}

/// Per-material pixel counts computed from the visibility image.
fn classified_counts(renderer: &SceneRenderer<SoftwareDevice>, scene: &Scene, materials: usize) -> Vec<u32> {
    let mut counts = vec![0u32; materials];
    for y in 0..SIZE {
        for x in 0..SIZE {
            if let Some(material) = classify(renderer, scene, visibility_texel(renderer, x, y)) {
                counts[material as usize] += 1;
            }
        }
    }
    counts
}

fn quad_object(scene: &mut Scene, min: Vec2, max: Vec2, color: Vec4) {
    let mesh = scene.assets.add_mesh(MeshAsset::quad("quad", min, max));
    let material = scene.assets.add_material(Material::new("flat", color));
    scene.spawn(RenderObject::new(mesh, material, Mat4::IDENTITY));
}

/// Cube, sphere and ground quad with three materials.
fn mixed_scene() -> Scene {
    let mut scene = Scene::new();
    let red = scene.assets.add_material(Material::new("red", Vec4::new(1.0, 0.0, 0.0, 1.0)));
    let green = scene
        .assets
        .add_material(Material::new("green", Vec4::new(0.0, 1.0, 0.0, 1.0)).with_pbr(1.0, 0.2));
    let grey = scene.assets.add_material(Material::new("grey", Vec4::splat(0.5)));

    let cube = scene.assets.add_mesh(MeshAsset::cube("cube", 1.0));
    let sphere = scene.assets.add_mesh(MeshAsset::uv_sphere("sphere", 0.75, 24, 12));
    let ground = scene.assets.add_mesh(MeshAsset::quad("ground", Vec2::splat(-4.0), Vec2::splat(4.0)));

    scene.spawn(RenderObject::new(cube, red, Mat4::from_translation(Vec3::new(-1.0, 0.5, 0.0))));
    scene.spawn(RenderObject::new(sphere, green, Mat4::from_translation(Vec3::new(1.2, 0.75, 0.5))));
    scene.spawn(RenderObject::new(
        ground,
        grey,
        Mat4::from_rotation_x(-std::f32::consts::FRAC_PI_2),
    ));
    scene
}

// ============================================================================
// Empty Scene
// ============================================================================

#[test]
fn despawning_the_last_object_falls_back_to_the_clear() {
    let mut scene = Scene::new();
    let mesh = scene.assets.add_mesh(MeshAsset::cube("cube", 1.0));
    let material = scene.assets.add_material(Material::new("m", Vec4::ONE));
    let id = scene.spawn(RenderObject::new(mesh, material, Mat4::IDENTITY));

    let mut renderer = SceneRenderer::new(
        SoftwareDevice::new(),
        SIZE,
        SIZE,
        RendererSettings {
            clear_color: [0.25, 0.5, 0.75, 1.0],
            ..settings()
        },
    )
    .unwrap();
    renderer.on_render_editor(&mut scene, &ortho_camera()).unwrap();
    assert!(renderer.last_report().executed(names::VISIBILITY));

    scene.despawn(id);
    renderer.on_render_editor(&mut scene, &ortho_camera()).unwrap();

    let report = renderer.last_report();
    assert_eq!(report.passes, vec![names::CLEAR_OUTPUT, names::PRESENT]);
    for pass in names::SCENE_PASSES {
        assert!(!report.executed(pass), "'{pass}' should not run without objects");
    }
    let texel = renderer.device().read_texel(renderer.final_image(), 31, 0).unwrap();
    assert!((texel - Vec4::new(0.25, 0.5, 0.75, 1.0)).abs().max_element() < 1.0 / 255.0);
}

// ============================================================================
// Material Sort Scenarios
// ============================================================================

#[test]
fn single_pixel_triangle_sorts_into_one_slot() {
    let mut scene = Scene::new();
    // centre of pixel (10, 10) is world (-5.5, 5.5)
    let mesh = scene.assets.add_mesh(MeshAsset::triangle(
        "speck",
        Vec3::new(-5.7, 5.3, 0.0),
        Vec3::new(-5.3, 5.3, 0.0),
        Vec3::new(-5.5, 5.7, 0.0),
    ));
    let material = scene.assets.add_material(Material::new("white", Vec4::ONE));
    scene.spawn(RenderObject::new(mesh, material, Mat4::IDENTITY));

    let renderer = render(&mut scene, &ortho_camera());

    assert_eq!(read_u32(&renderer, labels::MATERIAL_COUNT)[..1], [1]);
    assert_eq!(read_u32(&renderer, labels::MATERIAL_START)[..1], [0]);
    assert_eq!(read_pixels(&renderer)[0], [10, 10]);

    let gbuffer: Vec<_> = renderer
        .device()
        .dispatch_log()
        .iter()
        .filter(|r| r.kernel == "generate_gbuffer")
        .collect();
    assert_eq!(gbuffer.len(), 1, "one dispatch per material");
    assert_eq!(gbuffer[0].groups, [1, 1, 1]);

    let albedo = renderer.last_report().image(labels::GBUFFER_ALBEDO).unwrap();
    for y in 0..SIZE {
        for x in 0..SIZE {
            let texel = renderer.device().read_texel(albedo, x, y).unwrap();
            if (x, y) == (10, 10) {
                assert!(texel.x > 0.99, "covered pixel should carry the base color");
            } else {
                assert_eq!(texel, Vec4::ZERO, "pixel ({x}, {y}) should keep the clear value");
            }
        }
    }
}

#[test]
fn two_materials_get_disjoint_ranges() {
    let mut scene = Scene::new();
    // 10 × 10 pixels in the top-left corner
    quad_object(&mut scene, Vec2::new(-16.0, 6.0), Vec2::new(-6.0, 16.0), Vec4::new(1.0, 0.0, 0.0, 1.0));
    // 10 × 5 pixels right of and below the centre
    quad_object(&mut scene, Vec2::new(0.0, 0.0), Vec2::new(10.0, 5.0), Vec4::new(0.0, 0.0, 1.0, 1.0));

    let renderer = render(&mut scene, &ortho_camera());

    assert_eq!(read_u32(&renderer, labels::MATERIAL_COUNT)[..2], [100, 50]);
    assert_eq!(read_u32(&renderer, labels::MATERIAL_START)[..2], [0, 100]);

    let pixels = read_pixels(&renderer);
    let first: HashSet<[u32; 2]> = pixels[..100].iter().copied().collect();
    let second: HashSet<[u32; 2]> = pixels[100..150].iter().copied().collect();
    assert_eq!(first.len(), 100);
    assert_eq!(second.len(), 50);
    assert!(first.is_disjoint(&second));
    assert!(first.iter().all(|&[x, y]| x < 10 && y < 10));
    assert!(second.iter().all(|&[x, y]| (16..26).contains(&x) && (11..16).contains(&y)));

    let groups: Vec<[u32; 3]> = renderer
        .device()
        .dispatch_log()
        .iter()
        .filter(|r| r.kernel == "generate_gbuffer")
        .map(|r| r.groups)
        .collect();
    assert_eq!(groups, vec![[4, 1, 1], [2, 1, 1]]);
}

#[test]
fn materials_without_visible_pixels_still_dispatch_an_empty_gbuffer() {
    let mut scene = Scene::new();
    // 8 × 8 pixels in the top-left corner
    quad_object(&mut scene, Vec2::new(-16.0, 8.0), Vec2::new(-8.0, 16.0), Vec4::new(1.0, 0.0, 0.0, 1.0));
    // entirely right of the view volume
    quad_object(&mut scene, Vec2::new(40.0, 0.0), Vec2::new(48.0, 8.0), Vec4::new(0.0, 1.0, 0.0, 1.0));

    let renderer = render(&mut scene, &ortho_camera());

    assert_eq!(read_u32(&renderer, labels::MATERIAL_COUNT)[..2], [64, 0]);
    assert_eq!(read_u32(&renderer, labels::MATERIAL_START)[..2], [0, 64]);
    assert!(read_pixels(&renderer)[..64].iter().all(|&[x, y]| x < 8 && y < 8));

    let groups: Vec<[u32; 3]> = renderer
        .device()
        .dispatch_log()
        .iter()
        .filter(|r| r.kernel == "generate_gbuffer")
        .map(|r| r.groups)
        .collect();
    assert_eq!(groups, vec![[2, 1, 1], [0, 1, 1]]);

    let albedo = renderer.last_report().image(labels::GBUFFER_ALBEDO).unwrap();
    let covered = renderer.device().read_texel(albedo, 3, 3).unwrap();
    assert!(covered.x > 0.99 && covered.y < 0.01);
    assert_eq!(renderer.device().read_texel(albedo, 20, 20).unwrap(), Vec4::ZERO);
}

// ============================================================================
// Classification Properties
// ============================================================================

#[test]
fn material_counts_match_classified_pixels() {
    let mut scene = mixed_scene();
    let renderer = render(&mut scene, &perspective_camera());
    let materials = scene.render_scene().individual_material_count() as usize;
    assert_eq!(materials, 3);

    let counts = read_u32(&renderer, labels::MATERIAL_COUNT);
    let expected = classified_counts(&renderer, &scene, materials);
    assert_eq!(counts[..materials], expected[..]);
    assert!(expected.iter().all(|&c| c > 0), "every material should be on screen");
}

#[test]
fn prefix_sum_is_exclusive() {
    let mut scene = mixed_scene();
    let renderer = render(&mut scene, &perspective_camera());
    let materials = scene.render_scene().individual_material_count() as usize;

    let counts = read_u32(&renderer, labels::MATERIAL_COUNT);
    let starts = read_u32(&renderer, labels::MATERIAL_START);
    assert_eq!(starts[0], 0);
    for i in 0..materials - 1 {
        assert_eq!(starts[i + 1], starts[i] + counts[i], "start[{}]", i + 1);
    }
}

#[test]
fn collector_fills_each_range_exactly() {
    let mut scene = mixed_scene();
    let renderer = render(&mut scene, &perspective_camera());
    let materials = scene.render_scene().individual_material_count() as usize;

    let counts = read_u32(&renderer, labels::MATERIAL_COUNT);
    let starts = read_u32(&renderer, labels::MATERIAL_START);
    let pixels = read_pixels(&renderer);

    let mut seen = HashSet::new();
    for material in 0..materials {
        let range = starts[material] as usize..(starts[material] + counts[material]) as usize;
        for &[x, y] in &pixels[range] {
            assert!(x < SIZE && y < SIZE);
            assert!(seen.insert((x, y)), "pixel ({x}, {y}) collected twice");
            let texel = visibility_texel(&renderer, x, y);
            assert_eq!(classify(&renderer, &scene, texel), Some(material as u32));
        }
    }

    let covered = (0..SIZE)
        .flat_map(|y| (0..SIZE).map(move |x| (x, y)))
        .filter(|&(x, y)| visibility_texel(&renderer, x, y) != BACKGROUND)
        .count();
    assert_eq!(seen.len(), covered);
}

#[test]
fn visibility_texels_reference_surviving_meshlets() {
    let mut scene = mixed_scene();
    let renderer = render(&mut scene, &perspective_camera());
    let packed = scene.render_scene().packed();

    let surviving_count = read_u32(&renderer, labels::SURVIVING_COUNT)[0];
    let surviving_id = renderer.last_report().buffer(labels::SURVIVING_MESHLETS).unwrap();
    let surviving = renderer.device().read_buffer_as::<[u32; 2]>(surviving_id).unwrap();
    assert!(surviving_count > 0);

    for y in 0..SIZE {
        for x in 0..SIZE {
            let texel = visibility_texel(&renderer, x, y);
            if texel == BACKGROUND {
                continue;
            }
            let slot = texel >> 6;
            let triangle = texel & 63;
            assert!(slot < surviving_count, "texel ({x}, {y}) points past the surviving list");
            let [object, meshlet] = surviving[slot as usize];
            assert!((object as usize) < packed.object_draw_data.len());
            let meshlet = &packed.meshlets[meshlet as usize];
            assert!(triangle < meshlet.triangle_count);
        }
    }
}

// ============================================================================
// Determinism
// ============================================================================

#[test]
fn culling_is_deterministic_across_frames() {
    let mut scene = mixed_scene();
    let camera = perspective_camera();
    let mut renderer = SceneRenderer::new(SoftwareDevice::new(), SIZE, SIZE, settings()).unwrap();

    let mut frames = Vec::new();
    for _ in 0..2 {
        renderer.on_render_editor(&mut scene, &camera).unwrap();
        let args = read_u32(&renderer, labels::DRAW_ARGS);
        let index_count = args[0] as usize;
        let indices = read_u32(&renderer, labels::COMPACTED_INDICES)[..index_count].to_vec();
        frames.push((args[..5].to_vec(), indices));
    }

    assert!(!frames[0].1.is_empty());
    assert_eq!(frames[0], frames[1]);
}
