//! Culling Tests
//!
//! Tests for:
//! - Inclusive sphere tests (tangent spheres stay visible)
//! - Two-plane frustum: no near/far rejection
//! - Orthographic culling volume
//! - Culling statistics readback

use glam::{Mat4, Vec3, Vec4};
use kiln::core::math::{FrustumPlanes, OrthoBounds};
use kiln::render::pipeline::names;
use kiln::render::{GtaoSettings, RendererSettings, SceneRenderer, ShadowSettings, SoftwareDevice};
use kiln::scene::{Camera, Material, MeshAsset, RenderObject, Scene};

// ============================================================================
// Helpers
// ============================================================================

fn statistics_settings() -> RendererSettings {
    RendererSettings {
        collect_statistics: true,
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

/// Degenerate triangle along X whose bounding sphere is exactly
/// `center = origin, radius = 0.5`.
fn sliver() -> MeshAsset {
    MeshAsset::triangle(
        "sliver",
        Vec3::new(-0.5, 0.0, 0.0),
        Vec3::new(0.5, 0.0, 0.0),
        Vec3::ZERO,
    )
}

fn scene_with(positions: &[Vec3]) -> Scene {
    let mut scene = Scene::new();
    let mesh = scene.assets.add_mesh(sliver());
    let material = scene.assets.add_material(Material::new("m", Vec4::ONE));
    for &p in positions {
        scene.spawn(RenderObject::new(mesh, material, Mat4::from_translation(p)));
    }
    scene
}

fn ortho_camera() -> Camera {
    Camera::orthographic(-16.0, 16.0, -16.0, 16.0, 0.1, 100.0)
        .looking_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y)
}

// ============================================================================
// Sphere Tests
// ============================================================================

#[test]
fn tangent_sphere_is_inside_the_frustum() {
    let projection = Mat4::perspective_rh(1.0, 1.5, 0.1, 100.0);
    let planes = FrustumPlanes::from_projection(projection);

    let center = Vec3::new(-7.0, 0.0, -5.0);
    // signed distance to the left/right plane, negative outside
    let distance = center.z * planes.x.y - center.x.abs() * planes.x.x;
    assert!(distance < 0.0, "center should be outside the side plane");

    let tangent = -distance;
    assert!(planes.contains_sphere(center, tangent));
    assert!(!planes.contains_sphere(center, tangent * 0.99));
}

#[test]
fn frustum_ignores_near_and_far() {
    let planes = FrustumPlanes::from_projection(Mat4::perspective_rh(1.0, 1.0, 1.0, 10.0));
    // between the eye and the near plane, and far past the far plane
    assert!(planes.contains_sphere(Vec3::new(0.0, 0.0, -0.5), 0.01));
    assert!(planes.contains_sphere(Vec3::new(0.0, 0.0, -500.0), 0.01));
}

#[test]
fn ortho_bounds_touching_spheres_are_visible() {
    let bounds = OrthoBounds::from_projection(Mat4::orthographic_rh(-16.0, 16.0, -16.0, 16.0, 0.1, 100.0));
    assert!(bounds.contains_sphere(Vec3::new(-16.5, 0.0, -5.0), 0.5));
    assert!(bounds.contains_sphere(Vec3::new(0.0, 18.0, -5.0), 2.0));
    assert!(!bounds.contains_sphere(Vec3::new(-16.5, 0.0, -5.0), 0.49));
    // depth is not part of the orthographic test
    assert!(bounds.contains_sphere(Vec3::new(0.0, 0.0, 500.0), 0.1));
}

// ============================================================================
// Statistics Readback
// ============================================================================

#[test]
fn statistics_count_a_tangent_object_as_visible() {
    let mut scene = scene_with(&[
        Vec3::ZERO,
        // touches the left edge of the view volume
        Vec3::new(-16.5, 0.0, 0.0),
        // clears it
        Vec3::new(-17.0, 0.0, 0.0),
    ]);
    let mut renderer = SceneRenderer::new(SoftwareDevice::new(), 32, 32, statistics_settings()).unwrap();
    renderer.on_render_editor(&mut scene, &ortho_camera()).unwrap();

    assert!(renderer.last_report().executed(names::READ_STATISTICS));
    let stats = renderer.frame_statistics().unwrap();
    assert_eq!(stats.total_objects, 3);
    assert_eq!(stats.visible_objects, 2);
    assert_eq!(stats.total_meshlets, 3);
    assert_eq!(stats.visible_meshlets, 2);
    assert_eq!(stats.visible_triangles, 2);
}

#[test]
fn objects_past_the_far_plane_survive_culling() {
    let camera = Camera::perspective(1.0, 1.0, 0.1, 10.0)
        .looking_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
    let mut scene = scene_with(&[Vec3::ZERO, Vec3::new(0.0, 0.0, -200.0)]);
    let mut renderer = SceneRenderer::new(SoftwareDevice::new(), 32, 32, statistics_settings()).unwrap();
    renderer.on_render_editor(&mut scene, &camera).unwrap();

    let stats = renderer.frame_statistics().unwrap();
    assert_eq!(stats.visible_objects, 2);
    assert_eq!(stats.visible_meshlets, 2);
}

#[test]
fn statistics_are_absent_unless_requested() {
    let mut scene = scene_with(&[Vec3::ZERO]);
    let settings = RendererSettings {
        collect_statistics: false,
        ..statistics_settings()
    };
    let mut renderer = SceneRenderer::new(SoftwareDevice::new(), 16, 16, settings).unwrap();
    renderer.on_render_editor(&mut scene, &ortho_camera()).unwrap();

    assert!(renderer.frame_statistics().is_none());
    assert!(!renderer.last_report().executed(names::READ_STATISTICS));
}

#[test]
fn moving_an_object_out_of_view_culls_it() {
    let mut scene = Scene::new();
    let mesh = scene.assets.add_mesh(MeshAsset::cube("cube", 1.0));
    let material = scene.assets.add_material(Material::new("m", Vec4::ONE));
    let id = scene.spawn(RenderObject::new(mesh, material, Mat4::IDENTITY));

    let mut renderer = SceneRenderer::new(SoftwareDevice::new(), 16, 16, statistics_settings()).unwrap();
    renderer.on_render_editor(&mut scene, &ortho_camera()).unwrap();
    assert_eq!(renderer.frame_statistics().unwrap().visible_objects, 1);

    scene.set_transform(id, Mat4::from_translation(Vec3::new(40.0, 0.0, 0.0)));
    renderer.on_render_editor(&mut scene, &ortho_camera()).unwrap();
    let stats = renderer.frame_statistics().unwrap();
    assert_eq!(stats.visible_objects, 0);
    assert_eq!(stats.visible_triangles, 0);
}
