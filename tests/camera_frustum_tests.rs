//! Camera and Frustum Tests
//!
//! Tests for:
//! - Perspective and orthographic projections (right-handed, depth in [0, 1])
//! - View-projection composition and eye position
//! - Side-plane extraction from camera projections
//! - Aspect updates on resize

use glam::{Vec3, Vec4};

use kiln::core::math::{FrustumPlanes, OrthoBounds};
use kiln::scene::Camera;

const EPSILON: f32 = 1e-4;

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

fn ndc(camera: &Camera, world: Vec3) -> Vec3 {
    let clip = camera.view_projection() * world.extend(1.0);
    clip.truncate() / clip.w
}

// ============================================================================
// Projection
// ============================================================================

#[test]
fn perspective_maps_near_to_zero_and_far_to_one() {
    let camera = Camera::perspective(1.0, 1.0, 0.5, 20.0);
    assert!(approx(ndc(&camera, Vec3::new(0.0, 0.0, -0.5)).z, 0.0));
    assert!(approx(ndc(&camera, Vec3::new(0.0, 0.0, -20.0)).z, 1.0));
}

#[test]
fn orthographic_maps_the_box_to_ndc() {
    let camera = Camera::orthographic(-4.0, 4.0, -2.0, 2.0, 1.0, 9.0);
    let corner = ndc(&camera, Vec3::new(4.0, -2.0, -9.0));
    assert!(approx(corner.x, 1.0) && approx(corner.y, -1.0) && approx(corner.z, 1.0), "{corner}");
    assert!(camera.is_orthographic());
    assert_eq!(camera.fov_y(), 0.0);
}

#[test]
fn view_projection_applies_view_first() {
    let camera = Camera::perspective(1.0, 1.0, 0.1, 100.0)
        .looking_at(Vec3::new(3.0, 0.0, 0.0), Vec3::new(3.0, 0.0, -1.0), Vec3::Y);
    let straight_ahead = ndc(&camera, Vec3::new(3.0, 0.0, -10.0));
    assert!(approx(straight_ahead.x, 0.0) && approx(straight_ahead.y, 0.0));
    assert!((camera.position() - Vec3::new(3.0, 0.0, 0.0)).length() < EPSILON);
}

#[test]
fn jitter_moves_points_by_the_same_ndc_offset() {
    let camera = Camera::perspective(1.0, 1.0, 0.1, 100.0);
    let jittered = camera.with_jitter(glam::Vec2::new(0.01, -0.02));
    for world in [Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.5, 0.3, -7.0)] {
        let delta = ndc(&jittered, world) - ndc(&camera, world);
        assert!(approx(delta.x, 0.01) && approx(delta.y, -0.02) && approx(delta.z, 0.0), "{delta}");
    }
    assert_eq!(jittered.projection_matrix(), camera.projection_matrix());
}

#[test]
fn set_aspect_only_touches_perspective_cameras() {
    let mut camera = Camera::perspective(1.0, 1.0, 0.1, 100.0);
    camera.set_aspect(1920, 1080);
    let wide = camera.projection_matrix();
    assert!(approx(wide.y_axis.y / wide.x_axis.x, 1920.0 / 1080.0));
    camera.set_aspect(0, 10);
    assert_eq!(camera.projection_matrix(), wide, "degenerate sizes are ignored");

    let mut ortho = Camera::orthographic(-1.0, 1.0, -1.0, 1.0, 0.1, 10.0);
    let before = ortho.projection_matrix();
    ortho.set_aspect(200, 100);
    assert_eq!(ortho.projection_matrix(), before);
}

// ============================================================================
// Culling Volumes
// ============================================================================

#[test]
fn side_planes_accept_the_view_axis_and_reject_the_sides() {
    let camera = Camera::perspective(1.0, 1.0, 0.1, 100.0);
    let planes = FrustumPlanes::from_projection(camera.projection_matrix());

    assert!(planes.contains_sphere(Vec3::new(0.0, 0.0, -10.0), 0.1));
    assert!(!planes.contains_sphere(Vec3::new(20.0, 0.0, -10.0), 1.0));
    assert!(!planes.contains_sphere(Vec3::new(0.0, -20.0, -10.0), 1.0));
    // mirrored sides are treated alike
    assert_eq!(
        planes.contains_sphere(Vec3::new(6.0, 0.0, -10.0), 0.5),
        planes.contains_sphere(Vec3::new(-6.0, 0.0, -10.0), 0.5)
    );
}

#[test]
fn side_plane_normals_are_unit_length() {
    let planes = FrustumPlanes::from_projection(Camera::perspective(0.8, 1.7, 0.1, 50.0).projection_matrix());
    assert!(approx(planes.x.length(), 1.0));
    assert!(approx(planes.y.length(), 1.0));
    let packed = planes.to_array();
    assert_eq!(Vec4::from(packed), Vec4::new(planes.x.x, planes.x.y, planes.y.x, planes.y.y));
}

#[test]
fn ortho_bounds_recover_an_off_centre_box() {
    let camera = Camera::orthographic(2.0, 6.0, -1.0, 3.0, 0.1, 10.0);
    let bounds = OrthoBounds::from_projection(camera.projection_matrix());
    assert!(approx(bounds.min.x, 2.0) && approx(bounds.max.x, 6.0));
    assert!(approx(bounds.min.y, -1.0) && approx(bounds.max.y, 3.0));
}
