//! Render Scene Tests
//!
//! Tests for:
//! - Packing order of objects, meshes and materials
//! - Per-object material tables for multi-slot meshes
//! - Invalidation on topology and transform changes
//! - Asset states seen through the scene

use glam::{Mat4, Vec2, Vec3, Vec4};
use smallvec::smallvec;

use kiln::scene::{Material, MeshAsset, RenderObject, Scene, SubMesh, Vertex};

// ============================================================================
// Helpers
// ============================================================================

/// Two triangles, each in its own material slot.
fn two_slot_mesh() -> MeshAsset {
    let v = |x: f32, y: f32| Vertex::new(Vec3::new(x, y, 0.0), Vec3::Z, Vec2::ZERO);
    let vertices = vec![v(0.0, 0.0), v(1.0, 0.0), v(0.0, 1.0), v(2.0, 0.0), v(3.0, 0.0), v(2.0, 1.0)];
    let sub_meshes = vec![
        SubMesh {
            index_start: 0,
            index_count: 3,
            material_slot: 0,
        },
        SubMesh {
            index_start: 3,
            index_count: 3,
            material_slot: 1,
        },
    ];
    MeshAsset::with_sub_meshes("two slots", vertices, vec![0, 1, 2, 3, 4, 5], sub_meshes)
}

fn color(name: &str, r: f32) -> Material {
    Material::new(name, Vec4::new(r, 0.0, 0.0, 1.0))
}

// ============================================================================
// Packing
// ============================================================================

#[test]
fn materials_are_indexed_in_first_use_order() {
    let mut scene = Scene::new();
    let mesh = scene.assets.add_mesh(MeshAsset::cube("cube", 1.0));
    let a = scene.assets.add_material(color("a", 0.1));
    let b = scene.assets.add_material(color("b", 0.2));

    // b is spawned first, so it resolves first
    scene.spawn(RenderObject::new(mesh, b, Mat4::IDENTITY));
    scene.spawn(RenderObject::new(mesh, a, Mat4::IDENTITY));
    scene.spawn(RenderObject::new(mesh, b, Mat4::IDENTITY));
    scene.prepare_render_scene(false);

    let render = scene.render_scene();
    assert_eq!(render.individual_material_count(), 2);
    assert_eq!(render.packed().material_table, vec![0, 1, 0]);
    assert_eq!(render.material_from_id(0).unwrap().name, "b");
    assert_eq!(render.material_from_id(1).unwrap().name, "a");
}

#[test]
fn shared_meshes_are_packed_once() {
    let mut scene = Scene::new();
    let cube = scene.assets.add_mesh(MeshAsset::cube("cube", 1.0));
    let material = scene.assets.add_material(color("m", 1.0));
    for i in 0..3 {
        scene.spawn(RenderObject::new(cube, material, Mat4::from_translation(Vec3::X * i as f32)));
    }
    scene.prepare_render_scene(false);

    let render = scene.render_scene();
    let packed = render.packed();
    assert_eq!(render.render_object_count(), 3);
    assert_eq!(packed.meshes.len(), 1);
    assert!(packed.object_draw_data.iter().all(|o| o.mesh_id == 0));
    // 12 triangles per cube, counted per object
    assert_eq!(render.index_count(), 3 * 12 * 3);
    assert_eq!(render.meshlet_count(), 3 * packed.meshes[0].meshlet_count);
    let ids: Vec<u32> = packed.object_draw_data.iter().map(|o| o.object_id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
}

#[test]
fn multi_slot_meshes_get_one_table_entry_per_slot() {
    let mut scene = Scene::new();
    let mesh = scene.assets.add_mesh(two_slot_mesh());
    let a = scene.assets.add_material(color("a", 0.1));
    let b = scene.assets.add_material(color("b", 0.2));

    let mut first = RenderObject::new(mesh, a, Mat4::IDENTITY);
    first.materials = smallvec![a, b];
    let mut second = RenderObject::new(mesh, b, Mat4::IDENTITY);
    second.materials = smallvec![b, a];
    scene.spawn(first);
    scene.spawn(second);
    scene.prepare_render_scene(false);

    let packed = scene.render_scene().packed();
    assert_eq!(packed.material_table, vec![0, 1, 1, 0]);
    assert_eq!(packed.object_draw_data[1].material_table_offset, 2);
    // each slot starts its own meshlet
    let slots: Vec<u32> = packed.meshlets.iter().map(|m| m.material_local_index).collect();
    assert_eq!(slots, vec![0, 1]);
}

#[test]
fn slots_without_a_material_share_the_default() {
    let mut scene = Scene::new();
    let mesh = scene.assets.add_mesh(two_slot_mesh());
    let a = scene.assets.add_material(color("a", 0.1));
    // only slot 0 is assigned
    scene.spawn(RenderObject::new(mesh, a, Mat4::IDENTITY));
    scene.spawn(RenderObject::new(mesh, a, Mat4::IDENTITY));
    scene.prepare_render_scene(false);

    let render = scene.render_scene();
    assert_eq!(render.individual_material_count(), 2);
    assert_eq!(render.packed().material_table, vec![0, 1, 0, 1]);
    assert!(render.material_from_id(1).is_none(), "default slot carries no asset");
}

// ============================================================================
// Invalidation
// ============================================================================

#[test]
fn unchanged_scenes_are_not_repacked() {
    let mut scene = Scene::new();
    let mesh = scene.assets.add_mesh(MeshAsset::cube("cube", 1.0));
    let material = scene.assets.add_material(color("m", 1.0));
    let id = scene.spawn(RenderObject::new(mesh, material, Mat4::IDENTITY));

    assert!(scene.prepare_render_scene(false));
    assert!(!scene.prepare_render_scene(false));
    assert!(scene.prepare_render_scene(true), "forced repack");

    scene.set_transform(id, Mat4::from_translation(Vec3::Y));
    assert!(scene.prepare_render_scene(false));
    let transform = scene.render_scene().packed().object_draw_data[0].transform;
    assert_eq!(transform, Mat4::from_translation(Vec3::Y));

    scene.despawn(id);
    assert!(scene.prepare_render_scene(false));
    assert_eq!(scene.render_scene().render_object_count(), 0);
}

#[test]
fn late_loaded_meshes_appear_after_a_repack() {
    let mut scene = Scene::new();
    let mesh = scene.assets.reserve_mesh();
    let material = scene.assets.add_material(color("m", 1.0));
    scene.spawn(RenderObject::new(mesh, material, Mat4::IDENTITY));
    scene.prepare_render_scene(false);
    assert_eq!(scene.render_scene().render_object_count(), 0);
    assert_eq!(scene.render_scene().registered_count(), 1);

    scene.assets.finish_mesh(mesh, MeshAsset::quad("q", Vec2::ZERO, Vec2::ONE));
    // the asset store does not invalidate the scene by itself
    assert!(!scene.prepare_render_scene(false));
    assert!(scene.prepare_render_scene(true));
    assert_eq!(scene.render_scene().render_object_count(), 1);
}

#[test]
fn normal_transform_is_the_inverse_transpose() {
    let mut scene = Scene::new();
    let mesh = scene.assets.add_mesh(MeshAsset::cube("cube", 1.0));
    let material = scene.assets.add_material(color("m", 1.0));
    let transform = Mat4::from_scale(Vec3::new(2.0, 1.0, 0.5));
    scene.spawn(RenderObject::new(mesh, material, transform));
    scene.prepare_render_scene(false);

    let object = scene.render_scene().packed().object_draw_data[0];
    let expected = transform.inverse().transpose();
    assert!(object.normal_transform.abs_diff_eq(expected, 1e-6));
    assert_eq!(object.bounding_sphere[3], MeshAsset::cube("cube", 1.0).bounding_radius);
}
