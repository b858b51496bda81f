//! Headless Demo
//!
//! Renders a procedural scene (a grid of cubes and spheres on a ground plane)
//! for a few frames and logs the culling statistics of each.
//!
//! ```text
//! cargo run -p headless -- [frames] [width] [height]
//! ```
//!
//! Falls back to the software device when no wgpu adapter is available.

use glam::{Mat4, Vec2, Vec3, Vec4};
use kiln::prelude::*;
use kiln::render::GtaoSettings;
use kiln::render::device::wgpu::WgpuDeviceSettings;

fn build_scene() -> Scene {
    let mut scene = Scene::new();

    let cube = scene.assets.add_mesh(MeshAsset::cube("Cube", 0.8));
    let sphere = scene.assets.add_mesh(MeshAsset::uv_sphere("Sphere", 0.45, 32, 16));
    let ground = scene
        .assets
        .add_mesh(MeshAsset::quad("Ground", Vec2::splat(-20.0), Vec2::splat(20.0)));

    let floor = scene
        .assets
        .add_material(Material::new("Floor", Vec4::new(0.6, 0.6, 0.6, 1.0)).with_pbr(0.0, 0.9));
    scene.spawn(RenderObject::new(
        ground,
        floor,
        Mat4::from_rotation_x(-std::f32::consts::FRAC_PI_2),
    ));

    let palette = [
        Vec4::new(0.9, 0.2, 0.2, 1.0),
        Vec4::new(0.2, 0.8, 0.3, 1.0),
        Vec4::new(0.2, 0.4, 0.9, 1.0),
        Vec4::new(0.9, 0.8, 0.2, 1.0),
    ];
    let materials: Vec<_> = palette
        .iter()
        .enumerate()
        .map(|(i, &color)| {
            let roughness = 0.2 + 0.2 * i as f32;
            scene
                .assets
                .add_material(Material::new(format!("Paint {i}"), color).with_pbr(i as f32 / 3.0, roughness))
        })
        .collect();

    for z in -8i32..8 {
        for x in -8..8 {
            let mesh = if (x + z) % 2 == 0 { cube } else { sphere };
            let material = materials[((x * 7 + z * 3).rem_euclid(4)) as usize];
            let position = Vec3::new(x as f32 * 2.0, 0.5, z as f32 * 2.0);
            scene.spawn(RenderObject::new(mesh, material, Mat4::from_translation(position)));
        }
    }

    scene.add_light(
        Light::directional(Vec3::new(-0.4, -1.0, -0.3).normalize(), Vec3::ONE, 3.0).with_shadows(),
    );
    scene.add_light(Light::point(Vec3::new(0.0, 3.0, 0.0), Vec3::new(1.0, 0.6, 0.3), 20.0, 12.0));
    scene
}

fn run<D: RenderDevice>(device: D, frames: u32, width: u32, height: u32) -> anyhow::Result<()> {
    let settings = RendererSettings {
        collect_statistics: true,
        gtao: GtaoSettings {
            slice_count: 3,
            ..Default::default()
        },
        ..Default::default()
    };
    log::info!("Settings: {}", serde_json::to_string_pretty(&settings)?);

    let mut scene = build_scene();
    let mut renderer = SceneRenderer::new(device, width, height, settings)?;

    for frame in 0..frames {
        let angle = frame as f32 * 0.25;
        let eye = Vec3::new(angle.cos() * 18.0, 9.0, angle.sin() * 18.0);
        let camera = Camera::perspective(1.0, width as f32 / height as f32, 0.1, 200.0)
            .looking_at(eye, Vec3::ZERO, Vec3::Y);

        renderer.on_render_editor(&mut scene, &camera)?;

        let report = renderer.last_report();
        log::info!(
            "Frame {frame}: {} passes ({} culled), {} barriers, {:.1} KiB transient",
            report.passes.len(),
            report.culled_passes.len(),
            report.barrier_count,
            renderer.frame_total_gpu_allocation_size() as f64 / 1024.0
        );
        if let Some(stats) = renderer.frame_statistics() {
            log::info!(
                "  objects {}/{}, meshlets {}/{}, triangles {}",
                stats.visible_objects,
                stats.total_objects,
                stats.visible_meshlets,
                stats.total_meshlets,
                stats.visible_triangles
            );
        }
    }

    renderer.shutdown()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1).map(|a| a.parse::<u32>());
    let frames = args.next().transpose()?.unwrap_or(4);
    let width = args.next().transpose()?.unwrap_or(320);
    let height = args.next().transpose()?.unwrap_or(180);

    let adapter = WgpuDeviceSettings {
        force_fallback_adapter: std::env::var_os("KILN_FALLBACK_ADAPTER").is_some(),
        ..Default::default()
    };
    match pollster::block_on(WgpuDevice::request(&adapter)) {
        Ok(device) => run(device, frames, width, height),
        Err(err) => {
            log::warn!("wgpu unavailable ({err}), using the software device");
            run(SoftwareDevice::new(), frames, width, height)
        }
    }
}
