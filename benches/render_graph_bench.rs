//! Render graph and frame benchmarks on the software device.
//!
//! ```text
//! cargo bench --bench render_graph_bench
//! ```

use std::hint::black_box;

use bumpalo::Bump;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use glam::{Mat4, Vec3, Vec4};
use kiln::core::BufferId;
use kiln::render::command::ClearValue;
use kiln::render::graph::{BufferHandle, ImageHandle, PassResources, RenderContext};
use kiln::render::{
    Access, BufferDesc, BufferUsage, GraphPass, GtaoSettings, ImageDesc, ImageFormat, ImageUsage,
    PassKind, RenderDevice, RenderGraph, RendererSettings, SceneRenderer, ShadowSettings,
    SoftwareDevice, TransientPool,
};
use kiln::scene::{Camera, Material, MeshAsset, RenderObject, Scene};

#[derive(Clone, Copy)]
struct ClearPass {
    target: ImageHandle,
}

impl<'a> GraphPass<'a> for ClearPass {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        ctx.clear_image(resources.image(self.target), ClearValue::Float([0.0; 4]));
    }
}

#[derive(Clone, Copy)]
struct PublishPass {
    target: BufferHandle,
}

impl<'a> GraphPass<'a> for PublishPass {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        ctx.clear_buffer(resources.buffer(self.target));
    }
}

/// Chain of `passes` image passes, every other one orphaned so culling has work.
fn build_and_compile(
    device: &mut SoftwareDevice,
    pool: &mut TransientPool,
    output: BufferId,
    passes: usize,
) -> usize {
    let arena = Bump::new();
    let mut graph = RenderGraph::new(&arena);
    let output = graph.import_buffer("output", output);

    let mut previous: Option<ImageHandle> = None;
    for i in 0..passes {
        let keep = i % 2 == 0;
        let pass = *graph.add_pass("Stage", PassKind::Compute, |b| {
            if let Some(prev) = previous.filter(|_| keep) {
                b.sample_image(prev);
            }
            let target = b.create_image(ImageDesc::d2(
                "stage",
                64,
                64,
                ImageFormat::Rgba16Float,
                ImageUsage::STORAGE | ImageUsage::SAMPLED,
            ));
            ClearPass {
                target: b.write_image(target, Access::ShaderWrite),
            }
        });
        if keep {
            previous = Some(pass.target);
        }
    }
    if let Some(last) = previous {
        graph.add_pass("Publish", PassKind::Compute, |b| {
            b.sample_image(last);
            PublishPass {
                target: b.write_buffer(output, Access::TransferWrite),
            }
        });
    }

    let compiled = graph.compile(device, pool).unwrap();
    compiled.report().passes.len()
}

fn bench_graph_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_compile");
    for passes in [16, 64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(passes), &passes, |b, &passes| {
            let mut device = SoftwareDevice::new();
            let mut pool = TransientPool::new();
            let output = device
                .create_buffer(&BufferDesc {
                    label: "output",
                    size: 16,
                    usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
                })
                .unwrap();
            b.iter(|| {
                let kept = build_and_compile(&mut device, &mut pool, output, black_box(passes));
                pool.end_frame(&mut device, 4);
                kept
            });
        });
    }
    group.finish();
}

fn grid_scene(side: i32) -> Scene {
    let mut scene = Scene::new();
    let cube = scene.assets.add_mesh(MeshAsset::cube("cube", 0.8));
    let material = scene.assets.add_material(Material::new("m", Vec4::ONE));
    for z in 0..side {
        for x in 0..side {
            let position = Vec3::new((x - side / 2) as f32, 0.0, -(z as f32) - 2.0);
            scene.spawn(RenderObject::new(cube, material, Mat4::from_translation(position)));
        }
    }
    scene
}

fn bench_software_frame(c: &mut Criterion) {
    let settings = RendererSettings {
        gtao: GtaoSettings {
            enabled: false,
            ..Default::default()
        },
        shadows: ShadowSettings {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let camera = Camera::perspective(1.0, 1.0, 0.1, 100.0)
        .looking_at(Vec3::new(0.0, 4.0, 4.0), Vec3::new(0.0, 0.0, -4.0), Vec3::Y);

    let mut group = c.benchmark_group("software_frame");
    group.sample_size(10);
    for side in [4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(side * side), &side, |b, &side| {
            let mut scene = grid_scene(side);
            let mut renderer = SceneRenderer::new(SoftwareDevice::new(), 64, 64, settings).unwrap();
            b.iter(|| renderer.on_render_editor(&mut scene, black_box(&camera)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_graph_compile, bench_software_frame);
criterion_main!(benches);
