//! GPU Scene Buffers
//!
//! Persistent device copies of the packed render scene. They are rebuilt
//! whenever the render scene was invalidated (or `SceneRenderer::invalidate`
//! was called) and imported into every frame graph; no pass writes them.

use kiln_core::{BufferId, ImageId, PipelineId, Result};
use kiln_scene::{GpuMaterial, GpuSceneHeader, RenderScene};

use super::SceneHandles;
use crate::defaults::DefaultResources;
use crate::device::{BufferDesc, RenderDevice};
use crate::graph::RenderGraph;

/// What the GBuffer pass binds for one individual material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialBinding {
    /// Material-provided GBuffer pipeline; `None` uses the built-in one.
    pub pipeline: Option<PipelineId>,
    pub base_color: ImageId,
}

#[derive(Debug)]
pub struct GpuScene {
    header: BufferId,
    objects: BufferId,
    meshes: BufferId,
    meshlets: BufferId,
    meshlet_vertices: BufferId,
    meshlet_triangles: BufferId,
    vertices: BufferId,
    material_table: BufferId,
    materials: BufferId,
    header_data: GpuSceneHeader,
    material_bindings: Vec<MaterialBinding>,
}

fn upload<D: RenderDevice + ?Sized, T: bytemuck::Pod>(
    device: &mut D,
    label: &'static str,
    data: &[T],
) -> Result<BufferId> {
    let id = device.create_buffer(&BufferDesc::storage::<T>(label, data.len() as u32))?;
    if !data.is_empty() {
        device.write_buffer(id, 0, bytemuck::cast_slice(data))?;
    }
    Ok(id)
}

impl GpuScene {
    /// Uploads the packed records of `scene`. Missing materials, textures and
    /// pipelines resolve to the defaults here, once per rebuild.
    pub fn upload<D: RenderDevice + ?Sized>(
        device: &mut D,
        scene: &RenderScene,
        defaults: &DefaultResources,
    ) -> Result<Self> {
        let packed = scene.packed();

        let mut gpu_materials = Vec::with_capacity(packed.materials.len());
        let mut material_bindings = Vec::with_capacity(packed.materials.len());
        for id in 0..scene.individual_material_count() {
            let Some(material) = scene.material_from_id(id) else {
                gpu_materials.push(defaults.gpu_material());
                material_bindings.push(MaterialBinding {
                    pipeline: None,
                    base_color: defaults.white_texture,
                });
                continue;
            };

            let pipeline = material.pipeline.filter(|&pipeline| {
                let known = device.contains_pipeline(pipeline);
                if !known {
                    log::warn!(
                        "Material '{}': GBuffer pipeline is not available, using the default",
                        material.name
                    );
                }
                known
            });
            let texture = material.base_color_texture();
            let base_color = defaults.texture_or_white(device, texture);
            if texture.is_some() && base_color == defaults.white_texture {
                log::warn!("Material '{}': base color texture is missing, using white", material.name);
            }

            gpu_materials.push(material.to_gpu());
            material_bindings.push(MaterialBinding { pipeline, base_color });
        }

        let header_data = packed.header;
        let gpu = Self {
            header: upload(device, "Scene Header", std::slice::from_ref(&header_data))?,
            objects: upload(device, "Object Draw Data", &packed.object_draw_data)?,
            meshes: upload(device, "GPU Meshes", &packed.meshes)?,
            meshlets: upload(device, "GPU Meshlets", &packed.meshlets)?,
            meshlet_vertices: upload(device, "Meshlet Vertices", &packed.meshlet_vertices)?,
            meshlet_triangles: upload(device, "Meshlet Triangles", &packed.meshlet_triangles)?,
            vertices: upload(device, "Vertices", &packed.vertices)?,
            material_table: upload(device, "Material Table", &packed.material_table)?,
            materials: upload::<D, GpuMaterial>(device, "Materials", &gpu_materials)?,
            header_data,
            material_bindings,
        };

        log::debug!(
            "GpuScene uploaded: {} objects, {} meshlets, {} indices, {} materials",
            gpu.render_object_count(),
            gpu.meshlet_count(),
            gpu.index_count(),
            gpu.individual_material_count()
        );
        Ok(gpu)
    }

    /// Brings every scene buffer into `graph`.
    pub fn import(&self, graph: &mut RenderGraph<'_>) -> SceneHandles {
        SceneHandles {
            header: graph.import_buffer("Scene Header", self.header),
            objects: graph.import_buffer("Object Draw Data", self.objects),
            meshes: graph.import_buffer("GPU Meshes", self.meshes),
            meshlets: graph.import_buffer("GPU Meshlets", self.meshlets),
            meshlet_vertices: graph.import_buffer("Meshlet Vertices", self.meshlet_vertices),
            meshlet_triangles: graph.import_buffer("Meshlet Triangles", self.meshlet_triangles),
            vertices: graph.import_buffer("Vertices", self.vertices),
            material_table: graph.import_buffer("Material Table", self.material_table),
            materials: graph.import_buffer("Materials", self.materials),
        }
    }

    pub fn destroy<D: RenderDevice + ?Sized>(self, device: &mut D) {
        for id in [
            self.header,
            self.objects,
            self.meshes,
            self.meshlets,
            self.meshlet_vertices,
            self.meshlet_triangles,
            self.vertices,
            self.material_table,
            self.materials,
        ] {
            device.destroy_buffer(id);
        }
    }

    // ========================================================================
    // Read Interface
    // ========================================================================

    #[must_use]
    pub fn render_object_count(&self) -> u32 {
        self.header_data.object_count
    }

    #[must_use]
    pub fn meshlet_count(&self) -> u32 {
        self.header_data.meshlet_count
    }

    #[must_use]
    pub fn index_count(&self) -> u32 {
        self.header_data.index_count
    }

    #[must_use]
    pub fn individual_material_count(&self) -> u32 {
        self.material_bindings.len() as u32
    }

    #[must_use]
    pub fn object_draw_data_buffer(&self) -> BufferId {
        self.objects
    }

    #[must_use]
    pub fn gpu_meshes_buffer(&self) -> BufferId {
        self.meshes
    }

    #[must_use]
    pub fn gpu_meshlets_buffer(&self) -> BufferId {
        self.meshlets
    }

    #[must_use]
    pub fn gpu_scene_buffer(&self) -> BufferId {
        self.header
    }

    #[must_use]
    pub fn material_table_buffer(&self) -> BufferId {
        self.material_table
    }

    /// GBuffer bindings of material `id`, revalidated against the device:
    /// a texture destroyed since the upload falls back to white.
    #[must_use]
    pub fn material_binding<D: RenderDevice + ?Sized>(
        &self,
        id: u32,
        device: &D,
        defaults: &DefaultResources,
    ) -> MaterialBinding {
        let Some(binding) = self.material_bindings.get(id as usize) else {
            return MaterialBinding {
                pipeline: None,
                base_color: defaults.white_texture,
            };
        };
        MaterialBinding {
            pipeline: binding.pipeline.filter(|&p| device.contains_pipeline(p)),
            base_color: defaults.texture_or_white(device, Some(binding.base_color)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::{Mat4, Vec2, Vec4};
    use kiln_scene::{Material, MeshAsset, ObjectDrawData, RenderObject, Scene};

    use super::*;
    use crate::device::software::StandardGBuffer;
    use crate::device::SoftwareDevice;

    #[test]
    fn uploads_packed_records() {
        let mut device = SoftwareDevice::new();
        let defaults = DefaultResources::new(&mut device).unwrap();
        let mut scene = Scene::new();
        let mesh = scene.assets.add_mesh(MeshAsset::quad("q", Vec2::ZERO, Vec2::ONE));
        let material = scene.assets.add_material(Material::new("red", Vec4::new(1.0, 0.0, 0.0, 1.0)));
        scene.spawn(RenderObject::new(mesh, material, Mat4::IDENTITY));
        scene.prepare_render_scene(true);

        let gpu = GpuScene::upload(&mut device, scene.render_scene(), &defaults).unwrap();
        assert_eq!(gpu.render_object_count(), 1);
        assert_eq!(gpu.individual_material_count(), 1);
        let objects = device.read_buffer_as::<ObjectDrawData>(gpu.object_draw_data_buffer()).unwrap();
        assert_eq!(objects[0].object_id, 0);
        let materials = device.read_buffer_as::<GpuMaterial>(gpu.materials).unwrap();
        assert_eq!(materials[0].base_color, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn stale_pipelines_and_textures_fall_back() {
        let mut device = SoftwareDevice::new();
        let defaults = DefaultResources::new(&mut device).unwrap();
        let pipeline = device.register_gbuffer_shader(Arc::new(StandardGBuffer));
        let texture = device
            .create_image(&crate::device::ImageDesc::d2(
                "t",
                1,
                1,
                crate::device::ImageFormat::Rgba8Unorm,
                crate::device::ImageUsage::SAMPLED,
            ))
            .unwrap();

        let mut scene = Scene::new();
        let mesh = scene.assets.add_mesh(MeshAsset::quad("q", Vec2::ZERO, Vec2::ONE));
        let material = scene.assets.add_material(
            Material::new("custom", Vec4::ONE)
                .with_pipeline(pipeline)
                .with_base_color_texture(texture),
        );
        scene.spawn(RenderObject::new(mesh, material, Mat4::IDENTITY));
        scene.prepare_render_scene(true);
        let gpu = GpuScene::upload(&mut device, scene.render_scene(), &defaults).unwrap();

        let binding = gpu.material_binding(0, &device, &defaults);
        assert_eq!(binding.pipeline, Some(pipeline));
        assert_eq!(binding.base_color, texture);

        device.remove_pipeline(pipeline);
        device.destroy_image(texture);
        let binding = gpu.material_binding(0, &device, &defaults);
        assert_eq!(binding.pipeline, None);
        assert_eq!(binding.base_color, defaults.white_texture);
    }
}
