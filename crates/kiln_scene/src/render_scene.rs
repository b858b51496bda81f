//! Render Scene
//!
//! Registered render objects and the packed GPU records built from them.
//!
//! ```text
//!  register()/unregister()/set_transform()
//!            │  (marks the scene invalid)
//!            ▼
//!  ┌──────────────────┐   prepare(assets)   ┌─────────────────────────────┐
//!  │ SlotMap<Objects> │ ──────────────────► │ packed records              │
//!  └──────────────────┘                     │  ObjectDrawData[objectID]   │
//!                                           │  GpuMesh[meshID]            │
//!                                           │  GpuMeshlet / streams       │
//!                                           │  material table + list      │
//!                                           └─────────────────────────────┘
//! ```
//!
//! Object IDs are dense indices into the packed draw-data array and are only
//! stable until the next `prepare`. Meshes are deduplicated by handle and
//! materials by handle; unresolvable materials share one default slot whose
//! entry in the material list is `None`.

use std::sync::Arc;

use glam::Mat4;
use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::assets::{AssetResolver, MaterialHandle, MeshHandle};
use crate::gpu_types::{
    GpuMesh, GpuMeshlet, GpuSceneHeader, GpuVertex, MAX_SCENE_MESHLETS, ObjectDrawData,
};
use crate::material::Material;

new_key_type! {
    pub struct RenderObjectId;
}

/// A mesh-bearing entity registered for rendering.
#[derive(Debug, Clone)]
pub struct RenderObject {
    pub mesh: MeshHandle,
    /// One material per mesh material slot; missing slots use the default material.
    pub materials: SmallVec<[MaterialHandle; 4]>,
    pub transform: Mat4,
    pub layer: u32,
}

impl RenderObject {
    #[must_use]
    pub fn new(mesh: MeshHandle, material: MaterialHandle, transform: Mat4) -> Self {
        let mut materials = SmallVec::new();
        materials.push(material);
        Self {
            mesh,
            materials,
            transform,
            layer: 0,
        }
    }
}

/// Packed, upload-ready scene records.
#[derive(Debug, Default, Clone)]
pub struct PackedScene {
    pub header: GpuSceneHeader,
    pub object_draw_data: Vec<ObjectDrawData>,
    pub meshes: Vec<GpuMesh>,
    pub meshlets: Vec<GpuMeshlet>,
    pub meshlet_vertices: Vec<u32>,
    pub meshlet_triangles: Vec<u32>,
    pub vertices: Vec<GpuVertex>,
    /// Per-object material slots (indexed by `materialTableOffset + slot`).
    pub material_table: Vec<u32>,
    /// Individual materials; `None` means "use the default material".
    pub materials: Vec<Option<Arc<Material>>>,
    /// Registered id of each packed object, by object ID.
    pub object_ids: Vec<RenderObjectId>,
}

#[derive(Default)]
pub struct RenderScene {
    objects: SlotMap<RenderObjectId, RenderObject>,
    packed: PackedScene,
    invalid: bool,
}

impl RenderScene {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, object: RenderObject) -> RenderObjectId {
        self.invalid = true;
        self.objects.insert(object)
    }

    pub fn unregister(&mut self, id: RenderObjectId) -> Option<RenderObject> {
        let removed = self.objects.remove(id);
        if removed.is_some() {
            self.invalid = true;
        }
        removed
    }

    pub fn set_transform(&mut self, id: RenderObjectId, transform: Mat4) {
        if let Some(object) = self.objects.get_mut(id) {
            object.transform = transform;
            self.invalid = true;
        }
    }

    pub fn set_materials(&mut self, id: RenderObjectId, materials: &[MaterialHandle]) {
        if let Some(object) = self.objects.get_mut(id) {
            object.materials = SmallVec::from_slice(materials);
            self.invalid = true;
        }
    }

    #[must_use]
    pub fn get(&self, id: RenderObjectId) -> Option<&RenderObject> {
        self.objects.get(id)
    }

    /// Number of registered objects (packed or not).
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.invalid
    }

    pub fn invalidate(&mut self) {
        self.invalid = true;
    }

    pub fn set_valid(&mut self) {
        self.invalid = false;
    }

    // ========================================================================
    // Read Interface
    // ========================================================================

    #[must_use]
    pub fn render_object_count(&self) -> u32 {
        self.packed.object_draw_data.len() as u32
    }

    #[must_use]
    pub fn meshlet_count(&self) -> u32 {
        self.packed.header.meshlet_count
    }

    /// Sum of `triangles * 3` over every packed object.
    #[must_use]
    pub fn index_count(&self) -> u32 {
        self.packed.header.index_count
    }

    #[must_use]
    pub fn individual_material_count(&self) -> u32 {
        self.packed.materials.len() as u32
    }

    /// `None` for out-of-range ids and for the shared default slot.
    #[must_use]
    pub fn material_from_id(&self, id: u32) -> Option<&Arc<Material>> {
        self.packed.materials.get(id as usize).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn packed(&self) -> &PackedScene {
        &self.packed
    }

    // ========================================================================
    // Packing
    // ========================================================================

    /// Rebuilds the packed records from the registered objects.
    ///
    /// Objects whose mesh does not resolve are skipped; material slots that do
    /// not resolve fall back to the default material. Objects that would push
    /// the scene past [`MAX_SCENE_MESHLETS`] are skipped.
    pub fn prepare(&mut self, assets: &dyn AssetResolver) {
        let mut packed = PackedScene::default();
        let mut mesh_ids: FxHashMap<MeshHandle, (u32, u32)> = FxHashMap::default();
        let mut material_ids: FxHashMap<MaterialHandle, u32> = FxHashMap::default();
        let mut default_material: Option<u32> = None;
        let mut meshlet_total: u32 = 0;
        let mut index_total: u32 = 0;

        for (id, object) in &self.objects {
            let Some(mesh) = assets.mesh(object.mesh) else {
                log::warn!("Render object {id:?}: mesh is not loaded, skipping");
                continue;
            };
            if mesh.meshlets.is_empty() {
                continue;
            }

            let meshlet_count = mesh.meshlets.len() as u32;
            if meshlet_total + meshlet_count > MAX_SCENE_MESHLETS {
                log::warn!(
                    "Render object {id:?}: scene meshlet limit ({MAX_SCENE_MESHLETS}) reached, skipping"
                );
                continue;
            }

            let (mesh_id, triangle_count) = *mesh_ids.entry(object.mesh).or_insert_with(|| {
                let mesh_id = packed.meshes.len() as u32;
                pack_mesh(&mut packed, &mesh);
                (mesh_id, mesh.triangle_count())
            });

            let material_table_offset = packed.material_table.len() as u32;
            for slot in 0..mesh.material_slot_count().max(1) {
                let resolved = object
                    .materials
                    .get(slot as usize)
                    .and_then(|&handle| assets.material(handle).map(|m| (handle, m)));

                let index = if let Some((handle, material)) = resolved {
                    *material_ids.entry(handle).or_insert_with(|| {
                        packed.materials.push(Some(material));
                        packed.materials.len() as u32 - 1
                    })
                } else {
                    log::warn!("Render object {id:?}: material slot {slot} unresolved, using default");
                    *default_material.get_or_insert_with(|| {
                        packed.materials.push(None);
                        packed.materials.len() as u32 - 1
                    })
                };
                packed.material_table.push(index);
            }

            let transform = object.transform;
            let center = mesh.bounding_center;
            let object_id = packed.object_draw_data.len() as u32;
            packed.object_draw_data.push(ObjectDrawData {
                transform,
                normal_transform: transform.inverse().transpose(),
                bounding_sphere: [center.x, center.y, center.z, mesh.bounding_radius],
                mesh_id,
                material_table_offset,
                object_id,
                layer: object.layer,
            });
            packed.object_ids.push(id);

            meshlet_total += meshlet_count;
            index_total += triangle_count * 3;
        }

        packed.header = GpuSceneHeader {
            object_count: packed.object_draw_data.len() as u32,
            mesh_count: packed.meshes.len() as u32,
            meshlet_count: meshlet_total,
            material_count: packed.materials.len() as u32,
            index_count: index_total,
            vertex_count: packed.vertices.len() as u32,
            _pad: [0; 2],
        };

        log::debug!(
            "RenderScene prepared: {} objects, {} meshes, {} meshlets, {} materials",
            packed.header.object_count,
            packed.header.mesh_count,
            packed.header.meshlet_count,
            packed.header.material_count
        );

        self.packed = packed;
    }
}

fn pack_mesh(packed: &mut PackedScene, mesh: &crate::mesh::MeshAsset) {
    let vertex_offset = packed.vertices.len() as u32;
    let meshlet_vertex_base = packed.meshlet_vertices.len() as u32;
    let meshlet_triangle_base = packed.meshlet_triangles.len() as u32;

    packed.meshes.push(GpuMesh {
        meshlet_start: packed.meshlets.len() as u32,
        meshlet_count: mesh.meshlets.len() as u32,
        vertex_offset,
        index_offset: meshlet_triangle_base * 3,
    });

    packed.vertices.extend(mesh.vertices.iter().map(|v| GpuVertex {
        position: v.position.to_array(),
        u: v.uv.x,
        normal: v.normal.to_array(),
        v: v.uv.y,
    }));
    packed
        .meshlet_vertices
        .extend_from_slice(&mesh.meshlet_vertices);
    packed
        .meshlet_triangles
        .extend_from_slice(&mesh.meshlet_triangles);
    packed.meshlets.extend(mesh.meshlets.iter().map(|m| GpuMeshlet {
        center: m.center.to_array(),
        radius: m.radius,
        vertex_offset: meshlet_vertex_base + m.vertex_offset,
        triangle_offset: meshlet_triangle_base + m.triangle_offset,
        vertex_count: m.vertex_count,
        triangle_count: m.triangle_count,
        material_local_index: m.material_slot,
        _pad: [0; 3],
    }));
}
