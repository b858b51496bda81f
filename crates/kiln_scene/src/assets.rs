//! Minimal asset store.
//!
//! Stands in for the engine's asset manager: handles resolve to shared assets
//! once they are loaded. The renderer only ever asks through [`AssetResolver`],
//! so an asset that is still loading, failed to load or was removed looks the
//! same to it: `None`, which it answers with a default resource.

use std::sync::Arc;

use parking_lot::RwLock;
use slotmap::{SlotMap, new_key_type};

use crate::material::Material;
use crate::mesh::MeshAsset;

new_key_type! {
    pub struct MeshHandle;
    pub struct MaterialHandle;
}

/// Load state of one asset slot.
#[derive(Debug, Clone)]
pub enum AssetState<T> {
    Loading,
    Loaded(Arc<T>),
    Failed(String),
}

impl<T> AssetState<T> {
    fn loaded(&self) -> Option<Arc<T>> {
        match self {
            Self::Loaded(asset) => Some(Arc::clone(asset)),
            Self::Loading | Self::Failed(_) => None,
        }
    }
}

/// Read interface the render scene resolves handles through.
pub trait AssetResolver {
    fn mesh(&self, handle: MeshHandle) -> Option<Arc<MeshAsset>>;
    fn material(&self, handle: MaterialHandle) -> Option<Arc<Material>>;
}

/// Thread-safe handle -> asset table. Loaders may fill slots from other threads.
#[derive(Default)]
pub struct AssetStore {
    meshes: RwLock<SlotMap<MeshHandle, AssetState<MeshAsset>>>,
    materials: RwLock<SlotMap<MaterialHandle, AssetState<Material>>>,
}

impl AssetStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mesh(&self, mesh: MeshAsset) -> MeshHandle {
        self.meshes.write().insert(AssetState::Loaded(Arc::new(mesh)))
    }

    /// Reserves a handle whose asset is still being loaded.
    pub fn reserve_mesh(&self) -> MeshHandle {
        self.meshes.write().insert(AssetState::Loading)
    }

    pub fn finish_mesh(&self, handle: MeshHandle, mesh: MeshAsset) {
        if let Some(slot) = self.meshes.write().get_mut(handle) {
            *slot = AssetState::Loaded(Arc::new(mesh));
        }
    }

    pub fn fail_mesh(&self, handle: MeshHandle, reason: impl Into<String>) {
        if let Some(slot) = self.meshes.write().get_mut(handle) {
            *slot = AssetState::Failed(reason.into());
        }
    }

    pub fn remove_mesh(&self, handle: MeshHandle) {
        self.meshes.write().remove(handle);
    }

    pub fn add_material(&self, material: Material) -> MaterialHandle {
        self.materials
            .write()
            .insert(AssetState::Loaded(Arc::new(material)))
    }

    pub fn reserve_material(&self) -> MaterialHandle {
        self.materials.write().insert(AssetState::Loading)
    }

    /// Replaces a material in place (hot reload, editor edits).
    pub fn update_material(&self, handle: MaterialHandle, material: Material) {
        if let Some(slot) = self.materials.write().get_mut(handle) {
            *slot = AssetState::Loaded(Arc::new(material));
        }
    }

    pub fn fail_material(&self, handle: MaterialHandle, reason: impl Into<String>) {
        if let Some(slot) = self.materials.write().get_mut(handle) {
            *slot = AssetState::Failed(reason.into());
        }
    }

    pub fn remove_material(&self, handle: MaterialHandle) {
        self.materials.write().remove(handle);
    }

    #[must_use]
    pub fn mesh_state(&self, handle: MeshHandle) -> Option<AssetState<MeshAsset>> {
        self.meshes.read().get(handle).cloned()
    }
}

impl AssetResolver for AssetStore {
    fn mesh(&self, handle: MeshHandle) -> Option<Arc<MeshAsset>> {
        self.meshes.read().get(handle).and_then(AssetState::loaded)
    }

    fn material(&self, handle: MaterialHandle) -> Option<Arc<Material>> {
        self.materials.read().get(handle).and_then(AssetState::loaded)
    }
}
