use glam::Mat4;
use slotmap::SlotMap;

use crate::assets::{AssetStore, MaterialHandle};
use crate::light::{Light, LightId, Skylight};
use crate::material::Material;
use crate::render_scene::{RenderObject, RenderObjectId, RenderScene};

/// The scene a renderer draws: assets, render objects, lights and the skylight.
///
/// This is the narrow stand-in for the entity/component world; it owns the
/// [`RenderScene`] and forwards registration so every topology change
/// invalidates it.
#[derive(Default)]
pub struct Scene {
    pub assets: AssetStore,
    render_scene: RenderScene,
    lights: SlotMap<LightId, Light>,
    skylight: Option<Skylight>,
}

impl Scene {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, object: RenderObject) -> RenderObjectId {
        self.render_scene.register(object)
    }

    pub fn despawn(&mut self, id: RenderObjectId) {
        self.render_scene.unregister(id);
    }

    pub fn set_transform(&mut self, id: RenderObjectId, transform: Mat4) {
        self.render_scene.set_transform(id, transform);
    }

    /// Replaces a material asset and invalidates the render scene.
    pub fn update_material(&mut self, handle: MaterialHandle, material: Material) {
        self.assets.update_material(handle, material);
        self.render_scene.invalidate();
    }

    pub fn add_light(&mut self, light: Light) -> LightId {
        self.lights.insert(light)
    }

    pub fn remove_light(&mut self, id: LightId) {
        self.lights.remove(id);
    }

    pub fn set_skylight(&mut self, skylight: Option<Skylight>) {
        self.skylight = skylight;
    }

    #[must_use]
    pub fn skylight(&self) -> Option<&Skylight> {
        self.skylight.as_ref()
    }

    /// Visits every light component once.
    pub fn for_each_light(&self, mut visit: impl FnMut(&Light)) {
        for light in self.lights.values() {
            visit(light);
        }
    }

    #[must_use]
    pub fn render_scene(&self) -> &RenderScene {
        &self.render_scene
    }

    /// Repacks the render scene if anything changed (or `force` is set).
    /// Returns whether a rebuild happened.
    pub fn prepare_render_scene(&mut self, force: bool) -> bool {
        if !force && !self.render_scene.is_invalid() {
            return false;
        }
        self.render_scene.prepare(&self.assets);
        self.render_scene.set_valid();
        true
    }
}
