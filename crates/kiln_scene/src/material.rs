use glam::{Vec3, Vec4};
use kiln_core::{ImageId, PipelineId};
use smallvec::SmallVec;

use crate::gpu_types::GpuMaterial;

/// A surface material as provided by the asset layer.
///
/// The renderer never compiles shaders: `pipeline` is whatever the asset layer
/// managed to build for this material. `None`, or an id the device does not
/// know, makes the GBuffer generator use the engine default pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: Vec3,
    pub emissive_strength: f32,
    pub pipeline: Option<PipelineId>,
    /// Slot 0 is the base color map.
    pub textures: SmallVec<[Option<ImageId>; 4]>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::from("Default"),
            base_color: Vec4::ONE,
            metallic: 0.0,
            roughness: 0.5,
            emissive: Vec3::ZERO,
            emissive_strength: 1.0,
            pipeline: None,
            textures: SmallVec::new(),
        }
    }
}

impl Material {
    #[must_use]
    pub fn new(name: impl Into<String>, base_color: Vec4) -> Self {
        Self {
            name: name.into(),
            base_color,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_pbr(mut self, metallic: f32, roughness: f32) -> Self {
        self.metallic = metallic;
        self.roughness = roughness;
        self
    }

    #[must_use]
    pub fn with_emissive(mut self, emissive: Vec3, strength: f32) -> Self {
        self.emissive = emissive;
        self.emissive_strength = strength;
        self
    }

    #[must_use]
    pub fn with_pipeline(mut self, pipeline: PipelineId) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    #[must_use]
    pub fn with_base_color_texture(mut self, image: ImageId) -> Self {
        if self.textures.is_empty() {
            self.textures.push(Some(image));
        } else {
            self.textures[0] = Some(image);
        }
        self
    }

    #[must_use]
    pub fn base_color_texture(&self) -> Option<ImageId> {
        self.textures.first().copied().flatten()
    }

    #[must_use]
    pub fn to_gpu(&self) -> GpuMaterial {
        GpuMaterial {
            base_color: self.base_color.to_array(),
            emissive: [
                self.emissive.x,
                self.emissive.y,
                self.emissive.z,
                self.emissive_strength,
            ],
            params: [self.metallic, self.roughness.clamp(0.0, 1.0), 0.0, 0.0],
        }
    }
}
